//! Preview layout: where synced repositories live on disk and where they are
//! served over HTTP.
//!
//! `{repos_dir}/{repository}/{task_id}/` on disk maps to
//! `{base_url}/{repository}/{task_id}/`. Every path segment is sanitized so a
//! payload can never escape `repos_dir`.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::PreviewConfig;

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("Invalid preview path segment '{segment}'")]
    InvalidSegment { segment: String },

    #[error("Failed to prepare preview directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewLayout {
    repos_dir: PathBuf,
    base_url: String,
}

impl PreviewLayout {
    pub fn new(repos_dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            repos_dir: repos_dir.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &PreviewConfig) -> Self {
        Self::new(config.repos_dir.clone(), config.base_url.clone())
    }

    pub fn repos_dir(&self) -> &std::path::Path {
        &self.repos_dir
    }

    pub fn task_dir(&self, repository: &str, task_id: &str) -> Result<PathBuf, PreviewError> {
        let mut path = self.repos_dir.clone();
        for segment in Self::segments(repository, task_id)? {
            path.push(segment);
        }
        Ok(path)
    }

    pub fn preview_url(&self, repository: &str, task_id: &str) -> Result<String, PreviewError> {
        let segments = Self::segments(repository, task_id)?;
        Ok(format!("{}/{}/", self.base_url, segments.join("/")))
    }

    /// Create the task directory if missing and return it
    pub async fn ensure_task_dir(&self, repository: &str, task_id: &str) -> Result<PathBuf, PreviewError> {
        let path = self.task_dir(repository, task_id)?;
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|source| PreviewError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    /// `owner/name` repositories keep their slash as a directory level
    fn segments(repository: &str, task_id: &str) -> Result<Vec<String>, PreviewError> {
        let mut segments = repository
            .split('/')
            .map(sanitize_segment)
            .collect::<Result<Vec<_>, _>>()?;
        segments.push(sanitize_segment(task_id)?);
        Ok(segments)
    }
}

/// Replace anything outside `[A-Za-z0-9._-]` with `-`; reject empty and dot segments
pub fn sanitize_segment(segment: &str) -> Result<String, PreviewError> {
    let cleaned: String = segment
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return Err(PreviewError::InvalidSegment {
            segment: segment.to_string(),
        });
    }
    Ok(cleaned)
}
