//! Schedule entries: what to publish, and when.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde_json::Value;

use crate::config::{ConfigurationError, ScheduleEntryConfig};
use crate::messaging::TaskKind;

/// Firing rule of an entry
#[derive(Clone)]
pub enum ScheduleSpec {
    /// Boundaries at `start + k * interval`, k >= 1
    Every(Duration),
    Cron {
        expression: String,
        schedule: Box<Schedule>,
    },
}

impl ScheduleSpec {
    pub fn every(interval: Duration) -> Result<Self, ConfigurationError> {
        if interval.is_zero() {
            return Err(ConfigurationError::invalid_value(
                "every_seconds",
                "0",
                "interval must be greater than 0",
            ));
        }
        Ok(Self::Every(interval))
    }

    /// Parse a 5-field (minute precision) or 6/7-field (with seconds) cron expression
    pub fn cron(expression: &str) -> Result<Self, ConfigurationError> {
        let trimmed = expression.trim();
        let fields = trimmed.split_whitespace().count();
        let normalized = match fields {
            // Cron crate expects 6-field expressions (with seconds)
            5 => format!("0 {trimmed}"),
            6 | 7 => trimmed.to_string(),
            n => {
                return Err(ConfigurationError::invalid_value(
                    "cron",
                    expression,
                    format!("expected 5, 6 or 7 fields, found {n}"),
                ))
            }
        };

        let schedule = Schedule::from_str(&normalized).map_err(|e| {
            ConfigurationError::invalid_value("cron", expression, format!("invalid cron expression: {e}"))
        })?;

        Ok(Self::Cron {
            expression: trimmed.to_string(),
            schedule: Box::new(schedule),
        })
    }

    /// Exactly one of `every_seconds` and `cron` must be set
    pub fn from_config(entry: &ScheduleEntryConfig) -> Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::invalid_schedule(entry.name.clone(), reason);

        match (entry.every_seconds, entry.cron.as_deref()) {
            (Some(seconds), None) => {
                Self::every(Duration::from_secs(seconds)).map_err(|e| invalid(e.to_string()))
            }
            (None, Some(expression)) => Self::cron(expression).map_err(|e| invalid(e.to_string())),
            (Some(_), Some(_)) => Err(invalid(
                "set either every_seconds or cron, not both".to_string(),
            )),
            (None, None) => Err(invalid("one of every_seconds or cron is required".to_string())),
        }
    }

    /// Next cron instant strictly after `now`; `None` for interval specs
    pub fn next_cron_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Every(_) => None,
            Self::Cron { schedule, .. } => schedule.after(&now).next(),
        }
    }
}

impl fmt::Debug for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Every(interval) => f.debug_tuple("Every").field(interval).finish(),
            Self::Cron { expression, .. } => f.debug_tuple("Cron").field(expression).finish(),
        }
    }
}

impl fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Every(interval) => write!(f, "every {}s", interval.as_secs_f64()),
            Self::Cron { expression, .. } => write!(f, "cron '{expression}'"),
        }
    }
}

/// Immutable, validated schedule entry
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub name: String,
    pub spec: ScheduleSpec,
    pub task_kind: TaskKind,
    pub payload: Value,
}

impl ScheduleEntry {
    pub fn new(name: impl Into<String>, spec: ScheduleSpec, task_kind: TaskKind, payload: Value) -> Self {
        Self {
            name: name.into(),
            spec,
            task_kind,
            payload,
        }
    }

    pub fn from_config(config: &ScheduleEntryConfig) -> Result<Self, ConfigurationError> {
        Ok(Self::new(
            config.name.clone(),
            ScheduleSpec::from_config(config)?,
            config.task_kind,
            config.payload.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn entry(every_seconds: Option<u64>, cron: Option<&str>) -> ScheduleEntryConfig {
        ScheduleEntryConfig {
            name: "poll".to_string(),
            every_seconds,
            cron: cron.map(str::to_string),
            task_kind: TaskKind::EmailPoll,
            payload: json!({}),
        }
    }

    #[test]
    fn test_interval_entry() {
        let spec = ScheduleSpec::from_config(&entry(Some(30), None)).unwrap();
        assert!(matches!(spec, ScheduleSpec::Every(d) if d == Duration::from_secs(30)));
        assert_eq!(spec.to_string(), "every 30s");
    }

    #[test]
    fn test_five_field_cron_gets_seconds() {
        let spec = ScheduleSpec::from_config(&entry(None, Some("*/15 * * * *"))).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 7, 12).unwrap();
        let next = spec.next_cron_after(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 10, 15, 0).unwrap());
    }

    #[test]
    fn test_six_field_cron_is_kept() {
        let spec = ScheduleSpec::cron("30 0 9 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        assert_eq!(
            spec.next_cron_after(now).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 30).unwrap()
        );
    }

    #[test]
    fn test_invalid_entries() {
        assert!(ScheduleSpec::from_config(&entry(None, None)).is_err());
        assert!(ScheduleSpec::from_config(&entry(Some(5), Some("* * * * *"))).is_err());
        assert!(ScheduleSpec::from_config(&entry(Some(0), None)).is_err());
        assert!(ScheduleSpec::from_config(&entry(None, Some("every monday"))).is_err());
        assert!(ScheduleSpec::from_config(&entry(None, Some("61 * * * *"))).is_err());

        let err = ScheduleSpec::from_config(&entry(None, None)).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidSchedule { ref name, .. } if name == "poll"));
    }
}
