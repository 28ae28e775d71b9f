use std::fs;

use tempfile::TempDir;

use courier_core::bootstrap::DispatchSystem;
use courier_core::config::ConfigManager;
use courier_core::messaging::TaskKind;

#[tokio::test]
async fn test_bootstrap_from_configuration_directory() {
    let dir = TempDir::new().unwrap();
    let repos = dir.path().join("repos");
    fs::write(
        dir.path().join("courier.toml"),
        format!(
            r#"
[queues]
prefix = "staging"

[scheduler]
enabled = false

[preview]
repos_dir = "{}"
"#,
            repos.display()
        ),
    )
    .unwrap();

    let manager =
        ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
            .unwrap();
    let system = DispatchSystem::bootstrap(manager).await.unwrap();

    let status = system.status();
    assert_eq!(status.environment, "test");
    assert_eq!(status.pools.len(), TaskKind::ALL.len());
    assert!(!status.scheduler_active);

    let queues = system.workers().queues();
    assert!(queues
        .iter()
        .all(|(_, queue)| queue.as_str().starts_with("staging_")));

    let report = system.shutdown().await;
    assert_eq!(report.pools.len(), TaskKind::ALL.len());
    assert_eq!(report.scheduled_events, 0);
}

#[tokio::test]
async fn test_postgres_broker_without_url_fails_fast() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("courier.toml"),
        r#"
[broker]
provider = "postgres"
"#,
    )
    .unwrap();

    let result =
        ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
    assert!(result.is_err());
}
