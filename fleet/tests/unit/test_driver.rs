//! Upgrade driver tests

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use fleet_upgrade::deploy::driver::{UpgradeDriver, UpgradeOptions};
use fleet_upgrade::deploy::fsm::UpgradeState;
use fleet_upgrade::deploy::patcher::BackupStatus;
use fleet_upgrade::errors::FleetError;
use fleet_upgrade::models::manifest::ManifestIndex;
use fleet_upgrade::remote::command::RemoteCommand;
use fleet_upgrade::storage::settings::BackupPolicy;

use crate::mocks::{host, FakeConnector, FakeHost};

const TODAY: &str = "/root/.docker/version/2024-05-01";

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

fn options() -> UpgradeOptions {
    UpgradeOptions {
        registry_template: "registry/{app}".to_string(),
        host_timeout: None,
        ..Default::default()
    }
}

fn driver(connector: FakeConnector, manifest: &str, options: UpgradeOptions) -> UpgradeDriver<FakeConnector> {
    let index = ManifestIndex::parse(manifest).unwrap();
    UpgradeDriver::new(connector, Arc::new(index), options).with_today(today())
}

#[tokio::test]
async fn test_declared_host_end_to_end() {
    let mut connector = FakeConnector::new();
    let state = connector.add("10.0.0.1", FakeHost::with_env("app_one_version=1.0\nother_var=x"));
    let driver = driver(connector, "registry/app-one:2.0", options());

    let outcome = driver.upgrade_host(&host("10.0.0.1", Some(&["app-one"]))).await;

    assert_eq!(outcome.state, UpgradeState::Done);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.matched, vec!["app-one"]);
    assert_eq!(outcome.restarted, vec!["app-one"]);

    let state = state.lock().unwrap();
    assert_eq!(state.env, "app_one_version=2.0\nother_var=x");
    assert_eq!(state.restarts(), vec!["app-one"]);
    assert_eq!(state.closes, 1);

    // Declared hosts are never asked for their containers
    assert_eq!(state.count(|c| *c == RemoteCommand::ListImages), 0);

    let restart = state.commands.last().unwrap().render();
    assert_eq!(
        restart,
        "docker-compose -f /root/.docker/docker-compose.yml up -d --no-deps app-one"
    );

    let patch = outcome.patch.unwrap();
    assert_eq!(patch.backup, BackupStatus::Created(TODAY.to_string()));
    assert_eq!(patch.updated, vec!["app_one_version"]);
    assert!(patch.missing.is_empty());
}

#[tokio::test]
async fn test_command_order_on_host() {
    let mut connector = FakeConnector::new();
    let state = connector.add("10.0.0.1", FakeHost::with_env("app_one_version=1.0\n"));
    let driver = driver(connector, "registry/app-one:2.0", options());

    driver.upgrade_host(&host("10.0.0.1", Some(&["app-one"]))).await;

    let state = state.lock().unwrap();
    let kinds: Vec<&str> = state
        .commands
        .iter()
        .map(|c| match c {
            RemoteCommand::DirExists { .. } => "check",
            RemoteCommand::Backup { .. } => "backup",
            RemoteCommand::ReadFile { .. } => "read",
            RemoteCommand::WriteFile { .. } => "write",
            RemoteCommand::RestartService { .. } => "restart",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["check", "backup", "read", "write", "restart"]);
}

#[tokio::test]
async fn test_no_overlap_is_skipped_without_mutation() {
    let mut connector = FakeConnector::new();
    let declared = connector.add("10.0.0.1", FakeHost::with_env("app_one_version=1.0"));
    let observed = connector.add("10.0.0.2", FakeHost {
        images: "redis:7\npostgres:16\n".to_string(),
        ..FakeHost::with_env("app_one_version=1.0")
    });
    let driver = driver(connector, "registry/app-one:2.0", options());

    let outcome = driver.upgrade_host(&host("10.0.0.1", Some(&["billing"]))).await;
    assert_eq!(outcome.state, UpgradeState::Skipped);
    assert!(outcome.error.is_none());
    assert!(outcome.matched.is_empty());

    let outcome = driver.upgrade_host(&host("10.0.0.2", None)).await;
    assert_eq!(outcome.state, UpgradeState::Skipped);

    let declared = declared.lock().unwrap();
    assert!(declared.commands.is_empty());
    assert_eq!(declared.closes, 1);

    let observed = observed.lock().unwrap();
    assert_eq!(observed.commands, vec![RemoteCommand::ListImages]);
    assert_eq!(observed.env, "app_one_version=1.0");
    assert_eq!(observed.closes, 1);
}

#[tokio::test]
async fn test_observed_host_matches_ignoring_tags() {
    let mut connector = FakeConnector::new();
    let state = connector.add("10.0.0.1", FakeHost {
        images: "registry/app-two:0.9\nregistry/app-one:1.0\nregistry/app-one:1.0\nnginx:1.25\n".to_string(),
        ..FakeHost::with_env("app_one_version=1.0\napp_two_version=0.9\n")
    });
    let driver = driver(connector, "registry/app-one:2.0\nregistry/app-two:1.0", options());

    let outcome = driver.upgrade_host(&host("10.0.0.1", None)).await;

    assert_eq!(outcome.state, UpgradeState::Done);
    assert_eq!(outcome.matched, vec!["app-two", "app-one"]);
    let state = state.lock().unwrap();
    assert_eq!(state.restarts(), vec!["app-two", "app-one"]);
    assert_eq!(state.env, "app_one_version=2.0\napp_two_version=1.0\n");
}

#[tokio::test]
async fn test_partial_restart_failure_attempts_every_service() {
    let mut connector = FakeConnector::new();
    let state = connector.add("10.0.0.1", FakeHost {
        fail_restart: ["app-two".to_string()].into_iter().collect(),
        ..FakeHost::with_env("app_one_version=1\napp_two_version=1\napp_three_version=1")
    });
    let driver = driver(
        connector,
        "registry/app-one:2\nregistry/app-two:2\nregistry/app-three:2",
        options(),
    );

    let outcome = driver
        .upgrade_host(&host("10.0.0.1", Some(&["app-one", "app-two", "app-three"])))
        .await;

    assert_eq!(outcome.state, UpgradeState::Failed);
    assert_eq!(outcome.failed_in, Some(UpgradeState::Restarting));
    assert_eq!(outcome.restarted, vec!["app-one", "app-three"]);
    assert_eq!(outcome.failed_services, vec!["app-two"]);
    match outcome.error {
        Some(FleetError::PartialUpgradeError(failed)) => assert_eq!(failed, vec!["app-two"]),
        other => panic!("unexpected error: {other:?}"),
    }

    let state = state.lock().unwrap();
    assert_eq!(state.restarts(), vec!["app-one", "app-two", "app-three"]);
    assert_eq!(state.closes, 1);
}

#[tokio::test]
async fn test_write_failure_skips_restarts() {
    let mut connector = FakeConnector::new();
    let state = connector.add("10.0.0.1", FakeHost {
        fail_write: true,
        ..FakeHost::with_env("app_one_version=1.0")
    });
    let driver = driver(connector, "registry/app-one:2.0", options());

    let outcome = driver.upgrade_host(&host("10.0.0.1", Some(&["app-one"]))).await;

    assert_eq!(outcome.state, UpgradeState::Failed);
    assert_eq!(outcome.failed_in, Some(UpgradeState::Patching));
    assert!(matches!(outcome.error, Some(FleetError::PatchError(_))));
    assert!(outcome.restarted.is_empty());

    let state = state.lock().unwrap();
    assert!(state.restarts().is_empty());
    assert_eq!(state.env, "app_one_version=1.0");
    assert_eq!(state.closes, 1);
}

#[tokio::test]
async fn test_backup_failure_continues_by_default() {
    let mut connector = FakeConnector::new();
    let state = connector.add("10.0.0.1", FakeHost {
        fail_backup: true,
        ..FakeHost::with_env("app_one_version=1.0")
    });
    let driver = driver(connector, "registry/app-one:2.0", options());

    let outcome = driver.upgrade_host(&host("10.0.0.1", Some(&["app-one"]))).await;

    assert_eq!(outcome.state, UpgradeState::Done);
    assert!(matches!(
        outcome.patch.as_ref().map(|p| &p.backup),
        Some(BackupStatus::Failed(_))
    ));
    assert_eq!(state.lock().unwrap().env, "app_one_version=2.0");
}

#[tokio::test]
async fn test_backup_failure_aborts_when_configured() {
    let mut connector = FakeConnector::new();
    let state = connector.add("10.0.0.1", FakeHost {
        fail_backup: true,
        ..FakeHost::with_env("app_one_version=1.0")
    });
    let options = UpgradeOptions {
        backup_policy: BackupPolicy::Abort,
        ..options()
    };
    let driver = driver(connector, "registry/app-one:2.0", options);

    let outcome = driver.upgrade_host(&host("10.0.0.1", Some(&["app-one"]))).await;

    assert_eq!(outcome.state, UpgradeState::Failed);
    assert!(matches!(outcome.error, Some(FleetError::BackupError(_))));
    let state = state.lock().unwrap();
    assert_eq!(state.count(|c| matches!(c, RemoteCommand::ReadFile { .. })), 0);
    assert_eq!(state.count(|c| matches!(c, RemoteCommand::WriteFile { .. })), 0);
    assert!(state.restarts().is_empty());
}

#[tokio::test]
async fn test_backup_taken_once_per_day() {
    let mut connector = FakeConnector::new();
    let state = connector.add("10.0.0.1", FakeHost::with_env("app_one_version=1.0"));
    let driver = driver(connector, "registry/app-one:2.0", options());
    let target = host("10.0.0.1", Some(&["app-one"]));

    let first = driver.upgrade_host(&target).await;
    let second = driver.upgrade_host(&target).await;

    assert_eq!(
        first.patch.unwrap().backup,
        BackupStatus::Created(TODAY.to_string())
    );
    assert_eq!(
        second.patch.unwrap().backup,
        BackupStatus::AlreadyPresent(TODAY.to_string())
    );

    let state = state.lock().unwrap();
    assert_eq!(state.count(|c| matches!(c, RemoteCommand::Backup { .. })), 1);
    assert_eq!(state.count(|c| matches!(c, RemoteCommand::DirExists { .. })), 2);
    // Rewriting again with the same manifest changes nothing
    assert_eq!(state.env, "app_one_version=2.0");
}

#[tokio::test]
async fn test_backup_day_read_when_patching() {
    let mut connector = FakeConnector::new();
    let before = connector.add("10.0.0.1", FakeHost::with_env("app_one_version=1.0"));
    let after = connector.add("10.0.0.2", FakeHost::with_env("app_one_version=1.0"));
    let index = ManifestIndex::parse("registry/app-one:2.0").unwrap();

    let calls = Arc::new(AtomicU64::new(0));
    let clock_calls = calls.clone();
    let driver = UpgradeDriver::new(connector, Arc::new(index), options()).with_clock(move || {
        let n = clock_calls.fetch_add(1, Ordering::SeqCst);
        today() + chrono::Days::new(n)
    });
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let first = driver.upgrade_host(&host("10.0.0.1", Some(&["app-one"]))).await;
    let second = driver.upgrade_host(&host("10.0.0.2", Some(&["app-one"]))).await;

    assert_eq!(
        first.patch.unwrap().backup,
        BackupStatus::Created(TODAY.to_string())
    );
    assert_eq!(
        second.patch.unwrap().backup,
        BackupStatus::Created("/root/.docker/version/2024-05-02".to_string())
    );
    assert!(before.lock().unwrap().dirs.contains(TODAY));
    assert!(after
        .lock()
        .unwrap()
        .dirs
        .contains("/root/.docker/version/2024-05-02"));
}

#[tokio::test]
async fn test_skipped_host_does_not_read_clock() {
    let mut connector = FakeConnector::new();
    connector.add("10.0.0.1", FakeHost::default());
    let index = ManifestIndex::parse("registry/app-one:2.0").unwrap();
    let calls = Arc::new(AtomicU64::new(0));
    let clock_calls = calls.clone();
    let driver = UpgradeDriver::new(connector, Arc::new(index), options()).with_clock(move || {
        clock_calls.fetch_add(1, Ordering::SeqCst);
        today()
    });

    let outcome = driver.upgrade_host(&host("10.0.0.1", Some(&["billing"]))).await;

    assert_eq!(outcome.state, UpgradeState::Skipped);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_connection_failure() {
    let mut connector = FakeConnector::new();
    let state = connector.add("10.0.0.1", FakeHost {
        refuse_connection: true,
        ..Default::default()
    });
    let driver = driver(connector, "registry/app-one:2.0", options());

    let outcome = driver.upgrade_host(&host("10.0.0.1", Some(&["app-one"]))).await;

    assert_eq!(outcome.state, UpgradeState::Failed);
    assert_eq!(outcome.failed_in, Some(UpgradeState::Connecting));
    assert!(matches!(outcome.error, Some(FleetError::ConnectionError(_))));
    let state = state.lock().unwrap();
    assert!(state.commands.is_empty());
    assert_eq!(state.closes, 0);
}

#[tokio::test]
async fn test_listing_failure_fails_host() {
    let mut connector = FakeConnector::new();
    let state = connector.add("10.0.0.1", FakeHost {
        fail_list: true,
        ..Default::default()
    });
    let driver = driver(connector, "registry/app-one:2.0", options());

    let outcome = driver.upgrade_host(&host("10.0.0.1", None)).await;

    assert_eq!(outcome.state, UpgradeState::Failed);
    assert_eq!(outcome.failed_in, Some(UpgradeState::Comparing));
    assert!(matches!(
        outcome.error,
        Some(FleetError::RemoteCommandError { .. })
    ));
    assert_eq!(state.lock().unwrap().closes, 1);
}

#[tokio::test]
async fn test_host_timeout_cancels_remaining_restarts() {
    let mut connector = FakeConnector::new();
    let state = connector.add("10.0.0.1", FakeHost {
        restart_delay: Some(Duration::from_millis(200)),
        ..FakeHost::with_env("app_one_version=1\napp_two_version=1")
    });
    let options = UpgradeOptions {
        host_timeout: Some(Duration::from_millis(50)),
        ..options()
    };
    let driver = driver(connector, "registry/app-one:2\nregistry/app-two:2", options);

    let outcome = driver
        .upgrade_host(&host("10.0.0.1", Some(&["app-one", "app-two"])))
        .await;

    assert_eq!(outcome.state, UpgradeState::Failed);
    assert_eq!(outcome.failed_in, Some(UpgradeState::Restarting));
    assert!(matches!(outcome.error, Some(FleetError::Timeout(_))));
    assert!(outcome.restarted.is_empty());

    let state = state.lock().unwrap();
    assert_eq!(state.restarts(), vec!["app-one"]);
    assert_eq!(state.closes, 1);
}
