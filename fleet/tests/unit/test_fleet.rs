//! Fleet coordinator tests

use std::sync::Arc;

use chrono::NaiveDate;

use fleet_upgrade::app::options::AppOptions;
use fleet_upgrade::app::run::run_upgrade_with;
use fleet_upgrade::deploy::driver::{UpgradeDriver, UpgradeOptions};
use fleet_upgrade::deploy::fleet::run_fleet;
use fleet_upgrade::deploy::fsm::UpgradeState;
use fleet_upgrade::errors::FleetError;
use fleet_upgrade::models::manifest::ManifestIndex;

use crate::mocks::{host, FakeConnector, FakeHost, SharedHost};

const MANIFEST: &str = "registry/app-one:2.0\nregistry/app-two:3.1";

struct Fleet {
    connector: FakeConnector,
    good: SharedHost,
    broken: SharedHost,
    idle: SharedHost,
}

fn fleet() -> Fleet {
    let mut connector = FakeConnector::new();
    let good = connector.add("10.0.0.1", FakeHost::with_env("app_one_version=1.0\n"));
    let broken = connector.add("10.0.0.2", FakeHost {
        refuse_connection: true,
        ..Default::default()
    });
    let idle = connector.add("10.0.0.3", FakeHost::with_env("app_two_version=3.0\n"));
    Fleet {
        connector,
        good,
        broken,
        idle,
    }
}

fn driver(connector: FakeConnector) -> Arc<UpgradeDriver<FakeConnector>> {
    let options = UpgradeOptions {
        registry_template: "registry/{app}".to_string(),
        ..Default::default()
    };
    let index = ManifestIndex::parse(MANIFEST).unwrap();
    Arc::new(
        UpgradeDriver::new(connector, Arc::new(index), options)
            .with_today(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()),
    )
}

fn hosts() -> Vec<Arc<fleet_upgrade::models::host::HostDescriptor>> {
    vec![
        Arc::new(host("10.0.0.1", Some(&["app-one"]))),
        Arc::new(host("10.0.0.2", Some(&["app-one"]))),
        Arc::new(host("10.0.0.3", Some(&["billing"]))),
    ]
}

#[tokio::test]
async fn test_sequential_run_continues_after_failure() {
    let fleet = fleet();
    let report = run_fleet(driver(fleet.connector.clone()), hosts(), 1).await;

    let labels: Vec<_> = report.hosts.iter().map(|h| h.host.as_str()).collect();
    assert_eq!(
        labels,
        vec!["root@10.0.0.1:22", "root@10.0.0.2:22", "root@10.0.0.3:22"]
    );
    let states: Vec<_> = report.hosts.iter().map(|h| h.state).collect();
    assert_eq!(
        states,
        vec![UpgradeState::Done, UpgradeState::Failed, UpgradeState::Skipped]
    );
    assert!(matches!(
        report.hosts[1].error,
        Some(FleetError::ConnectionError(_))
    ));
    assert_eq!(report.exit_code(), 1);

    assert_eq!(fleet.good.lock().unwrap().env, "app_one_version=2.0\n");
    assert_eq!(fleet.broken.lock().unwrap().closes, 0);
    let idle = fleet.idle.lock().unwrap();
    assert!(idle.commands.is_empty());
    assert_eq!(idle.env, "app_two_version=3.0\n");
}

#[tokio::test]
async fn test_parallel_run_keeps_inventory_order() {
    let fleet = fleet();
    let report = run_fleet(driver(fleet.connector.clone()), hosts(), 3).await;

    let states: Vec<_> = report.hosts.iter().map(|h| h.state).collect();
    assert_eq!(
        states,
        vec![UpgradeState::Done, UpgradeState::Failed, UpgradeState::Skipped]
    );
    assert_eq!(report.hosts[2].host, "root@10.0.0.3:22");
    assert_eq!(report.count(UpgradeState::Failed), 1);
    assert_eq!(fleet.good.lock().unwrap().restarts(), vec!["app-one"]);
}

#[tokio::test]
async fn test_all_skipped_exits_zero() {
    let mut connector = FakeConnector::new();
    connector.add("10.0.0.3", FakeHost::default());
    let options = AppOptions {
        upgrade: UpgradeOptions {
            registry_template: "registry/{app}".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };
    let index = ManifestIndex::parse(MANIFEST).unwrap();

    let report = run_upgrade_with(
        connector,
        &options,
        vec![host("10.0.0.3", Some(&["billing"]))],
        index,
    )
    .await;

    assert_eq!(report.count(UpgradeState::Skipped), 1);
    assert!(!report.has_failures());
    assert_eq!(report.exit_code(), 0);
}
