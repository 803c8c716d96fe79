//! Fleet coordinator

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::deploy::driver::UpgradeDriver;
use crate::deploy::fsm::UpgradeState;
use crate::errors::FleetError;
use crate::models::host::HostDescriptor;
use crate::models::report::{FleetReport, HostOutcome};
use crate::remote::session::Connector;

/// Upgrade every host and collect their outcomes in inventory order.
///
/// With `max_parallel <= 1` hosts are upgraded one after another. Otherwise up
/// to `max_parallel` hosts run at once; commands on a single host always stay
/// sequential. A failed host never stops the others.
pub async fn run_fleet<C>(
    driver: Arc<UpgradeDriver<C>>,
    hosts: Vec<Arc<HostDescriptor>>,
    max_parallel: usize,
) -> FleetReport
where
    C: Connector + 'static,
{
    info!("Upgrading {} host(s)", hosts.len());

    let outcomes = if max_parallel <= 1 {
        let mut outcomes = Vec::with_capacity(hosts.len());
        for host in &hosts {
            let outcome = driver.upgrade_host(host).await;
            log_outcome(&outcome);
            outcomes.push(outcome);
        }
        outcomes
    } else {
        run_parallel(driver, &hosts, max_parallel).await
    };

    let report = FleetReport { hosts: outcomes };
    info!(
        done = report.count(UpgradeState::Done),
        skipped = report.count(UpgradeState::Skipped),
        failed = report.count(UpgradeState::Failed),
        "Fleet upgrade finished"
    );
    report
}

async fn run_parallel<C>(
    driver: Arc<UpgradeDriver<C>>,
    hosts: &[Arc<HostDescriptor>],
    max_parallel: usize,
) -> Vec<HostOutcome>
where
    C: Connector + 'static,
{
    let permits = Arc::new(Semaphore::new(max_parallel));
    let mut tasks = JoinSet::new();

    for (i, host) in hosts.iter().enumerate() {
        let driver = driver.clone();
        let host = host.clone();
        let permits = permits.clone();
        tasks.spawn(async move {
            let outcome = match permits.acquire_owned().await {
                Ok(_permit) => driver.upgrade_host(&host).await,
                Err(e) => aborted(&host, e.to_string()),
            };
            (i, outcome)
        });
    }

    let mut slots: Vec<Option<HostOutcome>> = hosts.iter().map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((i, outcome)) => {
                log_outcome(&outcome);
                slots[i] = Some(outcome);
            }
            Err(e) => error!("Host task died: {}", e),
        }
    }

    slots
        .into_iter()
        .zip(hosts)
        .map(|(slot, host)| slot.unwrap_or_else(|| aborted(host, "task aborted".to_string())))
        .collect()
}

fn aborted(host: &HostDescriptor, reason: String) -> HostOutcome {
    let mut outcome = HostOutcome::new(host.label());
    outcome.state = UpgradeState::Failed;
    outcome.error = Some(FleetError::Internal(reason));
    outcome
}

fn log_outcome(outcome: &HostOutcome) {
    match outcome.state {
        UpgradeState::Done => info!(
            host = %outcome.host,
            "Upgrade done, restarted: {}",
            outcome.restarted.join(", ")
        ),
        UpgradeState::Skipped => info!(host = %outcome.host, "Nothing to upgrade"),
        _ => error!(
            host = %outcome.host,
            matched = %outcome.matched.join(", "),
            restarted = %outcome.restarted.join(", "),
            failed = %outcome.failed_services.join(", "),
            "Upgrade failed: {}",
            outcome
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default()
        ),
    }
}
