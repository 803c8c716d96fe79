//! Per-host upgrade driver
//!
//! Sequences drift detection, environment patching and service restarts over a
//! single connection, and turns every failure into a [`HostOutcome`].

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{error, info, warn};

use crate::deploy::drift::{Drift, DriftDetector};
use crate::deploy::fsm::{UpgradeEvent, UpgradeFsm};
use crate::deploy::patcher::ConfigPatcher;
use crate::errors::FleetError;
use crate::models::host::HostDescriptor;
use crate::models::manifest::{DesiredVersion, ManifestIndex};
use crate::models::report::HostOutcome;
use crate::remote::command::RemoteCommand;
use crate::remote::session::{Connector, RemoteSession};
use crate::storage::layout::RemoteLayout;
use crate::storage::settings::BackupPolicy;

/// Driver options
#[derive(Debug, Clone)]
pub struct UpgradeOptions {
    pub layout: RemoteLayout,
    pub registry_template: String,
    pub compose_command: String,
    pub backup_policy: BackupPolicy,

    /// Overall deadline for one host; remaining work is cancelled when it expires
    pub host_timeout: Option<Duration>,
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        Self {
            layout: RemoteLayout::default(),
            registry_template: "dockerhub.kubekey.local/energycloud/{app}".to_string(),
            compose_command: "docker-compose".to_string(),
            backup_policy: BackupPolicy::Continue,
            host_timeout: Some(Duration::from_secs(1800)),
        }
    }
}

/// Source of the calendar day naming the backup directory
pub type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

fn local_today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Upgrades one host at a time against a shared manifest
pub struct UpgradeDriver<C> {
    connector: C,
    index: Arc<ManifestIndex>,
    options: UpgradeOptions,
    clock: Clock,
}

impl<C: Connector> UpgradeDriver<C> {
    pub fn new(connector: C, index: Arc<ManifestIndex>, options: UpgradeOptions) -> Self {
        Self {
            connector,
            index,
            options,
            clock: Arc::new(local_today),
        }
    }

    /// Read the backup day from `clock` instead of the local date
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> NaiveDate + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Pin the backup day
    pub fn with_today(self, today: NaiveDate) -> Self {
        self.with_clock(move || today)
    }

    /// Run the whole upgrade of one host. Never fails: errors end up in the
    /// returned outcome.
    pub async fn upgrade_host(&self, host: &HostDescriptor) -> HostOutcome {
        let mut fsm = UpgradeFsm::new();
        let mut outcome = HostOutcome::new(host.label());

        info!(host = %host, "Connecting");
        let session = match self.connector.connect(host).await {
            Ok(session) => session,
            Err(e) => {
                let e = match e {
                    FleetError::ConnectionError(_) => e,
                    other => FleetError::ConnectionError(other.to_string()),
                };
                fail(&mut fsm, &mut outcome, e);
                return finish(fsm, outcome);
            }
        };

        let result = match advance(&mut fsm, UpgradeEvent::Connected) {
            Err(e) => Err(e),
            Ok(()) => match self.options.host_timeout {
                Some(limit) => {
                    let run = self.drive(session.as_ref(), host, &mut fsm, &mut outcome);
                    match tokio::time::timeout(limit, run).await {
                        Ok(result) => result,
                        Err(_) => Err(FleetError::Timeout(format!(
                            "host upgrade exceeded {:?}",
                            limit
                        ))),
                    }
                }
                None => self.drive(session.as_ref(), host, &mut fsm, &mut outcome).await,
            },
        };

        if let Err(e) = session.close().await {
            warn!(host = %host, "Failed to close connection: {}", e);
        }

        if let Err(e) = result {
            fail(&mut fsm, &mut outcome, e);
        }
        finish(fsm, outcome)
    }

    async fn drive(
        &self,
        session: &dyn RemoteSession,
        host: &HostDescriptor,
        fsm: &mut UpgradeFsm,
        outcome: &mut HostOutcome,
    ) -> Result<(), FleetError> {
        let detector = DriftDetector::new(&self.index, &self.options.registry_template);
        let entries = match detector.detect(session, host).await? {
            Drift::None => {
                info!(host = %host, "No service needs an upgrade, skipping");
                return advance(fsm, UpgradeEvent::NoDrift);
            }
            Drift::Matched(entries) => entries,
        };
        outcome.matched = entries.iter().map(|e| e.service.clone()).collect();
        advance(fsm, UpgradeEvent::DriftFound(entries.len()))?;

        // Read per host at patch time; a run may cross midnight
        let today = (self.clock)();
        let patcher = ConfigPatcher::new(&self.options.layout, self.options.backup_policy, today);
        let report = patcher.patch(session, &entries).await?;
        outcome.patch = Some(report);
        advance(fsm, UpgradeEvent::Patched)?;

        self.restart_all(session, host, &entries, outcome).await;
        if outcome.failed_services.is_empty() {
            advance(fsm, UpgradeEvent::Restarted)
        } else {
            Err(FleetError::PartialUpgradeError(outcome.failed_services.clone()))
        }
    }

    /// Restart every entry in order; a failure never stops the next restart.
    async fn restart_all(
        &self,
        session: &dyn RemoteSession,
        host: &HostDescriptor,
        entries: &[DesiredVersion],
        outcome: &mut HostOutcome,
    ) {
        for entry in entries {
            let command = RemoteCommand::RestartService {
                compose_command: self.options.compose_command.clone(),
                compose_file: self.options.layout.compose_file.clone(),
                service: entry.service.clone(),
            };
            match session.execute(&command).await {
                Ok(_) => {
                    info!(host = %host, service = %entry.service, "Restarted at {}", entry.tag);
                    outcome.restarted.push(entry.service.clone());
                }
                Err(e) => {
                    error!(host = %host, service = %entry.service, "Restart failed: {}", e);
                    outcome.failed_services.push(entry.service.clone());
                }
            }
        }
    }
}

fn advance(fsm: &mut UpgradeFsm, event: UpgradeEvent) -> Result<(), FleetError> {
    fsm.process(event).map_err(FleetError::Internal)
}

fn fail(fsm: &mut UpgradeFsm, outcome: &mut HostOutcome, error: FleetError) {
    if let Err(e) = fsm.process(UpgradeEvent::Fail(error.to_string())) {
        warn!(host = %outcome.host, "{}", e);
    }
    outcome.error = Some(error);
}

fn finish(fsm: UpgradeFsm, mut outcome: HostOutcome) -> HostOutcome {
    outcome.state = fsm.state();
    outcome.failed_in = fsm.failed_in();
    outcome
}
