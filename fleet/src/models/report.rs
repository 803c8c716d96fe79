//! Upgrade outcome models

use serde::{Serialize, Serializer};

use crate::deploy::fsm::UpgradeState;
use crate::deploy::patcher::PatchReport;
use crate::errors::FleetError;

/// Result of upgrading one host
#[derive(Debug, Serialize)]
pub struct HostOutcome {
    /// `user@address:port`
    pub host: String,

    /// Final state
    pub state: UpgradeState,

    /// State the host was in when it failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_in: Option<UpgradeState>,

    /// Services that needed an upgrade
    pub matched: Vec<String>,

    /// Services restarted successfully
    pub restarted: Vec<String>,

    /// Services whose restart failed
    pub failed_services: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<PatchReport>,

    #[serde(serialize_with = "serialize_error")]
    pub error: Option<FleetError>,
}

impl HostOutcome {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            state: UpgradeState::Connecting,
            failed_in: None,
            matched: Vec::new(),
            restarted: Vec::new(),
            failed_services: Vec::new(),
            patch: None,
            error: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.state == UpgradeState::Failed
    }
}

fn serialize_error<S>(error: &Option<FleetError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    #[derive(Serialize)]
    struct ErrorRepr<'a> {
        kind: &'a str,
        message: String,
    }

    match error {
        Some(e) => ErrorRepr {
            kind: e.kind(),
            message: e.to_string(),
        }
        .serialize(serializer),
        None => serializer.serialize_none(),
    }
}

/// Per-host outcomes of a fleet run, in inventory order
#[derive(Debug, Default, Serialize)]
pub struct FleetReport {
    pub hosts: Vec<HostOutcome>,
}

impl FleetReport {
    pub fn count(&self, state: UpgradeState) -> usize {
        self.hosts.iter().filter(|h| h.state == state).count()
    }

    /// Whether any host ended in a fatal state
    pub fn has_failures(&self) -> bool {
        self.hosts.iter().any(HostOutcome::is_failed)
    }

    /// Process exit code: non-zero iff a host failed
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            1
        } else {
            0
        }
    }
}
