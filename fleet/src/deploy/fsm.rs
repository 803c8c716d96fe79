//! Finite State Machine for a single host upgrade

use serde::{Deserialize, Serialize};

/// Upgrade state of one host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpgradeState {
    /// Opening the host connection
    Connecting,

    /// Comparing running images with the manifest
    Comparing,

    /// Nothing to upgrade on this host
    Skipped,

    /// Backing up and rewriting the environment file
    Patching,

    /// Restarting matched services
    Restarting,

    /// Every matched service restarted
    Done,

    /// Upgrade failed
    Failed,
}

impl UpgradeState {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpgradeState::Skipped | UpgradeState::Done | UpgradeState::Failed
        )
    }
}

/// Upgrade event
#[derive(Debug, Clone)]
pub enum UpgradeEvent {
    /// Connection established
    Connected,

    /// Drift detection found nothing to do
    NoDrift,

    /// Drift detection matched services
    DriftFound(usize),

    /// Environment file written
    Patched,

    /// All restarts succeeded
    Restarted,

    /// Any fatal error, including some restarts failing
    Fail(String),
}

/// Upgrade FSM
#[derive(Debug, Clone)]
pub struct UpgradeFsm {
    state: UpgradeState,
    error: Option<String>,
    failed_in: Option<UpgradeState>,
}

impl UpgradeFsm {
    /// Create a new FSM in connecting state
    pub fn new() -> Self {
        Self {
            state: UpgradeState::Connecting,
            error: None,
            failed_in: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> UpgradeState {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// State the host was in when it failed
    pub fn failed_in(&self) -> Option<UpgradeState> {
        self.failed_in
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: UpgradeEvent) -> Result<(), String> {
        let new_state = match (self.state, &event) {
            (UpgradeState::Connecting, UpgradeEvent::Connected) => UpgradeState::Comparing,

            (UpgradeState::Comparing, UpgradeEvent::NoDrift) => UpgradeState::Skipped,
            (UpgradeState::Comparing, UpgradeEvent::DriftFound(n)) if *n > 0 => {
                UpgradeState::Patching
            }

            (UpgradeState::Patching, UpgradeEvent::Patched) => UpgradeState::Restarting,

            (UpgradeState::Restarting, UpgradeEvent::Restarted) => UpgradeState::Done,

            (state, UpgradeEvent::Fail(err)) if !state.is_terminal() => {
                self.error = Some(err.clone());
                self.failed_in = Some(state);
                UpgradeState::Failed
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for UpgradeFsm {
    fn default() -> Self {
        Self::new()
    }
}
