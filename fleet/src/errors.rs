//! Error types for the fleet upgrader

use thiserror::Error;

/// Main error type for the fleet upgrader
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Could not establish the per-host connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// A command channel could not be opened on a live connection
    #[error("Remote channel error on `{command}`: {reason}")]
    RemoteChannelError { command: String, reason: String },

    /// The channel opened but the command failed
    #[error("Remote command `{command}` failed (status {status:?}): {stderr}")]
    RemoteCommandError {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Backup error: {0}")]
    BackupError(String),

    /// The environment file could not be patched; no restart was attempted
    #[error("Patch error: {0}")]
    PatchError(String),

    /// Some service restarts failed; every matched service was attempted
    #[error("Partial upgrade, failed services: {}", .0.join(", "))]
    PartialUpgradeError(Vec<String>),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Manifest error at line {line}: {reason}")]
    ManifestError { line: usize, reason: String },

    #[error("Inventory error: {0}")]
    InventoryError(String),

    #[error("Staging error: {0}")]
    StagingError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FleetError {
    /// Short machine-readable kind, used in JSON reports
    pub fn kind(&self) -> &'static str {
        match self {
            FleetError::IoError(_) => "io",
            FleetError::JsonError(_) => "json",
            FleetError::YamlError(_) => "yaml",
            FleetError::ConnectionError(_) => "connection",
            FleetError::RemoteChannelError { .. } => "remote_channel",
            FleetError::RemoteCommandError { .. } => "remote_command",
            FleetError::BackupError(_) => "backup",
            FleetError::PatchError(_) => "patch",
            FleetError::PartialUpgradeError(_) => "partial_upgrade",
            FleetError::Timeout(_) => "timeout",
            FleetError::ManifestError { .. } => "manifest",
            FleetError::InventoryError(_) => "inventory",
            FleetError::StagingError(_) => "staging",
            FleetError::ConfigError(_) => "config",
            FleetError::Internal(_) => "internal",
        }
    }
}

impl From<anyhow::Error> for FleetError {
    fn from(err: anyhow::Error) -> Self {
        FleetError::Internal(err.to_string())
    }
}
