//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;
use crate::storage::layout::RemoteLayout;

/// What to do when the daily backup cannot be taken
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupPolicy {
    /// Log a warning and keep patching
    #[default]
    Continue,

    /// Treat the host as failed before anything is mutated
    Abort,
}

/// Upgrader settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write logs to a daily rolling file in this directory
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Remote file layout
    #[serde(default)]
    pub layout: RemoteLayout,

    /// Template expanding a declared application name to an image identity
    #[serde(default = "default_registry_template")]
    pub registry_template: String,

    #[serde(default)]
    pub backup_policy: BackupPolicy,

    /// Compose program, e.g. `docker-compose` or `docker compose`
    #[serde(default = "default_compose_command")]
    pub compose_command: String,

    /// Deadline for a single remote command, in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Deadline for a whole host upgrade, in seconds
    #[serde(default = "default_host_timeout")]
    pub host_timeout_secs: u64,

    /// SSH connect timeout, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Hosts upgraded at the same time
    #[serde(default = "default_max_parallel_hosts")]
    pub max_parallel_hosts: usize,

    /// SSH transport settings
    #[serde(default)]
    pub ssh: SshSettings,
}

fn default_registry_template() -> String {
    "dockerhub.kubekey.local/energycloud/{app}".to_string()
}

fn default_compose_command() -> String {
    "docker-compose".to_string()
}

fn default_command_timeout() -> u64 {
    300
}

fn default_host_timeout() -> u64 {
    1800
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_parallel_hosts() -> usize {
    1
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            layout: RemoteLayout::default(),
            registry_template: default_registry_template(),
            backup_policy: BackupPolicy::Continue,
            compose_command: default_compose_command(),
            command_timeout_secs: default_command_timeout(),
            host_timeout_secs: default_host_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_parallel_hosts: default_max_parallel_hosts(),
            ssh: SshSettings::default(),
        }
    }
}

/// SSH transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    /// OpenSSH client binary
    #[serde(default = "default_ssh_program")]
    pub program: PathBuf,

    /// Where ControlMaster sockets live; the system temp dir when unset
    #[serde(default)]
    pub control_dir: Option<PathBuf>,

    /// `StrictHostKeyChecking` value
    #[serde(default = "default_host_key_checking")]
    pub host_key_checking: String,
}

fn default_ssh_program() -> PathBuf {
    PathBuf::from("ssh")
}

fn default_host_key_checking() -> String {
    "accept-new".to_string()
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            program: default_ssh_program(),
            control_dir: None,
            host_key_checking: default_host_key_checking(),
        }
    }
}
