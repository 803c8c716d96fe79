//! Application configuration options

use std::time::Duration;

use crate::deploy::driver::UpgradeOptions;
use crate::deploy::drift::APP_PLACEHOLDER;
use crate::errors::FleetError;
use crate::logs::LogOptions;
use crate::remote::ssh::SshOptions;
use crate::storage::settings::Settings;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Logging configuration
    pub log: LogOptions,

    /// Per-host upgrade options
    pub upgrade: UpgradeOptions,

    /// SSH transport options
    pub ssh: SshOptions,

    /// Hosts upgraded at the same time
    pub max_parallel_hosts: usize,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            log: LogOptions::default(),
            upgrade: UpgradeOptions::default(),
            ssh: SshOptions::default(),
            max_parallel_hosts: 1,
        }
    }
}

impl AppOptions {
    /// Build validated options from a settings file
    pub fn from_settings(settings: &Settings) -> Result<Self, FleetError> {
        if settings.command_timeout_secs == 0 {
            return Err(FleetError::ConfigError(
                "command_timeout_secs must be positive".to_string(),
            ));
        }
        if settings.compose_command.trim().is_empty() {
            return Err(FleetError::ConfigError("compose_command is empty".to_string()));
        }
        if !settings.registry_template.contains(APP_PLACEHOLDER) {
            return Err(FleetError::ConfigError(format!(
                "registry_template must contain {}",
                APP_PLACEHOLDER
            )));
        }
        for (name, path) in [
            ("env_file", &settings.layout.env_file),
            ("compose_file", &settings.layout.compose_file),
            ("backup_root", &settings.layout.backup_root),
        ] {
            if path.trim().is_empty() {
                return Err(FleetError::ConfigError(format!("layout.{} is empty", name)));
            }
        }

        let ssh_defaults = SshOptions::default();
        Ok(Self {
            log: LogOptions {
                log_level: settings.log_level.clone(),
                log_dir: settings.log_dir.clone(),
                json_format: settings.log_json,
            },
            upgrade: UpgradeOptions {
                layout: settings.layout.clone(),
                registry_template: settings.registry_template.clone(),
                compose_command: settings.compose_command.clone(),
                backup_policy: settings.backup_policy,
                // 0 disables the host deadline
                host_timeout: match settings.host_timeout_secs {
                    0 => None,
                    secs => Some(Duration::from_secs(secs)),
                },
            },
            ssh: SshOptions {
                program: settings.ssh.program.clone(),
                control_dir: settings
                    .ssh
                    .control_dir
                    .clone()
                    .unwrap_or(ssh_defaults.control_dir),
                connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
                command_timeout: Duration::from_secs(settings.command_timeout_secs),
                host_key_checking: settings.ssh.host_key_checking.clone(),
            },
            max_parallel_hosts: settings.max_parallel_hosts.max(1),
        })
    }
}
