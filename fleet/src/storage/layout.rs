//! Remote file layout of an upgradable host

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Paths the upgrader reads and mutates on every host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLayout {
    /// Environment file holding the `<service>_version` pins
    #[serde(default = "default_env_file")]
    pub env_file: String,

    /// Compose definition the services are restarted from
    #[serde(default = "default_compose_file")]
    pub compose_file: String,

    /// Daily backups are written below this directory
    #[serde(default = "default_backup_root")]
    pub backup_root: String,
}

fn default_env_file() -> String {
    "/root/.docker/.env".to_string()
}

fn default_compose_file() -> String {
    "/root/.docker/docker-compose.yml".to_string()
}

fn default_backup_root() -> String {
    "/root/.docker/version".to_string()
}

impl RemoteLayout {
    /// Backup directory for the given day, `<backup_root>/YYYY-MM-DD`
    pub fn backup_dir(&self, day: NaiveDate) -> String {
        format!(
            "{}/{}",
            self.backup_root.trim_end_matches('/'),
            day.format("%Y-%m-%d")
        )
    }

    /// Files copied into each daily backup
    pub fn backup_files(&self) -> Vec<String> {
        vec![self.env_file.clone(), self.compose_file.clone()]
    }
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self {
            env_file: default_env_file(),
            compose_file: default_compose_file(),
            backup_root: default_backup_root(),
        }
    }
}
