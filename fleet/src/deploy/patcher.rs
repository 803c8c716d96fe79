//! Environment file patching
//!
//! The environment file pins every service image with a `<service>_version`
//! variable. Patching takes the daily backup, rewrites the pins of the matched
//! services and writes the whole file back in one command.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::FleetError;
use crate::models::manifest::{service_name, DesiredVersion};
use crate::remote::command::{RemoteCommand, DIR_EXISTS_MARKER};
use crate::remote::session::RemoteSession;
use crate::storage::layout::RemoteLayout;
use crate::storage::settings::BackupPolicy;

const PARAM_SUFFIX: &str = "_version";

/// Outcome of the daily backup guard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum BackupStatus {
    /// Backup taken into this directory
    Created(String),

    /// Today's backup already existed, nothing was copied
    AlreadyPresent(String),

    /// Backup could not be taken; patching went on
    Failed(String),
}

/// What a successful patch changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchReport {
    pub backup: BackupStatus,

    /// Parameters whose line was rewritten
    pub updated: Vec<String>,

    /// Parameters derived from the matched services but absent from the file
    pub missing: Vec<String>,
}

/// Environment variable pinning the version of an image: the last path segment
/// with `-` replaced by `_`, plus `_version`.
///
/// `app-one` and `app_one` map to the same name.
pub fn derive_param_name(image: &str) -> String {
    format!("{}{}", service_name(image).replace('-', "_"), PARAM_SUFFIX)
}

/// Parameter name to new value for every matched entry
pub fn param_map(entries: &[DesiredVersion]) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for entry in entries {
        let name = derive_param_name(&entry.image);
        debug!(param = %name, tag = %entry.tag, "Derived version parameter");
        if let Some(previous) = params.insert(name.clone(), entry.tag.clone()) {
            warn!(
                param = %name,
                "Parameter collision, {} from {} replaces {}",
                entry.tag,
                entry.image,
                previous
            );
        }
    }
    params
}

/// Result of rewriting environment file content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub content: String,
    pub updated: Vec<String>,
}

/// Rewrite `NAME=VALUE` lines whose name is in `params`.
///
/// Lines are split on `\n` and on their first `=`. Every other line, including
/// lines without `=`, is kept byte for byte.
pub fn rewrite_env(content: &str, params: &BTreeMap<String, String>) -> Rewrite {
    let mut updated = Vec::new();
    let lines: Vec<String> = content
        .split('\n')
        .map(|line| {
            let Some((name, _)) = line.split_once('=') else {
                return line.to_string();
            };
            match params.get(name) {
                Some(value) => {
                    if !updated.iter().any(|u| u == name) {
                        updated.push(name.to_string());
                    }
                    format!("{}={}", name, value)
                }
                None => line.to_string(),
            }
        })
        .collect();

    Rewrite {
        content: lines.join("\n"),
        updated,
    }
}

/// Patches the environment file of one host
#[derive(Debug, Clone)]
pub struct ConfigPatcher<'a> {
    layout: &'a RemoteLayout,
    backup_policy: BackupPolicy,
    today: NaiveDate,
}

impl<'a> ConfigPatcher<'a> {
    pub fn new(layout: &'a RemoteLayout, backup_policy: BackupPolicy, today: NaiveDate) -> Self {
        Self {
            layout,
            backup_policy,
            today,
        }
    }

    /// Take today's backup unless it already exists.
    ///
    /// The existence check runs first; when the directory is there, nothing is
    /// copied.
    pub async fn ensure_backup(&self, session: &dyn RemoteSession) -> Result<BackupStatus, FleetError> {
        let dir = self.layout.backup_dir(self.today);
        let answer = session
            .execute(&RemoteCommand::DirExists { path: dir.clone() })
            .await?;
        if answer.trim() == DIR_EXISTS_MARKER {
            info!(dir = %dir, "Backup already taken today");
            return Ok(BackupStatus::AlreadyPresent(dir));
        }

        session
            .execute(&RemoteCommand::Backup {
                dir: dir.clone(),
                files: self.layout.backup_files(),
            })
            .await?;
        info!(dir = %dir, "Backup created");
        Ok(BackupStatus::Created(dir))
    }

    /// Backup, read, rewrite and write the environment file.
    ///
    /// Nothing is written unless the complete new content could be computed.
    pub async fn patch(
        &self,
        session: &dyn RemoteSession,
        entries: &[DesiredVersion],
    ) -> Result<PatchReport, FleetError> {
        let backup = match self.ensure_backup(session).await {
            Ok(status) => status,
            Err(e) => match self.backup_policy {
                BackupPolicy::Continue => {
                    warn!("Backup failed, continuing: {}", e);
                    BackupStatus::Failed(e.to_string())
                }
                BackupPolicy::Abort => return Err(FleetError::BackupError(e.to_string())),
            },
        };

        let path = &self.layout.env_file;
        let current = session
            .execute(&RemoteCommand::ReadFile { path: path.clone() })
            .await
            .map_err(|e| FleetError::PatchError(format!("reading {}: {}", path, e)))?;

        let params = param_map(entries);
        let rewrite = rewrite_env(&current, &params);
        let missing: Vec<String> = params
            .keys()
            .filter(|name| !rewrite.updated.contains(name))
            .cloned()
            .collect();
        for name in &missing {
            warn!(param = %name, "Parameter not found in {}", path);
        }

        session
            .execute(&RemoteCommand::WriteFile {
                path: path.clone(),
                content: rewrite.content,
            })
            .await
            .map_err(|e| FleetError::PatchError(format!("writing {}: {}", path, e)))?;
        info!("Updated {} in {}", rewrite.updated.join(", "), path);

        Ok(PatchReport {
            backup,
            updated: rewrite.updated,
            missing,
        })
    }
}
