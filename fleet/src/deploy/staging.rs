//! Image staging: load an image archive on the staging host and push the
//! manifest images to the registry from there.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::errors::FleetError;
use crate::models::host::HostDescriptor;
use crate::models::manifest::ManifestIndex;
use crate::remote::command::RemoteCommand;
use crate::remote::session::{Connector, RemoteSession};

/// Result of a staging run
#[derive(Debug, Clone, Default, Serialize)]
pub struct StagingReport {
    pub host: String,
    pub archive: String,

    /// Image references pushed successfully
    pub pushed: Vec<String>,

    /// Image references whose push failed
    pub failed: Vec<String>,
}

impl StagingReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// First host flagged for image loading
pub fn staging_host(hosts: &[HostDescriptor]) -> Option<&HostDescriptor> {
    hosts.iter().find(|h| h.image_load)
}

/// Load `archive` on the staging host, then push every manifest image.
///
/// A failed load aborts the run; a failed push is recorded and the remaining
/// images are still pushed.
pub async fn stage_images<C: Connector>(
    connector: &C,
    hosts: &[HostDescriptor],
    index: &ManifestIndex,
    archive: &str,
) -> Result<StagingReport, FleetError> {
    if archive.trim().is_empty() {
        return Err(FleetError::StagingError("empty archive path".to_string()));
    }
    let host = staging_host(hosts)
        .ok_or_else(|| FleetError::StagingError("no host has image-load enabled".to_string()))?;

    info!(host = %host, archive = %archive, "Staging images");
    let session = connector.connect(host).await?;
    let result = push_all(session.as_ref(), host, index, archive).await;
    if let Err(e) = session.close().await {
        warn!(host = %host, "Failed to close connection: {}", e);
    }
    result
}

async fn push_all(
    session: &dyn RemoteSession,
    host: &HostDescriptor,
    index: &ManifestIndex,
    archive: &str,
) -> Result<StagingReport, FleetError> {
    session
        .execute(&RemoteCommand::LoadImage {
            archive: archive.to_string(),
        })
        .await
        .map_err(|e| FleetError::StagingError(format!("loading {}: {}", archive, e)))?;
    info!(host = %host, "Archive loaded");

    let mut report = StagingReport {
        host: host.label(),
        archive: archive.to_string(),
        ..Default::default()
    };
    for entry in index.iter() {
        let reference = entry.reference();
        match session
            .execute(&RemoteCommand::PushImage {
                reference: reference.clone(),
            })
            .await
        {
            Ok(_) => {
                info!(image = %reference, "Pushed");
                report.pushed.push(reference);
            }
            Err(e) => {
                error!(image = %reference, "Push failed: {}", e);
                report.failed.push(reference);
            }
        }
    }
    Ok(report)
}
