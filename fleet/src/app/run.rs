//! Run entry points: load inputs and drive the fleet

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::driver::UpgradeDriver;
use crate::deploy::fleet::run_fleet;
use crate::deploy::staging::{stage_images, StagingReport};
use crate::errors::FleetError;
use crate::filesys::file::File;
use crate::models::host::{HostDescriptor, Inventory};
use crate::models::manifest::ManifestIndex;
use crate::models::report::FleetReport;
use crate::remote::session::Connector;
use crate::remote::ssh::SshConnector;
use crate::storage::settings::Settings;

/// Read the settings file, or use defaults when no file is given
pub async fn load_settings(path: Option<&Path>) -> Result<Settings, FleetError> {
    match path {
        Some(path) => File::new(path).read_json::<Settings>().await,
        None => Ok(Settings::default()),
    }
}

/// Read and validate the host inventory
pub async fn load_hosts(path: &Path) -> Result<Vec<HostDescriptor>, FleetError> {
    let content = File::new(path).read_string().await?;
    let hosts = Inventory::parse(&content)?;
    for host in &hosts {
        info!(
            host = %host.label(),
            image_load = host.image_load,
            declared = host.applications.is_some(),
            "Loaded host"
        );
    }
    Ok(hosts)
}

/// Read and index the upgrade manifest
pub async fn load_manifest(path: &Path) -> Result<ManifestIndex, FleetError> {
    let content = File::new(path).read_string().await?;
    let index = ManifestIndex::parse(&content)?;
    info!("Loaded {} manifest entries from {}", index.len(), path.display());
    Ok(index)
}

/// Upgrade every host with the SSH transport
pub async fn run_upgrade(
    options: &AppOptions,
    hosts: Vec<HostDescriptor>,
    index: ManifestIndex,
) -> FleetReport {
    let connector = SshConnector::new(options.ssh.clone());
    run_upgrade_with(connector, options, hosts, index).await
}

/// Upgrade every host through the given connector
pub async fn run_upgrade_with<C>(
    connector: C,
    options: &AppOptions,
    hosts: Vec<HostDescriptor>,
    index: ManifestIndex,
) -> FleetReport
where
    C: Connector + 'static,
{
    let driver = Arc::new(UpgradeDriver::new(
        connector,
        Arc::new(index),
        options.upgrade.clone(),
    ));
    let hosts = hosts.into_iter().map(Arc::new).collect();
    run_fleet(driver, hosts, options.max_parallel_hosts).await
}

/// Load an image archive on the staging host and push the manifest images
pub async fn run_staging(
    options: &AppOptions,
    hosts: &[HostDescriptor],
    index: &ManifestIndex,
    archive: &str,
) -> Result<StagingReport, FleetError> {
    let connector = SshConnector::new(options.ssh.clone());
    stage_images(&connector, hosts, index, archive).await
}
