//! Connection traits for remote hosts

use async_trait::async_trait;

use crate::errors::FleetError;
use crate::models::host::HostDescriptor;
use crate::remote::command::RemoteCommand;

/// An open, authenticated connection to one host.
///
/// Each [`execute`](RemoteSession::execute) call runs on its own channel; channels
/// are never reused across commands.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run one command to completion and return its stdout.
    ///
    /// Fails with [`FleetError::RemoteChannelError`] when no channel could be
    /// opened and [`FleetError::RemoteCommandError`] when the command failed.
    async fn execute(&self, command: &RemoteCommand) -> Result<String, FleetError>;

    /// Tear the connection down. Called exactly once per session.
    async fn close(&self) -> Result<(), FleetError>;
}

/// Opens sessions to hosts
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &HostDescriptor) -> Result<Box<dyn RemoteSession>, FleetError>;
}
