//! SSH transport built on the system OpenSSH client
//!
//! Connecting starts a ControlMaster for the host. Every command then runs as a
//! separate `ssh -S <socket>` client, which opens a fresh session channel on the
//! shared connection. Closing asks the master to exit.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::FleetError;
use crate::models::host::{HostDescriptor, HostSecret};
use crate::remote::command::RemoteCommand;
use crate::remote::session::{Connector, RemoteSession};

/// ssh exits with 255 when the failure is its own rather than the remote command's
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// SSH transport options
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// OpenSSH client binary
    pub program: PathBuf,

    /// Directory holding the ControlMaster sockets
    pub control_dir: PathBuf,

    /// TCP/auth timeout handed to ssh
    pub connect_timeout: Duration,

    /// Deadline for each remote command
    pub command_timeout: Duration,

    /// Value for `StrictHostKeyChecking`
    pub host_key_checking: String,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ssh"),
            control_dir: std::env::temp_dir(),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(300),
            host_key_checking: "accept-new".to_string(),
        }
    }
}

/// Connector that opens OpenSSH ControlMaster sessions
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    options: SshOptions,

    /// Connections opened so far; keeps sockets apart when a host is listed twice
    opened: Arc<AtomicU64>,
}

impl SshConnector {
    pub fn new(options: SshOptions) -> Self {
        Self {
            options,
            opened: Arc::default(),
        }
    }

    fn control_path(&self, host: &HostDescriptor) -> PathBuf {
        let sequence = self.opened.fetch_add(1, Ordering::Relaxed);
        let mut hasher = Sha256::new();
        hasher.update(host.label().as_bytes());
        hasher.update(std::process::id().to_le_bytes());
        hasher.update(sequence.to_le_bytes());
        let digest = hasher.finalize();
        let short: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
        self.options.control_dir.join(format!("fleet-{}.sock", short))
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, host: &HostDescriptor) -> Result<Box<dyn RemoteSession>, FleetError> {
        let control_path = self.control_path(host);
        let log_path = control_path.with_extension("log");
        let destination = format!("{}@{}", host.username, host.address);

        let mut cmd = match &host.secret {
            HostSecret::Password(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg(&self.options.program).env("SSHPASS", password.expose_secret());
                cmd
            }
            HostSecret::IdentityFile(path) => {
                let mut cmd = Command::new(&self.options.program);
                cmd.arg("-i").arg(path).arg("-o").arg("BatchMode=yes");
                cmd
            }
        };
        cmd.args(["-M", "-N", "-f"])
            .arg("-S")
            .arg(&control_path)
            .arg("-E")
            .arg(&log_path)
            .arg("-p")
            .arg(host.port.to_string())
            .arg("-o")
            .arg("ControlPersist=no")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1)))
            .arg("-o")
            .arg(format!("StrictHostKeyChecking={}", self.options.host_key_checking))
            .arg(&destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        debug!(host = %host.label(), control = %control_path.display(), "Starting ssh control master");

        // `-f` backgrounds the master once authenticated, so the foreground
        // process exits as soon as the connection is usable.
        let deadline = self.options.connect_timeout + Duration::from_secs(5);
        let status = match tokio::time::timeout(deadline, cmd.status()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(FleetError::ConnectionError(format!(
                    "{}: failed to run ssh: {}",
                    host.label(),
                    e
                )))
            }
            Err(_) => {
                return Err(FleetError::ConnectionError(format!(
                    "{}: timed out after {:?}",
                    host.label(),
                    deadline
                )))
            }
        };

        if !status.success() {
            let log = tokio::fs::read_to_string(&log_path).await.unwrap_or_default();
            let _ = tokio::fs::remove_file(&log_path).await;
            let reason = match (&host.secret, status.code()) {
                (HostSecret::Password(_), Some(5)) => "invalid password".to_string(),
                (HostSecret::Password(_), Some(6)) => "host key not accepted".to_string(),
                _ => log.trim().to_string(),
            };
            return Err(FleetError::ConnectionError(format!(
                "{}: ssh exited with {:?}: {}",
                host.label(),
                status.code(),
                reason
            )));
        }

        info!(host = %host.label(), "Connected");
        Ok(Box::new(SshSession {
            program: self.options.program.clone(),
            label: host.label(),
            destination,
            port: host.port,
            control_path,
            log_path,
            command_timeout: self.options.command_timeout,
        }))
    }
}

/// A live ControlMaster connection
#[derive(Debug)]
pub struct SshSession {
    program: PathBuf,
    label: String,
    destination: String,
    port: u16,
    control_path: PathBuf,
    log_path: PathBuf,
    command_timeout: Duration,
}

impl SshSession {
    fn client(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-S")
            .arg(&self.control_path)
            .arg("-p")
            .arg(self.port.to_string())
            .arg("-o")
            .arg("ControlMaster=no")
            .arg("-o")
            .arg("BatchMode=yes");
        cmd
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn execute(&self, command: &RemoteCommand) -> Result<String, FleetError> {
        let line = command.render();
        debug!(host = %self.label, command = %line, "Executing");

        let mut cmd = self.client();
        cmd.arg(&self.destination)
            .arg("--")
            .arg(&line)
            .stdin(if command.stdin().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let run = async {
            let mut child = cmd.spawn()?;
            if let (Some(input), Some(mut stdin)) = (command.stdin(), child.stdin.take()) {
                stdin.write_all(input.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            child.wait_with_output().await
        };

        let output = match tokio::time::timeout(self.command_timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(FleetError::RemoteChannelError {
                    command: line,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(FleetError::Timeout(format!(
                    "`{}` on {} exceeded {:?}",
                    line, self.label, self.command_timeout
                )))
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(0) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
            Some(SSH_TRANSPORT_FAILURE) => Err(FleetError::RemoteChannelError {
                command: line,
                reason: stderr,
            }),
            status => Err(FleetError::RemoteCommandError {
                command: line,
                status,
                stderr,
            }),
        }
    }

    async fn close(&self) -> Result<(), FleetError> {
        let output = self
            .client()
            .args(["-O", "exit"])
            .arg(&self.destination)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;
        let _ = tokio::fs::remove_file(&self.log_path).await;

        match output {
            Ok(output) if output.status.success() => {
                debug!(host = %self.label, "Connection closed");
                Ok(())
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                warn!(host = %self.label, "Control master did not exit cleanly: {}", stderr);
                Err(FleetError::ConnectionError(format!("{}: {}", self.label, stderr)))
            }
            Err(e) => Err(FleetError::ConnectionError(format!("{}: {}", self.label, e))),
        }
    }
}
