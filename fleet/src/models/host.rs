//! Host inventory models

use std::fmt;
use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::errors::FleetError;

/// Credentials used to authenticate against a host
#[derive(Debug)]
pub enum HostSecret {
    Password(SecretString),
    IdentityFile(PathBuf),
}

/// One remote upgrade target
#[derive(Debug)]
pub struct HostDescriptor {
    pub address: String,
    pub port: u16,
    pub username: String,
    pub secret: HostSecret,

    /// Designated image-staging host
    pub image_load: bool,

    /// Statically declared application short-names. When present the host is
    /// compared in declarative mode instead of querying running containers.
    pub applications: Option<Vec<String>>,
}

impl HostDescriptor {
    /// `user@address:port`, used in logs and reports
    pub fn label(&self) -> String {
        format!("{}@{}:{}", self.username, self.address, self.port)
    }
}

impl fmt::Display for HostDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Inventory file layout: `server: [ ... ]`
#[derive(Debug, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub server: Vec<HostRecord>,
}

/// Host record as written in the inventory file
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostRecord {
    pub server_ip: String,

    #[serde(default = "default_ssh_port", deserialize_with = "port_from_any")]
    pub server_port: u16,

    pub username: String,

    #[serde(default)]
    pub password: Option<SecretString>,

    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    #[serde(default, deserialize_with = "flag_from_any")]
    pub image_load: bool,

    #[serde(default)]
    pub applications: Option<Vec<String>>,
}

fn default_ssh_port() -> u16 {
    22
}

impl TryFrom<HostRecord> for HostDescriptor {
    type Error = FleetError;

    fn try_from(record: HostRecord) -> Result<Self, Self::Error> {
        if record.server_ip.trim().is_empty() {
            return Err(FleetError::InventoryError("empty server-ip".to_string()));
        }
        if record.username.trim().is_empty() {
            return Err(FleetError::InventoryError(format!(
                "empty username for {}",
                record.server_ip
            )));
        }
        let secret = match (record.password, record.identity_file) {
            (Some(password), None) => HostSecret::Password(password),
            (None, Some(path)) => HostSecret::IdentityFile(path),
            (Some(_), Some(_)) => {
                return Err(FleetError::InventoryError(format!(
                    "{}: set either password or identity-file, not both",
                    record.server_ip
                )))
            }
            (None, None) => {
                return Err(FleetError::InventoryError(format!(
                    "{}: missing password or identity-file",
                    record.server_ip
                )))
            }
        };
        Ok(HostDescriptor {
            address: record.server_ip,
            port: record.server_port,
            username: record.username,
            secret,
            image_load: record.image_load,
            applications: record.applications,
        })
    }
}

impl Inventory {
    /// Parse an inventory YAML document into validated host descriptors
    pub fn parse(content: &str) -> Result<Vec<HostDescriptor>, FleetError> {
        let inventory: Inventory = serde_yaml::from_str(content)?;
        inventory
            .server
            .into_iter()
            .map(HostDescriptor::try_from)
            .collect()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortRepr {
    Number(u16),
    Text(String),
}

fn port_from_any<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    match PortRepr::deserialize(deserializer)? {
        PortRepr::Number(port) => Ok(port),
        PortRepr::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlagRepr {
    Bool(bool),
    Text(String),
}

fn flag_from_any<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match FlagRepr::deserialize(deserializer)? {
        FlagRepr::Bool(flag) => Ok(flag),
        FlagRepr::Text(text) => match text.trim().to_lowercase().as_str() {
            "y" | "yes" | "true" => Ok(true),
            "n" | "no" | "false" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!("invalid flag: {}", other))),
        },
    }
}
