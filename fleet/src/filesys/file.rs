//! Local input files

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use tokio::fs;

use crate::errors::FleetError;

/// A local file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, FleetError> {
        fs::read_to_string(&self.path).await.map_err(|e| {
            FleetError::IoError(std::io::Error::new(
                e.kind(),
                format!("{}: {}", self.path.display(), e),
            ))
        })
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, FleetError> {
        let contents = self.read_string().await?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    }
}

