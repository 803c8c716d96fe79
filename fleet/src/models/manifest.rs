//! Upgrade manifest models

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::FleetError;

/// One desired image version from the upgrade manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredVersion {
    /// Registry path without tag, e.g. `registry.local/team/app-one`
    pub image: String,

    /// Target tag
    pub tag: String,

    /// Compose service selector, the last path segment of `image`
    pub service: String,
}

impl DesiredVersion {
    pub fn new(image: impl Into<String>, tag: impl Into<String>) -> Self {
        let image = image.into();
        let service = service_name(&image).to_string();
        Self {
            image,
            tag: tag.into(),
            service,
        }
    }

    /// Full image reference `image:tag`
    pub fn reference(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

/// Last `/`-separated segment of an image identity
pub fn service_name(image: &str) -> &str {
    image.rsplit('/').next().unwrap_or(image)
}

/// Strip the tag and/or digest from an image reference.
///
/// The tag separator is the last `:` after the last `/`, so a registry port
/// (`registry:5000/app:1.0`) is kept.
pub fn strip_tag(reference: &str) -> &str {
    let reference = reference.split('@').next().unwrap_or(reference);
    let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[name_start..].rfind(':') {
        Some(i) => &reference[..name_start + i],
        None => reference,
    }
}

/// Index of desired versions keyed by image identity.
///
/// Built once per run and shared read-only between hosts.
#[derive(Debug, Clone, Default)]
pub struct ManifestIndex {
    entries: HashMap<String, DesiredVersion>,
    order: Vec<String>,
}

impl ManifestIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the line-oriented manifest format (`image:tag` per line).
    ///
    /// Blank lines and `#` comments are skipped; anything else that does not
    /// carry a tag is rejected with its line number.
    pub fn parse(content: &str) -> Result<Self, FleetError> {
        let mut index = Self::new();
        for (i, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let entry = parse_line(line).map_err(|reason| FleetError::ManifestError {
                line: i + 1,
                reason,
            })?;
            debug!(image = %entry.image, tag = %entry.tag, "Manifest entry");
            index.insert(entry);
        }
        Ok(index)
    }

    /// Insert an entry; a later entry for the same image replaces the earlier one
    pub fn insert(&mut self, entry: DesiredVersion) {
        if let Some(previous) = self.entries.get(&entry.image) {
            warn!(
                image = %entry.image,
                "Duplicate manifest entry, {} replaces {}",
                entry.tag,
                previous.tag
            );
        } else {
            self.order.push(entry.image.clone());
        }
        self.entries.insert(entry.image.clone(), entry);
    }

    pub fn get(&self, image: &str) -> Option<&DesiredVersion> {
        self.entries.get(image)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in manifest order
    pub fn iter(&self) -> impl Iterator<Item = &DesiredVersion> {
        self.order.iter().filter_map(|image| self.entries.get(image))
    }
}

impl FromIterator<DesiredVersion> for ManifestIndex {
    fn from_iter<I: IntoIterator<Item = DesiredVersion>>(iter: I) -> Self {
        let mut index = Self::new();
        for entry in iter {
            index.insert(entry);
        }
        index
    }
}

fn parse_line(line: &str) -> Result<DesiredVersion, String> {
    let name_start = line.rfind('/').map(|i| i + 1).unwrap_or(0);
    let Some(sep) = line[name_start..].rfind(':').map(|i| name_start + i) else {
        return Err(format!("missing `:tag` in `{}`", line));
    };
    let (image, tag) = (&line[..sep], &line[sep + 1..]);
    if image.is_empty() || service_name(image).is_empty() {
        return Err(format!("empty image name in `{}`", line));
    }
    if tag.is_empty() {
        return Err(format!("empty tag in `{}`", line));
    }
    Ok(DesiredVersion::new(image, tag))
}
