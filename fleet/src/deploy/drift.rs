//! Drift detection between a host and the upgrade manifest

use std::collections::HashSet;

use tracing::{debug, info};

use crate::errors::FleetError;
use crate::models::host::HostDescriptor;
use crate::models::manifest::{strip_tag, DesiredVersion, ManifestIndex};
use crate::remote::command::RemoteCommand;
use crate::remote::session::RemoteSession;

/// Placeholder replaced by the application name in a registry template
pub const APP_PLACEHOLDER: &str = "{app}";

/// Result of comparing a host against the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    /// Nothing on the host is listed in the manifest
    None,

    /// Manifest entries to apply, in the order the host reported them
    Matched(Vec<DesiredVersion>),
}

impl Drift {
    pub fn matched(&self) -> &[DesiredVersion] {
        match self {
            Drift::None => &[],
            Drift::Matched(entries) => entries,
        }
    }
}

/// Expand an application short-name into an image identity
pub fn expand_template(template: &str, app: &str) -> String {
    if template.contains(APP_PLACEHOLDER) {
        template.replace(APP_PLACEHOLDER, app)
    } else {
        format!("{}/{}", template.trim_end_matches('/'), app)
    }
}

/// Compares hosts against a shared manifest index
#[derive(Debug, Clone, Copy)]
pub struct DriftDetector<'a> {
    index: &'a ManifestIndex,
    registry_template: &'a str,
}

impl<'a> DriftDetector<'a> {
    pub fn new(index: &'a ManifestIndex, registry_template: &'a str) -> Self {
        Self {
            index,
            registry_template,
        }
    }

    /// Detect drift on a host.
    ///
    /// Hosts declaring `applications` are matched against the declared list
    /// without any remote call; other hosts are asked for their containers'
    /// images.
    pub async fn detect(
        &self,
        session: &dyn RemoteSession,
        host: &HostDescriptor,
    ) -> Result<Drift, FleetError> {
        match &host.applications {
            Some(apps) => {
                debug!(host = %host, "Comparing declared applications: {:?}", apps);
                Ok(self.match_declared(apps))
            }
            None => {
                let output = session.execute(&RemoteCommand::ListImages).await?;
                debug!(host = %host, "Running images:\n{}", output.trim_end());
                Ok(self.match_observed(output.lines()))
            }
        }
    }

    /// Declarative mode: expand each application name with the registry template
    pub fn match_declared<S: AsRef<str>>(&self, apps: &[S]) -> Drift {
        self.match_identities(
            apps.iter()
                .map(|app| expand_template(self.registry_template, app.as_ref().trim())),
        )
    }

    /// Observed mode: one image reference per line, tags are ignored
    pub fn match_observed<'l, I>(&self, references: I) -> Drift
    where
        I: IntoIterator<Item = &'l str>,
    {
        self.match_identities(
            references
                .into_iter()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(|r| strip_tag(r).to_string()),
        )
    }

    fn match_identities<I>(&self, identities: I) -> Drift
    where
        I: IntoIterator<Item = String>,
    {
        let mut seen = HashSet::new();
        let mut matched = Vec::new();
        for identity in identities {
            let Some(entry) = self.index.get(&identity) else {
                continue;
            };
            if seen.insert(identity) {
                info!(image = %entry.image, "Needs upgrade to {}", entry.tag);
                matched.push(entry.clone());
            }
        }

        if matched.is_empty() {
            Drift::None
        } else {
            Drift::Matched(matched)
        }
    }
}
