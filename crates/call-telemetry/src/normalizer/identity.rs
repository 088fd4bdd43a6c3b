use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::IdentityConfig;
use crate::database::TelemetryStore;

/// `"Dana  O'Reyes-Smith"` -> `"dana.oreyessmith"`; `None` when nothing
/// alphanumeric is left
pub fn dotted_name(name: &str) -> Option<String> {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    let dotted = cleaned.split_whitespace().collect::<Vec<_>>().join(".");
    if dotted.is_empty() {
        None
    } else {
        Some(dotted)
    }
}

pub fn extension_identity(extension: &str, domain: &str) -> String {
    format!("agent.{}@{}", extension, domain)
}

/// Maps extension + display name to a stable agent identity.
///
/// The directory (presence and shift rows) is consulted first. Agents not in
/// the directory get a synthetic identity per [`IdentityConfig`]. Name-derived
/// identities are best effort: two agents with the same display name map to
/// the same identity.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn TelemetryStore>,
    config: IdentityConfig,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn TelemetryStore>, config: IdentityConfig) -> Self {
        Self { store, config }
    }

    /// Synthetic identity without a directory lookup
    pub fn synthetic(&self, extension: &str, name: &str) -> String {
        if self.config.derive_from_name {
            if let Some(dotted) = dotted_name(name) {
                return format!("{}@{}", dotted, self.config.domain);
            }
        }
        extension_identity(extension, &self.config.domain)
    }

    pub async fn resolve(&self, extension: &str, name: &str) -> String {
        match self.store.find_agent_identity(extension, name).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                let identity = self.synthetic(extension, name);
                debug!(extension, name, identity = %identity, "agent not in directory, using synthetic identity");
                identity
            }
            Err(e) => {
                warn!(extension, error = %e, "agent directory lookup failed");
                extension_identity(extension, &self.config.domain)
            }
        }
    }
}
