//! Policy configuration types.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::{Backend, Error, PolicyAction, Result};

/// Region substituted when a policy names no regions.
pub const DEFAULT_REGION: &str = "CN";

/// Normalize a region code: trimmed, uppercase, exactly two ASCII letters.
pub fn normalize_region(code: &str) -> Result<String> {
    let code = code.trim().to_uppercase();

    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(Error::InvalidRegionCode(code));
    }

    Ok(code)
}

/// Immutable input to the script compiler.
///
/// Regions are uppercase, deduplicated and kept in first-seen order. An empty
/// region list is valid; the compiler falls back to [`DEFAULT_REGION`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    regions: Vec<String>,
    backend: Backend,
    action: PolicyAction,
    use_address_set: bool,
    use_ipv6: bool,
}

impl PolicyConfig {
    /// Start building a configuration with the documented defaults.
    pub fn builder() -> PolicyConfigBuilder {
        PolicyConfigBuilder::default()
    }

    /// Regions as given, normalized. May be empty.
    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    /// Regions the compiler actually targets (the default region if none were given).
    pub fn effective_regions(&self) -> Vec<String> {
        if self.regions.is_empty() {
            vec![DEFAULT_REGION.to_string()]
        } else {
            self.regions.clone()
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn action(&self) -> PolicyAction {
        self.action
    }

    pub fn use_address_set(&self) -> bool {
        self.use_address_set
    }

    pub fn use_ipv6(&self) -> bool {
        self.use_ipv6
    }

    /// Parse a YAML policy file.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let file: PolicyFile = serde_yaml::from_str(content)?;
        file.try_into()
    }

    /// Load a YAML policy file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            regions: Vec::new(),
            backend: Backend::Iptables,
            action: PolicyAction::Block,
            use_address_set: true,
            use_ipv6: false,
        }
    }
}

/// Builder for [`PolicyConfig`]. Region codes are validated in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct PolicyConfigBuilder {
    regions: Vec<String>,
    backend: Backend,
    action: PolicyAction,
    use_address_set: bool,
    use_ipv6: bool,
}

impl Default for PolicyConfigBuilder {
    fn default() -> Self {
        let defaults = PolicyConfig::default();
        Self {
            regions: defaults.regions,
            backend: defaults.backend,
            action: defaults.action,
            use_address_set: defaults.use_address_set,
            use_ipv6: defaults.use_ipv6,
        }
    }
}

impl PolicyConfigBuilder {
    pub fn region(mut self, code: impl Into<String>) -> Self {
        self.regions.push(code.into());
        self
    }

    pub fn regions<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.regions.extend(codes.into_iter().map(Into::into));
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn action(mut self, action: PolicyAction) -> Self {
        self.action = action;
        self
    }

    pub fn use_address_set(mut self, enabled: bool) -> Self {
        self.use_address_set = enabled;
        self
    }

    pub fn use_ipv6(mut self, enabled: bool) -> Self {
        self.use_ipv6 = enabled;
        self
    }

    /// Validate and normalize the regions, producing an immutable config.
    pub fn build(self) -> Result<PolicyConfig> {
        let mut regions: Vec<String> = Vec::with_capacity(self.regions.len());
        for raw in &self.regions {
            let code = normalize_region(raw)?;
            if !regions.contains(&code) {
                regions.push(code);
            }
        }

        Ok(PolicyConfig {
            regions,
            backend: self.backend,
            action: self.action,
            use_address_set: self.use_address_set,
            use_ipv6: self.use_ipv6,
        })
    }
}

/// On-disk YAML representation of a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyFile {
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub action: PolicyAction,
    #[serde(default = "default_true")]
    pub use_address_set: bool,
    #[serde(default)]
    pub use_ipv6: bool,
}

fn default_true() -> bool {
    true
}

impl TryFrom<PolicyFile> for PolicyConfig {
    type Error = Error;

    fn try_from(file: PolicyFile) -> Result<Self> {
        PolicyConfig::builder()
            .regions(file.regions)
            .backend(file.backend)
            .action(file.action)
            .use_address_set(file.use_address_set)
            .use_ipv6(file.use_ipv6)
            .build()
    }
}

/// Region field of a generate request: a single code or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegionField {
    One(String),
    Many(Vec<String>),
}

/// JSON body accepted by the `/v1/generate` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<RegionField>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_ipset: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_ipv6: Option<bool>,
}

impl From<&PolicyConfig> for GenerateRequest {
    fn from(config: &PolicyConfig) -> Self {
        Self {
            country: Some(RegionField::Many(config.effective_regions())),
            backend: Some(config.backend().as_str().to_string()),
            action: Some(config.action().as_str().to_string()),
            use_ipset: Some(config.use_address_set()),
            use_ipv6: Some(config.use_ipv6()),
        }
    }
}

impl TryFrom<GenerateRequest> for PolicyConfig {
    type Error = Error;

    /// Missing fields follow the endpoint's defaults: iptables, sets on,
    /// IPv6 off. A missing action means ALLOW, since only BLOCK/DROP select drop.
    fn try_from(req: GenerateRequest) -> Result<Self> {
        let regions = match req.country {
            Some(RegionField::One(code)) => vec![code],
            Some(RegionField::Many(codes)) => codes,
            None => Vec::new(),
        };
        let backend = match req.backend {
            Some(name) => name.parse()?,
            None => Backend::Iptables,
        };
        let action = match req.action {
            Some(name) => name.parse()?,
            None => PolicyAction::Allow,
        };

        PolicyConfig::builder()
            .regions(regions)
            .backend(backend)
            .action(action)
            .use_address_set(req.use_ipset.unwrap_or(true))
            .use_ipv6(req.use_ipv6.unwrap_or(false))
            .build()
    }
}
