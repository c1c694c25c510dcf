//! Remote policy generator.
//!
//! `RemoteGenerator` posts a policy to a `/v1/generate` endpoint and wraps
//! the answer in the same [`CompiledPolicy`] shape the local compiler
//! produces, so [`parity::verify`](crate::parity::verify) can compare the two.

use std::time::Duration;

use crate::compiler::{CompiledPolicy, RuleSource, Ruleset};
use crate::config::GenerateRequest;
use crate::parity::PolicyGenerator;
use crate::{Error, PolicyConfig, Result};

/// Path of the generate endpoint relative to the base URL.
pub const GENERATE_PATH: &str = "/v1/generate";

/// Default request timeout.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for a remote generator.
///
/// # Example
///
/// ```ignore
/// use geoguard::{parity, PolicyConfig, RemoteGenerator, ScriptCompiler};
///
/// let remote = RemoteGenerator::new("http://localhost:3000");
/// let config = PolicyConfig::builder().region("US").use_ipv6(true).build()?;
/// let report = parity::verify(&config, &ScriptCompiler::new(), &remote)?;
/// assert!(report.matched);
/// ```
pub struct RemoteGenerator {
    base_url: String,
    timeout: Duration,
}

impl RemoteGenerator {
    /// Create a generator for the server at `base_url`.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    /// Set a custom request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full URL of the generate endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, GENERATE_PATH)
    }
}

/// Interpret a generate response body.
///
/// JSON bodies carry `{script, ruleset}`; anything else is the bare script.
fn parse_generate_response(content_type: &str, body: String) -> Result<CompiledPolicy> {
    if content_type.starts_with("application/json") {
        let mut policy: CompiledPolicy = serde_json::from_str(&body)?;
        let rules: Vec<_> = policy
            .ruleset
            .iter()
            .cloned()
            .map(|mut rule| {
                rule.source_type = RuleSource::Remote;
                rule
            })
            .collect();
        policy.ruleset = rules.into();
        Ok(policy)
    } else {
        Ok(CompiledPolicy {
            script: body,
            ruleset: Ruleset::default(),
        })
    }
}

impl PolicyGenerator for RemoteGenerator {
    fn generate(&self, config: &PolicyConfig) -> Result<CompiledPolicy> {
        let url = self.endpoint();
        let request = GenerateRequest::from(config);
        log::debug!("requesting remote policy from {}", url);

        let response = ureq::post(&url)
            .timeout(self.timeout)
            .set("Content-Type", "application/json")
            .send_string(&serde_json::to_string(&request)?)
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => Error::Remote(format!("HTTP error: {}", code)),
                ureq::Error::Transport(t) => Error::Remote(format!("Transport error: {}", t)),
            })?;

        let content_type = response.content_type().to_string();
        let body = response
            .into_string()
            .map_err(|e| Error::Remote(format!("failed to read response: {}", e)))?;

        parse_generate_response(&content_type, body)
    }

    fn name(&self) -> &str {
        &self.base_url
    }
}
