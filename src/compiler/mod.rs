//! Firewall script compiler.
//!
//! [`ScriptCompiler::compile`] turns a [`PolicyConfig`] into a shell script
//! for the configured backend plus a structured [`Ruleset`] describing the
//! same ranges. Each backend variant implements [`ScriptBackend`]; the
//! variant is chosen once in [`select_backend`] before any address work.

mod iptables;
mod nftables;

pub use iptables::{IptablesRaw, IptablesSet};
pub use nftables::Nftables;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::synth::{synthesize, AddressFamily, AddressRange};
use crate::{Backend, Error, PolicyAction, PolicyConfig, Result};

/// Where a ruleset entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    /// Produced by the deterministic local compiler
    #[default]
    Local,
    /// Supplied by a remote generator
    Remote,
}

/// All ranges a policy installs for one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionRule {
    pub region: String,
    /// IPv4 ranges followed by IPv6 ranges
    pub cidrs: Vec<String>,
    pub action: PolicyAction,
    /// 1-based position of the region in the policy
    pub priority: u32,
    #[serde(default)]
    pub source_type: RuleSource,
}

/// Ordered per-region records, one per target region in policy order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ruleset(Vec<RegionRule>);

impl Ruleset {
    pub fn iter(&self) -> std::slice::Iter<'_, RegionRule> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Find the record for a region code (case-insensitive).
    pub fn get(&self, region: &str) -> Option<&RegionRule> {
        self.0.iter().find(|r| r.region.eq_ignore_ascii_case(region))
    }

    /// Total number of ranges across all regions.
    pub fn range_count(&self) -> usize {
        self.0.iter().map(|r| r.cidrs.len()).sum()
    }
}

impl From<Vec<RegionRule>> for Ruleset {
    fn from(rules: Vec<RegionRule>) -> Self {
        Self(rules)
    }
}

impl<'a> IntoIterator for &'a Ruleset {
    type Item = &'a RegionRule;
    type IntoIter = std::slice::Iter<'a, RegionRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Output of a compile call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledPolicy {
    pub script: String,
    pub ruleset: Ruleset,
}

/// How many ranges a backend variant installs per region and family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeCounts {
    pub v4: usize,
    pub v6: usize,
}

/// Synthesized ranges for one region, shared by the script and the ruleset.
#[derive(Debug, Clone)]
pub struct RegionRanges {
    pub region: String,
    pub v4: Vec<AddressRange>,
    /// Empty unless IPv6 is enabled
    pub v6: Vec<AddressRange>,
}

/// Everything a backend needs to emit its body.
pub struct EmitContext<'a> {
    pub config: &'a PolicyConfig,
    pub regions: &'a [RegionRanges],
}

/// Line-oriented script buffer.
#[derive(Debug, Default)]
pub struct ScriptWriter {
    buf: String,
}

impl ScriptWriter {
    pub fn line(&mut self, line: impl AsRef<str>) {
        self.buf.push_str(line.as_ref());
        self.buf.push('\n');
    }

    pub fn blank(&mut self) {
        self.buf.push('\n');
    }

    pub fn comment(&mut self, text: impl AsRef<str>) {
        self.buf.push_str("# ");
        self.line(text);
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

/// One script generator per backend variant.
pub trait ScriptBackend: Send + Sync {
    /// Ranges per region and family this variant installs.
    fn counts(&self) -> RangeCounts;

    /// Engine description used in the closing status line.
    fn engine_label(&self) -> &'static str;

    /// Emit everything between the shared header and the status line.
    fn emit(&self, ctx: &EmitContext<'_>, out: &mut ScriptWriter);
}

/// Pick the generator for `config`, rejecting unimplemented backends.
pub fn select_backend(config: &PolicyConfig) -> Result<&'static dyn ScriptBackend> {
    match (config.backend(), config.use_address_set()) {
        (Backend::Nftables, _) => Ok(&Nftables),
        (Backend::Iptables, true) => Ok(&IptablesSet),
        (Backend::Iptables, false) => Ok(&IptablesRaw),
        (other, _) => Err(Error::UnsupportedBackend(other)),
    }
}

/// Deterministic policy compiler.
///
/// # Examples
/// ```
/// use geoguard::{Backend, PolicyConfig, ScriptCompiler};
///
/// let config = PolicyConfig::builder()
///     .region("us")
///     .backend(Backend::Nftables)
///     .build()
///     .unwrap();
/// let policy = ScriptCompiler::new().compile(&config).unwrap();
///
/// assert!(policy.script.contains("nft add set inet geoguard blocklist_v4"));
/// assert_eq!(policy.ruleset.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScriptCompiler {
    timestamp: Option<DateTime<Utc>>,
}

impl ScriptCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the `Generated:` header instead of using the current time.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    fn timestamp(&self) -> String {
        self.timestamp
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Compile `config` into a script and the matching ruleset.
    pub fn compile(&self, config: &PolicyConfig) -> Result<CompiledPolicy> {
        let backend = select_backend(config)?;
        let counts = backend.counts();

        let regions: Vec<RegionRanges> = config
            .effective_regions()
            .into_iter()
            .map(|region| {
                let v4 = synthesize(&region, AddressFamily::V4, counts.v4);
                let v6 = if config.use_ipv6() {
                    synthesize(&region, AddressFamily::V6, counts.v6)
                } else {
                    Vec::new()
                };
                RegionRanges { region, v4, v6 }
            })
            .collect();

        let script = self.render(config, backend, &regions);
        let ruleset = build_ruleset(config.action(), &regions);

        log::debug!(
            "compiled {} policy: {} regions, {} ranges, {} bytes",
            config.backend(),
            regions.len(),
            ruleset.range_count(),
            script.len()
        );

        Ok(CompiledPolicy { script, ruleset })
    }

    fn render(
        &self,
        config: &PolicyConfig,
        backend: &dyn ScriptBackend,
        regions: &[RegionRanges],
    ) -> String {
        let codes: Vec<&str> = regions.iter().map(|r| r.region.as_str()).collect();
        let protocols = if config.use_ipv6() { "IPv4, IPv6" } else { "IPv4" };
        let command = config.backend().command();

        let mut out = ScriptWriter::default();
        out.line("#!/bin/bash");
        out.comment("GeoGuard Automated Security Policy");
        out.comment(format!(
            "Targets: {} | Engine: {}",
            codes.join(", "),
            config.backend()
        ));
        out.comment(format!(
            "Protocols: {} | Total Regions: {}",
            protocols,
            codes.len()
        ));
        out.comment(format!("Generated: {}", self.timestamp()));
        out.blank();
        out.line(format!(
            "if ! command -v {cmd} &> /dev/null; then echo \"Error: {cmd} not found.\"; exit 1; fi",
            cmd = command
        ));

        backend.emit(&EmitContext { config, regions }, &mut out);

        out.blank();
        out.line(format!(
            "echo \"[GeoGuard] Policy for {} regions applied successfully using {}{}.\"",
            codes.len(),
            backend.engine_label(),
            if config.use_ipv6() { " (Dual-Stack)" } else { "" }
        ));
        out.finish()
    }
}

fn build_ruleset(action: PolicyAction, regions: &[RegionRanges]) -> Ruleset {
    regions
        .iter()
        .enumerate()
        .map(|(i, r)| RegionRule {
            region: r.region.clone(),
            cidrs: r.v4.iter().chain(&r.v6).map(|a| a.cidr.clone()).collect(),
            action,
            priority: i as u32 + 1,
            source_type: RuleSource::Local,
        })
        .collect::<Vec<_>>()
        .into()
}
