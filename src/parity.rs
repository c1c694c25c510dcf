//! Parity checking between two policy generators.
//!
//! Scripts are compared after [`normalize`], which strips everything that is
//! allowed to differ between independent generators: blank lines, comments
//! (including the generation timestamp) and informational output.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::compiler::{CompiledPolicy, ScriptCompiler};
use crate::{PolicyConfig, Result};

/// Anything that turns a policy into `{script, ruleset}`.
///
/// Implemented by the local [`ScriptCompiler`], by
/// [`RemoteGenerator`](crate::remote::RemoteGenerator), and by any
/// `Fn(&PolicyConfig) -> Result<CompiledPolicy>`.
pub trait PolicyGenerator {
    fn generate(&self, config: &PolicyConfig) -> Result<CompiledPolicy>;

    /// Short label for logs.
    fn name(&self) -> &str {
        "generator"
    }
}

impl PolicyGenerator for ScriptCompiler {
    fn generate(&self, config: &PolicyConfig) -> Result<CompiledPolicy> {
        self.compile(config)
    }

    fn name(&self) -> &str {
        "local"
    }
}

impl<F> PolicyGenerator for F
where
    F: Fn(&PolicyConfig) -> Result<CompiledPolicy>,
{
    fn generate(&self, config: &PolicyConfig) -> Result<CompiledPolicy> {
        self(config)
    }
}

fn is_output_statement(line: &str) -> bool {
    matches!(line.split_whitespace().next(), Some("echo") | Some("printf"))
}

/// Reduce a script to its behavior-bearing statements.
///
/// Lines are trimmed; empty lines, `#` comments and `echo`/`printf`
/// statements are dropped; the rest are joined with `\n` in input order.
/// Normalizing twice gives the same result.
pub fn normalize(script: &str) -> String {
    script
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !is_output_statement(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Hex SHA-256 of the normalized script.
pub fn normalized_digest(script: &str) -> String {
    hex_digest(&normalize(script))
}

fn hex_digest(text: &str) -> String {
    Sha256::digest(text.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Outcome of a parity check. A mismatch is a normal result, not an error;
/// both normalized scripts are kept so callers can diff them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParityReport {
    pub matched: bool,
    pub normalized_a: String,
    pub normalized_b: String,
}

impl ParityReport {
    /// Compare two raw scripts.
    pub fn compare(script_a: &str, script_b: &str) -> Self {
        let normalized_a = normalize(script_a);
        let normalized_b = normalize(script_b);
        Self {
            matched: normalized_a == normalized_b,
            normalized_a,
            normalized_b,
        }
    }

    pub fn digest_a(&self) -> String {
        hex_digest(&self.normalized_a)
    }

    pub fn digest_b(&self) -> String {
        hex_digest(&self.normalized_b)
    }
}

/// Run both generators on `config` and compare their scripts.
///
/// A generator failure is returned as an error; a behavioral difference is
/// reported through [`ParityReport::matched`].
pub fn verify(
    config: &PolicyConfig,
    a: &dyn PolicyGenerator,
    b: &dyn PolicyGenerator,
) -> Result<ParityReport> {
    let policy_a = a.generate(config)?;
    let policy_b = b.generate(config)?;
    let report = ParityReport::compare(&policy_a.script, &policy_b.script);

    if report.matched {
        log::info!("parity verified: {} == {}", a.name(), b.name());
    } else {
        log::warn!(
            "parity mismatch: {} ({} lines) != {} ({} lines)",
            a.name(),
            report.normalized_a.lines().count(),
            b.name(),
            report.normalized_b.lines().count()
        );
    }

    Ok(report)
}
