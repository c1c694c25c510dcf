//! End-to-end self checks: registry lookup, local generation, remote parity.

use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr};

use crate::lookup::GeoLookup;
use crate::parity::{self, PolicyGenerator};
use crate::{Backend, PolicyAction, PolicyConfig, Result, ScriptCompiler};

/// Address whose registry entry is known to be in the US.
const PROBE_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));

/// Result of one check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticCheck {
    pub name: &'static str,
    pub success: bool,
    pub logs: Vec<String>,
}

impl DiagnosticCheck {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }
}

/// All check results, in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub checks: Vec<DiagnosticCheck>,
}

impl DiagnosticsReport {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.success)
    }
}

fn dual_stack_block(regions: &[&str]) -> Result<PolicyConfig> {
    PolicyConfig::builder()
        .regions(regions.iter().copied())
        .backend(Backend::Iptables)
        .action(PolicyAction::Block)
        .use_address_set(true)
        .use_ipv6(true)
        .build()
}

fn check_lookup(lookup: &dyn GeoLookup) -> DiagnosticCheck {
    let mut check = DiagnosticCheck::new("ip_lookup");
    check.log(format!("Querying {}...", PROBE_IP));
    match lookup.lookup(PROBE_IP) {
        Ok(loc) => {
            check.log(format!("Response: {}, {} ({})", loc.city, loc.country, loc.code));
            check.success = loc.code == "US";
        }
        Err(e) => check.log(format!("Error: {}", e)),
    }
    check
}

fn check_generation(compiler: &ScriptCompiler) -> DiagnosticCheck {
    let mut check = DiagnosticCheck::new("local_generation");
    check.log("Generating internal script for [US, CN] with IPv6 enabled...");
    match dual_stack_block(&["US", "CN"]).and_then(|c| compiler.compile(&c)) {
        Ok(policy) => {
            let line_count = policy.script.lines().count();
            check.log(format!("Generated {} lines.", line_count));
            check.success = policy.script.contains("geoguard_v6") && line_count > 50;
        }
        Err(e) => check.log(format!("Error: {}", e)),
    }
    check
}

fn check_parity(compiler: &ScriptCompiler, remote: Option<&dyn PolicyGenerator>) -> DiagnosticCheck {
    let mut check = DiagnosticCheck::new("remote_parity");
    let Some(remote) = remote else {
        check.log("No remote generator configured, skipped.");
        return check;
    };

    check.log(format!("Comparing local engine vs {}...", remote.name()));
    match dual_stack_block(&["US"]).and_then(|c| parity::verify(&c, compiler, remote)) {
        Ok(report) if report.matched => {
            check.log("Functional parity verified.");
            check.success = true;
        }
        Ok(_) => check.log("Functional logic mismatch."),
        Err(e) => check.log(format!("Error: {}", e)),
    }
    check
}

/// Run every check. Failures are recorded in the report, never returned.
pub fn run_diagnostics(
    lookup: &dyn GeoLookup,
    remote: Option<&dyn PolicyGenerator>,
) -> DiagnosticsReport {
    let compiler = ScriptCompiler::new();
    let checks = vec![
        check_lookup(lookup),
        check_generation(&compiler),
        check_parity(&compiler, remote),
    ];

    for check in &checks {
        if check.success {
            log::info!("diagnostic {} passed", check.name);
        } else {
            log::warn!("diagnostic {} failed", check.name);
        }
    }

    DiagnosticsReport { checks }
}
