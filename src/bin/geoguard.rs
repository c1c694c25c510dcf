//! geoguard: CLI for compiling, testing and cross-checking geo-IP firewall policies.

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use geoguard::diagnostics::run_diagnostics;
use geoguard::{
    parity, Backend, BackendInfo, Error, GeoLookup, MaxMindLookup, PolicyAction, PolicyConfig,
    PrefixTrie, RegistryLookup, RemoteGenerator, Result, ScriptCompiler,
};
use std::collections::HashSet;
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "geoguard")]
#[command(version)]
#[command(about = "Compile geo-IP block/allow policies into firewall scripts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Policy selection shared by several commands. Flags override the file.
#[derive(Args)]
struct PolicyArgs {
    /// YAML policy file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Region code (repeatable)
    #[arg(short = 'r', long = "region")]
    regions: Vec<String>,

    /// Target backend (iptables, nftables, ebpf, ebtables, ipfw)
    #[arg(short, long)]
    backend: Option<Backend>,

    /// ALLOW or BLOCK
    #[arg(short, long)]
    action: Option<PolicyAction>,

    /// Emit one iptables rule per range instead of ipset sets
    #[arg(long)]
    no_ipset: bool,

    /// Include IPv6 sets and rules
    #[arg(long)]
    ipv6: bool,
}

impl PolicyArgs {
    fn resolve(&self) -> Result<PolicyConfig> {
        let base = match &self.config {
            Some(path) => PolicyConfig::load(path)?,
            None => PolicyConfig::default(),
        };

        let regions = if self.regions.is_empty() {
            base.regions().to_vec()
        } else {
            self.regions.clone()
        };

        PolicyConfig::builder()
            .regions(regions)
            .backend(self.backend.unwrap_or(base.backend()))
            .action(self.action.unwrap_or(base.action()))
            .use_address_set(base.use_address_set() && !self.no_ipset)
            .use_ipv6(base.use_ipv6() || self.ipv6)
            .build()
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a policy into a shell script
    Compile {
        #[command(flatten)]
        policy: PolicyArgs,

        /// Write the script here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write the ruleset as JSON
        #[arg(long)]
        ruleset: Option<PathBuf>,

        /// Pin the generation timestamp (RFC 3339)
        #[arg(long)]
        timestamp: Option<String>,
    },

    /// Check which region of a compiled policy an address falls into
    Match {
        /// Address to test
        ip: String,

        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Compare the local compiler against a remote generator
    Verify {
        /// Base URL of the remote generator
        #[arg(long)]
        remote: String,

        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Look up the location of an address
    Lookup {
        ip: IpAddr,

        /// Use a local MaxMind database instead of the registry
        #[arg(long)]
        mmdb: Option<PathBuf>,

        /// Registry base URL
        #[arg(long)]
        registry: Option<String>,
    },

    /// Run self checks
    Diagnose {
        /// Base URL of a remote generator to parity-check
        #[arg(long)]
        remote: Option<String>,

        /// Use a local MaxMind database instead of the registry
        #[arg(long)]
        mmdb: Option<PathBuf>,
    },

    /// List known backends
    Backends,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile {
            policy,
            output,
            ruleset,
            timestamp,
        } => compile(&policy, output, ruleset, timestamp),
        Commands::Match { ip, policy } => match_ip(&ip, &policy),
        Commands::Verify { remote, policy } => verify(&remote, &policy),
        Commands::Lookup { ip, mmdb, registry } => lookup(ip, mmdb, registry),
        Commands::Diagnose { remote, mmdb } => diagnose(remote, mmdb),
        Commands::Backends => list_backends(),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn compile(
    policy: &PolicyArgs,
    output: Option<PathBuf>,
    ruleset: Option<PathBuf>,
    timestamp: Option<String>,
) -> Result<bool> {
    let config = policy.resolve()?;

    let mut compiler = ScriptCompiler::new();
    if let Some(ts) = timestamp {
        let ts = DateTime::parse_from_rfc3339(&ts)
            .map_err(|e| Error::Config(format!("invalid timestamp {}: {}", ts, e)))?;
        compiler = compiler.with_timestamp(ts.with_timezone(&Utc));
    }

    let compiled = compiler.compile(&config)?;

    match output {
        Some(path) => {
            fs::write(&path, &compiled.script)?;
            log::info!(
                "wrote {} policy for {} regions to {:?}",
                config.backend(),
                compiled.ruleset.len(),
                path
            );
        }
        None => print!("{}", compiled.script),
    }

    if let Some(path) = ruleset {
        fs::write(&path, serde_json::to_string_pretty(&compiled.ruleset)?)?;
        log::info!("wrote ruleset ({} ranges) to {:?}", compiled.ruleset.range_count(), path);
    }

    Ok(true)
}

fn match_ip(ip: &str, policy: &PolicyArgs) -> Result<bool> {
    let config = policy.resolve()?;
    let compiled = ScriptCompiler::new().compile(&config)?;
    let trie = PrefixTrie::from_ruleset(&compiled.ruleset);

    match trie.longest_match_str(ip)? {
        Some(tag) => {
            println!("{} -> {} ({})", ip, tag.region, tag.action);
            Ok(true)
        }
        None => {
            println!("{} -> no match", ip);
            Ok(false)
        }
    }
}

/// Lines present in `a` but not in `b`, in `a`'s order.
fn missing_lines<'a>(a: &'a str, b: &str) -> Vec<&'a str> {
    let other: HashSet<&str> = b.lines().collect();
    a.lines().filter(|l| !other.contains(l)).collect()
}

fn verify(remote_url: &str, policy: &PolicyArgs) -> Result<bool> {
    let config = policy.resolve()?;
    let remote = RemoteGenerator::new(remote_url);
    let report = parity::verify(&config, &ScriptCompiler::new(), &remote)?;

    println!("local:  {}", report.digest_a());
    println!("remote: {}", report.digest_b());

    if report.matched {
        println!("Functional parity verified.");
        return Ok(true);
    }

    println!("Functional logic mismatch:");
    for line in missing_lines(&report.normalized_a, &report.normalized_b) {
        println!("- {}", line);
    }
    for line in missing_lines(&report.normalized_b, &report.normalized_a) {
        println!("+ {}", line);
    }
    Ok(false)
}

fn open_lookup(mmdb: Option<PathBuf>, registry: Option<String>) -> Result<Box<dyn GeoLookup>> {
    Ok(match (mmdb, registry) {
        (Some(path), _) => Box::new(MaxMindLookup::open(&path)?),
        (None, Some(url)) => Box::new(RegistryLookup::with_url(&url)),
        (None, None) => Box::new(RegistryLookup::new()),
    })
}

fn lookup(ip: IpAddr, mmdb: Option<PathBuf>, registry: Option<String>) -> Result<bool> {
    let location = open_lookup(mmdb, registry)?.lookup(ip)?;
    println!("{}", serde_json::to_string_pretty(&location)?);
    Ok(true)
}

fn diagnose(remote: Option<String>, mmdb: Option<PathBuf>) -> Result<bool> {
    let lookup = open_lookup(mmdb, None)?;
    let remote = remote.map(|url| RemoteGenerator::new(&url));
    let report = run_diagnostics(
        lookup.as_ref(),
        remote.as_ref().map(|r| r as &dyn geoguard::PolicyGenerator),
    );

    for check in &report.checks {
        println!("[{}] {}", if check.success { "PASS" } else { "FAIL" }, check.name);
        for line in &check.logs {
            println!("    {}", line);
        }
    }
    Ok(report.all_passed())
}

fn list_backends() -> Result<bool> {
    for info in BackendInfo::all() {
        println!(
            "{:<10} {}",
            info.name,
            if info.implemented { "implemented" } else { "not implemented" }
        );
    }
    Ok(true)
}
