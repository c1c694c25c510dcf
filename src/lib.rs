//! GeoGuard - a deterministic geo-IP firewall policy compiler.
//!
//! This crate turns a list of region codes into an executable shell script
//! that installs block or allow rules for the regions' address ranges, and
//! ships the tooling needed to test and cross-check those scripts.
//!
//! # Features
//!
//! - **Script compilation**: iptables (with or without ipset) and nftables
//! - **Dual-stack**: optional IPv6 sets and rules alongside IPv4
//! - **Deterministic ranges**: reproducible per-region test data
//! - **Prefix trie**: longest-prefix-match lookups over compiled rulesets
//! - **Parity checks**: compare two generators after normalization
//! - **Geo-IP lookups**: HTTP registry or offline MaxMind database
//!
//! # Quick Start
//!
//! ```
//! use geoguard::{Backend, PolicyConfig, PrefixTrie, ScriptCompiler};
//!
//! let config = PolicyConfig::builder()
//!     .regions(["us", "cn"])
//!     .backend(Backend::Iptables)
//!     .use_ipv6(true)
//!     .build()
//!     .unwrap();
//!
//! let policy = ScriptCompiler::new().compile(&config).unwrap();
//! assert!(policy.script.starts_with("#!/bin/bash"));
//!
//! // Test an address against what the script installs
//! let trie = PrefixTrie::from_ruleset(&policy.ruleset);
//! let first = &policy.ruleset.get("US").unwrap().cidrs[0];
//! let network = first.split('/').next().unwrap();
//! assert_eq!(trie.longest_match_str(network).unwrap().unwrap().region, "US");
//! ```
//!
//! # Parity
//!
//! ```
//! use geoguard::{parity, PolicyConfig, ScriptCompiler};
//!
//! let config = PolicyConfig::builder().region("DE").build().unwrap();
//! let report = parity::verify(&config, &ScriptCompiler::new(), &ScriptCompiler::new()).unwrap();
//! assert!(report.matched);
//! ```
//!
//! Every operation is a pure function of its input; nothing is cached and
//! calls can run in parallel freely.

mod action;
mod backend;
mod error;

pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod lookup;
pub mod parity;
pub mod remote;
pub mod synth;
pub mod trie;

// Re-export core types
pub use action::PolicyAction;
pub use backend::{Backend, BackendInfo};
pub use error::{Error, Result};

pub use compiler::{CompiledPolicy, RegionRule, RuleSource, Ruleset, ScriptCompiler};
pub use config::{PolicyConfig, DEFAULT_REGION};
pub use parity::{normalize, ParityReport, PolicyGenerator};
pub use synth::{synthesize, AddressFamily, AddressRange};
pub use trie::{PrefixTrie, RangeTag};

// Re-export collaborators
pub use lookup::{GeoLocation, GeoLookup, MaxMindLookup, RegistryLookup};
pub use remote::RemoteGenerator;
