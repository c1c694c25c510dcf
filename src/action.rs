//! Policy action types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Error;

/// PolicyAction is what the generated ruleset does with matching traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PolicyAction {
    /// Accept traffic from the listed regions
    #[serde(rename = "ALLOW", alias = "ACCEPT", alias = "allow", alias = "accept")]
    Allow,
    /// Drop traffic from the listed regions
    #[default]
    #[serde(rename = "BLOCK", alias = "DROP", alias = "block", alias = "drop")]
    Block,
}

impl PolicyAction {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyAction::Allow => "ALLOW",
            PolicyAction::Block => "BLOCK",
        }
    }

    /// Jump target used by iptables and ip6tables.
    pub fn iptables_verb(&self) -> &'static str {
        match self {
            PolicyAction::Allow => "ACCEPT",
            PolicyAction::Block => "DROP",
        }
    }

    /// Verdict statement used by nftables.
    pub fn nft_verb(&self) -> &'static str {
        match self {
            PolicyAction::Allow => "accept",
            PolicyAction::Block => "drop",
        }
    }
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PolicyAction {
    type Err = Error;

    /// Parse an action (case-insensitive). Backend verbs are accepted as aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ALLOW" | "ACCEPT" => Ok(PolicyAction::Allow),
            "BLOCK" | "DROP" => Ok(PolicyAction::Block),
            _ => Err(Error::InvalidAction(s.to_string())),
        }
    }
}
