//! Packet-filter backend definitions.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::Error;

/// Backend is the packet-filtering system a script is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Backend {
    /// Legacy netfilter tables, optionally accelerated with ipset
    #[default]
    Iptables,
    /// nftables with native interval sets
    Nftables,
    /// eBPF/XDP programs (not implemented)
    Ebpf,
    /// Bridge-level filtering (not implemented)
    Ebtables,
    /// FreeBSD ipfw (not implemented)
    Ipfw,
}

impl Backend {
    /// All known backends, in display order.
    pub const ALL: [Backend; 5] = [
        Backend::Iptables,
        Backend::Nftables,
        Backend::Ebpf,
        Backend::Ebtables,
        Backend::Ipfw,
    ];

    /// Parse a backend from a string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "iptables" => Some(Backend::Iptables),
            "nftables" | "nft" => Some(Backend::Nftables),
            "ebpf" => Some(Backend::Ebpf),
            "ebtables" => Some(Backend::Ebtables),
            "ipfw" => Some(Backend::Ipfw),
            _ => None,
        }
    }

    /// Get the canonical string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Iptables => "iptables",
            Backend::Nftables => "nftables",
            Backend::Ebpf => "ebpf",
            Backend::Ebtables => "ebtables",
            Backend::Ipfw => "ipfw",
        }
    }

    /// Whether the compiler can emit a script for this backend.
    pub fn is_implemented(&self) -> bool {
        matches!(self, Backend::Iptables | Backend::Nftables)
    }

    /// Name of the binary the generated script checks for.
    pub fn command(&self) -> &'static str {
        match self {
            Backend::Nftables => "nft",
            _ => "iptables",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Backend::parse(s).ok_or_else(|| Error::InvalidBackend(s.to_string()))
    }
}

impl Serialize for Backend {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Backend {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Information about a backend (for API responses).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendInfo {
    /// Internal name of the backend
    pub name: String,
    /// Whether scripts can be generated for it
    pub implemented: bool,
}

impl BackendInfo {
    /// Describe every known backend.
    pub fn all() -> Vec<BackendInfo> {
        Backend::ALL
            .iter()
            .map(|b| BackendInfo {
                name: b.as_str().to_string(),
                implemented: b.is_implemented(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!(Backend::parse("iptables"), Some(Backend::Iptables));
        assert_eq!(Backend::parse("IPTABLES"), Some(Backend::Iptables));
        assert_eq!(Backend::parse("nftables"), Some(Backend::Nftables));
        assert_eq!(Backend::parse("ebpf"), Some(Backend::Ebpf));
        assert_eq!(Backend::parse("ipfw"), Some(Backend::Ipfw));
        assert_eq!(Backend::parse("pf"), None);
    }

    #[test]
    fn test_backend_roundtrip() {
        for backend in Backend::ALL {
            assert_eq!(Backend::parse(backend.as_str()), Some(backend));
        }
    }

    #[test]
    fn test_invalid_backend_error() {
        let err = "windivert".parse::<Backend>().unwrap_err();
        assert!(matches!(err, Error::InvalidBackend(ref s) if s == "windivert"));
    }

    #[test]
    fn test_implemented_backends() {
        let info = BackendInfo::all();
        assert_eq!(info.len(), 5);
        let implemented: Vec<_> = info.iter().filter(|b| b.implemented).map(|b| b.name.as_str()).collect();
        assert_eq!(implemented, vec!["iptables", "nftables"]);
    }

    #[test]
    fn test_backend_serde() {
        let parsed: Backend = serde_json::from_str("\"NFTABLES\"").unwrap();
        assert_eq!(parsed, Backend::Nftables);
        assert_eq!(serde_json::to_string(&Backend::Ipfw).unwrap(), "\"ipfw\"");
        assert!(serde_json::from_str::<Backend>("\"pf\"").is_err());
    }
}
