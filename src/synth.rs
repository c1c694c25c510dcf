//! Deterministic pseudo-address generation per region code.
//!
//! The generator stands in for a real registry feed. Its output must be
//! reproduced bit-for-bit by any other generator taking part in a parity
//! check, so the arithmetic below is fixed.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Address family of a synthesized range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    V4,
    V6,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "IPv4"),
            AddressFamily::V6 => write!(f, "IPv6"),
        }
    }
}

/// A CIDR range together with the region that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressRange {
    pub cidr: String,
    pub region: String,
    pub family: AddressFamily,
}

/// Seed derived from the first two UTF-16 code units of the region code.
/// A missing unit counts as zero.
fn region_seed(region: &str) -> u64 {
    let mut units = region.encode_utf16();
    let first = units.next().unwrap_or(0) as u64;
    let second = units.next().unwrap_or(0) as u64;
    31 * first + second
}

fn v4_cidr(seed: u64, i: u64) -> String {
    let octet1 = (seed + i * 7) % 223 + 1;
    let octet2 = (seed * (i + 1)) % 256;
    let mask = 16 + (i % 9);
    format!("{}.{}.0.0/{}", octet1, octet2, mask)
}

fn v6_cidr(seed: u64, i: u64) -> String {
    let hex1 = seed + i * 13;
    let hex2 = seed * (i + 5);
    format!("2001:{:04x}:{:04x}::/48", hex1, hex2)
}

/// Generate up to `count` unique ranges for `region`.
///
/// Duplicates collapse silently, keeping first-seen order, so a shorter
/// request is always a prefix of a longer one.
pub fn synthesize(region: &str, family: AddressFamily, count: usize) -> Vec<AddressRange> {
    let seed = region_seed(region);
    let mut seen = AHashSet::with_capacity(count);
    let mut ranges = Vec::with_capacity(count);

    for i in 0..count as u64 {
        let cidr = match family {
            AddressFamily::V4 => v4_cidr(seed, i),
            AddressFamily::V6 => v6_cidr(seed, i),
        };
        if seen.insert(cidr.clone()) {
            ranges.push(AddressRange {
                cidr,
                region: region.to_string(),
                family,
            });
        }
    }

    log::debug!(
        "synthesized {} {} ranges for {} ({} requested)",
        ranges.len(),
        family,
        region,
        count
    );
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidrs(ranges: &[AddressRange]) -> Vec<&str> {
        ranges.iter().map(|r| r.cidr.as_str()).collect()
    }

    #[test]
    fn test_seed() {
        // 'C' = 67, 'N' = 78
        assert_eq!(region_seed("CN"), 31 * 67 + 78);
        assert_eq!(region_seed("C"), 31 * 67);
        assert_eq!(region_seed(""), 0);
    }

    #[test]
    fn test_cn_ipv4_first_three() {
        // seed = 2155
        let ranges = synthesize("CN", AddressFamily::V4, 3);
        assert_eq!(
            cidrs(&ranges),
            vec!["149.107.0.0/16", "156.214.0.0/17", "163.65.0.0/18"]
        );
        assert!(ranges.iter().all(|r| r.region == "CN" && r.family == AddressFamily::V4));
    }

    #[test]
    fn test_us_ipv6_first_two() {
        // 'U' = 85, 'S' = 83 -> seed = 2718 = 0xa9e
        let ranges = synthesize("US", AddressFamily::V6, 2);
        assert_eq!(
            cidrs(&ranges),
            vec!["2001:0a9e:3516::/48", "2001:0aab:3fb4::/48"]
        );
    }

    #[test]
    fn test_ipv6_group_wider_than_16_bits() {
        // seed * (i + 5) passes 0xffff; the group keeps all five hex digits
        let us = synthesize("US", AddressFamily::V6, 21);
        assert_eq!(us[20].cidr, "2001:0ba2:1096e::/48");

        let cn = synthesize("CN", AddressFamily::V6, 27);
        assert_eq!(cn[25].cidr, "2001:09b0:fc8a::/48");
        assert_eq!(cn[26].cidr, "2001:09bd:104f5::/48");
    }

    #[test]
    fn test_deterministic() {
        let a = synthesize("DE", AddressFamily::V4, 45);
        let b = synthesize("DE", AddressFamily::V4, 45);
        assert_eq!(a, b);
    }

    #[test]
    fn test_unique() {
        for region in ["CN", "US", "RU", "DE", "A"] {
            for family in [AddressFamily::V4, AddressFamily::V6] {
                let ranges = synthesize(region, family, 300);
                let set: AHashSet<_> = ranges.iter().map(|r| &r.cidr).collect();
                assert_eq!(set.len(), ranges.len());
                assert!(ranges.len() <= 300);
            }
        }
    }

    #[test]
    fn test_shorter_request_is_prefix() {
        let long = synthesize("US", AddressFamily::V4, 45);
        let short = synthesize("US", AddressFamily::V4, 20);
        assert_eq!(&long[..short.len()], &short[..]);
    }

    #[test]
    fn test_zero_count() {
        assert!(synthesize("CN", AddressFamily::V4, 0).is_empty());
    }
}
