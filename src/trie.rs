//! Binary prefix trie for longest-prefix-match lookups.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::compiler::Ruleset;
use crate::{Error, PolicyAction, Result};

struct TrieNode<M> {
    children: [Option<Box<TrieNode<M>>>; 2],
    metadata: Option<M>,
}

impl<M> TrieNode<M> {
    fn new() -> Self {
        Self {
            children: [None, None],
            metadata: None,
        }
    }
}

/// Address as an unsigned integer plus its bit width (32 or 128).
fn address_bits(ip: IpAddr) -> (u128, u8) {
    match ip {
        IpAddr::V4(v4) => (u32::from(v4) as u128, 32),
        IpAddr::V6(v6) => (u128::from(v6), 128),
    }
}

/// Bit `i` counted from the most significant end.
#[inline]
fn bit_at(bits: u128, width: u8, i: u8) -> usize {
    ((bits >> (width - 1 - i)) & 1) as usize
}

/// Parse `addr/len` or a bare address (host route).
fn parse_prefix(cidr: &str) -> Result<IpNet> {
    let cidr = cidr.trim();
    let invalid = || Error::InvalidCidrPattern(cidr.to_string());

    match cidr.split_once('/') {
        Some((addr, len)) => {
            let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
            let len: u8 = len.parse().map_err(|_| invalid())?;
            IpNet::new(addr, len).map_err(|_| invalid())
        }
        None => {
            let addr: IpAddr = cidr.parse().map_err(|_| invalid())?;
            let (_, width) = address_bits(addr);
            IpNet::new(addr, width).map_err(|_| invalid())
        }
    }
}

/// PrefixTrie maps CIDR ranges to metadata and answers longest-prefix queries.
///
/// IPv4 and IPv6 ranges live under separate roots. Inserting a range that
/// ends at an already-tagged node replaces the old metadata; overlapping
/// ranges of different lengths coexist and the deepest one wins on lookup.
///
/// # Examples
/// ```
/// use geoguard::PrefixTrie;
///
/// let mut trie = PrefixTrie::new();
/// trie.insert("10.0.0.0/8", "X").unwrap();
/// trie.insert("10.1.0.0/16", "Y").unwrap();
///
/// assert_eq!(trie.longest_match_str("10.1.2.3").unwrap(), Some(&"Y"));
/// assert_eq!(trie.longest_match_str("10.2.2.3").unwrap(), Some(&"X"));
/// assert_eq!(trie.longest_match_str("11.0.0.1").unwrap(), None);
/// ```
pub struct PrefixTrie<M> {
    v4: TrieNode<M>,
    v6: TrieNode<M>,
    len: usize,
}

impl<M> Default for PrefixTrie<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> PrefixTrie<M> {
    pub fn new() -> Self {
        Self {
            v4: TrieNode::new(),
            v6: TrieNode::new(),
            len: 0,
        }
    }

    /// Number of tagged nodes (distinct address/length pairs).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn root(&self, ip: &IpAddr) -> &TrieNode<M> {
        match ip {
            IpAddr::V4(_) => &self.v4,
            IpAddr::V6(_) => &self.v6,
        }
    }

    /// Insert a range given in CIDR text. A missing length means a host route.
    ///
    /// Returns the metadata previously attached to the same node, if any.
    pub fn insert(&mut self, cidr: &str, metadata: M) -> Result<Option<M>> {
        let net = parse_prefix(cidr)?;
        Ok(self.insert_net(net, metadata))
    }

    /// Insert a parsed range. The address bits are used as given, unmasked.
    pub fn insert_net(&mut self, net: IpNet, metadata: M) -> Option<M> {
        let addr = net.addr();
        let (bits, width) = address_bits(addr);
        let mut node = match addr {
            IpAddr::V4(_) => &mut self.v4,
            IpAddr::V6(_) => &mut self.v6,
        };

        for i in 0..net.prefix_len() {
            let bit = bit_at(bits, width, i);
            node = &mut **node.children[bit].get_or_insert_with(|| Box::new(TrieNode::new()));
        }

        let previous = node.metadata.replace(metadata);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Metadata of the longest inserted prefix containing `ip`.
    pub fn longest_match(&self, ip: IpAddr) -> Option<&M> {
        let (bits, width) = address_bits(ip);
        let mut node = self.root(&ip);
        let mut best = node.metadata.as_ref();

        for i in 0..width {
            match &node.children[bit_at(bits, width, i)] {
                Some(child) => {
                    node = &**child;
                    if let Some(m) = &node.metadata {
                        best = Some(m);
                    }
                }
                None => break,
            }
        }

        best
    }

    /// Like [`longest_match`](Self::longest_match), parsing the address first.
    pub fn longest_match_str(&self, ip: &str) -> Result<Option<&M>> {
        let ip: IpAddr = ip
            .trim()
            .parse()
            .map_err(|_| Error::InvalidIpAddress(ip.to_string()))?;
        Ok(self.longest_match(ip))
    }
}

/// Metadata attached to ranges loaded from a compiled ruleset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeTag {
    pub region: String,
    pub action: PolicyAction,
}

impl PrefixTrie<RangeTag> {
    /// Build a trie from every range of every region in `ruleset`.
    ///
    /// Regions are inserted in ruleset order, so a later region claims any
    /// exact range it shares with an earlier one. Ranges that are not valid
    /// CIDR notation (a synthesized IPv6 group can exceed 16 bits) are
    /// skipped with a warning.
    pub fn from_ruleset(ruleset: &Ruleset) -> Self {
        let mut trie = PrefixTrie::new();
        let mut skipped = 0usize;
        for rule in ruleset.iter() {
            for cidr in &rule.cidrs {
                let tag = RangeTag {
                    region: rule.region.clone(),
                    action: rule.action,
                };
                match trie.insert(cidr, tag) {
                    Ok(Some(prev)) => {
                        log::debug!("{} re-tagged from {} to {}", cidr, prev.region, rule.region)
                    }
                    Ok(None) => {}
                    Err(e) => {
                        log::warn!("skipping {} range: {}", rule.region, e);
                        skipped += 1;
                    }
                }
            }
        }
        if skipped > 0 {
            log::warn!("{} of {} ranges not loaded", skipped, ruleset.range_count());
        }
        trie
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{synthesize, AddressFamily};

    #[test]
    fn test_longer_prefix_wins() {
        let mut trie = PrefixTrie::new();
        trie.insert("10.0.0.0/8", "X").unwrap();
        trie.insert("10.1.0.0/16", "Y").unwrap();

        assert_eq!(trie.longest_match_str("10.1.2.3").unwrap(), Some(&"Y"));
        assert_eq!(trie.longest_match_str("10.2.2.3").unwrap(), Some(&"X"));
        assert_eq!(trie.longest_match_str("192.168.0.1").unwrap(), None);
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let mut trie = PrefixTrie::new();
        trie.insert("10.1.0.0/16", "Y").unwrap();
        trie.insert("10.0.0.0/8", "X").unwrap();

        assert_eq!(trie.longest_match_str("10.1.2.3").unwrap(), Some(&"Y"));
        assert_eq!(trie.longest_match_str("10.200.0.1").unwrap(), Some(&"X"));
    }

    #[test]
    fn test_reinsert_last_write_wins() {
        let mut trie = PrefixTrie::new();
        assert_eq!(trie.insert("10.0.0.0/8", "first").unwrap(), None);
        assert_eq!(trie.insert("10.0.0.0/8", "second").unwrap(), Some("first"));

        assert_eq!(trie.len(), 1);
        assert_eq!(trie.longest_match_str("10.9.9.9").unwrap(), Some(&"second"));
    }

    #[test]
    fn test_host_route_default() {
        let mut trie = PrefixTrie::new();
        trie.insert("192.168.1.7", "host").unwrap();

        assert_eq!(trie.longest_match_str("192.168.1.7").unwrap(), Some(&"host"));
        assert_eq!(trie.longest_match_str("192.168.1.8").unwrap(), None);
    }

    #[test]
    fn test_default_route() {
        let mut trie = PrefixTrie::new();
        trie.insert("0.0.0.0/0", "any").unwrap();
        trie.insert("8.8.8.0/24", "dns").unwrap();

        assert_eq!(trie.longest_match_str("1.2.3.4").unwrap(), Some(&"any"));
        assert_eq!(trie.longest_match_str("8.8.8.8").unwrap(), Some(&"dns"));
        // IPv6 root is separate
        assert_eq!(trie.longest_match_str("::1").unwrap(), None);
    }

    #[test]
    fn test_ipv6() {
        let mut trie = PrefixTrie::new();
        trie.insert("2001:db8::/32", "doc").unwrap();
        trie.insert("2001:db8:1::/48", "site").unwrap();

        assert_eq!(trie.longest_match_str("2001:db8:1::5").unwrap(), Some(&"site"));
        assert_eq!(trie.longest_match_str("2001:db8:2::5").unwrap(), Some(&"doc"));
        assert_eq!(trie.longest_match_str("2001:4860::1").unwrap(), None);
    }

    #[test]
    fn test_invalid_input() {
        let mut trie: PrefixTrie<&str> = PrefixTrie::new();
        assert!(matches!(
            trie.insert("invalid", "x"),
            Err(Error::InvalidCidrPattern(_))
        ));
        assert!(trie.insert("10.0.0.0/33", "x").is_err());
        assert!(trie.insert("10.0.0/8", "x").is_err());
        assert!(matches!(
            trie.longest_match_str("300.1.1.1"),
            Err(Error::InvalidIpAddress(_))
        ));
        assert!(trie.is_empty());
    }

    /// Reference answer: among ranges containing `ip`, the longest, later
    /// inserts winning ties.
    fn naive_match(ranges: &[(IpNet, usize)], ip: IpAddr) -> Option<usize> {
        let mut best: Option<(u8, usize)> = None;
        for (net, tag) in ranges {
            if net.contains(&ip) {
                match best {
                    Some((len, _)) if len > net.prefix_len() => {}
                    _ => best = Some((net.prefix_len(), *tag)),
                }
            }
        }
        best.map(|(_, tag)| tag)
    }

    #[test]
    fn test_matches_naive_longest_prefix() {
        let mut ranges = Vec::new();
        for region in ["CN", "US", "RU", "DE", "BR"] {
            for family in [AddressFamily::V4, AddressFamily::V6] {
                // skip IPv6 ranges whose second group overflows 16 bits
                ranges.extend(
                    synthesize(region, family, 45)
                        .iter()
                        .filter_map(|r| r.cidr.parse::<IpNet>().ok()),
                );
            }
        }
        ranges.push("149.0.0.0/8".parse().unwrap());
        ranges.push("2001::/16".parse().unwrap());

        let mut trie = PrefixTrie::new();
        let mut tagged = Vec::new();
        for (tag, net) in ranges.iter().enumerate() {
            trie.insert_net(*net, tag);
            tagged.push((*net, tag));
        }

        let mut probes: Vec<IpAddr> = Vec::new();
        for net in &ranges {
            probes.push(net.network());
            probes.push(net.broadcast());
        }
        for i in 0..=255u8 {
            probes.push(IpAddr::from([i, i.wrapping_mul(7), 1, 1]));
        }

        for ip in probes {
            assert_eq!(
                trie.longest_match(ip).copied(),
                naive_match(&tagged, ip),
                "mismatch for {}",
                ip
            );
        }
    }

    fn ruleset_for(regions: &[&str], backend: crate::Backend) -> Ruleset {
        let config = crate::PolicyConfig::builder()
            .regions(regions.iter().copied())
            .backend(backend)
            .use_ipv6(true)
            .build()
            .unwrap();
        crate::ScriptCompiler::new().compile(&config).unwrap().ruleset
    }

    #[test]
    fn test_from_ruleset_skips_overflowing_ipv6() {
        let ruleset = ruleset_for(&["US"], crate::Backend::Nftables);
        let us = ruleset.get("US").unwrap();
        assert!(us.cidrs.iter().any(|c| c == "2001:0ba2:1096e::/48"));

        let trie = PrefixTrie::from_ruleset(&ruleset);
        let valid = us.cidrs.iter().filter(|c| c.parse::<IpNet>().is_ok()).count();
        assert!(valid < us.cidrs.len());
        assert_eq!(trie.len(), valid);

        let tag = trie.longest_match_str("43.158.0.1").unwrap().unwrap();
        assert_eq!(tag.region, "US");
        assert_eq!(tag.action, PolicyAction::Block);
        assert_eq!(trie.longest_match_str("2001:0a9e:3516::1").unwrap().unwrap().region, "US");
    }

    #[test]
    fn test_from_ruleset_later_region_claims_shared_range() {
        let ruleset = ruleset_for(&["US"], crate::Backend::Nftables);
        let us = ruleset.get("US").unwrap().clone();
        let mut copy = us.clone();
        copy.region = "XX".to_string();
        let trie = PrefixTrie::from_ruleset(&Ruleset::from(vec![us, copy]));

        assert_eq!(trie.longest_match_str("43.158.0.1").unwrap().unwrap().region, "XX");
    }
}
