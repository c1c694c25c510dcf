//! nftables script generation using native interval sets.

use super::{EmitContext, RangeCounts, ScriptBackend, ScriptWriter};

const TABLE: &str = "inet geoguard";
const SET_V4: &str = "blocklist_v4";
const SET_V6: &str = "blocklist_v6";

/// nftables backend. Always set-based; `use_address_set` has no effect.
pub struct Nftables;

impl ScriptBackend for Nftables {
    fn counts(&self) -> RangeCounts {
        RangeCounts { v4: 45, v6: 30 }
    }

    fn engine_label(&self) -> &'static str {
        "nftables"
    }

    fn emit(&self, ctx: &EmitContext<'_>, out: &mut ScriptWriter) {
        let v6 = ctx.config.use_ipv6();
        let verb = ctx.config.action().nft_verb();

        out.blank();
        out.line(format!("nft add table {} 2>/dev/null || true", TABLE));
        out.line(format!("nft flush table {}", TABLE));
        out.line(format!(
            "nft add set {} {} {{ type ipv4_addr; flags interval; }}",
            TABLE, SET_V4
        ));
        if v6 {
            out.line(format!(
                "nft add set {} {} {{ type ipv6_addr; flags interval; }}",
                TABLE, SET_V6
            ));
        }
        out.blank();

        for region in ctx.regions {
            out.comment(format!("Bulk prefixes for {}", region.region));
            out.line(add_element(SET_V4, region.v4.iter().map(|r| r.cidr.as_str())));
            if v6 {
                out.line(add_element(SET_V6, region.v6.iter().map(|r| r.cidr.as_str())));
            }
            out.blank();
        }

        out.line(format!(
            "nft add chain {} input {{ type filter hook input priority 0; policy accept; }}",
            TABLE
        ));
        out.line(format!(
            "nft add rule {} input ip saddr @{} {}",
            TABLE, SET_V4, verb
        ));
        if v6 {
            out.line(format!(
                "nft add rule {} input ip6 saddr @{} {}",
                TABLE, SET_V6, verb
            ));
        }
    }
}

/// One bulk `add element` statement for a set.
fn add_element<'a>(set: &str, cidrs: impl Iterator<Item = &'a str>) -> String {
    let elements: Vec<&str> = cidrs.collect();
    format!(
        "nft add element {} {} {{ {} }}",
        TABLE,
        set,
        elements.join(", ")
    )
}
