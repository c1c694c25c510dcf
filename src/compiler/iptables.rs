//! iptables script generation, with and without ipset acceleration.

use super::{EmitContext, RangeCounts, ScriptBackend, ScriptWriter};

const CHAIN: &str = "GEOGUARD";
const SET_V4: &str = "geoguard_v4";
const SET_V6: &str = "geoguard_v6";

/// Tool checks shared by both iptables variants.
fn preflight(ctx: &EmitContext<'_>, out: &mut ScriptWriter) {
    if ctx.config.use_ipv6() {
        out.line("if ! command -v ip6tables &> /dev/null; then echo \"Warning: ip6tables not found. IPv6 rules will be skipped.\"; fi");
    }
    if ctx.config.use_address_set() {
        out.line("if ! command -v ipset &> /dev/null; then echo \"Error: ipset utility not found. Required for optimized sets.\"; exit 1; fi");
        out.blank();
    }
}

fn create_chain(tool: &str, out: &mut ScriptWriter) {
    out.line(format!("{} -N {} 2>/dev/null || true", tool, CHAIN));
    out.line(format!("{} -F {}", tool, CHAIN));
}

/// Hook the chain into INPUT only if it is not already there.
fn link_chain(ctx: &EmitContext<'_>, out: &mut ScriptWriter) {
    out.blank();
    out.comment("Insert into INPUT chain if not present");
    let mut tools = vec!["iptables"];
    if ctx.config.use_ipv6() {
        tools.push("ip6tables");
    }
    for tool in tools {
        out.line(format!(
            "{tool} -C INPUT -j {chain} 2>/dev/null || {tool} -I INPUT 1 -j {chain}",
            tool = tool,
            chain = CHAIN
        ));
    }
}

/// iptables rules matching against ipset `hash:net` sets.
pub struct IptablesSet;

impl ScriptBackend for IptablesSet {
    fn counts(&self) -> RangeCounts {
        RangeCounts { v4: 45, v6: 30 }
    }

    fn engine_label(&self) -> &'static str {
        "iptables + ipset"
    }

    fn emit(&self, ctx: &EmitContext<'_>, out: &mut ScriptWriter) {
        let v6 = ctx.config.use_ipv6();
        let verb = ctx.config.action().iptables_verb();
        preflight(ctx, out);

        out.comment("Create and populate optimized ipsets");
        out.line(format!("ipset create {} hash:net family inet -!", SET_V4));
        out.line(format!("ipset flush {}", SET_V4));
        if v6 {
            out.line(format!("ipset create {} hash:net family inet6 -!", SET_V6));
            out.line(format!("ipset flush {}", SET_V6));
        }
        out.blank();

        for region in ctx.regions {
            out.comment(format!("Region: {}", region.region));
            for range in &region.v4 {
                out.line(format!("ipset add {} {}", SET_V4, range.cidr));
            }
            for range in &region.v6 {
                out.line(format!("ipset add {} {}", SET_V6, range.cidr));
            }
            out.blank();
        }

        out.comment("Apply iptables rules referencing the sets");
        create_chain("iptables", out);
        out.line(format!(
            "iptables -A {} -m set --match-set {} src -j {}",
            CHAIN, SET_V4, verb
        ));
        if v6 {
            create_chain("ip6tables", out);
            out.line(format!(
                "ip6tables -A {} -m set --match-set {} src -j {}",
                CHAIN, SET_V6, verb
            ));
        }

        link_chain(ctx, out);
    }
}

/// One iptables rule per range. Fewer ranges per region, since every
/// rule is evaluated linearly.
pub struct IptablesRaw;

impl ScriptBackend for IptablesRaw {
    fn counts(&self) -> RangeCounts {
        RangeCounts { v4: 20, v6: 15 }
    }

    fn engine_label(&self) -> &'static str {
        "iptables"
    }

    fn emit(&self, ctx: &EmitContext<'_>, out: &mut ScriptWriter) {
        let verb = ctx.config.action().iptables_verb();
        preflight(ctx, out);

        create_chain("iptables", out);
        if ctx.config.use_ipv6() {
            create_chain("ip6tables", out);
        }

        for region in ctx.regions {
            out.comment(format!("Rules for {}", region.region));
            for range in &region.v4 {
                out.line(format!("iptables -A {} -s {} -j {}", CHAIN, range.cidr, verb));
            }
            for range in &region.v6 {
                out.line(format!("ip6tables -A {} -s {} -j {}", CHAIN, range.cidr, verb));
            }
        }

        link_chain(ctx, out);
    }
}
