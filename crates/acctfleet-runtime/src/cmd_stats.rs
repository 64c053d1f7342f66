//! `acctfleet stats` — fleet-wide counters.

use acctfleet_engine::store::FleetStats;

use crate::context::{AppContext, print_json};

pub async fn cmd_stats(ctx: &AppContext) -> anyhow::Result<()> {
    let stats = ctx.store.call(|s| FleetStats::collect(s)).await?;
    if ctx.json {
        return print_json(&stats);
    }
    println!("{}", format_stats(&stats));
    Ok(())
}

pub fn format_stats(stats: &FleetStats) -> String {
    format!(
        "accounts  {} total, {} authenticated, {} failed\n\
         proxies   {} total, {} active\n\
         rules     {} total, {} active",
        stats.total_accounts,
        stats.authenticated_accounts,
        stats.failed_accounts,
        stats.total_proxies,
        stats.active_proxies,
        stats.total_rules,
        stats.active_rules
    )
}
