//! `acctfleet proxies` — list, enable/disable, delete.

use acctfleet_core::types::{ProxyRecord, ProxyUpdate};

use crate::cli::ProxiesCmd;
use crate::context::{AppContext, print_json};

pub async fn cmd_proxies(ctx: &AppContext, cmd: ProxiesCmd) -> anyhow::Result<()> {
    match cmd {
        ProxiesCmd::List => {
            let proxies = ctx.store.call(|s| s.list_proxies()).await?;
            if ctx.json {
                return print_json(&proxies);
            }
            println!("{}", format_proxies(&proxies));
        }
        ProxiesCmd::SetActive { id, active } => {
            let update = ProxyUpdate {
                active: Some(active),
                ..ProxyUpdate::default()
            };
            let proxy = ctx.store.call(move |s| s.update_proxy(id, &update)).await?;
            println!(
                "proxy {id} ({}) {}",
                proxy.descriptor,
                if proxy.active { "enabled" } else { "disabled" }
            );
        }
        ProxiesCmd::Delete { id } => {
            if !ctx.store.call(move |s| s.delete_proxy(id)).await? {
                anyhow::bail!("proxy {id} not found");
            }
            println!("proxy {id} deleted");
        }
    }
    Ok(())
}

pub fn format_proxies(proxies: &[ProxyRecord]) -> String {
    if proxies.is_empty() {
        return "(no proxies)".to_string();
    }
    let mut out = format!("{:>5}  {:<32}  ACTIVE", "ID", "PROXY");
    for p in proxies {
        out.push_str(&format!(
            "\n{:>5}  {:<32}  {}",
            p.id,
            p.descriptor.to_string(),
            if p.active { "yes" } else { "no" }
        ));
    }
    out
}
