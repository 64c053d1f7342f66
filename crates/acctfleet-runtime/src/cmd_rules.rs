//! `acctfleet rules` — outbound message rules.

use acctfleet_core::types::{MessageRule, NewMessageRule, RuleUpdate};

use crate::cli::RulesCmd;
use crate::context::{AppContext, print_json};

pub async fn cmd_rules(ctx: &AppContext, cmd: RulesCmd) -> anyhow::Result<()> {
    match cmd {
        RulesCmd::List { account } => {
            let rules = ctx.store.call(move |s| s.list_rules(account)).await?;
            if ctx.json {
                return print_json(&rules);
            }
            println!("{}", format_rules(&rules));
        }
        RulesCmd::Add {
            account_id,
            target,
            template,
            inactive,
        } => {
            let rule = NewMessageRule {
                account_id,
                target_handle: target,
                template,
                active: !inactive,
            };
            let saved = ctx.store.call(move |s| s.upsert_rule(&rule)).await?;
            if ctx.json {
                return print_json(&saved);
            }
            println!("rule {} saved for account {}", saved.id, saved.account_id);
        }
        RulesCmd::SetActive { id, active } => {
            let update = RuleUpdate {
                active: Some(active),
                ..RuleUpdate::default()
            };
            let rule = ctx.store.call(move |s| s.update_rule(id, &update)).await?;
            println!(
                "rule {id} {}",
                if rule.active { "enabled" } else { "disabled" }
            );
        }
        RulesCmd::Delete { id } => {
            if !ctx.store.call(move |s| s.delete_rule(id)).await? {
                anyhow::bail!("rule {id} not found");
            }
            println!("rule {id} deleted");
        }
    }
    Ok(())
}

pub fn format_rules(rules: &[MessageRule]) -> String {
    if rules.is_empty() {
        return "(no rules)".to_string();
    }
    let mut out = format!(
        "{:>5}  {:>7}  {:<20}  {:<6}  {:<20}  TEMPLATE",
        "ID", "ACCOUNT", "TARGET", "ACTIVE", "LAST SENT"
    );
    for r in rules {
        let last = r
            .last_sent_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        out.push_str(&format!(
            "\n{:>5}  {:>7}  {:<20}  {:<6}  {:<20}  {}",
            r.id,
            r.account_id,
            r.target_handle,
            if r.active { "yes" } else { "no" },
            last,
            preview(&r.template, 40)
        ));
    }
    out
}

/// First line of `text`, cut to `max` chars with an ellipsis.
fn preview(text: &str, max: usize) -> String {
    let first = text.lines().next().unwrap_or("");
    if first.chars().count() <= max && first.len() == text.len() {
        return first.to_string();
    }
    let cut: String = first.chars().take(max.saturating_sub(1)).collect();
    format!("{cut}\u{2026}")
}
