//! `acctfleet accounts` — list, delete, re-proxy, login, logout.

use acctfleet_core::parse_proxy_spec;
use acctfleet_core::types::AccountRecord;
use acctfleet_engine::session::SessionOutcome;
use chrono::{DateTime, Utc};

use crate::cli::AccountsCmd;
use crate::context::{AppContext, print_json, relative_time};

pub async fn cmd_accounts(ctx: &AppContext, cmd: AccountsCmd) -> anyhow::Result<()> {
    match cmd {
        AccountsCmd::List => {
            let accounts = ctx.store.call(|s| s.list_accounts()).await?;
            if ctx.json {
                return print_json(&accounts);
            }
            println!("{}", format_accounts(&accounts, Utc::now()));
        }
        AccountsCmd::Delete { id } => {
            if !ctx.store.call(move |s| s.delete_account(id)).await? {
                anyhow::bail!("account {id} not found");
            }
            println!("account {id} deleted");
        }
        AccountsCmd::SetProxy { id, spec } => {
            let proxy = parse_proxy_spec(&spec)?;
            let account = ctx.sessions().reassign_proxy(id, proxy).await?;
            if ctx.json {
                return print_json(&account);
            }
            println!("account {id} now uses {} ({})", account.proxy, account.status);
        }
        AccountsCmd::Login { id } => {
            let outcome = ctx.sessions().login(id).await?;
            match outcome {
                SessionOutcome::Failed { failure, .. } => {
                    anyhow::bail!("login failed for account {id}: {failure}")
                }
                SessionOutcome::Reused(s) | SessionOutcome::LoggedIn(s) => {
                    println!("account {id} ({}) authenticated", s.account.username);
                }
            }
        }
        AccountsCmd::Logout { id } => {
            ctx.sessions().logout(id).await?;
            println!("account {id} logged out");
        }
    }
    Ok(())
}

pub fn format_accounts(accounts: &[AccountRecord], now: DateTime<Utc>) -> String {
    if accounts.is_empty() {
        return "(no accounts)".to_string();
    }
    let name_width = accounts
        .iter()
        .map(|a| a.username.len())
        .max()
        .unwrap_or(0)
        .max("USERNAME".len());
    let mut out = format!(
        "{:>5}  {:<name_width$}  {:<24}  {:<28}  LAST LOGIN",
        "ID", "USERNAME", "PROXY", "STATUS"
    );
    for a in accounts {
        let last = a
            .last_login_at
            .map(|t| relative_time((now - t).num_seconds()))
            .unwrap_or_else(|| "never".to_string());
        out.push_str(&format!(
            "\n{:>5}  {:<name_width$}  {:<24}  {:<28}  {last}",
            a.id,
            a.username,
            a.proxy.to_string(),
            a.status.to_string()
        ));
    }
    out
}
