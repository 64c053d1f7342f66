//! `acctfleet dispatch` — one pass over the fleet. Ctrl-C stops new work and
//! lets in-flight backend calls finish.

use acctfleet_engine::dispatch::{AccountOutcome, DispatchReport, LoginOutcome, RuleResult};
use acctfleet_engine::{CancellationToken, DispatchEngine};

use crate::cli::DispatchOpts;
use crate::context::{AppContext, print_json};

pub async fn cmd_dispatch(ctx: &AppContext, opts: DispatchOpts) -> anyhow::Result<()> {
    let accounts = ctx.store.call(|s| s.list_accounts()).await?;
    let accounts = if opts.accounts.is_empty() {
        accounts
    } else {
        let missing: Vec<String> = opts
            .accounts
            .iter()
            .filter(|id| !accounts.iter().any(|a| a.id == **id))
            .map(ToString::to_string)
            .collect();
        if !missing.is_empty() {
            anyhow::bail!("unknown account id(s): {}", missing.join(", "));
        }
        accounts
            .into_iter()
            .filter(|a| opts.accounts.contains(&a.id))
            .collect()
    };

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c, finishing in-flight calls");
            trigger.cancel();
        }
    });

    let concurrency = opts.concurrency.unwrap_or(ctx.config.dispatch.concurrency);
    let engine = DispatchEngine::new(ctx.sessions(), ctx.config.dispatch.send_timeout());
    let report = engine.run(accounts, concurrency, cancel).await;
    watcher.abort();

    if ctx.json {
        return print_json(&serde_json::json!({
            "report": report,
            "summary": report.summary(),
        }));
    }
    println!("{}", format_report(&report));
    Ok(())
}

pub fn format_report(report: &DispatchReport) -> String {
    let mut out = String::new();
    for outcome in &report.outcomes {
        out.push_str(&format_outcome(outcome));
        out.push('\n');
    }
    if report.cancelled {
        out.push_str(&format!(
            "cancelled: {} account(s) not started\n",
            report.skipped.len()
        ));
    }
    out.push_str(&format!("{} message(s) sent\n", report.messages_sent()));
    out.push_str(&report.summary().to_string());
    out
}

fn format_outcome(outcome: &AccountOutcome) -> String {
    let login = match &outcome.login {
        LoginOutcome::Reused => "session reused".to_string(),
        LoginOutcome::LoggedIn => "logged in".to_string(),
        LoginOutcome::Failed { kind, detail } => format!("login failed ({}): {detail}", kind.as_str()),
        LoginOutcome::Error { message } => format!("error: {message}"),
    };
    let mut line = format!("[{}] {}: {login}", outcome.account_id, outcome.username);
    if let Some(error) = &outcome.error {
        line.push_str(&format!(", rules unavailable: {error}"));
    }
    if !outcome.rules.is_empty() {
        let failed = outcome
            .rules
            .iter()
            .filter(|r| matches!(r.result, RuleResult::Failed { .. }))
            .count();
        let cancelled = outcome
            .rules
            .iter()
            .filter(|r| r.result == RuleResult::Cancelled)
            .count();
        line.push_str(&format!(", {} sent", outcome.sent()));
        if failed > 0 {
            line.push_str(&format!(", {failed} failed"));
        }
        if cancelled > 0 {
            line.push_str(&format!(", {cancelled} cancelled"));
        }
    }
    line
}
