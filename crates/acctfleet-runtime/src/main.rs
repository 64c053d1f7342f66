//! acctfleet: bulk account, proxy and message-rule manager.
//! Imports fleets from text or CSV, keeps per-account sessions bound to
//! their proxy, and dispatches message rules over a bounded worker pool.

use clap::Parser;

mod cli;
mod cmd_accounts;
mod cmd_dispatch;
mod cmd_import;
mod cmd_proxies;
mod cmd_rules;
mod cmd_stats;
mod context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("ACCTFLEET_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let ctx = context::AppContext::open(&args)?;

    match args.command {
        cli::Command::Import(cli::ImportCmd::Accounts { file, format }) => {
            cmd_import::cmd_import_accounts(&ctx, &file, format).await?;
        }
        cli::Command::Import(cli::ImportCmd::Proxies { file }) => {
            cmd_import::cmd_import_proxies(&ctx, &file).await?;
        }
        cli::Command::Accounts(cmd) => cmd_accounts::cmd_accounts(&ctx, cmd).await?,
        cli::Command::Proxies(cmd) => cmd_proxies::cmd_proxies(&ctx, cmd).await?,
        cli::Command::Rules(cmd) => cmd_rules::cmd_rules(&ctx, cmd).await?,
        cli::Command::Dispatch(opts) => cmd_dispatch::cmd_dispatch(&ctx, opts).await?,
        cli::Command::Stats => cmd_stats::cmd_stats(&ctx).await?,
    }

    Ok(())
}
