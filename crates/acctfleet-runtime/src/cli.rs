//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "acctfleet", about = "Bulk account, proxy and message-rule manager")]
pub struct Cli {
    /// Config file (default: ./acctfleet.toml when present)
    #[arg(long, short = 'c', global = true, env = "ACCTFLEET_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database path, overrides [store].path
    #[arg(long, global = true, env = "ACCTFLEET_DB")]
    pub db: Option<PathBuf>,

    /// Print reports as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Bulk-load accounts or proxies from a file
    #[command(subcommand)]
    Import(ImportCmd),
    /// Inspect and manage accounts
    #[command(subcommand)]
    Accounts(AccountsCmd),
    /// Inspect and manage proxies
    #[command(subcommand)]
    Proxies(ProxiesCmd),
    /// Manage outbound message rules
    #[command(subcommand)]
    Rules(RulesCmd),
    /// Log in where needed and send every active rule
    Dispatch(DispatchOpts),
    /// Fleet-wide counters
    Stats,
}

#[derive(Subcommand)]
pub enum ImportCmd {
    /// `username:password:proxy` lines or a CSV file with a header row
    Accounts {
        file: PathBuf,
        #[arg(long, value_enum, default_value = "auto")]
        format: FormatArg,
    },
    /// One proxy per line
    Proxies { file: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    /// `.csv` extension or a recognizable CSV header selects CSV
    Auto,
    Text,
    Csv,
}

#[derive(Subcommand)]
pub enum AccountsCmd {
    List,
    Delete {
        id: i64,
    },
    /// Point an account at another proxy; a different proxy drops its session
    SetProxy {
        id: i64,
        /// `host:port`, `host:port:user:pass` or `user:pass@host:port`
        spec: String,
    },
    /// Force a fresh login
    Login {
        id: i64,
    },
    Logout {
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum ProxiesCmd {
    List,
    /// Enable or disable a proxy
    SetActive {
        id: i64,
        #[arg(action = clap::ArgAction::Set)]
        active: bool,
    },
    /// Refused while any account still uses the proxy
    Delete {
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum RulesCmd {
    List {
        #[arg(long)]
        account: Option<i64>,
    },
    /// Add a rule; an existing rule for the same account and target is replaced
    Add {
        account_id: i64,
        target: String,
        template: String,
        #[arg(long)]
        inactive: bool,
    },
    SetActive {
        id: i64,
        #[arg(action = clap::ArgAction::Set)]
        active: bool,
    },
    Delete {
        id: i64,
    },
}

#[derive(clap::Args, Default)]
pub struct DispatchOpts {
    /// Worker count, overrides [dispatch].concurrency (clamped to 1..=64)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Restrict the run to these accounts (repeatable)
    #[arg(long = "account")]
    pub accounts: Vec<i64>,
}
