//! `acctfleet import` — bulk-load accounts or proxies.

use std::path::Path;

use acctfleet_core::ingest::{AccountFormat, parse_accounts, parse_proxy_list};
use acctfleet_engine::{ImportReport, Importer};
use anyhow::Context as _;

use crate::cli::FormatArg;
use crate::context::{AppContext, print_json};

pub async fn cmd_import_accounts(
    ctx: &AppContext,
    file: &Path,
    format: FormatArg,
) -> anyhow::Result<()> {
    let text = read_input(file)?;
    let format = resolve_format(file, &text, format);
    tracing::info!(file = %file.display(), ?format, "importing accounts");
    let parsed = parse_accounts(&text, format)?;
    let report = Importer::new(ctx.store.clone(), &ctx.config.ingest)
        .import_accounts(parsed)
        .await?;
    print_report(ctx, "accounts", &report)
}

pub async fn cmd_import_proxies(ctx: &AppContext, file: &Path) -> anyhow::Result<()> {
    let text = read_input(file)?;
    let parsed = parse_proxy_list(&text)?;
    let report = Importer::new(ctx.store.clone(), &ctx.config.ingest)
        .import_proxies(parsed)
        .await?;
    print_report(ctx, "proxies", &report)
}

fn read_input(file: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))
}

/// `auto` picks CSV for a `.csv` extension or a recognizable header.
pub fn resolve_format(file: &Path, text: &str, requested: FormatArg) -> AccountFormat {
    match requested {
        FormatArg::Text => AccountFormat::Text,
        FormatArg::Csv => AccountFormat::Csv,
        FormatArg::Auto => {
            let is_csv_file = file
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
            if is_csv_file {
                AccountFormat::Csv
            } else {
                AccountFormat::detect(text)
            }
        }
    }
}

fn print_report(ctx: &AppContext, what: &str, report: &ImportReport) -> anyhow::Result<()> {
    if ctx.json {
        return print_json(&serde_json::json!({
            "report": report,
            "summary": report.summary(),
        }));
    }
    println!("{}", format_report(what, report));
    Ok(())
}

pub fn format_report(what: &str, report: &ImportReport) -> String {
    let mut out = format!(
        "{what}: {} parsed, {} inserted, {} already present",
        report.parsed, report.inserted, report.duplicates
    );
    for batch in &report.failed_batches {
        let state = if batch.timed_out {
            "may not be saved"
        } else {
            "not saved"
        };
        out.push_str(&format!(
            "\n  batch {} ({} rows) {state}: {}",
            batch.index, batch.rows, batch.error
        ));
    }
    out.push('\n');
    out.push_str(&report.summary().to_string());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use acctfleet_engine::import::BatchFailure;

    #[test]
    fn auto_format_prefers_extension_then_header() {
        let header = "username,password,proxy\n";
        let lines = "alice:pw:h:80\n";
        assert_eq!(
            resolve_format(Path::new("a.CSV"), lines, FormatArg::Auto),
            AccountFormat::Csv
        );
        assert_eq!(
            resolve_format(Path::new("a.txt"), header, FormatArg::Auto),
            AccountFormat::Csv
        );
        assert_eq!(
            resolve_format(Path::new("a.txt"), lines, FormatArg::Auto),
            AccountFormat::Text
        );
        assert_eq!(
            resolve_format(Path::new("a.csv"), lines, FormatArg::Text),
            AccountFormat::Text
        );
    }

    #[test]
    fn report_lists_failed_batches() {
        let report = ImportReport {
            parsed: 3,
            inserted: 1,
            duplicates: 0,
            skipped: Vec::new(),
            failed_batches: vec![BatchFailure {
                index: 1,
                rows: 2,
                error: "database is locked".into(),
                timed_out: false,
            }],
        };
        let text = format_report("accounts", &report);
        assert!(text.starts_with("accounts: 3 parsed, 1 inserted, 0 already present"));
        assert!(text.contains("batch 1 (2 rows) not saved: database is locked"));
        assert!(text.contains("store_error x2"));
    }
}
