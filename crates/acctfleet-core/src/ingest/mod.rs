//! Bulk ingestion of account and proxy definitions.
//!
//! Parsers are pure: they return the accepted records together with the rows
//! they skipped, or a [`StructuralError`] when the input as a whole is
//! unusable. Persisting the result is the caller's job.

pub mod csv;
pub mod proxies;
pub mod text;

use serde::Serialize;

use crate::error::{RowError, StructuralError};
use crate::summary::{Summary, SummaryBuilder};
use crate::types::AccountInput;

pub use self::csv::{looks_like_csv, parse_csv};
pub use self::proxies::parse_proxy_list;
pub use self::text::parse_delimited_text;

/// Hard cap on records per ingestion call, checked before any row is parsed.
pub const MAX_RECORDS_PER_CALL: usize = 5_000;

/// Result of a successful ingestion call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ingested<T> {
    pub accepted: Vec<T>,
    pub skipped: Vec<RowError>,
}

impl<T> Ingested<T> {
    pub fn total_rows(&self) -> usize {
        self.accepted.len() + self.skipped.len()
    }

    pub fn summary(&self) -> Summary {
        let mut builder = SummaryBuilder::new();
        builder.accept(self.accepted.len());
        for row in &self.skipped {
            builder.skip(row.kind.category(), row);
        }
        builder.build()
    }
}

impl<T> Default for Ingested<T> {
    fn default() -> Self {
        Self {
            accepted: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

/// Account input layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountFormat {
    /// `username:password:proxy` lines.
    Text,
    /// Header row plus delimited records.
    Csv,
}

impl AccountFormat {
    /// CSV when the first record is a header naming every required column.
    pub fn detect(text: &str) -> Self {
        if looks_like_csv(text) {
            AccountFormat::Csv
        } else {
            AccountFormat::Text
        }
    }
}

pub fn parse_accounts(
    text: &str,
    format: AccountFormat,
) -> Result<Ingested<AccountInput>, StructuralError> {
    match format {
        AccountFormat::Text => parse_delimited_text(text),
        AccountFormat::Csv => parse_csv(text),
    }
}

/// Split `text` on its detected line ending and keep the non-blank lines,
/// each paired with its 1-based line number.
pub(crate) fn non_blank_lines(text: &str) -> Vec<(usize, &str)> {
    let ending = if text.contains("\r\n") { "\r\n" } else { "\n" };
    text.split(ending)
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim_end_matches('\r')))
        .filter(|(_, line)| !line.trim().is_empty())
        .collect()
}

/// Reject empty input and inputs over the per-call record cap.
pub(crate) fn check_record_count(count: usize) -> Result<(), StructuralError> {
    if count == 0 {
        return Err(StructuralError::EmptyInput);
    }
    check_record_cap(count)
}

pub(crate) fn check_record_cap(count: usize) -> Result<(), StructuralError> {
    if count > MAX_RECORDS_PER_CALL {
        return Err(StructuralError::TooManyRecords {
            count,
            limit: MAX_RECORDS_PER_CALL,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RowErrorKind;

    #[test]
    fn crlf_and_lf_keep_line_numbers() {
        assert_eq!(
            non_blank_lines("a\r\n\r\nb\r\n"),
            vec![(1, "a"), (3, "b")]
        );
        assert_eq!(non_blank_lines("a\n  \nb"), vec![(1, "a"), (3, "b")]);
    }

    #[test]
    fn cap_is_inclusive() {
        assert!(check_record_count(MAX_RECORDS_PER_CALL).is_ok());
        assert_eq!(
            check_record_count(MAX_RECORDS_PER_CALL + 1),
            Err(StructuralError::TooManyRecords {
                count: MAX_RECORDS_PER_CALL + 1,
                limit: MAX_RECORDS_PER_CALL
            })
        );
        assert_eq!(check_record_count(0), Err(StructuralError::EmptyInput));
    }

    #[test]
    fn format_detection() {
        assert_eq!(AccountFormat::detect("Login;Pwd;Proxy\nx;y;h:1\n"), AccountFormat::Csv);
        assert_eq!(AccountFormat::detect("x:y:h:1\n"), AccountFormat::Text);
        let out = parse_accounts("user,pass,proxy\nx,y,h:1\n", AccountFormat::Csv).unwrap();
        assert_eq!(out.accepted.len(), 1);
    }

    #[test]
    fn summary_counts_skips_by_category() {
        let ingested: Ingested<()> = Ingested {
            accepted: vec![(), ()],
            skipped: vec![
                RowError::new(3, RowErrorKind::TooFewFields(2)),
                RowError::new(4, RowErrorKind::TooFewFields(1)),
            ],
        };
        let summary = ingested.summary();
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.reasons.len(), 1);
        assert_eq!(ingested.total_rows(), 4);
    }
}
