//! Error taxonomy shared by the ingestion pipeline.
//!
//! Structural errors abort a whole ingestion call. Row errors are collected
//! next to the accepted records and never abort. Format errors come from the
//! proxy-spec grammar and surface either directly or wrapped in a row error.

use serde::Serialize;
use thiserror::Error;

/// Proxy descriptor grammar violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("proxy spec is empty")]
    Empty,

    #[error("expected host:port or host:port:user:pass, got {0} colon-separated tokens")]
    TokenCount(usize),

    #[error("proxy address is empty")]
    MissingAddress,

    #[error("proxy spec has no port")]
    MissingPort,

    #[error("invalid proxy port {0:?}")]
    InvalidPort(String),

    #[error("proxy credentials must be user:pass with both parts non-empty")]
    MissingCredentials,
}

impl FormatError {
    /// Short stable label used when grouping failures in summaries.
    pub fn category(&self) -> &'static str {
        match self {
            FormatError::Empty => "proxy_empty",
            FormatError::TokenCount(_) => "proxy_token_count",
            FormatError::MissingAddress => "proxy_missing_address",
            FormatError::MissingPort => "proxy_missing_port",
            FormatError::InvalidPort(_) => "proxy_invalid_port",
            FormatError::MissingCredentials => "proxy_missing_credentials",
        }
    }
}

/// Failure that aborts an entire ingestion call. No partial result is
/// returned alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("input is empty")]
    EmptyInput,

    #[error("CSV input has no header row")]
    MissingHeader,

    #[error("CSV header is missing required column(s): {}", .0.join(", "))]
    MissingColumns(Vec<&'static str>),

    #[error("{count} records submitted, at most {limit} are accepted per call")]
    TooManyRecords { count: usize, limit: usize },
}

/// Why a single row was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowErrorKind {
    #[error("expected username:password:proxy, got {0} field(s)")]
    TooFewFields(usize),

    #[error("row has {found} column(s), header requires at least {required}")]
    TooFewColumns { found: usize, required: usize },

    #[error("required field `{0}` is empty")]
    EmptyField(&'static str),

    #[error("unterminated quoted field")]
    UnterminatedQuote,

    #[error("proxy: {0}")]
    Proxy(#[from] FormatError),
}

impl RowErrorKind {
    /// Short stable label used when grouping failures in summaries.
    pub fn category(&self) -> &'static str {
        match self {
            RowErrorKind::TooFewFields(_) => "too_few_fields",
            RowErrorKind::TooFewColumns { .. } => "too_few_columns",
            RowErrorKind::EmptyField(_) => "empty_field",
            RowErrorKind::UnterminatedQuote => "unterminated_quote",
            RowErrorKind::Proxy(e) => e.category(),
        }
    }
}

/// A skipped input row, addressed by its 1-based line number in the
/// original input.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("line {line}: {kind}")]
pub struct RowError {
    pub line: usize,
    #[serde(serialize_with = "serialize_display")]
    pub kind: RowErrorKind,
}

impl RowError {
    pub fn new(line: usize, kind: impl Into<RowErrorKind>) -> Self {
        Self {
            line,
            kind: kind.into(),
        }
    }
}

fn serialize_display<S: serde::Serializer>(
    kind: &RowErrorKind,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_columns_lists_every_column() {
        let err = StructuralError::MissingColumns(vec!["password", "proxy"]);
        assert_eq!(
            err.to_string(),
            "CSV header is missing required column(s): password, proxy"
        );
    }

    #[test]
    fn row_error_wraps_format_error() {
        let err = RowError::new(7, FormatError::TokenCount(3));
        assert_eq!(err.kind.category(), "proxy_token_count");
        assert!(err.to_string().starts_with("line 7: proxy:"));
    }

    #[test]
    fn row_error_serializes_kind_as_message() {
        let err = RowError::new(2, RowErrorKind::EmptyField("password"));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["line"], 2);
        assert_eq!(json["kind"], "required field `password` is empty");
    }
}
