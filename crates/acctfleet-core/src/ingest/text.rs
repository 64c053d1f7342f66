//! `username:password:proxy-tail` lines.

use crate::error::{RowError, RowErrorKind, StructuralError};
use crate::proxy::parse_proxy_spec;
use crate::types::AccountInput;

use super::{Ingested, check_record_count, non_blank_lines};

/// Parse one account per line.
///
/// The first two colon-separated tokens are username and password; the rest
/// is rejoined with `:` and parsed as a proxy spec, so `host:port`,
/// `host:port:user:pass` and `user:pass@host:port` tails all work.
pub fn parse_delimited_text(text: &str) -> Result<Ingested<AccountInput>, StructuralError> {
    let lines = non_blank_lines(text);
    check_record_count(lines.len())?;

    let mut out = Ingested::default();
    for (line_no, line) in lines {
        match parse_line(line) {
            Ok(account) => out.accepted.push(account),
            Err(kind) => out.skipped.push(RowError::new(line_no, kind)),
        }
    }
    Ok(out)
}

fn parse_line(line: &str) -> Result<AccountInput, RowErrorKind> {
    let tokens: Vec<&str> = line.split(':').collect();
    if tokens.len() < 3 {
        return Err(RowErrorKind::TooFewFields(tokens.len()));
    }

    let username = tokens[0].trim();
    let password = tokens[1].trim();
    if username.is_empty() {
        return Err(RowErrorKind::EmptyField("username"));
    }
    if password.is_empty() {
        return Err(RowErrorKind::EmptyField("password"));
    }

    let proxy = parse_proxy_spec(&tokens[2..].join(":"))?;
    Ok(AccountInput {
        username: username.to_string(),
        password: password.to_string(),
        proxy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormatError;
    use crate::ingest::MAX_RECORDS_PER_CALL;
    use crate::proxy::ProxyDescriptor;

    #[test]
    fn host_port_tail() {
        let out = parse_delimited_text("alice:pw1:proxy.example.com:8080").unwrap();
        assert!(out.skipped.is_empty());
        assert_eq!(
            out.accepted,
            vec![AccountInput {
                username: "alice".into(),
                password: "pw1".into(),
                proxy: ProxyDescriptor::new("proxy.example.com", 8080),
            }]
        );
    }

    #[test]
    fn four_token_and_at_tails() {
        let text = "a:1:10.0.0.1:3128:pu:pp\nb:2:pu:pp@10.0.0.2:3128\n";
        let out = parse_delimited_text(text).unwrap();
        assert_eq!(out.accepted.len(), 2);
        let expected_cred = Some("pu".to_string());
        assert_eq!(out.accepted[0].proxy.username, expected_cred);
        assert_eq!(out.accepted[1].proxy.address, "10.0.0.2");
        assert_eq!(out.accepted[1].proxy.password.as_deref(), Some("pp"));
    }

    #[test]
    fn bad_lines_are_skipped_with_their_line_number() {
        let text = "good:pw:h:1\r\n\r\nshort:pw\r\nthree:pw:host\r\nbad:pw:h:notaport\r\nok:pw:h2:2\r\n";
        let out = parse_delimited_text(text).unwrap();
        assert_eq!(out.accepted.len(), 2);
        assert_eq!(
            out.skipped,
            vec![
                RowError::new(3, RowErrorKind::TooFewFields(2)),
                RowError::new(4, FormatError::TokenCount(1)),
                RowError::new(5, FormatError::InvalidPort("notaport".into())),
            ]
        );
    }

    #[test]
    fn ambiguous_tails_are_rejected_not_reconstructed() {
        let out = parse_delimited_text("u:p:host:80:user").unwrap();
        assert_eq!(out.accepted.len(), 0);
        assert_eq!(
            out.skipped[0].kind,
            RowErrorKind::Proxy(FormatError::TokenCount(3))
        );
        let out = parse_delimited_text("u:p:host:80:user:pass:extra").unwrap();
        assert_eq!(
            out.skipped[0].kind,
            RowErrorKind::Proxy(FormatError::TokenCount(5))
        );
    }

    #[test]
    fn empty_credentials_are_row_errors() {
        let out = parse_delimited_text(":pw:h:1\nu: :h:1").unwrap();
        assert_eq!(out.skipped[0].kind, RowErrorKind::EmptyField("username"));
        assert_eq!(out.skipped[1].kind, RowErrorKind::EmptyField("password"));
    }

    #[test]
    fn blank_input_is_structural() {
        assert_eq!(parse_delimited_text(""), Err(StructuralError::EmptyInput));
        assert_eq!(parse_delimited_text("\n \r\n"), Err(StructuralError::EmptyInput));
    }

    #[test]
    fn record_cap_is_checked_before_parsing() {
        // Every line is malformed; the cap must still win.
        let text = "x\n".repeat(MAX_RECORDS_PER_CALL + 1);
        assert_eq!(
            parse_delimited_text(&text),
            Err(StructuralError::TooManyRecords {
                count: MAX_RECORDS_PER_CALL + 1,
                limit: MAX_RECORDS_PER_CALL,
            })
        );
    }
}
