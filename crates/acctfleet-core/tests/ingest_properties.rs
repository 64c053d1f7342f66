use acctfleet_core::ingest::{MAX_RECORDS_PER_CALL, parse_csv, parse_delimited_text};
use acctfleet_core::{ProxyDescriptor, RowErrorKind, StructuralError};
use proptest::prelude::*;

fn word() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_.-]{1,16}"
}

fn host() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9.-]{0,24}"
}

proptest! {
    #[test]
    fn simple_text_line_is_accepted(u in word(), p in word(), h in host(), port in 1u16..) {
        let line = format!("{u}:{p}:{h}:{port}");
        let out = parse_delimited_text(&line).unwrap();
        prop_assert!(out.skipped.is_empty());
        prop_assert_eq!(out.accepted.len(), 1);
        let account = &out.accepted[0];
        prop_assert_eq!(&account.username, &u);
        prop_assert_eq!(&account.password, &p);
        prop_assert_eq!(&account.proxy, &ProxyDescriptor::new(h, port));
    }

    /// Every data row ends up either accepted or skipped.
    #[test]
    fn csv_rows_are_conserved(
        rows in proptest::collection::vec(
            (proptest::option::of(word()), proptest::option::of(word()), 0u8..3),
            1..40,
        ),
        header in prop_oneof![
            Just("Username,Password,Proxy"),
            Just("USERNAME,PASSWORD,PROXY"),
            Just("username,password,proxy"),
        ],
    ) {
        let mut text = format!("{header}\n");
        for (u, p, proxy_kind) in &rows {
            let proxy = match proxy_kind {
                0 => "h:80",
                1 => "u:p@h:81",
                _ => "bad",
            };
            text.push_str(&format!(
                "{},{},{}\n",
                u.as_deref().unwrap_or(""),
                p.as_deref().unwrap_or(""),
                proxy
            ));
        }
        let out = parse_csv(&text).unwrap();
        prop_assert_eq!(out.accepted.len() + out.skipped.len(), rows.len());
        let expected_ok = rows
            .iter()
            .filter(|(u, p, k)| u.is_some() && p.is_some() && *k < 2)
            .count();
        prop_assert_eq!(out.accepted.len(), expected_ok);
    }
}

#[test]
fn csv_row_missing_password_is_skipped() {
    let text = "Username,Password,Proxy\nalice,pw,h:1\nbob,,h:2\ncarol,pw,h:3\n";
    let out = parse_csv(text).unwrap();
    assert_eq!(out.accepted.len(), 2);
    assert_eq!(out.skipped.len(), 1);
    assert_eq!(out.skipped[0].line, 3);
    assert_eq!(out.skipped[0].kind, RowErrorKind::EmptyField("password"));
}

#[test]
fn oversized_inputs_fail_before_row_parsing() {
    let over = MAX_RECORDS_PER_CALL + 1;
    let expected = Err(StructuralError::TooManyRecords {
        count: over,
        limit: MAX_RECORDS_PER_CALL,
    });

    let text = "not-a-valid-line\n".repeat(over);
    assert_eq!(parse_delimited_text(&text), expected);

    let csv = format!("username,password,proxy\n{}", ",,\n".repeat(over));
    assert_eq!(parse_csv(&csv), expected);
}
