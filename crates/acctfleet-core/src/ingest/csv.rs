//! CSV account import with header alias matching.
//!
//! Quoting follows RFC 4180: a field wrapped in `"` may contain the
//! delimiter and line breaks, and `""` inside it is a literal quote.

use crate::error::{RowError, RowErrorKind, StructuralError};
use crate::proxy::parse_proxy_spec;
use crate::types::AccountInput;

use super::{Ingested, check_record_cap};

const DELIMITERS: [char; 3] = [',', ';', '\t'];

/// A canonical column and the header names accepted for it, in lookup order.
struct Column {
    name: &'static str,
    aliases: &'static [&'static str],
}

const USERNAME: Column = Column {
    name: "username",
    aliases: &["username", "user", "login", "email", "account"],
};

const PASSWORD: Column = Column {
    name: "password",
    aliases: &["password", "pass", "pwd"],
};

const PROXY: Column = Column {
    name: "proxy",
    aliases: &["proxy", "proxy_address", "proxyaddress", "proxyserver", "proxy_server"],
};

/// One logical CSV record and the physical line it starts on.
#[derive(Debug, PartialEq, Eq)]
struct RawRecord<'a> {
    line: usize,
    text: &'a str,
    unterminated: bool,
}

#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    username: usize,
    password: usize,
    proxy: usize,
}

impl ColumnMap {
    fn required_len(&self) -> usize {
        self.username.max(self.password).max(self.proxy) + 1
    }
}

/// Parse CSV text with a header row naming username, password and proxy
/// columns.
pub fn parse_csv(text: &str) -> Result<Ingested<AccountInput>, StructuralError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    if text.trim().is_empty() {
        return Err(StructuralError::EmptyInput);
    }

    let records: Vec<RawRecord<'_>> = split_records(text)
        .into_iter()
        .filter(|r| !r.text.trim().is_empty())
        .collect();
    let Some((header, data)) = records.split_first() else {
        return Err(StructuralError::EmptyInput);
    };
    check_record_cap(data.len())?;

    let delimiter = detect_delimiter(header.text);
    let columns = locate_columns(header, delimiter)?;

    let mut out = Ingested::default();
    for record in data {
        match parse_record(record, delimiter, columns) {
            Ok(account) => out.accepted.push(account),
            Err(kind) => out.skipped.push(RowError::new(record.line, kind)),
        }
    }
    Ok(out)
}

/// True when `text` starts with a header row that names every required
/// column.
pub fn looks_like_csv(text: &str) -> bool {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    split_records(text)
        .into_iter()
        .find(|r| !r.text.trim().is_empty())
        .is_some_and(|header| locate_columns(&header, detect_delimiter(header.text)).is_ok())
}

fn locate_columns(header: &RawRecord<'_>, delimiter: char) -> Result<ColumnMap, StructuralError> {
    if header.unterminated {
        return Err(StructuralError::MissingHeader);
    }
    let names: Vec<String> = parse_fields(header.text, delimiter)
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    if names.iter().all(|n| n.is_empty()) {
        return Err(StructuralError::MissingHeader);
    }

    let username = find_column(&names, &USERNAME);
    let password = find_column(&names, &PASSWORD);
    let proxy = find_column(&names, &PROXY);
    match (username, password, proxy) {
        (Some(username), Some(password), Some(proxy)) => Ok(ColumnMap {
            username,
            password,
            proxy,
        }),
        _ => {
            let missing = [(username, USERNAME.name), (password, PASSWORD.name), (proxy, PROXY.name)]
                .into_iter()
                .filter(|(idx, _)| idx.is_none())
                .map(|(_, name)| name)
                .collect();
            Err(StructuralError::MissingColumns(missing))
        }
    }
}

/// First alias (in table order) present in the header wins.
fn find_column(names: &[String], column: &Column) -> Option<usize> {
    column
        .aliases
        .iter()
        .find_map(|alias| names.iter().position(|n| n == alias))
}

fn parse_record(
    record: &RawRecord<'_>,
    delimiter: char,
    columns: ColumnMap,
) -> Result<AccountInput, RowErrorKind> {
    if record.unterminated {
        return Err(RowErrorKind::UnterminatedQuote);
    }
    let fields = parse_fields(record.text, delimiter);
    if fields.len() < columns.required_len() {
        return Err(RowErrorKind::TooFewColumns {
            found: fields.len(),
            required: columns.required_len(),
        });
    }

    let username = required(&fields, columns.username, USERNAME.name)?;
    let password = required(&fields, columns.password, PASSWORD.name)?;
    let proxy = required(&fields, columns.proxy, PROXY.name)?;

    Ok(AccountInput {
        username: username.to_string(),
        password: password.to_string(),
        proxy: parse_proxy_spec(proxy)?,
    })
}

fn required<'a>(fields: &'a [String], idx: usize, name: &'static str) -> Result<&'a str, RowErrorKind> {
    let value = fields[idx].trim();
    if value.is_empty() {
        return Err(RowErrorKind::EmptyField(name));
    }
    Ok(value)
}

/// Pick the candidate delimiter that occurs most often outside quotes in
/// the header. Ties go to the earlier candidate; no candidate means `,`.
fn detect_delimiter(header: &str) -> char {
    let mut counts = [0usize; DELIMITERS.len()];
    let mut in_quotes = false;
    for c in header.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if !in_quotes {
            if let Some(i) = DELIMITERS.iter().position(|d| *d == c) {
                counts[i] += 1;
            }
        }
    }
    let mut best = 0;
    for i in 1..DELIMITERS.len() {
        if counts[i] > counts[best] {
            best = i;
        }
    }
    DELIMITERS[best]
}

/// Split text into records on line breaks that are not inside quotes.
///
/// A doubled quote flips the quote state twice, so escaped quotes never end
/// a quoted section early.
fn split_records(text: &str) -> Vec<RawRecord<'_>> {
    let mut records = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    let mut start_line = 1;
    let mut line = 1;

    for (i, c) in text.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '\n' => {
                if !in_quotes {
                    records.push(RawRecord {
                        line: start_line,
                        text: text[start..i].trim_end_matches('\r'),
                        unterminated: false,
                    });
                    start = i + 1;
                    start_line = line + 1;
                }
                line += 1;
            }
            _ => {}
        }
    }
    if start < text.len() {
        records.push(RawRecord {
            line: start_line,
            text: text[start..].trim_end_matches('\r'),
            unterminated: in_quotes,
        });
    }
    records
}

/// Split one record into fields.
fn parse_fields(record: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = record.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
        } else if c == '"' {
            in_quotes = true;
        } else if c == delimiter {
            fields.push(std::mem::take(&mut field));
        } else {
            field.push(c);
        }
    }
    fields.push(field);
    fields
}
