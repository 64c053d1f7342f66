//! Proxy lists: one proxy spec per line.

use crate::error::{RowError, StructuralError};
use crate::proxy::{ProxyDescriptor, parse_proxy_spec};

use super::{Ingested, check_record_count, non_blank_lines};

pub fn parse_proxy_list(text: &str) -> Result<Ingested<ProxyDescriptor>, StructuralError> {
    let lines = non_blank_lines(text);
    check_record_count(lines.len())?;

    let mut out = Ingested::default();
    for (line_no, line) in lines {
        match parse_proxy_spec(line) {
            Ok(proxy) => out.accepted.push(proxy),
            Err(e) => out.skipped.push(RowError::new(line_no, e)),
        }
    }
    Ok(out)
}
