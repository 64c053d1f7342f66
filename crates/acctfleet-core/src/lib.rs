//! acctfleet-core: domain types, the proxy grammar and bulk ingestion
//! parsers. Nothing in here performs I/O.

pub mod error;
pub mod ingest;
pub mod proxy;
pub mod serde_helpers;
pub mod summary;
pub mod types;

pub use error::{FormatError, RowError, RowErrorKind, StructuralError};
pub use proxy::{ProxyDescriptor, ProxyKey, parse_proxy_spec};
pub use summary::{MAX_REASON_CATEGORIES, Summary, SummaryBuilder};
