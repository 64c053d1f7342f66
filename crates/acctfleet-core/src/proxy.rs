//! Proxy descriptor grammar.
//!
//! Accepted forms, after trimming:
//!
//! ```text
//! host:port
//! host:port:user:pass
//! user:pass@host:port
//! ```
//!
//! Anything else is rejected. Inputs with 3 or 5+ colon-separated tokens are
//! ambiguous and are never reconstructed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FormatError;

/// Canonical proxy endpoint plus optional credentials.
///
/// Identity for deduplication is `(address, port)`; see [`ProxyDescriptor::key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyDescriptor {
    pub address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Uniqueness key of a proxy row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyKey {
    pub address: String,
    pub port: u16,
}

impl ProxyDescriptor {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn key(&self) -> ProxyKey {
        ProxyKey {
            address: self.address.clone(),
            port: self.port,
        }
    }

    /// Canonical identity of the full descriptor, credentials included.
    ///
    /// A session artifact stores the fingerprint of the descriptor it was
    /// obtained through and is only replayed when the fingerprints match.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}:{}|{}|{}",
            self.address,
            self.port,
            self.username.as_deref().unwrap_or(""),
            self.password.as_deref().unwrap_or("")
        )
    }

    /// Whether the two descriptors carry the same credentials.
    pub fn same_credentials(&self, other: &ProxyDescriptor) -> bool {
        self.username == other.username && self.password == other.password
    }

    /// Whether an account naming `self` may be linked to `stored`, the
    /// existing row with the same key, without changing that row. True when
    /// `self` carries no credentials or the same ones.
    pub fn links_to(&self, stored: &ProxyDescriptor) -> bool {
        self.key() == stored.key()
            && ((self.username.is_none() && self.password.is_none())
                || self.same_credentials(stored))
    }

    /// Serialize back to `host:port` or `host:port:user:pass`.
    pub fn to_spec(&self) -> String {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => {
                format!("{}:{}:{}:{}", self.address, self.port, user, pass)
            }
            _ => format!("{}:{}", self.address, self.port),
        }
    }
}

/// Masks the password so descriptors can be logged.
impl fmt::Display for ProxyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.username {
            Some(user) => write!(f, "{}:***@{}:{}", user, self.address, self.port),
            None => write!(f, "{}:{}", self.address, self.port),
        }
    }
}

/// Parse one textual proxy descriptor.
pub fn parse_proxy_spec(spec: &str) -> Result<ProxyDescriptor, FormatError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(FormatError::Empty);
    }

    // Hosts never contain '@', passwords might: split on the last one.
    if let Some((credentials, hostport)) = spec.rsplit_once('@') {
        let (username, password) = credentials
            .split_once(':')
            .ok_or(FormatError::MissingCredentials)?;
        let (username, password) = (username.trim(), password.trim());
        if username.is_empty() || password.is_empty() {
            return Err(FormatError::MissingCredentials);
        }
        let (address, port) = hostport.split_once(':').ok_or(FormatError::MissingPort)?;
        return Ok(ProxyDescriptor::new(parse_address(address)?, parse_port(port)?)
            .with_credentials(username, password));
    }

    let tokens: Vec<&str> = spec.split(':').map(str::trim).collect();
    match tokens.as_slice() {
        [address, port] => Ok(ProxyDescriptor::new(parse_address(address)?, parse_port(port)?)),
        [address, port, username, password] => {
            if username.is_empty() || password.is_empty() {
                return Err(FormatError::MissingCredentials);
            }
            Ok(ProxyDescriptor::new(parse_address(address)?, parse_port(port)?)
                .with_credentials(*username, *password))
        }
        other => Err(FormatError::TokenCount(other.len())),
    }
}

fn parse_address(raw: &str) -> Result<String, FormatError> {
    let address = raw.trim();
    if address.is_empty() {
        return Err(FormatError::MissingAddress);
    }
    Ok(address.to_string())
}

fn parse_port(raw: &str) -> Result<u16, FormatError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(FormatError::MissingPort);
    }
    match raw.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(FormatError::InvalidPort(raw.to_string())),
    }
}
