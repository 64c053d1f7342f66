use serde::{Deserialize, Serialize};

use super::account::ProxyId;
use crate::proxy::ProxyDescriptor;

/// Persisted proxy row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub id: ProxyId,
    #[serde(flatten)]
    pub descriptor: ProxyDescriptor,
    pub active: bool,
}

/// Partial update of a proxy row; `None` keeps the current value.
///
/// An empty password string also keeps the current password, so a form
/// that leaves the field blank does not wipe credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyUpdate {
    pub address: Option<String>,
    pub port: Option<u16>,
    pub username: Option<Option<String>>,
    pub password: Option<String>,
    pub active: Option<bool>,
}

impl ProxyUpdate {
    /// Compute the descriptor and active flag that result from applying this
    /// update to `current`.
    pub fn apply(&self, current: &ProxyRecord) -> (ProxyDescriptor, bool) {
        let mut next = current.descriptor.clone();
        if let Some(address) = &self.address {
            next.address = address.clone();
        }
        if let Some(port) = self.port {
            next.port = port;
        }
        if let Some(username) = &self.username {
            next.username = username.clone();
        }
        match self.password.as_deref() {
            None | Some("") => {}
            Some(password) => next.password = Some(password.to_string()),
        }
        if next.username.is_none() {
            next.password = None;
        }
        (next, self.active.unwrap_or(current.active))
    }
}
