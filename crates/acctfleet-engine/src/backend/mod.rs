//! Contract for the remote authentication and messaging system.
//!
//! The engine never talks to the remote platform directly; it only sees an
//! [`AuthBackend`] chosen by the caller at construction time.

pub mod simulated;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use acctfleet_core::ProxyDescriptor;
use acctfleet_core::types::{AuthErrorKind, SessionArtifact};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use simulated::{BackendCall, SimulatedBackend};

use crate::config::{BackendConfig, BackendKind};

/// Classified login failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {detail}", .kind.as_str())]
pub struct AuthFailure {
    pub kind: AuthErrorKind,
    pub detail: String,
}

impl AuthFailure {
    pub fn new(kind: AuthErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendErrorKind {
    /// The remote side no longer accepts the session artifact.
    SessionRejected,
    TargetNotFound,
    RateLimited,
    ProxyUnreachable,
    Timeout,
    Other,
}

impl SendErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendErrorKind::SessionRejected => "session_rejected",
            SendErrorKind::TargetNotFound => "target_not_found",
            SendErrorKind::RateLimited => "rate_limited",
            SendErrorKind::ProxyUnreachable => "proxy_unreachable",
            SendErrorKind::Timeout => "timeout",
            SendErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for SendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{kind}: {message}")]
pub struct SendFailure {
    pub kind: SendErrorKind,
    pub message: String,
}

impl SendFailure {
    pub fn new(kind: SendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Remote authentication and messaging.
///
/// Implementations must tolerate concurrent calls for different accounts.
/// The engine guarantees it never overlaps calls for the same account.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Log in through `proxy`. Returns the opaque session payload.
    async fn login(
        &self,
        username: &str,
        password: &str,
        proxy: &ProxyDescriptor,
    ) -> Result<String, AuthFailure>;

    /// Whether a cached artifact is still accepted by the remote side.
    async fn verify(&self, artifact: &SessionArtifact, proxy: &ProxyDescriptor) -> bool;

    async fn send_message(
        &self,
        artifact: &SessionArtifact,
        proxy: &ProxyDescriptor,
        target_handle: &str,
        text: &str,
    ) -> Result<(), SendFailure>;
}

/// Construct the backend named in `[backend]`.
pub fn build_backend(config: &BackendConfig) -> Arc<dyn AuthBackend> {
    match config.kind {
        BackendKind::Simulated => Arc::new(
            SimulatedBackend::new().with_latency(Duration::from_millis(config.latency_ms)),
        ),
    }
}
