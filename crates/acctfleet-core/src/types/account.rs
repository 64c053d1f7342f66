use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::proxy::ProxyDescriptor;
use crate::serde_helpers::{from_column, to_column};

pub type AccountId = i64;
pub type ProxyId = i64;

/// Classified reason a login attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    InvalidCredentials,
    ChallengeRequired,
    TwoFactorRequired,
    ProxyUnreachable,
    Timeout,
    Unknown,
}

impl AuthErrorKind {
    pub fn as_str(&self) -> String {
        to_column(self)
    }
}

/// Authentication state of one account.
///
/// `Authenticating` only exists while a login call is in flight; stores
/// persist the other four states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SessionStatus {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Failed(AuthErrorKind),
    Expired,
}

impl SessionStatus {
    /// Label stored in the `status` column.
    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::Unauthenticated => "unauthenticated",
            SessionStatus::Authenticating => "authenticating",
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::Failed(_) => "failed",
            SessionStatus::Expired => "expired",
        }
    }

    pub fn failure(&self) -> Option<AuthErrorKind> {
        match self {
            SessionStatus::Failed(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Rebuild a status from its stored label and optional failure reason.
    /// Unknown labels read back as `Unauthenticated`.
    pub fn from_parts(label: &str, reason: Option<&str>) -> Self {
        match label {
            "authenticating" => SessionStatus::Authenticating,
            "authenticated" => SessionStatus::Authenticated,
            "expired" => SessionStatus::Expired,
            "failed" => SessionStatus::Failed(
                reason
                    .and_then(from_column)
                    .unwrap_or(AuthErrorKind::Unknown),
            ),
            _ => SessionStatus::Unauthenticated,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Failed(kind) => write!(f, "failed({})", kind.as_str()),
            other => f.write_str(other.label()),
        }
    }
}

/// Opaque authentication state bound to the proxy it was obtained through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionArtifact {
    pub data: String,
    pub proxy_fingerprint: String,
    pub created_at: DateTime<Utc>,
}

impl SessionArtifact {
    pub fn new(data: impl Into<String>, proxy: &ProxyDescriptor, created_at: DateTime<Utc>) -> Self {
        Self {
            data: data.into(),
            proxy_fingerprint: proxy.fingerprint(),
            created_at,
        }
    }

    /// True when this artifact may be replayed through `proxy`.
    pub fn is_bound_to(&self, proxy: &ProxyDescriptor) -> bool {
        self.proxy_fingerprint == proxy.fingerprint()
    }
}

/// Parsed account row, before persistence assigns ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInput {
    pub username: String,
    pub password: String,
    pub proxy: ProxyDescriptor,
}

/// Persisted account with its resolved proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountRecord {
    pub id: AccountId,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub proxy_id: ProxyId,
    pub proxy: ProxyDescriptor,
    pub status: SessionStatus,
    pub last_login_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub session: Option<SessionArtifact>,
}

impl AccountRecord {
    /// The cached artifact, if it is still valid for the account's current proxy.
    pub fn live_session(&self) -> Option<&SessionArtifact> {
        if self.status != SessionStatus::Authenticated {
            return None;
        }
        self.session.as_ref().filter(|s| s.is_bound_to(&self.proxy))
    }
}
