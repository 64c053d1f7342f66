//! Persistence collaborator.
//!
//! The store traits are synchronous; async callers go through
//! [`StoreHandle`], which runs each call on the blocking pool under a timeout.
//! Two implementations ship: [`MemoryStore`] and [`SqliteStore`].

pub mod memory;
pub mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use acctfleet_core::ProxyDescriptor;
use acctfleet_core::types::{
    AccountId, AccountInput, AccountRecord, AuthErrorKind, MessageRule, NewMessageRule, ProxyId,
    ProxyRecord, ProxyUpdate, RuleId, RuleUpdate, SessionArtifact, SessionStatus,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("proxy {id} is still assigned to {accounts} account(s)")]
    ProxyInUse { id: ProxyId, accounts: usize },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("store task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        StoreError::NotFound { entity, id }
    }
}

/// Session-related mutation applied to one account row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Login succeeded; the artifact replaces any previous one.
    LoggedIn {
        artifact: SessionArtifact,
        at: DateTime<Utc>,
    },
    /// Login failed; any artifact is destroyed.
    Failed(AuthErrorKind),
    /// The remote side rejected the artifact; it is destroyed.
    Expired,
    /// Explicit logout or proxy change; the artifact is destroyed.
    LoggedOut,
}

impl SessionUpdate {
    /// Status the account ends up in.
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionUpdate::LoggedIn { .. } => SessionStatus::Authenticated,
            SessionUpdate::Failed(kind) => SessionStatus::Failed(*kind),
            SessionUpdate::Expired => SessionStatus::Expired,
            SessionUpdate::LoggedOut => SessionStatus::Unauthenticated,
        }
    }

    pub fn artifact(&self) -> Option<&SessionArtifact> {
        match self {
            SessionUpdate::LoggedIn { artifact, .. } => Some(artifact),
            _ => None,
        }
    }

    pub fn login_at(&self) -> Option<DateTime<Utc>> {
        match self {
            SessionUpdate::LoggedIn { at, .. } => Some(*at),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccountStats {
    pub total: usize,
    pub authenticated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProxyStats {
    pub total: usize,
    pub active: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuleStats {
    pub total: usize,
    pub active: usize,
}

/// Dashboard counters across the whole fleet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FleetStats {
    pub total_accounts: usize,
    pub authenticated_accounts: usize,
    pub failed_accounts: usize,
    pub total_proxies: usize,
    pub active_proxies: usize,
    pub total_rules: usize,
    pub active_rules: usize,
}

impl FleetStats {
    pub fn collect(store: &dyn FleetStore) -> Result<Self, StoreError> {
        let accounts = store.account_stats()?;
        let proxies = store.proxy_stats()?;
        let rules = store.rule_stats()?;
        Ok(Self {
            total_accounts: accounts.total,
            authenticated_accounts: accounts.authenticated,
            failed_accounts: accounts.failed,
            total_proxies: proxies.total,
            active_proxies: proxies.active,
            total_rules: rules.total,
            active_rules: rules.active,
        })
    }
}

pub trait AccountStore {
    /// Insert new accounts, skipping usernames that already exist (in the
    /// store or earlier in `accounts`). Each account is linked to the proxy
    /// row with the same `(address, port)`, created when missing. An existing
    /// proxy row is never modified: a row naming different credentials for
    /// it is skipped as a conflict. Returns the number of accounts inserted.
    /// All-or-nothing.
    fn insert_accounts(&self, accounts: &[AccountInput]) -> Result<usize, StoreError>;

    fn get_account(&self, id: AccountId) -> Result<Option<AccountRecord>, StoreError>;

    /// All accounts, ascending id.
    fn list_accounts(&self) -> Result<Vec<AccountRecord>, StoreError>;

    /// Delete an account and its message rules. Returns false when absent.
    fn delete_account(&self, id: AccountId) -> Result<bool, StoreError>;

    /// Point the account at `proxy`, linked by key the same way as
    /// [`AccountStore::insert_accounts`]; conflicting credentials give
    /// [`StoreError::Conflict`]. When the resolved descriptor differs from
    /// the current one, the cached session is destroyed and the status reset
    /// to unauthenticated.
    fn assign_proxy(
        &self,
        id: AccountId,
        proxy: &ProxyDescriptor,
    ) -> Result<AccountRecord, StoreError>;

    fn apply_session_update(&self, id: AccountId, update: SessionUpdate)
    -> Result<(), StoreError>;

    fn account_stats(&self) -> Result<AccountStats, StoreError>;
}

pub trait ProxyStore {
    /// Upsert proxies by `(address, port)`. Existing rows take the new
    /// credentials and are re-activated; a credential change logs out every
    /// linked account. Returns the number of new rows.
    fn insert_proxies(&self, proxies: &[ProxyDescriptor]) -> Result<usize, StoreError>;

    fn get_proxy(&self, id: ProxyId) -> Result<Option<ProxyRecord>, StoreError>;

    /// All proxies, ascending id.
    fn list_proxies(&self) -> Result<Vec<ProxyRecord>, StoreError>;

    /// Apply a partial update. Changing the endpoint or credentials logs out
    /// every linked account.
    fn update_proxy(&self, id: ProxyId, update: &ProxyUpdate) -> Result<ProxyRecord, StoreError>;

    /// Refused with [`StoreError::ProxyInUse`] while any account references
    /// the proxy. Returns false when absent.
    fn delete_proxy(&self, id: ProxyId) -> Result<bool, StoreError>;

    fn proxy_stats(&self) -> Result<ProxyStats, StoreError>;
}

pub trait MessageRuleStore {
    /// Create a rule, or update template and flag of the existing rule for
    /// the same `(account_id, target_handle)`.
    fn upsert_rule(&self, rule: &NewMessageRule) -> Result<MessageRule, StoreError>;

    fn get_rule(&self, id: RuleId) -> Result<Option<MessageRule>, StoreError>;

    /// Rules ascending by id, optionally limited to one account.
    fn list_rules(&self, account_id: Option<AccountId>) -> Result<Vec<MessageRule>, StoreError>;

    /// Active rules of one account, ascending by id.
    fn list_active_rules(&self, account_id: AccountId) -> Result<Vec<MessageRule>, StoreError>;

    fn update_rule(&self, id: RuleId, update: &RuleUpdate) -> Result<MessageRule, StoreError>;

    fn delete_rule(&self, id: RuleId) -> Result<bool, StoreError>;

    fn mark_sent(&self, id: RuleId, at: DateTime<Utc>) -> Result<(), StoreError>;

    fn rule_stats(&self) -> Result<RuleStats, StoreError>;
}

/// Everything the engine needs from persistence.
pub trait FleetStore: AccountStore + ProxyStore + MessageRuleStore + Send + Sync {}

impl<T> FleetStore for T where T: AccountStore + ProxyStore + MessageRuleStore + Send + Sync {}

/// Shared store plus the timeout applied to every call made through it.
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<dyn FleetStore>,
    timeout: Duration,
}

impl StoreHandle {
    pub fn new(store: Arc<dyn FleetStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn store(&self) -> &Arc<dyn FleetStore> {
        &self.store
    }

    /// Run a synchronous store call on the blocking pool.
    ///
    /// On timeout the blocking task keeps running to completion; only the
    /// caller stops waiting for it.
    pub async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn FleetStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let task = tokio::task::spawn_blocking(move || f(store.as_ref()));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(StoreError::Task(join.to_string())),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
