//! Per-account session lifecycle.
//!
//! A session artifact is reused only while the account is authenticated and
//! the artifact's proxy fingerprint matches the account's current proxy.
//! Anything else leads to a fresh login. At most one session operation runs
//! per account at a time; a second caller gets
//! [`SessionError::LoginInProgress`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use acctfleet_core::ProxyDescriptor;
use acctfleet_core::types::{AccountId, AccountRecord, AuthErrorKind, SessionArtifact, SessionStatus};
use chrono::Utc;
use thiserror::Error;

use crate::backend::{AuthBackend, AuthFailure};
use crate::config::DispatchConfig;
use crate::store::{SessionUpdate, StoreError, StoreHandle};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("a session operation is already running for account {0}")]
    LoginInProgress(AccountId),

    #[error(transparent)]
    Store(StoreError),
}

impl SessionError {
    fn from_store(id: AccountId, err: StoreError) -> Self {
        match err {
            StoreError::NotFound {
                entity: "account", ..
            } => SessionError::AccountNotFound(id),
            other => SessionError::Store(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub login_timeout: Duration,
    pub verify_timeout: Duration,
    pub verify_cached: bool,
}

impl From<&DispatchConfig> for SessionSettings {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            login_timeout: config.login_timeout(),
            verify_timeout: config.verify_timeout(),
            verify_cached: config.verify_cached_sessions,
        }
    }
}

/// An account together with an artifact valid for its current proxy.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub account: AccountRecord,
    pub artifact: SessionArtifact,
}

#[derive(Debug, Clone)]
pub enum SessionOutcome {
    /// The cached artifact was still valid.
    Reused(ActiveSession),
    /// A login call produced a new artifact.
    LoggedIn(ActiveSession),
    /// The login call failed; the account is now `Failed(kind)`.
    Failed {
        account: AccountRecord,
        failure: AuthFailure,
    },
}

impl SessionOutcome {
    pub fn session(&self) -> Option<&ActiveSession> {
        match self {
            SessionOutcome::Reused(s) | SessionOutcome::LoggedIn(s) => Some(s),
            SessionOutcome::Failed { .. } => None,
        }
    }
}

/// Exclusive claim on one account, released on drop.
///
/// While a claim is held no other session operation or dispatch pass can
/// touch the account.
pub struct AccountClaim<'a> {
    set: &'a Mutex<HashSet<AccountId>>,
    id: AccountId,
}

impl AccountClaim<'_> {
    pub fn account_id(&self) -> AccountId {
        self.id
    }
}

impl Drop for AccountClaim<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

pub struct SessionManager {
    store: StoreHandle,
    backend: Arc<dyn AuthBackend>,
    settings: SessionSettings,
    in_flight: Mutex<HashSet<AccountId>>,
}

impl SessionManager {
    pub fn new(store: StoreHandle, backend: Arc<dyn AuthBackend>, settings: SessionSettings) -> Self {
        Self {
            store,
            backend,
            settings,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn backend(&self) -> &Arc<dyn AuthBackend> {
        &self.backend
    }

    /// Whether a session operation is currently running for `id`.
    pub fn is_authenticating(&self, id: AccountId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    /// Status as callers should see it: `Authenticating` while a login runs.
    pub fn effective_status(&self, account: &AccountRecord) -> SessionStatus {
        if self.is_authenticating(account.id) {
            SessionStatus::Authenticating
        } else {
            account.status
        }
    }

    /// Take the account for the caller until the returned guard is dropped.
    pub fn claim_account(&self, id: AccountId) -> Result<AccountClaim<'_>, SessionError> {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(id) {
            return Err(SessionError::LoginInProgress(id));
        }
        Ok(AccountClaim {
            set: &self.in_flight,
            id,
        })
    }

    async fn load(&self, id: AccountId) -> Result<AccountRecord, SessionError> {
        self.store
            .call(move |s| s.get_account(id))
            .await
            .map_err(|e| SessionError::from_store(id, e))?
            .ok_or(SessionError::AccountNotFound(id))
    }

    async fn update(&self, id: AccountId, update: SessionUpdate) -> Result<(), SessionError> {
        self.store
            .call(move |s| s.apply_session_update(id, update))
            .await
            .map_err(|e| SessionError::from_store(id, e))
    }

    /// Log in unconditionally, replacing any cached artifact.
    pub async fn login(&self, id: AccountId) -> Result<SessionOutcome, SessionError> {
        let _claim = self.claim_account(id)?;
        let account = self.load(id).await?;
        self.login_claimed(account).await
    }

    /// Return a usable session for the account, logging in when the cached
    /// artifact is missing, stale, or (with verification enabled) rejected.
    pub async fn ensure_session(&self, id: AccountId) -> Result<SessionOutcome, SessionError> {
        let claim = self.claim_account(id)?;
        self.ensure_session_claimed(&claim).await
    }

    /// [`Self::ensure_session`] for a caller that already holds the claim
    /// and keeps it for the calls that follow.
    pub async fn ensure_session_claimed(
        &self,
        claim: &AccountClaim<'_>,
    ) -> Result<SessionOutcome, SessionError> {
        let id = claim.account_id();
        let mut account = self.load(id).await?;

        if let Some(artifact) = account.live_session().cloned() {
            if !self.settings.verify_cached || self.verify(&artifact, &account.proxy).await {
                tracing::debug!(account_id = id, "reusing cached session");
                return Ok(SessionOutcome::Reused(ActiveSession { account, artifact }));
            }
            tracing::info!(account_id = id, "cached session rejected, marking expired");
            self.update(id, SessionUpdate::Expired).await?;
            account.status = SessionStatus::Expired;
            account.session = None;
        } else if account.session.is_some() {
            tracing::debug!(
                account_id = id,
                proxy = %account.proxy,
                "cached session no longer matches proxy, discarding"
            );
            self.update(id, SessionUpdate::LoggedOut).await?;
            account.status = SessionStatus::Unauthenticated;
            account.session = None;
        }

        self.login_claimed(account).await
    }

    async fn verify(&self, artifact: &SessionArtifact, proxy: &ProxyDescriptor) -> bool {
        match tokio::time::timeout(self.settings.verify_timeout, self.backend.verify(artifact, proxy))
            .await
        {
            Ok(valid) => valid,
            Err(_) => {
                tracing::warn!("session verification timed out");
                false
            }
        }
    }

    async fn login_claimed(&self, mut account: AccountRecord) -> Result<SessionOutcome, SessionError> {
        let timeout = self.settings.login_timeout;
        let call = self
            .backend
            .login(&account.username, &account.password, &account.proxy);
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AuthFailure::new(
                AuthErrorKind::Timeout,
                format!("login timed out after {}s", timeout.as_secs_f64()),
            )),
        };

        match result {
            Ok(data) => {
                let now = Utc::now();
                let artifact = SessionArtifact::new(data, &account.proxy, now);
                self.update(
                    account.id,
                    SessionUpdate::LoggedIn {
                        artifact: artifact.clone(),
                        at: now,
                    },
                )
                .await?;
                tracing::info!(
                    account_id = account.id,
                    username = %account.username,
                    proxy = %account.proxy,
                    "login succeeded"
                );
                account.status = SessionStatus::Authenticated;
                account.last_login_at = Some(now);
                account.session = Some(artifact.clone());
                Ok(SessionOutcome::LoggedIn(ActiveSession { account, artifact }))
            }
            Err(failure) => {
                self.update(account.id, SessionUpdate::Failed(failure.kind))
                    .await?;
                tracing::warn!(
                    account_id = account.id,
                    username = %account.username,
                    reason = %failure.kind.as_str(),
                    "login failed: {}",
                    failure.detail
                );
                account.status = SessionStatus::Failed(failure.kind);
                account.session = None;
                Ok(SessionOutcome::Failed { account, failure })
            }
        }
    }

    /// Destroy the cached artifact; the account becomes unauthenticated.
    pub async fn logout(&self, id: AccountId) -> Result<(), SessionError> {
        let _claim = self.claim_account(id)?;
        self.update(id, SessionUpdate::LoggedOut).await?;
        tracing::info!(account_id = id, "logged out");
        Ok(())
    }

    /// Move the account to another proxy. A changed proxy destroys the
    /// cached artifact in the same store mutation.
    pub async fn reassign_proxy(
        &self,
        id: AccountId,
        proxy: ProxyDescriptor,
    ) -> Result<AccountRecord, SessionError> {
        let _claim = self.claim_account(id)?;
        let account = self
            .store
            .call(move |s| s.assign_proxy(id, &proxy))
            .await
            .map_err(|e| SessionError::from_store(id, e))?;
        tracing::info!(account_id = id, proxy = %account.proxy, "proxy reassigned");
        Ok(account)
    }

    /// Record that the remote side rejected the account's artifact.
    ///
    /// Does not claim the account: the dispatcher calls this while it holds
    /// the account's claim.
    pub async fn mark_expired(&self, id: AccountId) -> Result<(), SessionError> {
        self.update(id, SessionUpdate::Expired).await?;
        tracing::info!(account_id = id, "session expired");
        Ok(())
    }
}
