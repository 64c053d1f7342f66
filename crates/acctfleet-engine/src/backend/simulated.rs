//! Deterministic in-process backend.
//!
//! Every login succeeds unless scripted otherwise. Sessions are plain
//! strings of the form `sim:<username>:<seq>`, so the backend can tell which
//! account a send belongs to and flag overlapping calls for one account.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use acctfleet_core::ProxyDescriptor;
use acctfleet_core::types::{AuthErrorKind, SessionArtifact};
use async_trait::async_trait;

use super::{AuthBackend, AuthFailure, SendErrorKind, SendFailure};

const SESSION_PREFIX: &str = "sim:";

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Login { username: String, proxy: String },
    Verify { username: String },
    Send { username: String, target: String, text: String },
}

#[derive(Debug, Default)]
struct SimState {
    login_failures: HashMap<String, AuthErrorKind>,
    stalled_logins: HashSet<String>,
    send_failures: HashMap<String, SendErrorKind>,
    rejected_sessions: HashSet<String>,
    issued: u64,
    in_flight: HashSet<String>,
    overlaps: usize,
    calls: Vec<BackendCall>,
}

/// Scriptable [`AuthBackend`] used by the CLI's `simulated` mode and by tests.
#[derive(Debug, Default)]
pub struct SimulatedBackend {
    latency: Duration,
    state: Mutex<SimState>,
}

/// Marks an account busy for the duration of one call.
struct CallGuard<'a> {
    state: &'a Mutex<SimState>,
    username: String,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_flight.remove(&self.username);
    }
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay applied to every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn fail_login(self, username: &str, kind: AuthErrorKind) -> Self {
        self.lock().login_failures.insert(username.to_string(), kind);
        self
    }

    /// Login for `username` never returns.
    pub fn stall_login(self, username: &str) -> Self {
        self.lock().stalled_logins.insert(username.to_string());
        self
    }

    pub fn fail_send(self, target: &str, kind: SendErrorKind) -> Self {
        self.lock().send_failures.insert(target.to_string(), kind);
        self
    }

    /// `verify` returns false for every session issued to `username`.
    pub fn reject_sessions_of(&self, username: &str) {
        self.lock().rejected_sessions.insert(username.to_string());
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    pub fn login_count(&self, username: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, BackendCall::Login { username: u, .. } if u == username))
            .count()
    }

    /// Targets messaged on behalf of `username`, in call order.
    pub fn sends_for(&self, username: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                BackendCall::Send { username: u, target, .. } if u == username => {
                    Some(target.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Number of calls that started while another call for the same account
    /// was still running.
    pub fn overlaps(&self) -> usize {
        self.lock().overlaps
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, username: &str, call: BackendCall) -> CallGuard<'_> {
        let mut state = self.lock();
        if !state.in_flight.insert(username.to_string()) {
            state.overlaps += 1;
        }
        state.calls.push(call);
        CallGuard {
            state: &self.state,
            username: username.to_string(),
        }
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

fn session_owner(artifact: &SessionArtifact) -> &str {
    artifact
        .data
        .strip_prefix(SESSION_PREFIX)
        .and_then(|rest| rest.rsplit_once(':'))
        .map(|(username, _)| username)
        .unwrap_or("")
}

#[async_trait]
impl AuthBackend for SimulatedBackend {
    async fn login(
        &self,
        username: &str,
        _password: &str,
        proxy: &ProxyDescriptor,
    ) -> Result<String, AuthFailure> {
        let _guard = self.enter(
            username,
            BackendCall::Login {
                username: username.to_string(),
                proxy: proxy.to_string(),
            },
        );
        let (stalled, failure) = {
            let state = self.lock();
            (
                state.stalled_logins.contains(username),
                state.login_failures.get(username).copied(),
            )
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        self.pause().await;

        if let Some(kind) = failure {
            return Err(AuthFailure::new(kind, format!("simulated failure for {username}")));
        }
        let mut state = self.lock();
        state.issued += 1;
        Ok(format!("{SESSION_PREFIX}{username}:{}", state.issued))
    }

    async fn verify(&self, artifact: &SessionArtifact, _proxy: &ProxyDescriptor) -> bool {
        let username = session_owner(artifact).to_string();
        let _guard = self.enter(
            &username,
            BackendCall::Verify {
                username: username.clone(),
            },
        );
        self.pause().await;
        !self.lock().rejected_sessions.contains(&username)
    }

    async fn send_message(
        &self,
        artifact: &SessionArtifact,
        _proxy: &ProxyDescriptor,
        target_handle: &str,
        text: &str,
    ) -> Result<(), SendFailure> {
        let username = session_owner(artifact).to_string();
        let _guard = self.enter(
            &username,
            BackendCall::Send {
                username: username.clone(),
                target: target_handle.to_string(),
                text: text.to_string(),
            },
        );
        self.pause().await;

        let failure = self.lock().send_failures.get(target_handle).copied();
        match failure {
            Some(kind) => Err(SendFailure::new(
                kind,
                format!("simulated failure sending to {target_handle}"),
            )),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn scripted_login_failure() {
        let backend = SimulatedBackend::new().fail_login("bad", AuthErrorKind::TwoFactorRequired);
        let proxy = ProxyDescriptor::new("h", 80);
        let err = backend.login("bad", "pw", &proxy).await.unwrap_err();
        assert_eq!(err.kind, AuthErrorKind::TwoFactorRequired);
        assert!(backend.login("good", "pw", &proxy).await.is_ok());
        assert_eq!(backend.login_count("bad"), 1);
    }

    #[tokio::test]
    async fn sessions_identify_their_account() {
        let backend = SimulatedBackend::new().fail_send("blocked", SendErrorKind::TargetNotFound);
        let proxy = ProxyDescriptor::new("h", 80);
        let data = backend.login("al:ice", "pw", &proxy).await.unwrap();
        let artifact = SessionArtifact::new(data, &proxy, Utc::now());
        assert_eq!(session_owner(&artifact), "al:ice");

        backend.send_message(&artifact, &proxy, "bob", "hi").await.unwrap();
        let err = backend
            .send_message(&artifact, &proxy, "blocked", "hi")
            .await
            .unwrap_err();
        assert_eq!(err.kind, SendErrorKind::TargetNotFound);
        assert_eq!(backend.sends_for("al:ice"), vec!["bob", "blocked"]);

        assert!(backend.verify(&artifact, &proxy).await);
        backend.reject_sessions_of("al:ice");
        assert!(!backend.verify(&artifact, &proxy).await);
    }

    #[tokio::test]
    async fn overlapping_calls_are_counted() {
        let backend = std::sync::Arc::new(
            SimulatedBackend::new().with_latency(Duration::from_millis(50)),
        );
        let proxy = ProxyDescriptor::new("h", 80);
        let (a, b) = tokio::join!(
            backend.login("same", "pw", &proxy),
            backend.login("same", "pw", &proxy)
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(backend.overlaps(), 1);

        let (a, b) = tokio::join!(
            backend.login("one", "pw", &proxy),
            backend.login("two", "pw", &proxy)
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(backend.overlaps(), 1);
    }
}
