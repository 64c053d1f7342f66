//! Bounded-pool message dispatch.
//!
//! Accounts are spread over N workers pulling from a shared queue. Each
//! worker handles one account at a time: ensure a session, then send the
//! account's active rules one after another. Failures stay with the account
//! or rule they belong to. Nothing is retried within a run.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use acctfleet_core::summary::{Summary, SummaryBuilder};
use acctfleet_core::types::{AccountId, AccountRecord, AuthErrorKind, RuleId};
use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::backend::{SendErrorKind, SendFailure};
use crate::config::clamp_concurrency;
use crate::session::{ActiveSession, SessionManager, SessionOutcome};
use crate::store::StoreError;

/// How the account's session was obtained, or why it could not be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LoginOutcome {
    Reused,
    LoggedIn,
    Failed { kind: AuthErrorKind, detail: String },
    /// The session layer itself failed (store error, account busy or gone).
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RuleResult {
    Sent,
    Failed { kind: SendErrorKind, message: String },
    /// Not attempted because the run was cancelled.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleOutcome {
    pub rule_id: RuleId,
    pub target_handle: String,
    #[serde(flatten)]
    pub result: RuleResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountOutcome {
    pub account_id: AccountId,
    pub username: String,
    pub login: LoginOutcome,
    pub rules: Vec<RuleOutcome>,
    /// Set when the account's rules could not be loaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AccountOutcome {
    pub fn sent(&self) -> usize {
        self.rules
            .iter()
            .filter(|r| r.result == RuleResult::Sent)
            .count()
    }
}

/// Result of one [`DispatchEngine::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// One entry per started account, in input order. An account taken by a
    /// worker that panicked gets a session error entry.
    pub outcomes: Vec<AccountOutcome>,
    /// Accounts never started because the run was cancelled.
    pub skipped: Vec<AccountId>,
    pub cancelled: bool,
}

impl DispatchReport {
    pub fn outcome(&self, account_id: AccountId) -> Option<&AccountOutcome> {
        self.outcomes.iter().find(|o| o.account_id == account_id)
    }

    pub fn messages_sent(&self) -> usize {
        self.outcomes.iter().map(AccountOutcome::sent).sum()
    }

    /// Sent messages count as accepted; login and send failures as failed;
    /// cancelled rules and unstarted accounts as skipped.
    pub fn summary(&self) -> Summary {
        let mut builder = SummaryBuilder::new();
        for outcome in &self.outcomes {
            let who = &outcome.username;
            match &outcome.login {
                LoginOutcome::Failed { kind, detail } => {
                    builder.fail(&format!("login_{}", kind.as_str()), format!("{who}: {detail}"));
                }
                LoginOutcome::Error { message } => {
                    builder.fail("session_error", format!("{who}: {message}"));
                }
                LoginOutcome::Reused | LoginOutcome::LoggedIn => {}
            }
            if let Some(error) = &outcome.error {
                builder.fail("rules_unavailable", format!("{who}: {error}"));
            }
            for rule in &outcome.rules {
                match &rule.result {
                    RuleResult::Sent => {
                        builder.accept(1);
                    }
                    RuleResult::Failed { kind, message } => {
                        builder.fail(
                            &format!("send_{kind}"),
                            format!("{who} -> {}: {message}", rule.target_handle),
                        );
                    }
                    RuleResult::Cancelled => {
                        builder.skip("cancelled", format!("{who} -> {}", rule.target_handle));
                    }
                }
            }
        }
        for id in &self.skipped {
            builder.skip("not_started", format!("account {id}"));
        }
        builder.build()
    }
}

/// Runs dispatch passes over a set of accounts.
#[derive(Clone)]
pub struct DispatchEngine {
    sessions: Arc<SessionManager>,
    send_timeout: Duration,
}

impl DispatchEngine {
    pub fn new(sessions: Arc<SessionManager>, send_timeout: Duration) -> Self {
        Self {
            sessions,
            send_timeout,
        }
    }

    /// Dispatch for every stored account.
    pub async fn run_all(
        &self,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Result<DispatchReport, StoreError> {
        let accounts = self.sessions.store().call(|s| s.list_accounts()).await?;
        Ok(self.run(accounts, concurrency, cancel).await)
    }

    /// Process `accounts` with at most `concurrency` workers (clamped to
    /// `1..=64`).
    ///
    /// Each account is claimed on the session manager for its whole login
    /// and send sequence, so concurrent runs never interleave calls for one
    /// account. An account another run currently holds is reported with a
    /// session error.
    ///
    /// Cancellation stops workers from taking new accounts and from starting
    /// further sends; a backend call already running is allowed to finish.
    pub async fn run(
        &self,
        accounts: Vec<AccountRecord>,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> DispatchReport {
        let total = accounts.len();
        let workers = clamp_concurrency(concurrency).min(total.max(1));
        tracing::info!(accounts = total, workers, "dispatch run starting");

        let roster: Vec<(AccountId, String)> = accounts
            .iter()
            .map(|a| (a.id, a.username.clone()))
            .collect();
        let queue: Arc<Mutex<VecDeque<(usize, AccountRecord)>>> =
            Arc::new(Mutex::new(accounts.into_iter().enumerate().collect()));

        let mut set = JoinSet::new();
        for _ in 0..workers {
            let engine = self.clone();
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            set.spawn(async move { engine.worker(queue, cancel).await });
        }

        let mut finished: Vec<Option<AccountOutcome>> = vec![None; total];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcomes) => {
                    for (idx, outcome) in outcomes {
                        finished[idx] = Some(outcome);
                    }
                }
                Err(e) => tracing::error!("dispatch worker failed: {e}"),
            }
        }

        let mut unstarted = vec![false; total];
        for (idx, _) in queue.lock().unwrap_or_else(PoisonError::into_inner).drain(..) {
            unstarted[idx] = true;
        }

        let mut outcomes = Vec::with_capacity(total);
        let mut skipped = Vec::new();
        for (idx, ((account_id, username), outcome)) in roster.into_iter().zip(finished).enumerate()
        {
            match outcome {
                Some(outcome) => outcomes.push(outcome),
                None if unstarted[idx] => skipped.push(account_id),
                // Taken by a worker that panicked before returning its results.
                None => outcomes.push(AccountOutcome {
                    account_id,
                    username,
                    login: LoginOutcome::Error {
                        message: "dispatch worker failed".to_string(),
                    },
                    rules: Vec::new(),
                    error: None,
                }),
            }
        }

        let report = DispatchReport {
            outcomes,
            skipped,
            cancelled: cancel.is_cancelled(),
        };
        tracing::info!(
            accounts = report.outcomes.len(),
            skipped = report.skipped.len(),
            sent = report.messages_sent(),
            cancelled = report.cancelled,
            "dispatch run finished"
        );
        report
    }

    async fn worker(
        &self,
        queue: Arc<Mutex<VecDeque<(usize, AccountRecord)>>>,
        cancel: CancellationToken,
    ) -> Vec<(usize, AccountOutcome)> {
        let mut done = Vec::new();
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
            let Some((idx, account)) = next else {
                break;
            };
            done.push((idx, self.process_account(account, &cancel).await));
        }
        done
    }

    async fn process_account(
        &self,
        account: AccountRecord,
        cancel: &CancellationToken,
    ) -> AccountOutcome {
        let mut outcome = AccountOutcome {
            account_id: account.id,
            username: account.username.clone(),
            login: LoginOutcome::Error {
                message: String::new(),
            },
            rules: Vec::new(),
            error: None,
        };

        let claim = match self.sessions.claim_account(account.id) {
            Ok(claim) => claim,
            Err(e) => {
                tracing::warn!(account_id = account.id, "account busy, not dispatching: {e}");
                outcome.login = LoginOutcome::Error {
                    message: e.to_string(),
                };
                return outcome;
            }
        };

        let session = match self.sessions.ensure_session_claimed(&claim).await {
            Ok(SessionOutcome::Reused(session)) => {
                outcome.login = LoginOutcome::Reused;
                session
            }
            Ok(SessionOutcome::LoggedIn(session)) => {
                outcome.login = LoginOutcome::LoggedIn;
                session
            }
            Ok(SessionOutcome::Failed { failure, .. }) => {
                outcome.login = LoginOutcome::Failed {
                    kind: failure.kind,
                    detail: failure.detail,
                };
                return outcome;
            }
            Err(e) => {
                tracing::warn!(account_id = account.id, "session unavailable: {e}");
                outcome.login = LoginOutcome::Error {
                    message: e.to_string(),
                };
                return outcome;
            }
        };

        let id = account.id;
        let rules = match self
            .sessions
            .store()
            .call(move |s| s.list_active_rules(id))
            .await
        {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!(account_id = id, "failed to load message rules: {e}");
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };

        let mut expired = false;
        for rule in rules {
            if cancel.is_cancelled() {
                outcome.rules.push(RuleOutcome {
                    rule_id: rule.id,
                    target_handle: rule.target_handle,
                    result: RuleResult::Cancelled,
                });
                continue;
            }

            let result = self.send(&session, &rule.target_handle, &rule.template).await;
            let result = match result {
                Ok(()) => {
                    let rule_id = rule.id;
                    let now = Utc::now();
                    if let Err(e) = self
                        .sessions
                        .store()
                        .call(move |s| s.mark_sent(rule_id, now))
                        .await
                    {
                        tracing::warn!(rule_id, "message sent but last_sent_at not recorded: {e}");
                    }
                    tracing::debug!(account_id = id, rule_id, target = %rule.target_handle, "message sent");
                    RuleResult::Sent
                }
                Err(failure) => {
                    tracing::warn!(
                        account_id = id,
                        rule_id = rule.id,
                        target = %rule.target_handle,
                        kind = %failure.kind,
                        "send failed: {}",
                        failure.message
                    );
                    if failure.kind == SendErrorKind::SessionRejected && !expired {
                        expired = true;
                        if let Err(e) = self.sessions.mark_expired(id).await {
                            tracing::warn!(account_id = id, "failed to mark session expired: {e}");
                        }
                    }
                    RuleResult::Failed {
                        kind: failure.kind,
                        message: failure.message,
                    }
                }
            };
            outcome.rules.push(RuleOutcome {
                rule_id: rule.id,
                target_handle: rule.target_handle,
                result,
            });
        }
        outcome
    }

    async fn send(
        &self,
        session: &ActiveSession,
        target: &str,
        text: &str,
    ) -> Result<(), SendFailure> {
        let call = self.sessions.backend().send_message(
            &session.artifact,
            &session.account.proxy,
            target,
            text,
        );
        match tokio::time::timeout(self.send_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SendFailure::new(
                SendErrorKind::Timeout,
                format!("send timed out after {}s", self.send_timeout.as_secs_f64()),
            )),
        }
    }
}
