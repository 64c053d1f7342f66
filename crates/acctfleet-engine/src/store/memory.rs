//! In-process store. Backs the test suites and short-lived CLI runs.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use acctfleet_core::ProxyDescriptor;
use acctfleet_core::types::{
    AccountId, AccountInput, AccountRecord, MessageRule, NewMessageRule, ProxyId, ProxyRecord,
    ProxyUpdate, RuleId, RuleUpdate, SessionArtifact, SessionStatus,
};
use chrono::{DateTime, Utc};

use super::{
    AccountStats, AccountStore, MessageRuleStore, ProxyStats, ProxyStore, RuleStats, SessionUpdate,
    StoreError,
};

#[derive(Debug, Clone)]
struct StoredAccount {
    username: String,
    password: String,
    proxy_id: ProxyId,
    status: SessionStatus,
    last_login_at: Option<DateTime<Utc>>,
    session: Option<SessionArtifact>,
}

impl StoredAccount {
    fn log_out(&mut self) {
        self.session = None;
        self.status = SessionStatus::Unauthenticated;
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    accounts: BTreeMap<AccountId, StoredAccount>,
    proxies: BTreeMap<ProxyId, ProxyRecord>,
    rules: BTreeMap<RuleId, MessageRule>,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn resolve(&self, id: AccountId, account: &StoredAccount) -> Result<AccountRecord, StoreError> {
        let proxy = self
            .proxies
            .get(&account.proxy_id)
            .ok_or(StoreError::not_found("proxy", account.proxy_id))?;
        Ok(AccountRecord {
            id,
            username: account.username.clone(),
            password: account.password.clone(),
            proxy_id: account.proxy_id,
            proxy: proxy.descriptor.clone(),
            status: account.status,
            last_login_at: account.last_login_at,
            session: account.session.clone(),
        })
    }

    fn find_proxy(&self, proxy: &ProxyDescriptor) -> Option<ProxyId> {
        let key = proxy.key();
        self.proxies
            .values()
            .find(|p| p.descriptor.key() == key)
            .map(|p| p.id)
    }

    /// Insert or refresh a proxy row. Returns its id and whether it is new.
    fn upsert_proxy(&mut self, proxy: &ProxyDescriptor) -> (ProxyId, bool) {
        if let Some(id) = self.find_proxy(proxy) {
            let mut credentials_changed = false;
            if let Some(row) = self.proxies.get_mut(&id) {
                credentials_changed = !row.descriptor.same_credentials(proxy);
                row.descriptor = proxy.clone();
                row.active = true;
            }
            if credentials_changed {
                self.log_out_proxy_users(id);
            }
            return (id, false);
        }
        let id = self.allocate_id();
        self.proxies.insert(
            id,
            ProxyRecord {
                id,
                descriptor: proxy.clone(),
                active: true,
            },
        );
        (id, true)
    }

    /// Resolve the row an account naming `proxy` points at. A new key gets a
    /// new row; an existing row is linked untouched. `None` when `proxy`
    /// names credentials that differ from the stored row's.
    fn link_proxy(&mut self, proxy: &ProxyDescriptor) -> Option<ProxyId> {
        match self.find_proxy(proxy) {
            Some(id) => self
                .proxies
                .get(&id)
                .filter(|row| proxy.links_to(&row.descriptor))
                .map(|row| row.id),
            None => Some(self.upsert_proxy(proxy).0),
        }
    }

    fn log_out_proxy_users(&mut self, proxy_id: ProxyId) {
        for account in self.accounts.values_mut() {
            if account.proxy_id == proxy_id && account.session.is_some() {
                account.log_out();
            }
        }
    }
}

fn credential_conflict(proxy: &ProxyDescriptor) -> StoreError {
    StoreError::Conflict(format!(
        "{}:{} is stored with different credentials; update the proxy instead",
        proxy.address, proxy.port
    ))
}

/// [`FleetStore`](super::FleetStore) kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl AccountStore for MemoryStore {
    fn insert_accounts(&self, accounts: &[AccountInput]) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        let mut known: HashSet<String> =
            state.accounts.values().map(|a| a.username.clone()).collect();
        let mut inserted = 0;
        for input in accounts {
            if known.contains(&input.username) {
                continue;
            }
            let Some(proxy_id) = state.link_proxy(&input.proxy) else {
                continue;
            };
            known.insert(input.username.clone());
            let id = state.allocate_id();
            state.accounts.insert(
                id,
                StoredAccount {
                    username: input.username.clone(),
                    password: input.password.clone(),
                    proxy_id,
                    status: SessionStatus::Unauthenticated,
                    last_login_at: None,
                    session: None,
                },
            );
            inserted += 1;
        }
        Ok(inserted)
    }

    fn get_account(&self, id: AccountId) -> Result<Option<AccountRecord>, StoreError> {
        let state = self.lock()?;
        state
            .accounts
            .get(&id)
            .map(|a| state.resolve(id, a))
            .transpose()
    }

    fn list_accounts(&self) -> Result<Vec<AccountRecord>, StoreError> {
        let state = self.lock()?;
        state
            .accounts
            .iter()
            .map(|(id, a)| state.resolve(*id, a))
            .collect()
    }

    fn delete_account(&self, id: AccountId) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        if state.accounts.remove(&id).is_none() {
            return Ok(false);
        }
        state.rules.retain(|_, r| r.account_id != id);
        Ok(true)
    }

    fn assign_proxy(
        &self,
        id: AccountId,
        proxy: &ProxyDescriptor,
    ) -> Result<AccountRecord, StoreError> {
        let mut state = self.lock()?;
        let current = state
            .accounts
            .get(&id)
            .ok_or(StoreError::not_found("account", id))?;
        let before = state
            .proxies
            .get(&current.proxy_id)
            .map(|p| p.descriptor.fingerprint());

        let proxy_id = state
            .link_proxy(proxy)
            .ok_or_else(|| credential_conflict(proxy))?;
        let after = state
            .proxies
            .get(&proxy_id)
            .map(|p| p.descriptor.fingerprint());
        let changed = before != after;
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or(StoreError::not_found("account", id))?;
        account.proxy_id = proxy_id;
        if changed {
            account.log_out();
        }
        let account = account.clone();
        state.resolve(id, &account)
    }

    fn apply_session_update(
        &self,
        id: AccountId,
        update: SessionUpdate,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or(StoreError::not_found("account", id))?;
        account.status = update.status();
        if let Some(at) = update.login_at() {
            account.last_login_at = Some(at);
        }
        account.session = match update {
            SessionUpdate::LoggedIn { artifact, .. } => Some(artifact),
            _ => None,
        };
        Ok(())
    }

    fn account_stats(&self) -> Result<AccountStats, StoreError> {
        let state = self.lock()?;
        let mut stats = AccountStats {
            total: state.accounts.len(),
            ..Default::default()
        };
        for account in state.accounts.values() {
            match account.status {
                SessionStatus::Authenticated => stats.authenticated += 1,
                SessionStatus::Failed(_) => stats.failed += 1,
                _ => {}
            }
        }
        Ok(stats)
    }
}

impl ProxyStore for MemoryStore {
    fn insert_proxies(&self, proxies: &[ProxyDescriptor]) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        let mut inserted = 0;
        for proxy in proxies {
            if state.upsert_proxy(proxy).1 {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn get_proxy(&self, id: ProxyId) -> Result<Option<ProxyRecord>, StoreError> {
        Ok(self.lock()?.proxies.get(&id).cloned())
    }

    fn list_proxies(&self) -> Result<Vec<ProxyRecord>, StoreError> {
        Ok(self.lock()?.proxies.values().cloned().collect())
    }

    fn update_proxy(&self, id: ProxyId, update: &ProxyUpdate) -> Result<ProxyRecord, StoreError> {
        let mut state = self.lock()?;
        let current = state
            .proxies
            .get(&id)
            .cloned()
            .ok_or(StoreError::not_found("proxy", id))?;
        let (next, active) = update.apply(&current);
        if let Some(other) = state.find_proxy(&next).filter(|other| *other != id) {
            return Err(StoreError::Conflict(format!(
                "{}:{} already belongs to proxy {other}",
                next.address, next.port
            )));
        }
        let relogin = current.descriptor.fingerprint() != next.fingerprint();
        let record = ProxyRecord {
            id,
            descriptor: next,
            active,
        };
        state.proxies.insert(id, record.clone());
        if relogin {
            state.log_out_proxy_users(id);
        }
        Ok(record)
    }

    fn delete_proxy(&self, id: ProxyId) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let accounts = state
            .accounts
            .values()
            .filter(|a| a.proxy_id == id)
            .count();
        if accounts > 0 {
            return Err(StoreError::ProxyInUse { id, accounts });
        }
        Ok(state.proxies.remove(&id).is_some())
    }

    fn proxy_stats(&self) -> Result<ProxyStats, StoreError> {
        let state = self.lock()?;
        Ok(ProxyStats {
            total: state.proxies.len(),
            active: state.proxies.values().filter(|p| p.active).count(),
        })
    }
}

impl MessageRuleStore for MemoryStore {
    fn upsert_rule(&self, rule: &NewMessageRule) -> Result<MessageRule, StoreError> {
        let mut state = self.lock()?;
        if !state.accounts.contains_key(&rule.account_id) {
            return Err(StoreError::not_found("account", rule.account_id));
        }
        if let Some(existing) = state
            .rules
            .values_mut()
            .find(|r| r.account_id == rule.account_id && r.target_handle == rule.target_handle)
        {
            existing.template = rule.template.clone();
            existing.active = rule.active;
            return Ok(existing.clone());
        }
        let id = state.allocate_id();
        let created = MessageRule {
            id,
            account_id: rule.account_id,
            target_handle: rule.target_handle.clone(),
            template: rule.template.clone(),
            active: rule.active,
            last_sent_at: None,
        };
        state.rules.insert(id, created.clone());
        Ok(created)
    }

    fn get_rule(&self, id: RuleId) -> Result<Option<MessageRule>, StoreError> {
        Ok(self.lock()?.rules.get(&id).cloned())
    }

    fn list_rules(&self, account_id: Option<AccountId>) -> Result<Vec<MessageRule>, StoreError> {
        Ok(self
            .lock()?
            .rules
            .values()
            .filter(|r| account_id.is_none_or(|a| r.account_id == a))
            .cloned()
            .collect())
    }

    fn list_active_rules(&self, account_id: AccountId) -> Result<Vec<MessageRule>, StoreError> {
        Ok(self
            .lock()?
            .rules
            .values()
            .filter(|r| r.account_id == account_id && r.active)
            .cloned()
            .collect())
    }

    fn update_rule(&self, id: RuleId, update: &RuleUpdate) -> Result<MessageRule, StoreError> {
        let mut state = self.lock()?;
        let mut next = state
            .rules
            .get(&id)
            .cloned()
            .ok_or(StoreError::not_found("rule", id))?;
        update.apply(&mut next);
        let clash = state.rules.values().any(|r| {
            r.id != id && r.account_id == next.account_id && r.target_handle == next.target_handle
        });
        if clash {
            return Err(StoreError::Conflict(format!(
                "account {} already has a rule for {}",
                next.account_id, next.target_handle
            )));
        }
        state.rules.insert(id, next.clone());
        Ok(next)
    }

    fn delete_rule(&self, id: RuleId) -> Result<bool, StoreError> {
        Ok(self.lock()?.rules.remove(&id).is_some())
    }

    fn mark_sent(&self, id: RuleId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let rule = state
            .rules
            .get_mut(&id)
            .ok_or(StoreError::not_found("rule", id))?;
        rule.last_sent_at = Some(at);
        Ok(())
    }

    fn rule_stats(&self) -> Result<RuleStats, StoreError> {
        let state = self.lock()?;
        Ok(RuleStats {
            total: state.rules.len(),
            active: state.rules.values().filter(|r| r.active).count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FleetStats;

    fn input(username: &str, proxy: ProxyDescriptor) -> AccountInput {
        AccountInput {
            username: username.into(),
            password: "pw".into(),
            proxy,
        }
    }

    fn logged_in(store: &MemoryStore, id: AccountId) {
        let account = store.get_account(id).unwrap().unwrap();
        let now = Utc::now();
        store
            .apply_session_update(
                id,
                SessionUpdate::LoggedIn {
                    artifact: SessionArtifact::new("tok", &account.proxy, now),
                    at: now,
                },
            )
            .unwrap();
    }

    #[test]
    fn reingest_does_not_duplicate_usernames() {
        let store = MemoryStore::new();
        let p = ProxyDescriptor::new("h", 80);
        let batch = vec![input("a", p.clone()), input("b", p.clone()), input("a", p.clone())];
        assert_eq!(store.insert_accounts(&batch).unwrap(), 2);
        assert_eq!(store.insert_accounts(&batch).unwrap(), 0);
        assert_eq!(
            store.insert_accounts(&[input("c", p)]).unwrap(),
            1
        );
        assert_eq!(store.list_accounts().unwrap().len(), 3);
        assert_eq!(store.list_proxies().unwrap().len(), 1);
    }

    #[test]
    fn proxy_credential_change_logs_out_linked_accounts() {
        let store = MemoryStore::new();
        store
            .insert_accounts(&[input("a", ProxyDescriptor::new("h", 80))])
            .unwrap();
        let id = store.list_accounts().unwrap()[0].id;
        logged_in(&store, id);

        // Same credentials: session survives.
        assert_eq!(store.insert_proxies(&[ProxyDescriptor::new("h", 80)]).unwrap(), 0);
        assert!(store.get_account(id).unwrap().unwrap().live_session().is_some());

        store
            .insert_proxies(&[ProxyDescriptor::new("h", 80).with_credentials("u", "p")])
            .unwrap();
        let account = store.get_account(id).unwrap().unwrap();
        assert_eq!(account.status, SessionStatus::Unauthenticated);
        assert!(account.session.is_none());
        assert_eq!(account.proxy.username.as_deref(), Some("u"));
    }

    #[test]
    fn account_import_links_existing_proxy_without_changing_it() {
        let store = MemoryStore::new();
        let secured = ProxyDescriptor::new("h", 80).with_credentials("u", "secret");
        store.insert_accounts(&[input("alice", secured.clone())]).unwrap();
        let alice = store.list_accounts().unwrap()[0].id;
        logged_in(&store, alice);

        let batch = [
            input("bob", ProxyDescriptor::new("h", 80)),
            input("mallory", ProxyDescriptor::new("h", 80).with_credentials("u", "other")),
        ];
        assert_eq!(store.insert_accounts(&batch).unwrap(), 1);

        let accounts = store.list_accounts().unwrap();
        let names: Vec<&str> = accounts.iter().map(|a| a.username.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
        assert_eq!(accounts[1].proxy_id, accounts[0].proxy_id);
        assert_eq!(accounts[1].proxy, secured);

        let alice = store.get_account(alice).unwrap().unwrap();
        assert_eq!(alice.proxy, secured);
        assert_eq!(alice.status, SessionStatus::Authenticated);
        assert!(alice.live_session().is_some());
        assert_eq!(store.list_proxies().unwrap().len(), 1);
    }

    #[test]
    fn assign_proxy_refuses_conflicting_credentials() {
        let store = MemoryStore::new();
        let secured = ProxyDescriptor::new("h", 80).with_credentials("u", "secret");
        store
            .insert_accounts(&[
                input("alice", secured.clone()),
                input("bob", ProxyDescriptor::new("other", 1)),
            ])
            .unwrap();
        let ids: Vec<AccountId> = store.list_accounts().unwrap().iter().map(|a| a.id).collect();
        logged_in(&store, ids[0]);

        let err = store
            .assign_proxy(ids[1], &ProxyDescriptor::new("h", 80).with_credentials("x", "y"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let alice = store.get_account(ids[0]).unwrap().unwrap();
        assert_eq!(alice.proxy, secured);
        assert_eq!(alice.status, SessionStatus::Authenticated);

        let bob = store.assign_proxy(ids[1], &ProxyDescriptor::new("h", 80)).unwrap();
        assert_eq!(bob.proxy, secured);
    }

    #[test]
    fn assign_proxy_resets_session_only_on_change() {
        let store = MemoryStore::new();
        let p1 = ProxyDescriptor::new("h1", 80);
        store.insert_accounts(&[input("a", p1.clone())]).unwrap();
        let id = store.list_accounts().unwrap()[0].id;
        logged_in(&store, id);

        let same = store.assign_proxy(id, &p1).unwrap();
        assert_eq!(same.status, SessionStatus::Authenticated);

        let moved = store.assign_proxy(id, &ProxyDescriptor::new("h2", 81)).unwrap();
        assert_eq!(moved.status, SessionStatus::Unauthenticated);
        assert!(moved.session.is_none());
        assert_eq!(moved.proxy.address, "h2");
        assert_eq!(store.list_proxies().unwrap().len(), 2);
    }

    #[test]
    fn proxy_delete_refused_while_referenced() {
        let store = MemoryStore::new();
        store
            .insert_accounts(&[input("a", ProxyDescriptor::new("h", 80))])
            .unwrap();
        let account = store.list_accounts().unwrap().remove(0);
        assert!(matches!(
            store.delete_proxy(account.proxy_id),
            Err(StoreError::ProxyInUse { accounts: 1, .. })
        ));
        assert!(store.delete_account(account.id).unwrap());
        assert!(store.delete_proxy(account.proxy_id).unwrap());
        assert!(!store.delete_proxy(account.proxy_id).unwrap());
    }

    #[test]
    fn rules_upsert_by_target_and_cascade() {
        let store = MemoryStore::new();
        store
            .insert_accounts(&[input("a", ProxyDescriptor::new("h", 80))])
            .unwrap();
        let id = store.list_accounts().unwrap()[0].id;
        let first = store
            .upsert_rule(&NewMessageRule {
                account_id: id,
                target_handle: "bob".into(),
                template: "hi".into(),
                active: true,
            })
            .unwrap();
        let second = store
            .upsert_rule(&NewMessageRule {
                account_id: id,
                target_handle: "bob".into(),
                template: "hello".into(),
                active: false,
            })
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.template, "hello");
        assert!(store.list_active_rules(id).unwrap().is_empty());

        assert!(matches!(
            store.upsert_rule(&NewMessageRule {
                account_id: 999,
                target_handle: "x".into(),
                template: "y".into(),
                active: true,
            }),
            Err(StoreError::NotFound { entity: "account", .. })
        ));

        store.delete_account(id).unwrap();
        assert!(store.list_rules(None).unwrap().is_empty());
    }

    #[test]
    fn update_proxy_rejects_key_collision() {
        let store = MemoryStore::new();
        store
            .insert_proxies(&[ProxyDescriptor::new("a", 1), ProxyDescriptor::new("b", 2)])
            .unwrap();
        let ids: Vec<ProxyId> = store.list_proxies().unwrap().iter().map(|p| p.id).collect();
        let err = store
            .update_proxy(
                ids[1],
                &ProxyUpdate {
                    address: Some("a".into()),
                    port: Some(1),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn stats_count_by_status() {
        let store = MemoryStore::new();
        let p = ProxyDescriptor::new("h", 80);
        store
            .insert_accounts(&[input("a", p.clone()), input("b", p.clone()), input("c", p)])
            .unwrap();
        let ids: Vec<AccountId> = store.list_accounts().unwrap().iter().map(|a| a.id).collect();
        logged_in(&store, ids[0]);
        store
            .apply_session_update(
                ids[1],
                SessionUpdate::Failed(acctfleet_core::types::AuthErrorKind::InvalidCredentials),
            )
            .unwrap();
        let stats = FleetStats::collect(&store).unwrap();
        assert_eq!(stats.total_accounts, 3);
        assert_eq!(stats.authenticated_accounts, 1);
        assert_eq!(stats.failed_accounts, 1);
        assert_eq!(stats.total_proxies, 1);
        assert_eq!(stats.active_proxies, 1);
    }
}
