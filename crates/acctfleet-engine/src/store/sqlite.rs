//! SQLite persistence for accounts, proxies and message rules.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use acctfleet_core::ProxyDescriptor;
use acctfleet_core::types::{
    AccountId, AccountInput, AccountRecord, MessageRule, NewMessageRule, ProxyId, ProxyRecord,
    ProxyUpdate, RuleId, RuleUpdate, SessionArtifact, SessionStatus,
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{
    AccountStats, AccountStore, MessageRuleStore, ProxyStats, ProxyStore, RuleStats, SessionUpdate,
    StoreError,
};

const ACCOUNT_COLUMNS: &str = "a.id, a.username, a.password, a.proxy_id,
    p.address, p.port, p.username, p.password,
    a.status, a.failure_reason, a.last_login_at,
    a.session_data, a.session_fingerprint, a.session_created_at";

const RULE_COLUMNS: &str = "id, account_id, target_handle, template, active, last_sent_at";

/// SQLite-backed [`FleetStore`](super::FleetStore).
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database at the given filesystem path and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Create the schema if it does not already exist.
    fn migrate(&self) -> Result<(), StoreError> {
        self.lock()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS proxies (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                address   TEXT NOT NULL,
                port      INTEGER NOT NULL,
                username  TEXT,
                password  TEXT,
                active    INTEGER NOT NULL DEFAULT 1,
                UNIQUE (address, port)
            );
            CREATE TABLE IF NOT EXISTS accounts (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                username            TEXT NOT NULL UNIQUE,
                password            TEXT NOT NULL,
                proxy_id            INTEGER NOT NULL REFERENCES proxies(id),
                status              TEXT NOT NULL DEFAULT 'unauthenticated',
                failure_reason      TEXT,
                last_login_at       TEXT,
                session_data        TEXT,
                session_fingerprint TEXT,
                session_created_at  TEXT
            );
            CREATE TABLE IF NOT EXISTS message_rules (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id    INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                target_handle TEXT NOT NULL,
                template      TEXT NOT NULL,
                active        INTEGER NOT NULL DEFAULT 1,
                last_sent_at  TEXT,
                UNIQUE (account_id, target_handle)
            );
            CREATE INDEX IF NOT EXISTS idx_accounts_proxy ON accounts(proxy_id);",
        )?;
        Ok(())
    }
}

fn parse_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn row_to_account(row: &Row<'_>) -> rusqlite::Result<AccountRecord> {
    let proxy = ProxyDescriptor {
        address: row.get(4)?,
        port: row.get(5)?,
        username: row.get(6)?,
        password: row.get(7)?,
    };
    let status_str: String = row.get(8)?;
    let reason: Option<String> = row.get(9)?;
    let session_data: Option<String> = row.get(11)?;
    let fingerprint: Option<String> = row.get(12)?;
    let created_at = parse_ts(row.get(13)?).unwrap_or_else(Utc::now);

    let session = match (session_data, fingerprint) {
        (Some(data), Some(proxy_fingerprint)) => Some(SessionArtifact {
            data,
            proxy_fingerprint,
            created_at,
        }),
        _ => None,
    };

    Ok(AccountRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        proxy_id: row.get(3)?,
        proxy,
        status: SessionStatus::from_parts(&status_str, reason.as_deref()),
        last_login_at: parse_ts(row.get(10)?),
        session,
    })
}

fn row_to_proxy(row: &Row<'_>) -> rusqlite::Result<ProxyRecord> {
    Ok(ProxyRecord {
        id: row.get(0)?,
        descriptor: ProxyDescriptor {
            address: row.get(1)?,
            port: row.get(2)?,
            username: row.get(3)?,
            password: row.get(4)?,
        },
        active: row.get(5)?,
    })
}

fn row_to_rule(row: &Row<'_>) -> rusqlite::Result<MessageRule> {
    Ok(MessageRule {
        id: row.get(0)?,
        account_id: row.get(1)?,
        target_handle: row.get(2)?,
        template: row.get(3)?,
        active: row.get(4)?,
        last_sent_at: parse_ts(row.get(5)?),
    })
}

fn load_account(conn: &Connection, id: AccountId) -> Result<Option<AccountRecord>, StoreError> {
    let sql = format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts a JOIN proxies p ON p.id = a.proxy_id
         WHERE a.id = ?1"
    );
    Ok(conn.query_row(&sql, params![id], row_to_account).optional()?)
}

fn load_proxy(conn: &Connection, id: ProxyId) -> Result<Option<ProxyRecord>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, address, port, username, password, active FROM proxies WHERE id = ?1",
            params![id],
            row_to_proxy,
        )
        .optional()?)
}

fn load_rule(conn: &Connection, id: RuleId) -> Result<Option<MessageRule>, StoreError> {
    let sql = format!("SELECT {RULE_COLUMNS} FROM message_rules WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], row_to_rule).optional()?)
}

fn find_proxy_id(conn: &Connection, proxy: &ProxyDescriptor) -> Result<Option<ProxyId>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id FROM proxies WHERE address = ?1 AND port = ?2",
            params![proxy.address, proxy.port],
            |row| row.get(0),
        )
        .optional()?)
}

/// Insert or refresh a proxy row. Returns its id and whether it is new.
fn upsert_proxy(conn: &Connection, proxy: &ProxyDescriptor) -> Result<(ProxyId, bool), StoreError> {
    let Some(id) = find_proxy_id(conn, proxy)? else {
        conn.execute(
            "INSERT INTO proxies (address, port, username, password, active)
             VALUES (?1, ?2, ?3, ?4, 1)",
            params![proxy.address, proxy.port, proxy.username, proxy.password],
        )?;
        return Ok((conn.last_insert_rowid(), true));
    };

    let changed = conn.execute(
        "UPDATE proxies SET username = ?2, password = ?3
         WHERE id = ?1 AND (username IS NOT ?2 OR password IS NOT ?3)",
        params![id, proxy.username, proxy.password],
    )?;
    conn.execute("UPDATE proxies SET active = 1 WHERE id = ?1", params![id])?;
    if changed > 0 {
        log_out_proxy_users(conn, id)?;
    }
    Ok((id, false))
}

/// Resolve the row an account naming `proxy` points at. A new key gets a new
/// row; an existing row is linked untouched. `None` when `proxy` names
/// credentials that differ from the stored row's.
fn link_proxy(conn: &Connection, proxy: &ProxyDescriptor) -> Result<Option<ProxyId>, StoreError> {
    let Some(id) = find_proxy_id(conn, proxy)? else {
        return Ok(Some(upsert_proxy(conn, proxy)?.0));
    };
    let stored = load_proxy(conn, id)?.ok_or(StoreError::not_found("proxy", id))?;
    Ok(proxy.links_to(&stored.descriptor).then_some(id))
}

fn credential_conflict(proxy: &ProxyDescriptor) -> StoreError {
    StoreError::Conflict(format!(
        "{}:{} is stored with different credentials; update the proxy instead",
        proxy.address, proxy.port
    ))
}

fn log_out_proxy_users(conn: &Connection, proxy_id: ProxyId) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "UPDATE accounts SET status = 'unauthenticated', failure_reason = NULL,
                session_data = NULL, session_fingerprint = NULL, session_created_at = NULL
         WHERE proxy_id = ?1 AND session_data IS NOT NULL",
        params![proxy_id],
    )?)
}

fn write_session(conn: &Connection, id: AccountId, update: &SessionUpdate) -> Result<usize, StoreError> {
    let status = update.status();
    let reason = status.failure().map(|k| k.as_str());
    let artifact = update.artifact();
    Ok(conn.execute(
        "UPDATE accounts SET status = ?2, failure_reason = ?3,
                last_login_at = COALESCE(?4, last_login_at),
                session_data = ?5, session_fingerprint = ?6, session_created_at = ?7
         WHERE id = ?1",
        params![
            id,
            status.label(),
            reason,
            update.login_at().map(|at| at.to_rfc3339()),
            artifact.map(|a| a.data.as_str()),
            artifact.map(|a| a.proxy_fingerprint.as_str()),
            artifact.map(|a| a.created_at.to_rfc3339()),
        ],
    )?)
}

fn count(conn: &Connection, sql: &str) -> Result<(usize, usize), StoreError> {
    let (total, active): (i64, i64) = conn.query_row(sql, [], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok((total as usize, active as usize))
}

impl AccountStore for SqliteStore {
    fn insert_accounts(&self, accounts: &[AccountInput]) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        for input in accounts {
            let exists: bool = tx.query_row(
                "SELECT EXISTS (SELECT 1 FROM accounts WHERE username = ?1)",
                params![input.username],
                |row| row.get(0),
            )?;
            if exists {
                continue;
            }
            let Some(proxy_id) = link_proxy(&tx, &input.proxy)? else {
                continue;
            };
            inserted += tx.execute(
                "INSERT INTO accounts (username, password, proxy_id) VALUES (?1, ?2, ?3)
                 ON CONFLICT (username) DO NOTHING",
                params![input.username, input.password, proxy_id],
            )?;
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn get_account(&self, id: AccountId) -> Result<Option<AccountRecord>, StoreError> {
        let conn = self.lock()?;
        load_account(&conn, id)
    }

    fn list_accounts(&self) -> Result<Vec<AccountRecord>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts a JOIN proxies p ON p.id = a.proxy_id
             ORDER BY a.id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_account)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    fn delete_account(&self, id: AccountId) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM accounts WHERE id = ?1", params![id])? > 0)
    }

    fn assign_proxy(
        &self,
        id: AccountId,
        proxy: &ProxyDescriptor,
    ) -> Result<AccountRecord, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let before = load_account(&tx, id)?.ok_or(StoreError::not_found("account", id))?;
        let proxy_id = link_proxy(&tx, proxy)?.ok_or_else(|| credential_conflict(proxy))?;
        tx.execute(
            "UPDATE accounts SET proxy_id = ?2 WHERE id = ?1",
            params![id, proxy_id],
        )?;
        let mut after = load_account(&tx, id)?.ok_or(StoreError::not_found("account", id))?;
        if before.proxy.fingerprint() != after.proxy.fingerprint() {
            write_session(&tx, id, &SessionUpdate::LoggedOut)?;
            after = load_account(&tx, id)?.ok_or(StoreError::not_found("account", id))?;
        }
        tx.commit()?;
        Ok(after)
    }

    fn apply_session_update(
        &self,
        id: AccountId,
        update: SessionUpdate,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        if write_session(&conn, id, &update)? == 0 {
            return Err(StoreError::not_found("account", id));
        }
        Ok(())
    }

    fn account_stats(&self) -> Result<AccountStats, StoreError> {
        let conn = self.lock()?;
        let (total, authenticated, failed): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'authenticated'), 0),
                    COALESCE(SUM(status = 'failed'), 0)
             FROM accounts",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(AccountStats {
            total: total as usize,
            authenticated: authenticated as usize,
            failed: failed as usize,
        })
    }
}

impl ProxyStore for SqliteStore {
    fn insert_proxies(&self, proxies: &[ProxyDescriptor]) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        for proxy in proxies {
            if upsert_proxy(&tx, proxy)?.1 {
                inserted += 1;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn get_proxy(&self, id: ProxyId) -> Result<Option<ProxyRecord>, StoreError> {
        let conn = self.lock()?;
        load_proxy(&conn, id)
    }

    fn list_proxies(&self) -> Result<Vec<ProxyRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, address, port, username, password, active FROM proxies ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_proxy)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    fn update_proxy(&self, id: ProxyId, update: &ProxyUpdate) -> Result<ProxyRecord, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let current = load_proxy(&tx, id)?.ok_or(StoreError::not_found("proxy", id))?;
        let (next, active) = update.apply(&current);
        if let Some(other) = find_proxy_id(&tx, &next)?.filter(|other| *other != id) {
            return Err(StoreError::Conflict(format!(
                "{}:{} already belongs to proxy {other}",
                next.address, next.port
            )));
        }
        tx.execute(
            "UPDATE proxies SET address = ?2, port = ?3, username = ?4, password = ?5, active = ?6
             WHERE id = ?1",
            params![id, next.address, next.port, next.username, next.password, active],
        )?;
        if current.descriptor.fingerprint() != next.fingerprint() {
            log_out_proxy_users(&tx, id)?;
        }
        tx.commit()?;
        Ok(ProxyRecord {
            id,
            descriptor: next,
            active,
        })
    }

    fn delete_proxy(&self, id: ProxyId) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let accounts: i64 = conn.query_row(
            "SELECT COUNT(*) FROM accounts WHERE proxy_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        if accounts > 0 {
            return Err(StoreError::ProxyInUse {
                id,
                accounts: accounts as usize,
            });
        }
        Ok(conn.execute("DELETE FROM proxies WHERE id = ?1", params![id])? > 0)
    }

    fn proxy_stats(&self) -> Result<ProxyStats, StoreError> {
        let conn = self.lock()?;
        let (total, active) = count(
            &conn,
            "SELECT COUNT(*), COALESCE(SUM(active), 0) FROM proxies",
        )?;
        Ok(ProxyStats { total, active })
    }
}

impl MessageRuleStore for SqliteStore {
    fn upsert_rule(&self, rule: &NewMessageRule) -> Result<MessageRule, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let exists: bool = tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM accounts WHERE id = ?1)",
            params![rule.account_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::not_found("account", rule.account_id));
        }
        tx.execute(
            "INSERT INTO message_rules (account_id, target_handle, template, active)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (account_id, target_handle)
             DO UPDATE SET template = excluded.template, active = excluded.active",
            params![rule.account_id, rule.target_handle, rule.template, rule.active],
        )?;
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM message_rules WHERE account_id = ?1 AND target_handle = ?2"
        );
        let saved = tx.query_row(&sql, params![rule.account_id, rule.target_handle], row_to_rule)?;
        tx.commit()?;
        Ok(saved)
    }

    fn get_rule(&self, id: RuleId) -> Result<Option<MessageRule>, StoreError> {
        let conn = self.lock()?;
        load_rule(&conn, id)
    }

    fn list_rules(&self, account_id: Option<AccountId>) -> Result<Vec<MessageRule>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM message_rules
             WHERE ?1 IS NULL OR account_id = ?1 ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![account_id], row_to_rule)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    fn list_active_rules(&self, account_id: AccountId) -> Result<Vec<MessageRule>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM message_rules
             WHERE account_id = ?1 AND active = 1 ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![account_id], row_to_rule)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    fn update_rule(&self, id: RuleId, update: &RuleUpdate) -> Result<MessageRule, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut rule = load_rule(&tx, id)?.ok_or(StoreError::not_found("rule", id))?;
        update.apply(&mut rule);
        let result = tx.execute(
            "UPDATE message_rules SET target_handle = ?2, template = ?3, active = ?4 WHERE id = ?1",
            params![id, rule.target_handle, rule.template, rule.active],
        );
        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::Conflict(format!(
                    "account {} already has a rule for {}",
                    rule.account_id, rule.target_handle
                )));
            }
            Err(e) => return Err(e.into()),
        }
        tx.commit()?;
        Ok(rule)
    }

    fn delete_rule(&self, id: RuleId) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM message_rules WHERE id = ?1", params![id])? > 0)
    }

    fn mark_sent(&self, id: RuleId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE message_rules SET last_sent_at = ?2 WHERE id = ?1",
            params![id, at.to_rfc3339()],
        )?;
        if updated == 0 {
            return Err(StoreError::not_found("rule", id));
        }
        Ok(())
    }

    fn rule_stats(&self) -> Result<RuleStats, StoreError> {
        let conn = self.lock()?;
        let (total, active) = count(
            &conn,
            "SELECT COUNT(*), COALESCE(SUM(active), 0) FROM message_rules",
        )?;
        Ok(RuleStats { total, active })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acctfleet_core::types::AuthErrorKind;

    fn input(username: &str, proxy: ProxyDescriptor) -> AccountInput {
        AccountInput {
            username: username.into(),
            password: "pw".into(),
            proxy,
        }
    }

    #[test]
    fn open_in_memory_creates_tables() {
        let store = SqliteStore::open_in_memory().expect("should open in-memory db");
        let conn = store.lock().unwrap();
        for table in ["accounts", "proxies", "message_rules"] {
            let n: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .expect("table should exist");
            assert_eq!(n, 0);
        }
    }

    #[test]
    fn insert_dedups_usernames_and_shares_proxy_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        let p = ProxyDescriptor::new("h", 80).with_credentials("u", "p");
        let batch = vec![input("a", p.clone()), input("b", p.clone()), input("a", p)];
        assert_eq!(store.insert_accounts(&batch).unwrap(), 2);
        assert_eq!(store.insert_accounts(&batch).unwrap(), 0);

        let accounts = store.list_accounts().unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].username, "a");
        assert_eq!(accounts[0].proxy_id, accounts[1].proxy_id);
        assert_eq!(accounts[0].proxy.password.as_deref(), Some("p"));
        assert_eq!(accounts[0].status, SessionStatus::Unauthenticated);
    }

    #[test]
    fn session_update_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_accounts(&[input("a", ProxyDescriptor::new("h", 80))])
            .unwrap();
        let account = store.list_accounts().unwrap().remove(0);
        let now = Utc::now();
        let artifact = SessionArtifact::new("cookie", &account.proxy, now);
        store
            .apply_session_update(
                account.id,
                SessionUpdate::LoggedIn {
                    artifact: artifact.clone(),
                    at: now,
                },
            )
            .unwrap();

        let loaded = store.get_account(account.id).unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Authenticated);
        assert!(loaded.live_session().is_some());
        assert_eq!(loaded.session.as_ref().map(|s| s.data.as_str()), Some("cookie"));
        let delta = (loaded.last_login_at.unwrap() - now).num_milliseconds().abs();
        assert!(delta < 1000, "last_login_at should roundtrip, delta={delta}ms");

        store
            .apply_session_update(account.id, SessionUpdate::Failed(AuthErrorKind::ChallengeRequired))
            .unwrap();
        let failed = store.get_account(account.id).unwrap().unwrap();
        assert_eq!(failed.status, SessionStatus::Failed(AuthErrorKind::ChallengeRequired));
        assert!(failed.session.is_none());
        assert!(failed.last_login_at.is_some(), "failure keeps the last successful login time");

        assert!(matches!(
            store.apply_session_update(999, SessionUpdate::Expired),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn proxy_credential_change_logs_out_accounts() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_accounts(&[input("a", ProxyDescriptor::new("h", 80))])
            .unwrap();
        let account = store.list_accounts().unwrap().remove(0);
        let now = Utc::now();
        store
            .apply_session_update(
                account.id,
                SessionUpdate::LoggedIn {
                    artifact: SessionArtifact::new("cookie", &account.proxy, now),
                    at: now,
                },
            )
            .unwrap();

        assert_eq!(store.insert_proxies(&[ProxyDescriptor::new("h", 80)]).unwrap(), 0);
        assert_eq!(
            store.get_account(account.id).unwrap().unwrap().status,
            SessionStatus::Authenticated
        );

        store
            .update_proxy(
                account.proxy_id,
                &ProxyUpdate {
                    username: Some(Some("new".into())),
                    password: Some("secret".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let after = store.get_account(account.id).unwrap().unwrap();
        assert_eq!(after.status, SessionStatus::Unauthenticated);
        assert!(after.session.is_none());
        assert_eq!(after.proxy.username.as_deref(), Some("new"));
    }

    #[test]
    fn account_import_never_rewrites_a_shared_proxy() {
        let store = SqliteStore::open_in_memory().unwrap();
        let secured = ProxyDescriptor::new("h", 80).with_credentials("u", "secret");
        store.insert_accounts(&[input("alice", secured.clone())]).unwrap();
        let alice = store.list_accounts().unwrap().remove(0);
        let now = Utc::now();
        store
            .apply_session_update(
                alice.id,
                SessionUpdate::LoggedIn {
                    artifact: SessionArtifact::new("cookie", &alice.proxy, now),
                    at: now,
                },
            )
            .unwrap();

        let batch = [
            input("bob", ProxyDescriptor::new("h", 80)),
            input("mallory", ProxyDescriptor::new("h", 80).with_credentials("x", "y")),
        ];
        assert_eq!(store.insert_accounts(&batch).unwrap(), 1);

        let accounts = store.list_accounts().unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[1].username, "bob");
        assert_eq!(accounts[1].proxy_id, alice.proxy_id);
        assert_eq!(accounts[1].proxy, secured);
        assert_eq!(accounts[0].proxy, secured);
        assert_eq!(accounts[0].status, SessionStatus::Authenticated);
        assert!(accounts[0].live_session().is_some());

        let err = store
            .assign_proxy(accounts[1].id, &ProxyDescriptor::new("h", 80).with_credentials("x", "y"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let alice = store.get_account(alice.id).unwrap().unwrap();
        assert_eq!(alice.proxy, secured);
        assert!(alice.live_session().is_some());
    }

    #[test]
    fn assign_proxy_moves_account_and_invalidates() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_accounts(&[input("a", ProxyDescriptor::new("h1", 80))])
            .unwrap();
        let account = store.list_accounts().unwrap().remove(0);
        store
            .apply_session_update(account.id, SessionUpdate::Failed(AuthErrorKind::ProxyUnreachable))
            .unwrap();
        let moved = store
            .assign_proxy(account.id, &ProxyDescriptor::new("h2", 8080))
            .unwrap();
        assert_eq!(moved.proxy, ProxyDescriptor::new("h2", 8080));
        assert_eq!(moved.status, SessionStatus::Unauthenticated);
        assert_ne!(moved.proxy_id, account.proxy_id);
        assert!(store.delete_proxy(account.proxy_id).unwrap());
    }

    #[test]
    fn delete_account_cascades_rules_and_frees_proxy() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_accounts(&[input("a", ProxyDescriptor::new("h", 80))])
            .unwrap();
        let account = store.list_accounts().unwrap().remove(0);
        store
            .upsert_rule(&NewMessageRule {
                account_id: account.id,
                target_handle: "bob".into(),
                template: "hi".into(),
                active: true,
            })
            .unwrap();
        assert!(matches!(
            store.delete_proxy(account.proxy_id),
            Err(StoreError::ProxyInUse { accounts: 1, .. })
        ));
        assert!(store.delete_account(account.id).unwrap());
        assert!(store.list_rules(None).unwrap().is_empty());
        assert!(store.delete_proxy(account.proxy_id).unwrap());
    }

    #[test]
    fn rules_upsert_order_and_mark_sent() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_accounts(&[input("a", ProxyDescriptor::new("h", 80))])
            .unwrap();
        let id = store.list_accounts().unwrap()[0].id;
        for (target, active) in [("x", true), ("y", false), ("z", true)] {
            store
                .upsert_rule(&NewMessageRule {
                    account_id: id,
                    target_handle: target.into(),
                    template: format!("hi {target}"),
                    active,
                })
                .unwrap();
        }
        let replaced = store
            .upsert_rule(&NewMessageRule {
                account_id: id,
                target_handle: "x".into(),
                template: "changed".into(),
                active: true,
            })
            .unwrap();
        assert_eq!(replaced.template, "changed");

        let active = store.list_active_rules(id).unwrap();
        let targets: Vec<&str> = active.iter().map(|r| r.target_handle.as_str()).collect();
        assert_eq!(targets, vec!["x", "z"]);
        assert_eq!(store.list_rules(Some(id)).unwrap().len(), 3);
        assert_eq!(store.list_rules(Some(id + 100)).unwrap().len(), 0);

        store.mark_sent(active[0].id, Utc::now()).unwrap();
        assert!(store.get_rule(active[0].id).unwrap().unwrap().last_sent_at.is_some());

        let err = store
            .update_rule(
                active[1].id,
                &RuleUpdate {
                    target_handle: Some("x".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let stats = store.rule_stats().unwrap();
        assert_eq!(stats, RuleStats { total: 3, active: 2 });
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .insert_accounts(&[input("a", ProxyDescriptor::new("h", 80))])
                .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.list_accounts().unwrap().len(), 1);
        assert_eq!(store.proxy_stats().unwrap(), ProxyStats { total: 1, active: 1 });
    }
}
