//! In-process account store and attempt ledger.
//!
//! Same contract as the Postgres store; used by the test suites.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::storage::{
    AccountStore, AttemptLedger, AttemptRecord, AttemptScope, NewAttempt, StoreRecord, UserRecord,
};
use super::utils::hash_password;

const DEFAULT_EOD_CUTOFF_HOUR: i32 = 3;

#[derive(Debug)]
struct StoreRow {
    record: StoreRecord,
    active: bool,
}

#[derive(Debug)]
struct UserRow {
    record: UserRecord,
    active: bool,
    last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    stores: Vec<StoreRow>,
    users: Vec<UserRow>,
    attempts: Vec<AttemptRecord>,
    daily_resets: HashMap<i64, NaiveDate>,
    availability: HashMap<i64, u64>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

fn in_scope(attempt: &AttemptRecord, username: &str, ip: Option<&str>, scope: AttemptScope) -> bool {
    match scope {
        AttemptScope::UserOrIp => {
            attempt.username == username
                || ip.is_some_and(|ip| attempt.ip_address.as_deref() == Some(ip))
        }
        AttemptScope::UserAndIp => {
            attempt.username == username && attempt.ip_address.as_deref() == ip
        }
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an active store and return its id.
    pub async fn add_store(&self, store_code: &str, store_name: &str) -> i64 {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id();
        inner.stores.push(StoreRow {
            record: StoreRecord {
                id,
                store_code: store_code.to_string(),
                store_name: store_name.to_string(),
                eod_cutoff_hour: DEFAULT_EOD_CUTOFF_HOUR,
            },
            active: true,
        });
        id
    }

    /// Add an active user with a plain-text password (hashed on insert).
    pub async fn add_user(
        &self,
        store_id: i64,
        username: &str,
        password: &str,
        display_name: &str,
        role: &str,
    ) -> i64 {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id();
        inner.users.push(UserRow {
            record: UserRecord {
                id,
                store_id,
                username: username.to_string(),
                password_hash: hash_password(password),
                display_name: display_name.to_string(),
                role: role.to_string(),
            },
            active: true,
            last_login_at: None,
        });
        id
    }

    pub async fn deactivate_user(&self, user_id: i64) {
        let mut inner = self.inner.lock().await;
        for user in inner.users.iter_mut().filter(|user| user.record.id == user_id) {
            user.active = false;
        }
    }

    pub async fn deactivate_store(&self, store_id: i64) {
        let mut inner = self.inner.lock().await;
        for store in inner.stores.iter_mut().filter(|store| store.record.id == store_id) {
            store.active = false;
        }
    }

    pub async fn last_login_at(&self, user_id: i64) -> Option<DateTime<Utc>> {
        let inner = self.inner.lock().await;
        inner
            .users
            .iter()
            .find(|user| user.record.id == user_id)
            .and_then(|user| user.last_login_at)
    }

    /// Mark `count` products as sold out for a store.
    pub async fn set_sold_out(&self, store_id: i64, count: u64) {
        self.inner.lock().await.availability.insert(store_id, count);
    }

    pub async fn sold_out(&self, store_id: i64) -> u64 {
        self.inner
            .lock()
            .await
            .availability
            .get(&store_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn set_last_daily_reset(&self, store_id: i64, date: NaiveDate) {
        self.inner.lock().await.daily_resets.insert(store_id, date);
    }

    /// Insert an attempt with an explicit timestamp.
    pub async fn push_attempt(&self, attempt: NewAttempt<'_>, attempted_at: DateTime<Utc>) {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id();
        inner.attempts.push(AttemptRecord {
            id,
            username: attempt.username.to_string(),
            ip_address: attempt.ip.map(ToString::to_string),
            user_agent: attempt.user_agent.map(ToString::to_string),
            success: attempt.success,
            attempted_at,
        });
    }

    pub async fn attempts(&self) -> Vec<AttemptRecord> {
        self.inner.lock().await.attempts.clone()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_store(&self, store_code: &str) -> Result<Option<StoreRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .stores
            .iter()
            .find(|store| store.active && store.record.store_code == store_code)
            .map(|store| store.record.clone()))
    }

    async fn find_user(&self, store_id: i64, username: &str) -> Result<Option<UserRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .users
            .iter()
            .find(|user| {
                user.active && user.record.store_id == store_id && user.record.username == username
            })
            .map(|user| user.record.clone()))
    }

    async fn touch_last_login(&self, user_id: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        for user in inner.users.iter_mut().filter(|user| user.record.id == user_id) {
            user.last_login_at = Some(now);
        }
        Ok(())
    }

    async fn last_daily_reset(&self, store_id: i64) -> Result<Option<NaiveDate>> {
        Ok(self.inner.lock().await.daily_resets.get(&store_id).copied())
    }

    async fn apply_daily_reset(&self, store_id: i64, business_date: NaiveDate) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let cleared = inner.availability.remove(&store_id).unwrap_or(0);
        inner.daily_resets.insert(store_id, business_date);
        Ok(cleared)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl AttemptLedger for MemoryStore {
    async fn count_failures(
        &self,
        username: &str,
        ip: Option<&str>,
        scope: AttemptScope,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let inner = self.inner.lock().await;
        let count = inner
            .attempts
            .iter()
            .filter(|attempt| {
                !attempt.success
                    && attempt.attempted_at > since
                    && in_scope(attempt, username, ip, scope)
            })
            .count();
        Ok(i64::try_from(count)?)
    }

    async fn record_attempt(&self, attempt: NewAttempt<'_>) -> Result<()> {
        self.push_attempt(attempt, Utc::now()).await;
        Ok(())
    }

    async fn clear_attempts(
        &self,
        username: &str,
        ip: Option<&str>,
        scope: AttemptScope,
        failures_only: bool,
    ) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.attempts.len();
        inner.attempts.retain(|attempt| {
            !((!failures_only || !attempt.success) && in_scope(attempt, username, ip, scope))
        });
        Ok(u64::try_from(before - inner.attempts.len())?)
    }

    async fn clear_user_failures(&self, username: &str) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.attempts.len();
        inner
            .attempts
            .retain(|attempt| attempt.success || attempt.username != username);
        Ok(u64::try_from(before - inner.attempts.len())?)
    }

    async fn recent_attempts(&self, username: Option<&str>, limit: i64) -> Result<Vec<AttemptRecord>> {
        let inner = self.inner.lock().await;
        let mut attempts: Vec<AttemptRecord> = inner
            .attempts
            .iter()
            .filter(|attempt| username.is_none_or(|username| attempt.username == username))
            .cloned()
            .collect();
        attempts.sort_by(|a, b| b.attempted_at.cmp(&a.attempted_at).then(b.id.cmp(&a.id)));
        attempts.truncate(usize::try_from(limit.max(0))?);
        Ok(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn failure<'a>(username: &'a str, ip: Option<&'a str>) -> NewAttempt<'a> {
        NewAttempt {
            username,
            ip,
            user_agent: None,
            success: false,
        }
    }

    #[tokio::test]
    async fn inactive_rows_are_invisible() -> Result<()> {
        let store = MemoryStore::new();
        let store_id = store.add_store("VLC01", "Valencia Centro").await;
        let user_id = store
            .add_user(store_id, "maria", "secret", "María", "staff")
            .await;

        assert!(store.find_user(store_id, "maria").await?.is_some());
        store.deactivate_user(user_id).await;
        assert!(store.find_user(store_id, "maria").await?.is_none());

        store.deactivate_store(store_id).await;
        assert!(store.find_store("VLC01").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn users_are_scoped_to_their_store() -> Result<()> {
        let store = MemoryStore::new();
        let first = store.add_store("VLC01", "Valencia Centro").await;
        let second = store.add_store("MAD01", "Madrid Sol").await;
        store.add_user(first, "maria", "secret", "María", "staff").await;
        assert!(store.find_user(second, "maria").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn count_respects_scope_and_window() -> Result<()> {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.push_attempt(failure("maria", Some("10.0.0.1")), now).await;
        store.push_attempt(failure("pablo", Some("10.0.0.1")), now).await;
        store.push_attempt(failure("maria", Some("10.0.0.2")), now).await;
        store
            .push_attempt(failure("maria", Some("10.0.0.1")), now - Duration::hours(1))
            .await;

        let since = now - Duration::minutes(15);
        let either = store
            .count_failures("maria", Some("10.0.0.1"), AttemptScope::UserOrIp, since)
            .await?;
        let both = store
            .count_failures("maria", Some("10.0.0.1"), AttemptScope::UserAndIp, since)
            .await?;
        assert_eq!(either, 3);
        assert_eq!(both, 1);
        Ok(())
    }

    #[tokio::test]
    async fn clear_can_keep_successes() -> Result<()> {
        let store = MemoryStore::new();
        store.record_attempt(failure("maria", Some("10.0.0.1"))).await?;
        store
            .record_attempt(NewAttempt {
                success: true,
                ..failure("maria", Some("10.0.0.1"))
            })
            .await?;

        let cleared = store
            .clear_attempts("maria", Some("10.0.0.1"), AttemptScope::UserAndIp, true)
            .await?;
        assert_eq!(cleared, 1);
        assert_eq!(store.attempts().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn recent_attempts_are_newest_first_and_limited() -> Result<()> {
        let store = MemoryStore::new();
        let now = Utc::now();
        for minutes in [30, 10, 20] {
            store
                .push_attempt(failure("maria", None), now - Duration::minutes(minutes))
                .await;
        }
        store.push_attempt(failure("pablo", None), now).await;

        let recent = store.recent_attempts(Some("maria"), 2).await?;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].attempted_at, now - Duration::minutes(10));
        assert_eq!(recent[1].attempted_at, now - Duration::minutes(20));
        Ok(())
    }

    #[tokio::test]
    async fn daily_reset_clears_availability() -> Result<()> {
        let store = MemoryStore::new();
        let store_id = store.add_store("VLC01", "Valencia Centro").await;
        store.set_sold_out(store_id, 4).await;

        let date = NaiveDate::from_ymd_opt(2026, 1, 3).expect("valid test date");
        assert_eq!(store.apply_daily_reset(store_id, date).await?, 4);
        assert_eq!(store.sold_out(store_id).await, 0);
        assert_eq!(store.last_daily_reset(store_id).await?, Some(date));
        Ok(())
    }
}
