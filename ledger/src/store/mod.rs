//! Persistence backends for ledger documents.
//!
//! Every backend stores two kinds of document per user: history entries,
//! keyed by entry id, and a single stats record.

use anyhow::{bail, Result};
use arcade_types::{GameOutcome, HistoryEntry, UserId, UserStats};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

mod remote;
pub use remote::RedisStore;
mod sqlite;
pub use sqlite::SqliteStore;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    History(UserId, String),
    Stats(UserId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    History(HistoryEntry),
    Stats(UserStats),
}

pub trait Store {
    fn get(&self, key: &Key) -> impl Future<Output = Result<Option<Value>>>;
    fn set(&self, key: Key, value: Value) -> impl Future<Output = Result<()>>;
    fn delete(&self, key: &Key) -> impl Future<Output = Result<()>>;

    /// All history entries of `user`, in no particular order.
    fn list_by_user(&self, user: &UserId) -> impl Future<Output = Result<Vec<HistoryEntry>>>;

    /// Stats records of every user.
    fn list_stats(&self) -> impl Future<Output = Result<Vec<(UserId, UserStats)>>>;

    /// Adds one game to `user`'s stats and returns the new totals.
    ///
    /// The default is a plain read-modify-write; backends with an atomic
    /// counter primitive override it.
    fn increment_stats(
        &self,
        user: &UserId,
        outcome: GameOutcome,
    ) -> impl Future<Output = Result<UserStats>> {
        async move {
            let key = Key::Stats(user.clone());
            let current = match self.get(&key).await? {
                Some(Value::Stats(stats)) => stats,
                Some(other) => bail!("unexpected value under stats key for {user}: {other:?}"),
                None => UserStats::default(),
            };
            let next = current.recorded(outcome);
            self.set(key, Value::Stats(next)).await?;
            Ok(next)
        }
    }
}

impl<S: Store> Store for Arc<S> {
    async fn get(&self, key: &Key) -> Result<Option<Value>> {
        (**self).get(key).await
    }

    async fn set(&self, key: Key, value: Value) -> Result<()> {
        (**self).set(key, value).await
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        (**self).delete(key).await
    }

    async fn list_by_user(&self, user: &UserId) -> Result<Vec<HistoryEntry>> {
        (**self).list_by_user(user).await
    }

    async fn list_stats(&self) -> Result<Vec<(UserId, UserStats)>> {
        (**self).list_stats().await
    }

    async fn increment_stats(&self, user: &UserId, outcome: GameOutcome) -> Result<UserStats> {
        (**self).increment_stats(user, outcome).await
    }
}

/// In-process store; contents are lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<BTreeMap<Key, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BTreeMap<Key, Value>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Store for MemoryStore {
    async fn get(&self, key: &Key) -> Result<Option<Value>> {
        Ok(self.state().get(key).cloned())
    }

    async fn set(&self, key: Key, value: Value) -> Result<()> {
        self.state().insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.state().remove(key);
        Ok(())
    }

    async fn list_by_user(&self, user: &UserId) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .state()
            .iter()
            .filter_map(|(key, value)| match (key, value) {
                (Key::History(owner, _), Value::History(entry)) if owner == user => {
                    Some(entry.clone())
                }
                _ => None,
            })
            .collect())
    }

    async fn list_stats(&self) -> Result<Vec<(UserId, UserStats)>> {
        Ok(self
            .state()
            .iter()
            .filter_map(|(key, value)| match (key, value) {
                (Key::Stats(user), Value::Stats(stats)) => Some((user.clone(), *stats)),
                _ => None,
            })
            .collect())
    }

    async fn increment_stats(&self, user: &UserId, outcome: GameOutcome) -> Result<UserStats> {
        let mut state = self.state();
        let key = Key::Stats(user.clone());
        let current = match state.get(&key) {
            Some(Value::Stats(stats)) => *stats,
            Some(other) => bail!("unexpected value under stats key for {user}: {other:?}"),
            None => UserStats::default(),
        };
        let next = current.recorded(outcome);
        state.insert(key, Value::Stats(next));
        Ok(next)
    }
}
