use arcade_types::{
    GameOutcome, HistoryEntry, HistoryUpdate, Leaderboard, LeaderboardEntry, PaymentStatus,
    UserId, UserStats,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::identity::Identity;
use crate::store::{Key, Store, Value};
use crate::{Error, Result};

/// Attempts to find an unused entry id before giving up.
const MAX_ID_ATTEMPTS: usize = 8;

/// A game outcome to append to the ledger.
#[derive(Clone, Debug)]
pub struct RecordRequest {
    pub game_name: String,
    pub outcome: GameOutcome,
    pub amount: String,
    pub status: Option<PaymentStatus>,
    pub status_message: Option<String>,
    pub tx_hash: Option<String>,
    pub recorded_at: Option<DateTime<Utc>>,
}

impl RecordRequest {
    pub fn new(game_name: impl Into<String>, outcome: GameOutcome, amount: impl Into<String>) -> Self {
        Self {
            game_name: game_name.into(),
            outcome,
            amount: amount.into(),
            status: None,
            status_message: None,
            tx_hash: None,
            recorded_at: None,
        }
    }

    pub fn status(mut self, status: PaymentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    pub fn tx_hash(mut self, tx_hash: impl Into<String>) -> Self {
        self.tx_hash = Some(tx_hash.into());
        self
    }

    pub fn recorded_at(mut self, at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(at);
        self
    }
}

/// Newest `played_at` first; ties broken by id so listings are stable.
fn sort_newest_first(entries: &mut [HistoryEntry]) {
    entries.sort_by(|a, b| {
        b.played_at
            .cmp(&a.played_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

/// Per-user game history log plus the user's stats aggregate.
pub struct HistoryStore<S, I> {
    store: S,
    identity: I,
    capacity: Option<usize>,
    stats_locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl<S: Store, I: Identity> HistoryStore<S, I> {
    pub fn new(store: S, identity: I, config: &LedgerConfig) -> Self {
        Self {
            store,
            identity,
            capacity: config.history_capacity(),
            stats_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn identity(&self) -> &I {
        &self.identity
    }

    fn require_user(&self) -> Result<UserId> {
        self.identity.current_user().ok_or(Error::NotAuthenticated)
    }

    /// Appends an entry for `request` and adds it to the user's stats.
    pub async fn record_game_result(&self, request: RecordRequest) -> Result<HistoryEntry> {
        let user = self.require_user()?;
        let played_at = request.recorded_at.unwrap_or_else(Utc::now);
        let id = self.unused_id(&user).await?;

        let entry = HistoryEntry::new(
            id,
            &request.game_name,
            request.outcome,
            &request.amount,
            played_at,
        )
        .with_status(request.status.unwrap_or_default())
        .with_status_message(request.status_message)
        .with_tx_hash(request.tx_hash);
        entry.validate_invariants()?;

        let key = Key::History(user.clone(), entry.id.clone());
        self.store
            .set(key.clone(), Value::History(entry.clone()))
            .await
            .map_err(Error::StoreUnavailable)?;

        let incremented = {
            let lock = self.stats_lock(&user).await;
            let _guard = lock.lock().await;
            self.store.increment_stats(&user, entry.outcome).await
        };
        self.release_stats_lock(&user).await;

        // An entry the stats never counted is removed again.
        let stats = match incremented {
            Ok(stats) => stats,
            Err(err) => {
                if let Err(cleanup) = self.store.delete(&key).await {
                    warn!(%user, id = %entry.id, "Failed to roll back history entry: {cleanup:#}");
                }
                return Err(Error::StoreUnavailable(err));
            }
        };

        info!(
            %user,
            id = %entry.id,
            game = %entry.game_name,
            outcome = %entry.outcome,
            status = %entry.status,
            total_games = stats.total_games,
            "recorded game result"
        );

        self.enforce_capacity(&user).await;
        Ok(entry)
    }

    /// Current stats; zeroed when unavailable.
    pub async fn get_user_stats(&self) -> UserStats {
        let Some(user) = self.identity.current_user() else {
            return UserStats::default();
        };
        match self.store.get(&Key::Stats(user.clone())).await {
            Ok(Some(Value::Stats(stats))) => stats,
            Ok(None) => UserStats::default(),
            Ok(Some(other)) => {
                warn!(%user, ?other, "unexpected value under stats key");
                UserStats::default()
            }
            Err(err) => {
                warn!(%user, "Failed to fetch stats: {err:#}");
                UserStats::default()
            }
        }
    }

    /// History newest first, at most `limit` entries (`None` or 0 for all).
    ///
    /// Read failures yield an empty list.
    pub async fn get_game_history(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        let Some(user) = self.identity.current_user() else {
            return Vec::new();
        };
        let mut entries = match self.store.list_by_user(&user).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%user, "Failed to load game history: {err:#}");
                return Vec::new();
            }
        };
        sort_newest_first(&mut entries);
        if let Some(limit) = limit.filter(|limit| *limit > 0) {
            entries.truncate(limit);
        }
        entries
    }

    /// Looks up one entry of the current user.
    pub async fn get_game_history_entry(&self, id: &str) -> Result<Option<HistoryEntry>> {
        let user = self.require_user()?;
        match self
            .store
            .get(&Key::History(user, id.to_string()))
            .await
            .map_err(Error::StoreUnavailable)?
        {
            Some(Value::History(entry)) => Ok(Some(entry)),
            None => Ok(None),
            Some(other) => Err(Error::StoreUnavailable(anyhow::anyhow!(
                "unexpected value under history key {id}: {other:?}"
            ))),
        }
    }

    /// Merges `update` into entry `id`; `None` when no such entry exists.
    pub async fn update_game_history_entry(
        &self,
        id: &str,
        update: HistoryUpdate,
    ) -> Result<Option<HistoryEntry>> {
        let Some(current) = self.get_game_history_entry(id).await? else {
            return Ok(None);
        };
        let user = self.require_user()?;
        let next = current.merged(&update);
        next.validate_invariants()?;
        self.store
            .set(
                Key::History(user.clone(), next.id.clone()),
                Value::History(next.clone()),
            )
            .await
            .map_err(Error::StoreUnavailable)?;
        debug!(%user, id, status = %next.status, "updated history entry");
        Ok(Some(next))
    }

    /// Users ranked by wins; `limit` of 0 keeps everyone.
    pub async fn leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        match self.store.list_stats().await {
            Ok(stats) => Leaderboard::rank(stats, limit).entries,
            Err(err) => {
                warn!("Failed to load leaderboard: {err:#}");
                Vec::new()
            }
        }
    }

    async fn unused_id(&self, user: &UserId) -> Result<String> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = HistoryEntry::generate_id(Utc::now(), &mut rand::thread_rng());
            let taken = self
                .store
                .get(&Key::History(user.clone(), id.clone()))
                .await
                .map_err(Error::StoreUnavailable)?
                .is_some();
            if !taken {
                return Ok(id);
            }
        }
        Err(Error::StoreUnavailable(anyhow::anyhow!(
            "no free history id for {user} after {MAX_ID_ATTEMPTS} attempts"
        )))
    }

    async fn stats_lock(&self, user: &UserId) -> Arc<Mutex<()>> {
        let mut locks = self.stats_locks.lock().await;
        locks.entry(user.clone()).or_default().clone()
    }

    /// Forgets the user's lock once no record holds it.
    async fn release_stats_lock(&self, user: &UserId) {
        let mut locks = self.stats_locks.lock().await;
        if locks
            .get(user)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(user);
        }
    }

    /// Drops the oldest entries beyond capacity. Failures are logged only.
    async fn enforce_capacity(&self, user: &UserId) {
        let Some(capacity) = self.capacity else {
            return;
        };
        let mut entries = match self.store.list_by_user(user).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%user, "Failed to prune history entries: {err:#}");
                return;
            }
        };
        if entries.len() <= capacity {
            return;
        }
        sort_newest_first(&mut entries);
        let overflow = entries.split_off(capacity);
        let deletions = overflow.iter().map(|entry| {
            let key = Key::History(user.clone(), entry.id.clone());
            async move { self.store.delete(&key).await }
        });
        let failed = join_all(deletions)
            .await
            .into_iter()
            .filter(|result| result.is_err())
            .count();
        if failed > 0 {
            warn!(%user, failed, "History limit enforcement failed for some entries");
        }
        debug!(%user, trimmed = overflow.len() - failed, "trimmed history");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{DeviceIdentity, SessionIdentity};
    use crate::mocks::{FaultyStore, YieldingStore};
    use crate::store::MemoryStore;
    use arcade_types::HistoryInvariantError;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn ledger() -> HistoryStore<MemoryStore, DeviceIdentity> {
        HistoryStore::new(
            MemoryStore::new(),
            DeviceIdentity::new("alice"),
            &LedgerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_loss_is_recorded_completed_without_tx() {
        let ledger = ledger();
        let entry = ledger
            .record_game_result(RecordRequest::new("Quiz", GameOutcome::Loss, "2"))
            .await
            .unwrap();
        assert_eq!(entry.status, PaymentStatus::Completed);
        assert_eq!(entry.tx_hash, None);
        assert_eq!(entry.amount_display, "-2");

        let stored = ledger.get_game_history_entry(&entry.id).await.unwrap();
        assert_eq!(stored, Some(entry));
    }

    #[tokio::test]
    async fn test_blank_game_name_is_unknown() {
        let ledger = ledger();
        let entry = ledger
            .record_game_result(RecordRequest::new("  ", GameOutcome::Win, "1"))
            .await
            .unwrap();
        assert_eq!(entry.game_name, arcade_types::UNKNOWN_GAME);
    }

    #[tokio::test]
    async fn test_pending_loss_is_rejected_without_writes() {
        let ledger = HistoryStore::new(
            FaultyStore::new(MemoryStore::new()),
            DeviceIdentity::new("alice"),
            &LedgerConfig::default(),
        );
        let err = ledger
            .record_game_result(
                RecordRequest::new("Quiz", GameOutcome::Loss, "2").status(PaymentStatus::Pending),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidEntry(HistoryInvariantError::LossNotCompleted { .. })
        ));
        assert_eq!(ledger.store().writes(), 0);
    }

    #[tokio::test]
    async fn test_stats_track_every_recorded_game() {
        let ledger = ledger();
        let outcomes = [
            GameOutcome::Win,
            GameOutcome::Loss,
            GameOutcome::Win,
            GameOutcome::Win,
            GameOutcome::Loss,
        ];
        for outcome in outcomes {
            ledger
                .record_game_result(RecordRequest::new("Match", outcome, "1"))
                .await
                .unwrap();
        }
        let stats = ledger.get_user_stats().await;
        assert_eq!(
            stats,
            UserStats {
                total_games: 5,
                wins: 3,
                losses: 2
            }
        );
        assert!(stats.is_consistent());
    }

    #[tokio::test]
    async fn test_concurrent_records_do_not_lose_increments() {
        // Increments use the trait's read-modify-write and yield between read and write.
        let ledger = HistoryStore::new(
            YieldingStore::new(MemoryStore::new()),
            DeviceIdentity::new("alice"),
            &LedgerConfig::default(),
        );
        let records = (0..20).map(|i| {
            let outcome = if i % 4 == 0 {
                GameOutcome::Loss
            } else {
                GameOutcome::Win
            };
            ledger.record_game_result(RecordRequest::new("Match", outcome, "1"))
        });
        for result in join_all(records).await {
            result.unwrap();
        }
        assert_eq!(
            ledger.get_user_stats().await,
            UserStats {
                total_games: 20,
                wins: 15,
                losses: 5
            }
        );
        assert!(ledger.stats_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_unlocked_read_modify_write_loses_increments() {
        let store = YieldingStore::new(MemoryStore::new());
        let user = UserId::from("alice");
        let increments = (0..10).map(|_| store.increment_stats(&user, GameOutcome::Win));
        for result in join_all(increments).await {
            result.unwrap();
        }
        let stats = match store.get(&Key::Stats(user)).await.unwrap() {
            Some(Value::Stats(stats)) => stats,
            other => panic!("unexpected stats value: {other:?}"),
        };
        assert!(stats.total_games < 10);
    }

    #[tokio::test]
    async fn test_stats_locks_are_released() {
        let ledger = ledger();
        for outcome in [GameOutcome::Win, GameOutcome::Loss] {
            ledger
                .record_game_result(RecordRequest::new("Match", outcome, "1"))
                .await
                .unwrap();
        }
        assert!(ledger.stats_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_stats_failure_rolls_back_entry() {
        let ledger = HistoryStore::new(
            FaultyStore::new(MemoryStore::new()),
            DeviceIdentity::default(),
            &LedgerConfig::default(),
        );
        ledger.store().fail_stats_writes(true);
        let err = ledger
            .record_game_result(RecordRequest::new("Quiz", GameOutcome::Win, "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert!(ledger.get_game_history(None).await.is_empty());
        assert_eq!(ledger.get_user_stats().await, UserStats::default());
        assert!(ledger.stats_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_limited() {
        let ledger = ledger();
        for (name, secs) in [("b", 20), ("a", 10), ("c", 30)] {
            ledger
                .record_game_result(
                    RecordRequest::new(name, GameOutcome::Win, "1").recorded_at(at(secs)),
                )
                .await
                .unwrap();
        }

        let all = ledger.get_game_history(None).await;
        let names: Vec<_> = all.iter().map(|e| e.game_name.as_str()).collect();
        assert_eq!(names, ["c", "b", "a"]);

        let limited = ledger.get_game_history(Some(2)).await;
        assert_eq!(limited, all[..2]);
        assert_eq!(ledger.get_game_history(Some(0)).await.len(), 3);
    }

    #[tokio::test]
    async fn test_history_trims_oldest_beyond_capacity() {
        let ledger = ledger();
        let start = at(1_700_000_000);
        for i in 0..55 {
            ledger
                .record_game_result(
                    RecordRequest::new(format!("game-{i}"), GameOutcome::Win, "1")
                        .recorded_at(start + Duration::seconds(i)),
                )
                .await
                .unwrap();
        }

        let history = ledger.get_game_history(None).await;
        assert_eq!(history.len(), 50);
        assert_eq!(history[0].game_name, "game-54");
        assert_eq!(history[49].game_name, "game-5");
        assert_eq!(ledger.get_user_stats().await.total_games, 55);
    }

    #[tokio::test]
    async fn test_capacity_can_be_disabled() {
        let config = LedgerConfig {
            history_capacity: None,
            ..LedgerConfig::default()
        };
        let ledger = HistoryStore::new(MemoryStore::new(), DeviceIdentity::default(), &config);
        for _ in 0..3 {
            ledger
                .record_game_result(RecordRequest::new("Match", GameOutcome::Loss, "1"))
                .await
                .unwrap();
        }
        assert_eq!(ledger.get_game_history(None).await.len(), 3);
    }

    #[tokio::test]
    async fn test_trim_failure_keeps_record() {
        let config = LedgerConfig {
            history_capacity: Some(1),
            ..LedgerConfig::default()
        };
        let ledger = HistoryStore::new(
            FaultyStore::new(MemoryStore::new()),
            DeviceIdentity::default(),
            &config,
        );
        ledger.store().fail_deletes(true);
        for secs in [1, 2] {
            ledger
                .record_game_result(
                    RecordRequest::new("Match", GameOutcome::Win, "1").recorded_at(at(secs)),
                )
                .await
                .unwrap();
        }
        assert_eq!(ledger.get_game_history(None).await.len(), 2);
    }

    #[tokio::test]
    async fn test_signed_out_user_cannot_write() {
        let ledger = HistoryStore::new(
            MemoryStore::new(),
            SessionIdentity::default(),
            &LedgerConfig::default(),
        );
        let err = ledger
            .record_game_result(RecordRequest::new("Quiz", GameOutcome::Win, "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotAuthenticated));
        assert!(ledger.get_game_history(None).await.is_empty());
        assert_eq!(ledger.get_user_stats().await, UserStats::default());

        ledger.identity().sign_in("carol");
        ledger
            .record_game_result(RecordRequest::new("Quiz", GameOutcome::Win, "1"))
            .await
            .unwrap();
        assert_eq!(ledger.get_game_history(None).await.len(), 1);

        ledger.identity().sign_out();
        let err = ledger
            .update_game_history_entry("any", HistoryUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_read_failures_degrade_to_empty() {
        let ledger = HistoryStore::new(
            FaultyStore::new(MemoryStore::new()),
            DeviceIdentity::default(),
            &LedgerConfig::default(),
        );
        ledger
            .record_game_result(RecordRequest::new("Quiz", GameOutcome::Win, "1"))
            .await
            .unwrap();

        ledger.store().fail_reads(true);
        assert!(ledger.get_game_history(None).await.is_empty());
        assert_eq!(ledger.get_user_stats().await, UserStats::default());
        assert!(ledger.leaderboard(10).await.is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_surfaces() {
        let ledger = HistoryStore::new(
            FaultyStore::new(MemoryStore::new()),
            DeviceIdentity::default(),
            &LedgerConfig::default(),
        );
        ledger.store().fail_writes(true);
        let err = ledger
            .record_game_result(RecordRequest::new("Quiz", GameOutcome::Win, "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        ledger.store().fail_writes(false);
        assert_eq!(ledger.get_user_stats().await, UserStats::default());
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let ledger = ledger();
        let entry = ledger
            .record_game_result(
                RecordRequest::new("Quiz", GameOutcome::Win, "3")
                    .status(PaymentStatus::Pending)
                    .message("waiting"),
            )
            .await
            .unwrap();

        let updated = ledger
            .update_game_history_entry(
                &entry.id,
                HistoryUpdate::default()
                    .status(PaymentStatus::Completed)
                    .tx_hash(Some("0xabc".into()))
                    .message("Reward sent"),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, PaymentStatus::Completed);
        assert_eq!(updated.tx_hash.as_deref(), Some("0xabc"));
        assert_eq!(updated.status_message.as_deref(), Some("Reward sent"));
        assert_eq!(updated.amount_display, "+3");
        assert_eq!(updated.played_at, entry.played_at);
        assert_eq!(
            ledger.get_game_history_entry(&entry.id).await.unwrap(),
            Some(updated)
        );
    }

    #[tokio::test]
    async fn test_update_of_missing_entry_is_none() {
        let ledger = ledger();
        let updated = ledger
            .update_game_history_entry("missing", HistoryUpdate::default().message("x"))
            .await
            .unwrap();
        assert_eq!(updated, None);
        assert!(ledger.get_game_history(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_update_cannot_break_invariants() {
        let ledger = ledger();
        let entry = ledger
            .record_game_result(RecordRequest::new("Quiz", GameOutcome::Loss, "1"))
            .await
            .unwrap();
        let err = ledger
            .update_game_history_entry(
                &entry.id,
                HistoryUpdate::default().status(PaymentStatus::Pending),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEntry(_)));
        assert_eq!(
            ledger.get_game_history_entry(&entry.id).await.unwrap(),
            Some(entry)
        );
    }

    #[tokio::test]
    async fn test_loss_with_tx_hash_is_rejected_without_writes() {
        let ledger = HistoryStore::new(
            FaultyStore::new(MemoryStore::new()),
            DeviceIdentity::new("alice"),
            &LedgerConfig::default(),
        );
        let err = ledger
            .record_game_result(
                RecordRequest::new("Quiz", GameOutcome::Loss, "2").tx_hash("0xdead"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidEntry(HistoryInvariantError::LossWithTxHash)
        ));
        assert_eq!(ledger.store().writes(), 0);
    }

    #[tokio::test]
    async fn test_update_cannot_attach_tx_hash_to_loss() {
        let ledger = ledger();
        let entry = ledger
            .record_game_result(RecordRequest::new("Quiz", GameOutcome::Loss, "2"))
            .await
            .unwrap();
        let err = ledger
            .update_game_history_entry(
                &entry.id,
                HistoryUpdate::default().tx_hash(Some("0xbeef".into())),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidEntry(HistoryInvariantError::LossWithTxHash)
        ));
        assert_eq!(
            ledger.get_game_history_entry(&entry.id).await.unwrap(),
            Some(entry)
        );
    }

    #[tokio::test]
    async fn test_leaderboard_ranks_users_sharing_a_store() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let config = LedgerConfig::default();
        for (user, wins, losses) in [("alice", 2, 1), ("bob", 3, 0), ("carol", 2, 0)] {
            let ledger = HistoryStore::new(store.clone(), DeviceIdentity::new(user), &config);
            for _ in 0..wins {
                ledger
                    .record_game_result(RecordRequest::new("Match", GameOutcome::Win, "1"))
                    .await
                    .unwrap();
            }
            for _ in 0..losses {
                ledger
                    .record_game_result(RecordRequest::new("Match", GameOutcome::Loss, "1"))
                    .await
                    .unwrap();
            }
        }

        let ledger = HistoryStore::new(store, DeviceIdentity::new("alice"), &config);
        let board = ledger.leaderboard(0).await;
        let order: Vec<_> = board
            .iter()
            .map(|entry| (entry.user.as_str(), entry.rank))
            .collect();
        assert_eq!(order, [("bob", 1), ("carol", 2), ("alice", 3)]);
        assert_eq!(ledger.leaderboard(1).await.len(), 1);
    }
}
