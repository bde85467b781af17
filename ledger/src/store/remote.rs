use anyhow::{bail, Context, Result};
use arcade_types::{GameOutcome, HistoryEntry, UserId, UserStats};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{Key, Store, Value};

const FIELD_TOTAL_GAMES: &str = "totalGames";
const FIELD_WINS: &str = "wins";
const FIELD_LOSSES: &str = "losses";

/// Remote per-user document store on Redis.
///
/// Layout under `prefix`:
/// - `user:<id>:history`: hash of entry id to JSON entry
/// - `user:<id>:stats`: hash with `totalGames`, `wins`, `losses`
/// - `users`: set of user ids that have stats
pub struct RedisStore {
    client: redis::Client,
    connection: Mutex<Option<ConnectionManager>>,
    prefix: String,
}

impl RedisStore {
    pub fn new(url: &str, prefix: String) -> Result<Self> {
        let client = redis::Client::open(url).context("open redis client")?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            prefix,
        })
    }

    fn history_key(&self, user: &UserId) -> String {
        format!("{}user:{}:history", self.prefix, user)
    }

    fn stats_key(&self, user: &UserId) -> String {
        format!("{}user:{}:stats", self.prefix, user)
    }

    fn users_key(&self) -> String {
        format!("{}users", self.prefix)
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(
                self.client
                    .get_connection_manager()
                    .await
                    .context("connect to redis")?,
            );
        }
        guard
            .as_ref()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("redis connection unavailable"))
    }

    /// Drops the cached connection after a failed command so the next call reconnects.
    async fn check<T>(&self, result: RedisResult<T>) -> RedisResult<T> {
        if let Err(err) = &result {
            tracing::warn!("Redis ledger command failed: {err}");
            *self.connection.lock().await = None;
        }
        result
    }

    async fn read_stats(&self, user: &UserId) -> Result<Option<UserStats>> {
        let mut conn = self.connection().await?;
        let result: RedisResult<HashMap<String, u64>> = conn.hgetall(self.stats_key(user)).await;
        let fields = self.check(result).await.context("redis read stats")?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(stats_from_fields(&fields)))
    }
}

fn stats_from_fields(fields: &HashMap<String, u64>) -> UserStats {
    let field = |name: &str| fields.get(name).copied().unwrap_or_default();
    UserStats {
        total_games: field(FIELD_TOTAL_GAMES),
        wins: field(FIELD_WINS),
        losses: field(FIELD_LOSSES),
    }
}

fn decode_entry(raw: &str) -> Result<HistoryEntry> {
    serde_json::from_str(raw).context("decode history entry")
}

impl Store for RedisStore {
    async fn get(&self, key: &Key) -> Result<Option<Value>> {
        match key {
            Key::History(user, id) => {
                let mut conn = self.connection().await?;
                let result: RedisResult<Option<String>> =
                    conn.hget(self.history_key(user), id).await;
                let raw = self.check(result).await.context("redis read history entry")?;
                raw.map(|raw| decode_entry(&raw).map(Value::History))
                    .transpose()
            }
            Key::Stats(user) => Ok(self.read_stats(user).await?.map(Value::Stats)),
        }
    }

    async fn set(&self, key: Key, value: Value) -> Result<()> {
        let mut conn = self.connection().await?;
        match (key, value) {
            (Key::History(user, id), Value::History(entry)) => {
                let raw = serde_json::to_string(&entry).context("encode history entry")?;
                let result: RedisResult<()> = conn.hset(self.history_key(&user), id, raw).await;
                self.check(result).await.context("redis write history entry")?;
            }
            (Key::Stats(user), Value::Stats(stats)) => {
                let result: RedisResult<()> = redis::pipe()
                    .atomic()
                    .hset_multiple(
                        self.stats_key(&user),
                        &[
                            (FIELD_TOTAL_GAMES, stats.total_games),
                            (FIELD_WINS, stats.wins),
                            (FIELD_LOSSES, stats.losses),
                        ],
                    )
                    .ignore()
                    .sadd(self.users_key(), user.as_str())
                    .ignore()
                    .query_async(&mut conn)
                    .await;
                self.check(result).await.context("redis write stats")?;
            }
            (key, value) => bail!("value does not match key: {key:?} => {value:?}"),
        }
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        let mut conn = self.connection().await?;
        match key {
            Key::History(user, id) => {
                let result: RedisResult<()> = conn.hdel(self.history_key(user), id).await;
                self.check(result).await.context("redis delete history entry")?;
            }
            Key::Stats(user) => {
                let result: RedisResult<()> = redis::pipe()
                    .atomic()
                    .del(self.stats_key(user))
                    .ignore()
                    .srem(self.users_key(), user.as_str())
                    .ignore()
                    .query_async(&mut conn)
                    .await;
                self.check(result).await.context("redis delete stats")?;
            }
        }
        Ok(())
    }

    async fn list_by_user(&self, user: &UserId) -> Result<Vec<HistoryEntry>> {
        let mut conn = self.connection().await?;
        let result: RedisResult<Vec<String>> = conn.hvals(self.history_key(user)).await;
        let raws = self.check(result).await.context("redis list history")?;
        raws.iter().map(|raw| decode_entry(raw)).collect()
    }

    async fn list_stats(&self) -> Result<Vec<(UserId, UserStats)>> {
        let mut conn = self.connection().await?;
        let result: RedisResult<Vec<String>> = conn.smembers(self.users_key()).await;
        let users = self.check(result).await.context("redis list users")?;

        let mut all = Vec::with_capacity(users.len());
        for user in users {
            let user = UserId::from(user);
            if let Some(stats) = self.read_stats(&user).await? {
                all.push((user, stats));
            }
        }
        Ok(all)
    }

    async fn increment_stats(&self, user: &UserId, outcome: GameOutcome) -> Result<UserStats> {
        let (wins, losses): (i64, i64) = match outcome {
            GameOutcome::Win => (1, 0),
            GameOutcome::Loss => (0, 1),
        };
        let key = self.stats_key(user);
        let mut conn = self.connection().await?;
        // HINCRBY by zero reads the other counter inside the same transaction.
        let result: RedisResult<(u64, u64, u64)> = redis::pipe()
            .atomic()
            .hincr(&key, FIELD_TOTAL_GAMES, 1)
            .hincr(&key, FIELD_WINS, wins)
            .hincr(&key, FIELD_LOSSES, losses)
            .sadd(self.users_key(), user.as_str())
            .ignore()
            .query_async(&mut conn)
            .await;
        let (total_games, wins, losses) = self.check(result).await.context("redis increment stats")?;
        Ok(UserStats {
            total_games,
            wins,
            losses,
        })
    }
}
