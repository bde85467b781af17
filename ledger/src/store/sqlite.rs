use anyhow::{Context, Result};
use arcade_types::{GameOutcome, HistoryEntry, UserId, UserStats};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{Key, Store, Value};

/// On-device ledger backed by a single SQLite file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("open ledger db")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory ledger db")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema_sqlite(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn init_schema_sqlite(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         CREATE TABLE IF NOT EXISTS game_history (
             user_id TEXT NOT NULL,
             id TEXT NOT NULL,
             played_at TEXT NOT NULL,
             entry TEXT NOT NULL,
             PRIMARY KEY (user_id, id)
         );
         CREATE INDEX IF NOT EXISTS game_history_played_at
             ON game_history (user_id, played_at DESC);
         CREATE TABLE IF NOT EXISTS user_stats (
             user_id TEXT PRIMARY KEY,
             total_games INTEGER NOT NULL,
             wins INTEGER NOT NULL,
             losses INTEGER NOT NULL
         );",
    )
    .context("init ledger schema")?;
    Ok(())
}

fn decode_entry(raw: &str) -> Result<HistoryEntry> {
    serde_json::from_str(raw).context("decode history entry")
}

fn read_stats(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserStats> {
    Ok(UserStats {
        total_games: row.get(0)?,
        wins: row.get(1)?,
        losses: row.get(2)?,
    })
}

impl Store for SqliteStore {
    async fn get(&self, key: &Key) -> Result<Option<Value>> {
        let conn = self.conn();
        match key {
            Key::History(user, id) => {
                let raw: Option<String> = conn
                    .query_row(
                        "SELECT entry FROM game_history WHERE user_id = ? AND id = ?",
                        params![user.as_str(), id],
                        |row| row.get(0),
                    )
                    .optional()
                    .context("read history entry")?;
                raw.map(|raw| decode_entry(&raw).map(Value::History))
                    .transpose()
            }
            Key::Stats(user) => {
                let stats = conn
                    .query_row(
                        "SELECT total_games, wins, losses FROM user_stats WHERE user_id = ?",
                        params![user.as_str()],
                        read_stats,
                    )
                    .optional()
                    .context("read user stats")?;
                Ok(stats.map(Value::Stats))
            }
        }
    }

    async fn set(&self, key: Key, value: Value) -> Result<()> {
        let conn = self.conn();
        match (key, value) {
            (Key::History(user, id), Value::History(entry)) => {
                let raw = serde_json::to_string(&entry).context("encode history entry")?;
                conn.execute(
                    "INSERT OR REPLACE INTO game_history (user_id, id, played_at, entry)
                     VALUES (?, ?, ?, ?)",
                    params![user.as_str(), id, entry.played_at.to_rfc3339(), raw],
                )
                .context("write history entry")?;
            }
            (Key::Stats(user), Value::Stats(stats)) => {
                conn.execute(
                    "INSERT OR REPLACE INTO user_stats (user_id, total_games, wins, losses)
                     VALUES (?, ?, ?, ?)",
                    params![user.as_str(), stats.total_games, stats.wins, stats.losses],
                )
                .context("write user stats")?;
            }
            (key, value) => anyhow::bail!("value does not match key: {key:?} => {value:?}"),
        }
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        let conn = self.conn();
        match key {
            Key::History(user, id) => conn
                .execute(
                    "DELETE FROM game_history WHERE user_id = ? AND id = ?",
                    params![user.as_str(), id],
                )
                .context("delete history entry")?,
            Key::Stats(user) => conn
                .execute(
                    "DELETE FROM user_stats WHERE user_id = ?",
                    params![user.as_str()],
                )
                .context("delete user stats")?,
        };
        Ok(())
    }

    async fn list_by_user(&self, user: &UserId) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT entry FROM game_history WHERE user_id = ?")
            .context("prepare history listing")?;
        let rows = stmt.query_map(params![user.as_str()], |row| row.get::<_, String>(0))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(decode_entry(&row?)?);
        }
        Ok(entries)
    }

    async fn list_stats(&self) -> Result<Vec<(UserId, UserStats)>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT total_games, wins, losses, user_id FROM user_stats")
            .context("prepare stats listing")?;
        let rows = stmt.query_map([], |row| {
            let stats = read_stats(row)?;
            let user: String = row.get(3)?;
            Ok((UserId::from(user), stats))
        })?;

        let mut all = Vec::new();
        for row in rows {
            all.push(row?);
        }
        Ok(all)
    }

    async fn increment_stats(&self, user: &UserId, outcome: GameOutcome) -> Result<UserStats> {
        let (wins, losses): (u64, u64) = match outcome {
            GameOutcome::Win => (1, 0),
            GameOutcome::Loss => (0, 1),
        };
        // A single upsert keeps concurrent writers from losing increments.
        self.conn()
            .query_row(
                "INSERT INTO user_stats (user_id, total_games, wins, losses)
                 VALUES (?1, 1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                     total_games = total_games + 1,
                     wins = wins + excluded.wins,
                     losses = losses + excluded.losses
                 RETURNING total_games, wins, losses",
                params![user.as_str(), wins, losses],
                read_stats,
            )
            .context("increment user stats")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcade_types::PaymentStatus;
    use chrono::{TimeZone, Utc};

    fn entry(id: &str, secs: i64) -> HistoryEntry {
        HistoryEntry::new(
            id.to_string(),
            "Card Match",
            GameOutcome::Win,
            "3",
            Utc.timestamp_opt(secs, 0).single().unwrap(),
        )
        .with_status(PaymentStatus::Pending)
        .with_status_message(Some("Awaiting master approval".into()))
    }

    #[tokio::test]
    async fn test_history_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let user = UserId::from("alice");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .set(
                    Key::History(user.clone(), "1".into()),
                    Value::History(entry("1", 10)),
                )
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let loaded = store
            .get(&Key::History(user.clone(), "1".into()))
            .await
            .unwrap();
        assert_eq!(loaded, Some(Value::History(entry("1", 10))));
        assert_eq!(store.list_by_user(&user).await.unwrap().len(), 1);
        assert!(store
            .list_by_user(&UserId::from("bob"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete_history_entry() {
        let store = SqliteStore::open_in_memory().unwrap();
        let user = UserId::from("alice");
        let key = Key::History(user.clone(), "1".into());
        store
            .set(key.clone(), Value::History(entry("1", 10)))
            .await
            .unwrap();
        store.delete(&key).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_increment_stats_upserts() {
        let store = SqliteStore::open_in_memory().unwrap();
        let user = UserId::from("alice");
        assert_eq!(store.get(&Key::Stats(user.clone())).await.unwrap(), None);

        store.increment_stats(&user, GameOutcome::Win).await.unwrap();
        store.increment_stats(&user, GameOutcome::Win).await.unwrap();
        let stats = store
            .increment_stats(&user, GameOutcome::Loss)
            .await
            .unwrap();
        assert_eq!(
            stats,
            UserStats {
                total_games: 3,
                wins: 2,
                losses: 1
            }
        );
        assert_eq!(
            store.get(&Key::Stats(user.clone())).await.unwrap(),
            Some(Value::Stats(stats))
        );
        assert_eq!(store.list_stats().await.unwrap(), vec![(user, stats)]);
    }

    #[tokio::test]
    async fn test_rejects_mismatched_value() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .set(
                Key::Stats(UserId::from("alice")),
                Value::History(entry("1", 10)),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not match"), "unexpected error: {err}");
    }
}
