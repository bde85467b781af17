use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error as ThisError;

use crate::amount::format_amount_display;

/// Label stored when a caller records a game without a name.
pub const UNKNOWN_GAME: &str = "Unknown Game";

const ID_SUFFIX_RANGE: u32 = 1_000_000;

/// Identifier of the user owning a history log and stats record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameOutcome {
    Win,
    Loss,
}

impl GameOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Win => "win",
            Self::Loss => "loss",
        }
    }

    /// Sign used in the entry's display amount.
    pub fn sign(self) -> char {
        match self {
            Self::Win => '+',
            Self::Loss => '-',
        }
    }
}

impl fmt::Display for GameOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameOutcome {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "win" => Ok(Self::Win),
            "loss" => Ok(Self::Loss),
            _ => Err("valid values: win, loss"),
        }
    }
}

/// Payment state of a ledger entry.
///
/// Documents written before payment tracking existed carry no status and
/// read back as [`PaymentStatus::Completed`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    #[default]
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err("valid values: pending, completed, failed"),
        }
    }
}

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum HistoryInvariantError {
    #[error("loss entries must be completed (got={status})")]
    LossNotCompleted { status: PaymentStatus },
    #[error("loss entries never carry a tx hash")]
    LossWithTxHash,
    #[error("tx hash set on an entry that is not completed (status={status})")]
    TxHashWithoutCompletion { status: PaymentStatus },
}

/// One ledger entry: the outcome of a single game and its payment state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub game_name: String,
    pub outcome: GameOutcome,
    pub amount_display: String,
    pub played_at: DateTime<Utc>,
    #[serde(default)]
    pub status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default)]
    pub tx_hash: Option<String>,
}

impl HistoryEntry {
    /// Builds a completed entry with a display amount signed by `outcome`.
    pub fn new(
        id: String,
        game_name: &str,
        outcome: GameOutcome,
        amount: &str,
        played_at: DateTime<Utc>,
    ) -> Self {
        let game_name = match game_name.trim() {
            "" => UNKNOWN_GAME.to_string(),
            _ => game_name.to_string(),
        };
        Self {
            id,
            game_name,
            outcome,
            amount_display: format_amount_display(amount, outcome),
            played_at,
            status: PaymentStatus::Completed,
            status_message: None,
            tx_hash: None,
        }
    }

    /// Ids are `<unix-millis>-<suffix>`; unique within one user's log.
    pub fn generate_id(now: DateTime<Utc>, rng: &mut impl Rng) -> String {
        format!(
            "{}-{}",
            now.timestamp_millis(),
            rng.gen_range(0..ID_SUFFIX_RANGE)
        )
    }

    pub fn with_status(mut self, status: PaymentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_status_message(mut self, message: Option<String>) -> Self {
        self.status_message = message;
        self
    }

    pub fn with_tx_hash(mut self, tx_hash: Option<String>) -> Self {
        self.tx_hash = tx_hash;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == PaymentStatus::Pending
    }

    pub fn validate_invariants(&self) -> Result<(), HistoryInvariantError> {
        if self.outcome == GameOutcome::Loss && self.status != PaymentStatus::Completed {
            return Err(HistoryInvariantError::LossNotCompleted {
                status: self.status,
            });
        }
        if self.outcome == GameOutcome::Loss && self.tx_hash.is_some() {
            return Err(HistoryInvariantError::LossWithTxHash);
        }
        if self.tx_hash.is_some() && self.status != PaymentStatus::Completed {
            return Err(HistoryInvariantError::TxHashWithoutCompletion {
                status: self.status,
            });
        }
        Ok(())
    }

    /// Returns a copy of this entry with every field set in `update` replaced.
    pub fn merged(&self, update: &HistoryUpdate) -> Self {
        let mut next = self.clone();
        if let Some(status) = update.status {
            next.status = status;
        }
        if let Some(message) = &update.status_message {
            next.status_message = message.clone();
        }
        if let Some(tx_hash) = &update.tx_hash {
            next.tx_hash = tx_hash.clone();
        }
        if let Some(amount_display) = &update.amount_display {
            next.amount_display = amount_display.clone();
        }
        if let Some(played_at) = update.played_at {
            next.played_at = played_at;
        }
        next
    }
}

/// Partial update merged into a stored [`HistoryEntry`].
///
/// `status_message` and `tx_hash` distinguish "leave as is" (`None`) from
/// "clear" (`Some(None)`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistoryUpdate {
    pub status: Option<PaymentStatus>,
    pub status_message: Option<Option<String>>,
    pub tx_hash: Option<Option<String>>,
    pub amount_display: Option<String>,
    pub played_at: Option<DateTime<Utc>>,
}

impl HistoryUpdate {
    pub fn status(mut self, status: PaymentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(Some(message.into()));
        self
    }

    pub fn clear_message(mut self) -> Self {
        self.status_message = Some(None);
        self
    }

    pub fn tx_hash(mut self, tx_hash: Option<String>) -> Self {
        self.tx_hash = Some(tx_hash);
        self
    }
}

/// Running totals for one user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserStats {
    pub total_games: u64,
    pub wins: u64,
    pub losses: u64,
}

impl UserStats {
    pub fn record(&mut self, outcome: GameOutcome) {
        self.total_games = self.total_games.saturating_add(1);
        match outcome {
            GameOutcome::Win => self.wins = self.wins.saturating_add(1),
            GameOutcome::Loss => self.losses = self.losses.saturating_add(1),
        }
    }

    pub fn recorded(mut self, outcome: GameOutcome) -> Self {
        self.record(outcome);
        self
    }

    pub fn is_consistent(&self) -> bool {
        self.wins.checked_add(self.losses) == Some(self.total_games)
    }
}
