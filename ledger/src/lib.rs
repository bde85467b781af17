//! Per-user game history ledger, win/loss statistics, and the reward
//! workflow that sequences ledger state around on-chain transfers.

use arcade_types::{HistoryInvariantError, PaymentStatus};
use thiserror::Error;

pub mod config;
pub use config::{LedgerConfig, StoreBackend};
pub mod history;
pub use history::{HistoryStore, RecordRequest};
pub mod identity;
pub use identity::{DeviceIdentity, Identity, SessionIdentity};
pub mod store;
pub use store::{Key, MemoryStore, RedisStore, SqliteStore, Store, Value};
pub mod transfer;
pub use transfer::{
    EvmTransfer, MasterWalletTransfer, RewardTransfer, Transfer, TransferCode, TransferError,
    TransferReceipt,
};
pub mod workflow;
pub use workflow::{
    EntryFee, GameSession, RetryReward, RewardOutcome, RewardWorkflow, Settled, Settlement,
    WinReward,
};

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

/// Error type for ledger and reward operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("a connected wallet is required")]
    WalletRequired,
    #[error("user must be authenticated to access game history")]
    NotAuthenticated,
    #[error("only pending rewards can be retried (status={status})")]
    NotPending { status: PaymentStatus },
    #[error("{0}")]
    TransferRejected(String),
    #[error("{0}")]
    TransferFailed(String),
    #[error("store unavailable: {0:#}")]
    StoreUnavailable(anyhow::Error),
    #[error("invalid ledger entry: {0}")]
    InvalidEntry(#[from] HistoryInvariantError),
    #[error("game outcome already recorded for this session")]
    AlreadyRecorded,
}

/// Result type for ledger and reward operations.
pub type Result<T> = std::result::Result<T, Error>;
