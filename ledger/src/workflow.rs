//! Sequences ledger writes around wallet transfers.
//!
//! A win is written as `pending` before any transfer is attempted, so a
//! payout can never happen without a ledger entry. The entry only becomes
//! `completed` once the transfer returns; failures leave it `pending` with
//! the failure text as its status message, ready for a retry.

use arcade_types::amount::{extract_decimal_amount, is_positive_amount, reward_amount_from_display};
use arcade_types::{GameOutcome, HistoryEntry, HistoryUpdate, PaymentStatus};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::LedgerConfig;
use crate::history::{HistoryStore, RecordRequest};
use crate::identity::Identity;
use crate::store::Store;
use crate::transfer::{MasterWalletTransfer, RewardTransfer, Transfer, TransferError};
use crate::{Error, Result};

pub const REWARD_REJECTED: &str = "Reward transaction was rejected by the wallet owner.";
pub const ENTRY_FEE_REJECTED: &str = "Entry fee transaction was rejected by the wallet owner.";

/// Payout request for a game the player just won.
#[derive(Clone, Copy, Debug)]
pub struct WinReward<'a> {
    pub game_name: &'a str,
    pub reward_amount: &'a str,
    pub player_wallet_address: Option<&'a str>,
}

/// Second attempt at paying out a pending entry.
#[derive(Clone, Copy, Debug)]
pub struct RetryReward<'a> {
    pub entry: &'a HistoryEntry,
    pub player_wallet_address: Option<&'a str>,
}

#[derive(Clone, Copy, Debug)]
pub struct EntryFee<'a> {
    pub amount: &'a str,
    pub player_wallet_address: Option<&'a str>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardOutcome {
    pub entry: HistoryEntry,
    pub tx_hash: Option<String>,
}

/// How a game ended, as reported to [`RewardWorkflow::settle`].
#[derive(Clone, Copy, Debug)]
pub enum Settlement<'a> {
    Win {
        reward_amount: &'a str,
        player_wallet_address: Option<&'a str>,
    },
    Loss {
        amount: &'a str,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Settled {
    Reward(RewardOutcome),
    Loss(HistoryEntry),
}

/// One round of a game; its outcome is recorded at most once.
#[derive(Clone, Debug)]
pub struct GameSession {
    game_name: String,
    recorded: bool,
}

impl GameSession {
    pub fn new(game_name: impl Into<String>) -> Self {
        Self {
            game_name: game_name.into(),
            recorded: false,
        }
    }

    pub fn game_name(&self) -> &str {
        &self.game_name
    }

    pub fn already_recorded(&self) -> bool {
        self.recorded
    }

    /// Latches the session. Returns false if it was already latched.
    pub fn mark_recorded(&mut self) -> bool {
        !std::mem::replace(&mut self.recorded, true)
    }

    /// Starts a new round.
    pub fn reset(&mut self) {
        self.recorded = false;
    }
}

fn require_wallet(address: Option<&str>) -> Result<&str> {
    address
        .map(str::trim)
        .filter(|address| !address.is_empty())
        .ok_or(Error::WalletRequired)
}

/// Maps a transfer failure to the ledger error and the message stored on the entry.
fn classify(err: TransferError, rejection: &str) -> Error {
    if err.is_user_rejected() {
        Error::TransferRejected(rejection.to_string())
    } else {
        Error::TransferFailed(err.message)
    }
}

pub struct RewardWorkflow<S, I, T> {
    history: HistoryStore<S, I>,
    transfer: T,
    master_wallet_address: String,
    pending_message: String,
    success_message: String,
}

impl<S: Store, I: Identity, T: Transfer> RewardWorkflow<S, I, T> {
    pub fn new(history: HistoryStore<S, I>, transfer: T, config: &LedgerConfig) -> Self {
        Self {
            history,
            transfer,
            master_wallet_address: config.master_wallet_address().to_string(),
            pending_message: config.pending_message().to_string(),
            success_message: config.success_message().to_string(),
        }
    }

    pub fn history(&self) -> &HistoryStore<S, I> {
        &self.history
    }

    pub fn transfer(&self) -> &T {
        &self.transfer
    }

    /// Records a pending win, then pays it out from the master wallet.
    pub async fn reward_player_for_game_win(&self, request: WinReward<'_>) -> Result<RewardOutcome> {
        let wallet = require_wallet(request.player_wallet_address)?;
        let entry = self
            .history
            .record_game_result(
                RecordRequest::new(request.game_name, GameOutcome::Win, request.reward_amount)
                    .status(PaymentStatus::Pending)
                    .message(self.pending_message.as_str()),
            )
            .await?;
        info!(id = %entry.id, game = %entry.game_name, amount = %entry.amount_display, "reward pending");
        self.pay_out(entry, wallet, request.reward_amount).await
    }

    /// Re-attempts the transfer for a pending entry. Stats are left untouched.
    pub async fn retry_pending_reward(&self, request: RetryReward<'_>) -> Result<RewardOutcome> {
        let entry = request.entry;
        if !entry.is_pending() {
            return Err(Error::NotPending {
                status: entry.status,
            });
        }
        let wallet = require_wallet(request.player_wallet_address)?;
        // The caller's copy may be stale; never pay an entry that has since settled.
        if let Some(stored) = self.history.get_game_history_entry(&entry.id).await? {
            if !stored.is_pending() {
                return Err(Error::NotPending {
                    status: stored.status,
                });
            }
        }
        let amount = reward_amount_from_display(&entry.amount_display);
        info!(id = %entry.id, %amount, "retrying pending reward");
        self.pay_out(entry.clone(), wallet, &amount).await
    }

    pub async fn record_loss(&self, game_name: &str, amount: &str) -> Result<HistoryEntry> {
        self.history
            .record_game_result(
                RecordRequest::new(game_name, GameOutcome::Loss, amount)
                    .status(PaymentStatus::Completed),
            )
            .await
    }

    /// Sends an entry fee to the master wallet. A zero fee sends nothing.
    pub async fn pay_entry_fee(&self, request: EntryFee<'_>) -> Result<Option<String>> {
        let amount = extract_decimal_amount(request.amount);
        if !is_positive_amount(&amount) {
            return Ok(None);
        }
        let wallet = require_wallet(request.player_wallet_address)?;
        let receipt = self
            .transfer
            .send_to_master_wallet(MasterWalletTransfer {
                master_wallet_address: &self.master_wallet_address,
                from: wallet,
                amount: &amount,
            })
            .await
            .map_err(|err| classify(err, ENTRY_FEE_REJECTED))?;
        info!(%amount, tx_hash = ?receipt.tx_hash, "entry fee paid");
        Ok(receipt.tx_hash)
    }

    /// Gives up on a pending reward. Failed entries cannot be retried.
    pub async fn mark_failed(&self, id: &str, reason: &str) -> Result<Option<HistoryEntry>> {
        let Some(entry) = self.history.get_game_history_entry(id).await? else {
            return Ok(None);
        };
        if !entry.is_pending() {
            return Err(Error::NotPending {
                status: entry.status,
            });
        }
        let update = HistoryUpdate::default()
            .status(PaymentStatus::Failed)
            .message(reason);
        let failed = self.history.update_game_history_entry(id, update).await?;
        warn!(id, reason, "reward marked failed");
        Ok(failed)
    }

    /// Records the outcome of `session` unless it was already recorded.
    pub async fn settle(&self, session: &mut GameSession, settlement: Settlement<'_>) -> Result<Settled> {
        if !session.mark_recorded() {
            return Err(Error::AlreadyRecorded);
        }
        let result = match settlement {
            Settlement::Win {
                reward_amount,
                player_wallet_address,
            } => self
                .reward_player_for_game_win(WinReward {
                    game_name: session.game_name(),
                    reward_amount,
                    player_wallet_address,
                })
                .await
                .map(Settled::Reward),
            Settlement::Loss { amount } => self
                .record_loss(session.game_name(), amount)
                .await
                .map(Settled::Loss),
        };
        // Transfer failures come after the pending entry is written; every
        // other error leaves the round unrecorded.
        let written = matches!(
            result,
            Ok(_) | Err(Error::TransferRejected(_) | Error::TransferFailed(_))
        );
        if !written {
            session.reset();
        }
        result
    }

    async fn pay_out(&self, entry: HistoryEntry, wallet: &str, amount: &str) -> Result<RewardOutcome> {
        let result = self
            .transfer
            .reward_player(RewardTransfer {
                master_wallet_address: &self.master_wallet_address,
                player_wallet_address: wallet,
                reward_amount: amount,
            })
            .await;
        match result {
            Ok(receipt) => {
                let update = HistoryUpdate::default()
                    .status(PaymentStatus::Completed)
                    .tx_hash(receipt.tx_hash.clone())
                    .message(self.success_message.as_str());
                let entry = self.apply_update(&entry, update).await;
                info!(id = %entry.id, tx_hash = ?receipt.tx_hash, "reward sent");
                Ok(RewardOutcome {
                    entry,
                    tx_hash: receipt.tx_hash,
                })
            }
            Err(err) => {
                let error = classify(err, REWARD_REJECTED);
                let update = HistoryUpdate::default().message(error.to_string());
                self.apply_update(&entry, update).await;
                warn!(id = %entry.id, "reward transfer failed: {error}");
                Err(error)
            }
        }
    }

    /// Persists `update`; falls back to a local merge when the stored entry is gone or unwritable.
    async fn apply_update(&self, entry: &HistoryEntry, update: HistoryUpdate) -> HistoryEntry {
        match self
            .history
            .update_game_history_entry(&entry.id, update.clone())
            .await
        {
            Ok(Some(updated)) => updated,
            Ok(None) => {
                warn!(id = %entry.id, "history entry missing while updating reward status");
                entry.merged(&update)
            }
            Err(err) => {
                warn!(id = %entry.id, "Failed to update reward status: {err}");
                entry.merged(&update)
            }
        }
    }
}
