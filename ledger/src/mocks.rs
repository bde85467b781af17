//! Test doubles for the store and transfer collaborators.

use anyhow::{bail, Result};
use arcade_types::{HistoryEntry, UserId, UserStats};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::store::{Key, Store, Value};
use crate::transfer::{
    MasterWalletTransfer, RewardTransfer, Transfer, TransferCode, TransferError, TransferReceipt,
};

/// Wraps a store and fails reads or writes on demand.
///
/// Stats increments go through the trait's default read-modify-write.
pub struct FaultyStore<S> {
    inner: S,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
    fail_stats_writes: AtomicBool,
    writes: AtomicUsize,
}

impl<S: Store> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            fail_stats_writes: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Fails only writes of stats records, so history writes still land.
    pub fn fail_stats_writes(&self, fail: bool) {
        self.fail_stats_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful `set` and `delete` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("injected read failure");
        }
        Ok(())
    }
}

impl<S: Store> Store for FaultyStore<S> {
    async fn get(&self, key: &Key) -> Result<Option<Value>> {
        self.check_read()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: Key, value: Value) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("injected write failure");
        }
        if matches!(key, Key::Stats(_)) && self.fail_stats_writes.load(Ordering::SeqCst) {
            bail!("injected stats write failure");
        }
        self.inner.set(key, value).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            bail!("injected delete failure");
        }
        self.inner.delete(key).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_by_user(&self, user: &UserId) -> Result<Vec<HistoryEntry>> {
        self.check_read()?;
        self.inner.list_by_user(user).await
    }

    async fn list_stats(&self) -> Result<Vec<(UserId, UserStats)>> {
        self.check_read()?;
        self.inner.list_stats().await
    }
}

/// Yields to the scheduler before every read and write, so concurrent
/// callers interleave inside the default read-modify-write increment.
pub struct YieldingStore<S> {
    inner: S,
}

impl<S: Store> YieldingStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: Store> Store for YieldingStore<S> {
    async fn get(&self, key: &Key) -> Result<Option<Value>> {
        tokio::task::yield_now().await;
        self.inner.get(key).await
    }

    async fn set(&self, key: Key, value: Value) -> Result<()> {
        tokio::task::yield_now().await;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn list_by_user(&self, user: &UserId) -> Result<Vec<HistoryEntry>> {
        self.inner.list_by_user(user).await
    }

    async fn list_stats(&self) -> Result<Vec<(UserId, UserStats)>> {
        self.inner.list_stats().await
    }
}

/// One call seen by [`MockTransfer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferCall {
    Reward {
        master: String,
        player: String,
        amount: String,
    },
    EntryFee {
        master: String,
        from: String,
        amount: String,
    },
}

/// Transfer collaborator that replays scripted results in order.
///
/// With nothing scripted every call succeeds with a generated hash.
#[derive(Default)]
pub struct MockTransfer {
    script: Mutex<VecDeque<std::result::Result<TransferReceipt, TransferError>>>,
    calls: Mutex<Vec<TransferCall>>,
}

impl MockTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed_with(self, tx_hash: &str) -> Self {
        self.push(Ok(receipt(tx_hash)));
        self
    }

    pub fn fail_with(self, message: &str) -> Self {
        self.push(Err(TransferError::new(message)));
        self
    }

    pub fn fail_with_code(self, code: i64, message: &str) -> Self {
        self.push(Err(
            TransferError::new(message).with_code(TransferCode::Numeric(code))
        ));
        self
    }

    pub fn push(&self, result: std::result::Result<TransferReceipt, TransferError>) {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(result);
    }

    pub fn calls(&self) -> Vec<TransferCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn next(&self, call: TransferCall) -> std::result::Result<TransferReceipt, TransferError> {
        let mut calls = self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        calls.push(call);
        let seq = calls.len();
        drop(calls);
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or_else(|| Ok(receipt(&format!("0x{seq:064x}"))))
    }
}

fn receipt(tx_hash: &str) -> TransferReceipt {
    TransferReceipt {
        tx_hash: Some(tx_hash.to_string()),
        raw: serde_json::json!({ "hash": tx_hash }),
    }
}

impl Transfer for MockTransfer {
    async fn reward_player(
        &self,
        request: RewardTransfer<'_>,
    ) -> std::result::Result<TransferReceipt, TransferError> {
        self.next(TransferCall::Reward {
            master: request.master_wallet_address.to_string(),
            player: request.player_wallet_address.to_string(),
            amount: request.reward_amount.to_string(),
        })
    }

    async fn send_to_master_wallet(
        &self,
        request: MasterWalletTransfer<'_>,
    ) -> std::result::Result<TransferReceipt, TransferError> {
        self.next(TransferCall::EntryFee {
            master: request.master_wallet_address.to_string(),
            from: request.from.to_string(),
            amount: request.amount.to_string(),
        })
    }
}
