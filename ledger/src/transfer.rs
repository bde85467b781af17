//! On-chain transfer collaborator.
//!
//! The ledger never signs anything itself: it hands a `from`/`to`/`value`
//! request to a wallet-backed [`Transfer`] and records whatever comes back.

use anyhow::Context;
use arcade_types::amount::{extract_decimal_amount, is_positive_amount};
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::types::{Address, TransactionRequest, U256};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use thiserror::Error;

const ETHER_DECIMALS: usize = 18;

/// Numeric codes wallets use for a user-declined request.
const USER_REJECTED_CODES: [i64; 2] = [4001, 5000];
const USER_REJECTED_NAME: &str = "action_rejected";
const USER_REJECTED_PHRASES: [&str; 3] = ["user rejected", "user denied", "rejected the request"];

/// Error code attached by a wallet or JSON-RPC provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferCode {
    Numeric(i64),
    Named(String),
}

impl fmt::Display for TransferCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(code) => write!(f, "{code}"),
            Self::Named(code) => f.write_str(code),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TransferError {
    pub code: Option<TransferCode>,
    pub message: String,
}

impl TransferError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: TransferCode) -> Self {
        self.code = Some(code);
        self
    }

    /// True when the wallet owner declined to sign.
    pub fn is_user_rejected(&self) -> bool {
        match &self.code {
            Some(TransferCode::Numeric(code)) if USER_REJECTED_CODES.contains(code) => {
                return true
            }
            Some(TransferCode::Named(code)) if code.eq_ignore_ascii_case(USER_REJECTED_NAME) => {
                return true
            }
            _ => {}
        }
        let message = self.message.to_lowercase();
        USER_REJECTED_PHRASES
            .iter()
            .any(|phrase| message.contains(phrase))
    }
}

/// What a transfer returned.
#[derive(Clone, Debug, PartialEq)]
pub struct TransferReceipt {
    pub tx_hash: Option<String>,
    pub raw: serde_json::Value,
}

/// Payout from the master wallet to a player.
#[derive(Clone, Copy, Debug)]
pub struct RewardTransfer<'a> {
    pub master_wallet_address: &'a str,
    pub player_wallet_address: &'a str,
    pub reward_amount: &'a str,
}

/// Entry fee from a player to the master wallet.
#[derive(Clone, Copy, Debug)]
pub struct MasterWalletTransfer<'a> {
    pub master_wallet_address: &'a str,
    pub from: &'a str,
    pub amount: &'a str,
}

pub trait Transfer {
    fn reward_player(
        &self,
        request: RewardTransfer<'_>,
    ) -> impl Future<Output = Result<TransferReceipt, TransferError>>;

    fn send_to_master_wallet(
        &self,
        request: MasterWalletTransfer<'_>,
    ) -> impl Future<Output = Result<TransferReceipt, TransferError>>;
}

/// Converts a decimal ether amount to wei.
///
/// Fraction digits past 18 are truncated and non-digits in the fraction are ignored.
pub fn to_wei(amount: &str) -> Result<U256, TransferError> {
    let normalized = amount.trim();
    if normalized.is_empty() {
        return Ok(U256::zero());
    }
    let (whole, fraction) = normalized.split_once('.').unwrap_or((normalized, ""));
    let whole = if whole.is_empty() { "0" } else { whole };
    let whole = U256::from_dec_str(whole)
        .map_err(|err| TransferError::new(format!("invalid amount {amount:?}: {err}")))?;

    let mut digits: String = fraction
        .chars()
        .filter(char::is_ascii_digit)
        .take(ETHER_DECIMALS)
        .collect();
    while digits.len() < ETHER_DECIMALS {
        digits.push('0');
    }
    let fraction = U256::from_dec_str(&digits)
        .map_err(|err| TransferError::new(format!("invalid amount {amount:?}: {err}")))?;

    whole
        .checked_mul(U256::exp10(ETHER_DECIMALS))
        .and_then(|scaled| scaled.checked_add(fraction))
        .ok_or_else(|| TransferError::new(format!("amount {amount:?} overflows")))
}

fn parse_address(label: &str, raw: &str) -> Result<Address, TransferError> {
    let trimmed = raw.trim();
    let hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    Address::from_str(hex)
        .map_err(|err| TransferError::new(format!("invalid {label} address {raw:?}: {err}")))
}

fn provider_error(err: ProviderError) -> TransferError {
    match err.as_error_response() {
        Some(response) => TransferError::new(response.message.clone())
            .with_code(TransferCode::Numeric(response.code)),
        None => TransferError::new(err.to_string()),
    }
}

/// Sends native-token transfers with `eth_sendTransaction` on a JSON-RPC endpoint.
///
/// Signing is left to the endpoint (a wallet bridge or a node with unlocked
/// accounts), which is also where user rejections come from.
pub struct EvmTransfer {
    provider: Provider<Http>,
}

impl EvmTransfer {
    pub fn new(rpc_url: &str) -> anyhow::Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url).context("invalid EVM RPC URL")?;
        Ok(Self { provider })
    }

    async fn send(
        &self,
        from: Address,
        to: Address,
        amount: &str,
    ) -> Result<TransferReceipt, TransferError> {
        let value = to_wei(amount)?;
        let tx = TransactionRequest::new().from(from).to(to).value(value);
        let pending = self
            .provider
            .send_transaction(tx, None)
            .await
            .map_err(provider_error)?;
        let tx_hash = format!("{:#x}", pending.tx_hash());
        tracing::debug!(%tx_hash, %from, %to, %value, "transfer submitted");
        Ok(TransferReceipt {
            raw: serde_json::json!({ "hash": tx_hash }),
            tx_hash: Some(tx_hash),
        })
    }
}

impl Transfer for EvmTransfer {
    async fn reward_player(
        &self,
        request: RewardTransfer<'_>,
    ) -> Result<TransferReceipt, TransferError> {
        if request.master_wallet_address.trim().is_empty()
            || request.player_wallet_address.trim().is_empty()
        {
            return Err(TransferError::new(
                "Both master and player wallet addresses are required to reward a player.",
            ));
        }
        let amount = extract_decimal_amount(request.reward_amount);
        if !is_positive_amount(&amount) {
            return Err(TransferError::new("Reward amount must be greater than zero."));
        }
        let from = parse_address("master wallet", request.master_wallet_address)?;
        let to = parse_address("player wallet", request.player_wallet_address)?;
        self.send(from, to, &amount).await
    }

    async fn send_to_master_wallet(
        &self,
        request: MasterWalletTransfer<'_>,
    ) -> Result<TransferReceipt, TransferError> {
        let amount = extract_decimal_amount(request.amount);
        if !is_positive_amount(&amount) {
            return Ok(TransferReceipt {
                tx_hash: None,
                raw: serde_json::Value::Null,
            });
        }
        let from = parse_address("player wallet", request.from)?;
        let to = parse_address("master wallet", request.master_wallet_address)?;
        self.send(from, to, &amount).await
    }
}
