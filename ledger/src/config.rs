use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;
pub const DEFAULT_PENDING_MESSAGE: &str = "Awaiting master approval";
pub const DEFAULT_SUCCESS_MESSAGE: &str = "Reward sent";
pub const DEFAULT_REDIS_PREFIX: &str = "arcade:ledger:";

const ENV_HISTORY_CAPACITY: &str = "ARCADE_HISTORY_CAPACITY";
const ENV_MASTER_WALLET: &str = "ARCADE_MASTER_WALLET";
const ENV_RPC_URL: &str = "ARCADE_RPC_URL";

/// Where ledger documents live.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
    Redis,
}

impl std::str::FromStr for StoreBackend {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            "redis" => Ok(Self::Redis),
            _ => Err("valid values: memory, sqlite, redis"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Entries kept per user; `None` disables the retention trim.
    pub history_capacity: Option<usize>,
    pub master_wallet_address: Option<String>,
    pub pending_message: Option<String>,
    pub success_message: Option<String>,
    pub rpc_url: Option<String>,
    pub redis_prefix: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            history_capacity: Some(DEFAULT_HISTORY_CAPACITY),
            master_wallet_address: None,
            pending_message: Some(DEFAULT_PENDING_MESSAGE.to_string()),
            success_message: Some(DEFAULT_SUCCESS_MESSAGE.to_string()),
            rpc_url: None,
            redis_prefix: Some(DEFAULT_REDIS_PREFIX.to_string()),
        }
    }
}

impl LedgerConfig {
    /// Defaults overlaid with `ARCADE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(capacity) = lookup(ENV_HISTORY_CAPACITY).and_then(|v| v.trim().parse().ok()) {
            config.history_capacity = (capacity > 0).then_some(capacity);
        }
        if let Some(address) = non_empty(lookup(ENV_MASTER_WALLET)) {
            config.master_wallet_address = Some(address);
        }
        if let Some(url) = non_empty(lookup(ENV_RPC_URL)) {
            config.rpc_url = Some(url);
        }
        config
    }

    pub fn history_capacity(&self) -> Option<usize> {
        self.history_capacity.filter(|capacity| *capacity > 0)
    }

    pub fn master_wallet_address(&self) -> &str {
        self.master_wallet_address.as_deref().unwrap_or_default()
    }

    pub fn pending_message(&self) -> &str {
        self.pending_message
            .as_deref()
            .unwrap_or(DEFAULT_PENDING_MESSAGE)
    }

    pub fn success_message(&self) -> &str {
        self.success_message
            .as_deref()
            .unwrap_or(DEFAULT_SUCCESS_MESSAGE)
    }

    pub fn redis_prefix(&self) -> &str {
        self.redis_prefix.as_deref().unwrap_or(DEFAULT_REDIS_PREFIX)
    }

    /// Returns the configured RPC endpoint after checking its scheme.
    pub fn rpc_url(&self) -> anyhow::Result<&str> {
        let Some(raw) = self.rpc_url.as_deref() else {
            bail!("no RPC URL configured (set --rpc-url or {ENV_RPC_URL})");
        };
        let parsed = Url::parse(raw).context("parse rpc url")?;
        match parsed.scheme() {
            "http" | "https" => Ok(raw),
            other => bail!("invalid RPC URL scheme: {other} (expected http or https)"),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
