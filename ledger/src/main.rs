//! Operator tooling for the arcade reward ledger.

use anyhow::{anyhow, Context, Result};
use arcade_ledger::{
    DeviceIdentity, EntryFee, EvmTransfer, HistoryStore, Identity, LedgerConfig,
    MasterWalletTransfer, MemoryStore, RecordRequest, RedisStore, RetryReward, RewardTransfer,
    RewardWorkflow, SessionIdentity, SqliteStore, Store, StoreBackend, Transfer, TransferError,
    TransferReceipt, WinReward,
};
use arcade_types::amount::format_history_date;
use arcade_types::{GameOutcome, HistoryEntry};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Arcade game history and reward ledger")]
struct Args {
    /// Ledger backend: memory, sqlite or redis.
    #[arg(long, default_value = "memory")]
    store: StoreBackend,

    /// SQLite database file (sqlite backend).
    #[arg(long, default_value = "arcade-ledger.db")]
    sqlite_path: PathBuf,

    #[arg(long, default_value = "redis://127.0.0.1/")]
    redis_url: String,

    /// Key prefix for the redis backend.
    #[arg(long)]
    redis_prefix: Option<String>,

    /// User whose ledger is read or written.
    #[arg(long)]
    user: Option<String>,

    /// Entries kept per user (0 disables the limit).
    #[arg(long)]
    history_capacity: Option<usize>,

    /// Master wallet paying rewards and collecting entry fees.
    #[arg(long)]
    master_wallet: Option<String>,

    /// EVM JSON-RPC endpoint used for transfers.
    #[arg(long)]
    rpc_url: Option<String>,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a game outcome without any transfer.
    Record {
        game: String,
        outcome: GameOutcome,
        amount: String,
    },
    /// List history, newest first.
    History {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show win/loss totals.
    Stats,
    /// Rank users by wins.
    Leaderboard {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Record a win and pay the reward from the master wallet.
    Reward {
        game: String,
        amount: String,
        wallet: String,
    },
    /// Retry the payout of a pending reward.
    Retry { id: String, wallet: String },
    /// Give up on a pending reward.
    Fail { id: String, reason: String },
    /// Send an entry fee to the master wallet.
    PayFee { amount: String, wallet: String },
}

impl Command {
    fn needs_transfer(&self) -> bool {
        matches!(
            self,
            Self::Reward { .. } | Self::Retry { .. } | Self::PayFee { .. }
        )
    }
}

/// Stand-in for commands that never move funds.
struct NoTransfer;

impl NoTransfer {
    fn refuse() -> std::result::Result<TransferReceipt, TransferError> {
        Err(TransferError::new("transfers are disabled for this command"))
    }
}

impl Transfer for NoTransfer {
    async fn reward_player(
        &self,
        _request: RewardTransfer<'_>,
    ) -> std::result::Result<TransferReceipt, TransferError> {
        Self::refuse()
    }

    async fn send_to_master_wallet(
        &self,
        _request: MasterWalletTransfer<'_>,
    ) -> std::result::Result<TransferReceipt, TransferError> {
        Self::refuse()
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Maps an optional arg value: 0 => None, Some(v) => Some(v), None => default
fn map_optional_limit(arg: Option<usize>, default: Option<usize>) -> Option<usize> {
    match arg {
        Some(0) => None,
        Some(v) => Some(v),
        None => default,
    }
}

/// Overlays command-line flags on `base` (defaults plus environment).
fn build_config(args: &Args, base: LedgerConfig) -> LedgerConfig {
    LedgerConfig {
        history_capacity: map_optional_limit(args.history_capacity, base.history_capacity),
        master_wallet_address: args.master_wallet.clone().or(base.master_wallet_address),
        rpc_url: args.rpc_url.clone().or(base.rpc_url),
        redis_prefix: args.redis_prefix.clone().or(base.redis_prefix),
        ..base
    }
}

/// History entry with its date rendered for display.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRow {
    #[serde(flatten)]
    entry: HistoryEntry,
    played_on: String,
}

impl From<HistoryEntry> for HistoryRow {
    fn from(entry: HistoryEntry) -> Self {
        Self {
            played_on: format_history_date(entry.played_at),
            entry,
        }
    }
}

fn to_json(value: impl Serialize) -> Result<Value> {
    serde_json::to_value(value).context("encode output")
}

async fn dispatch<S: Store, I: Identity>(
    store: S,
    identity: I,
    config: &LedgerConfig,
    command: Command,
) -> Result<Value> {
    let history = HistoryStore::new(store, identity, config);
    if command.needs_transfer() {
        let transfer = EvmTransfer::new(config.rpc_url()?)?;
        return run_workflow(RewardWorkflow::new(history, transfer, config), command).await;
    }
    match command {
        Command::Record {
            game,
            outcome,
            amount,
        } => to_json(
            history
                .record_game_result(RecordRequest::new(game, outcome, amount))
                .await?,
        ),
        Command::History { limit } => {
            let rows: Vec<HistoryRow> = history
                .get_game_history(limit)
                .await
                .into_iter()
                .map(HistoryRow::from)
                .collect();
            to_json(rows)
        }
        Command::Stats => to_json(history.get_user_stats().await),
        Command::Leaderboard { limit } => to_json(history.leaderboard(limit).await),
        command => run_workflow(RewardWorkflow::new(history, NoTransfer, config), command).await,
    }
}

async fn run_workflow<S: Store, I: Identity, T: Transfer>(
    workflow: RewardWorkflow<S, I, T>,
    command: Command,
) -> Result<Value> {
    match command {
        Command::Reward {
            game,
            amount,
            wallet,
        } => to_json(
            workflow
                .reward_player_for_game_win(WinReward {
                    game_name: &game,
                    reward_amount: &amount,
                    player_wallet_address: Some(&wallet),
                })
                .await?,
        ),
        Command::Retry { id, wallet } => {
            let entry = workflow
                .history()
                .get_game_history_entry(&id)
                .await?
                .ok_or_else(|| anyhow!("no history entry {id}"))?;
            to_json(
                workflow
                    .retry_pending_reward(RetryReward {
                        entry: &entry,
                        player_wallet_address: Some(&wallet),
                    })
                    .await?,
            )
        }
        Command::Fail { id, reason } => {
            let entry = workflow
                .mark_failed(&id, &reason)
                .await?
                .ok_or_else(|| anyhow!("no history entry {id}"))?;
            to_json(entry)
        }
        Command::PayFee { amount, wallet } => to_json(
            workflow
                .pay_entry_fee(EntryFee {
                    amount: &amount,
                    player_wallet_address: Some(&wallet),
                })
                .await?,
        ),
        command => Err(anyhow!("{command:?} is not a workflow command")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let config = build_config(&args, LedgerConfig::from_env());
    info!(store = ?args.store, user = ?args.user, "ledger command starting");

    let output = match args.store {
        StoreBackend::Memory => {
            let identity = device_identity(args.user.as_deref());
            dispatch(MemoryStore::new(), identity, &config, args.command).await?
        }
        StoreBackend::Sqlite => {
            let store = SqliteStore::open(&args.sqlite_path)
                .with_context(|| format!("open {}", args.sqlite_path.display()))?;
            let identity = device_identity(args.user.as_deref());
            dispatch(store, identity, &config, args.command).await?
        }
        StoreBackend::Redis => {
            let store = RedisStore::new(&args.redis_url, config.redis_prefix().to_string())?;
            let identity = match args.user.as_deref() {
                Some(user) => SessionIdentity::signed_in(user),
                None => SessionIdentity::default(),
            };
            dispatch(store, identity, &config, args.command).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn device_identity(user: Option<&str>) -> DeviceIdentity {
    user.map(DeviceIdentity::new).unwrap_or_default()
}
