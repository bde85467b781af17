pub mod amount;
pub use amount::{
    extract_decimal_amount, format_amount_display, format_history_date,
    reward_amount_from_display,
};
pub mod history;
pub use history::{
    GameOutcome, HistoryEntry, HistoryInvariantError, HistoryUpdate, PaymentStatus, UserId,
    UserStats, UNKNOWN_GAME,
};
pub mod leaderboard;
pub use leaderboard::{Leaderboard, LeaderboardEntry};
