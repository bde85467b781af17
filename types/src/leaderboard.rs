use serde::{Deserialize, Serialize};

use crate::history::{UserId, UserStats};

/// Leaderboard row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub user: UserId,
    pub stats: UserStats,
    pub rank: u32,
}

/// Users ranked by wins.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaderboard {
    pub entries: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    /// Ranks by wins descending, then fewer games played, then user id.
    ///
    /// A `limit` of 0 keeps every user.
    pub fn rank(stats: impl IntoIterator<Item = (UserId, UserStats)>, limit: usize) -> Self {
        let mut entries: Vec<LeaderboardEntry> = stats
            .into_iter()
            .filter(|(_, stats)| stats.total_games > 0)
            .map(|(user, stats)| LeaderboardEntry {
                user,
                stats,
                rank: 0,
            })
            .collect();

        entries.sort_by(|a, b| {
            b.stats
                .wins
                .cmp(&a.stats.wins)
                .then(a.stats.total_games.cmp(&b.stats.total_games))
                .then_with(|| a.user.cmp(&b.user))
        });

        if limit > 0 {
            entries.truncate(limit);
        }
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.rank = (i + 1) as u32;
        }
        Self { entries }
    }
}
