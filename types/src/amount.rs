//! Helpers for the decimal amount strings carried by ledger entries.
//!
//! Amounts are kept as display strings end to end: the ledger never does
//! arithmetic on them, and conversion to on-chain units happens only at the
//! transfer boundary.

use chrono::{DateTime, Utc};

use crate::history::GameOutcome;

const EMPTY_AMOUNT: &str = "0";
const HISTORY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Strips surrounding whitespace and at most one leading sign.
fn normalise_amount(amount: &str) -> &str {
    let trimmed = amount.trim();
    if trimmed.is_empty() {
        return EMPTY_AMOUNT;
    }
    match trimmed.strip_prefix(['+', '-']) {
        Some(rest) => rest.trim(),
        None => trimmed,
    }
}

/// Formats `amount` with the sign for `outcome` (`+` for a win, `-` for a loss).
///
/// An amount that already carries a sign is normalised rather than doubled.
pub fn format_amount_display(amount: &str, outcome: GameOutcome) -> String {
    format!("{}{}", outcome.sign(), normalise_amount(amount))
}

/// Recovers the transfer amount from an entry's display amount.
pub fn reward_amount_from_display(display: &str) -> String {
    let trimmed = display.trim();
    trimmed.strip_prefix('+').unwrap_or(trimmed).trim().to_string()
}

/// Pulls the first decimal number out of free text such as `"2 CELO"` or `"0,5"`.
///
/// Returns `"0"` when no digits are present.
pub fn extract_decimal_amount(raw: &str) -> String {
    let normalized = raw.replace(',', ".");
    let bytes = normalized.as_bytes();
    let Some(start) = bytes.iter().position(u8::is_ascii_digit) else {
        return EMPTY_AMOUNT.to_string();
    };

    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    // A fraction only counts when at least one digit follows the dot.
    if end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    normalized[start..end].to_string()
}

/// True when `amount` parses to a strictly positive decimal.
pub fn is_positive_amount(amount: &str) -> bool {
    amount
        .split('.')
        .any(|part| part.bytes().any(|byte| (b'1'..=b'9').contains(&byte)))
}

/// Formats a ledger timestamp for history listings (`YYYY-MM-DD HH:MM`, UTC).
pub fn format_history_date(at: DateTime<Utc>) -> String {
    at.format(HISTORY_DATE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn test_format_amount_display() {
        assert_eq!(format_amount_display("5", GameOutcome::Win), "+5");
        assert_eq!(format_amount_display("5", GameOutcome::Loss), "-5");
        assert_eq!(format_amount_display("+5", GameOutcome::Win), "+5");
        assert_eq!(format_amount_display(" -0.25 ", GameOutcome::Win), "+0.25");
        assert_eq!(format_amount_display("", GameOutcome::Loss), "-0");
    }

    #[test]
    fn test_reward_amount_from_display() {
        assert_eq!(reward_amount_from_display("+2"), "2");
        assert_eq!(reward_amount_from_display(" +0.5 "), "0.5");
        assert_eq!(reward_amount_from_display("3"), "3");
    }

    #[test]
    fn test_extract_decimal_amount() {
        assert_eq!(extract_decimal_amount("2 CELO"), "2");
        assert_eq!(extract_decimal_amount("0,5 cUSD"), "0.5");
        assert_eq!(extract_decimal_amount("Reward: 1.25"), "1.25");
        assert_eq!(extract_decimal_amount("7."), "7");
        assert_eq!(extract_decimal_amount("free"), "0");
        assert_eq!(extract_decimal_amount(""), "0");
    }

    #[test]
    fn test_is_positive_amount() {
        assert!(is_positive_amount("0.01"));
        assert!(is_positive_amount("3"));
        assert!(!is_positive_amount("0"));
        assert!(!is_positive_amount("0.000"));
    }

    #[test]
    fn test_format_history_date() {
        let at = Utc
            .with_ymd_and_hms(2024, 3, 7, 9, 5, 59)
            .single()
            .expect("valid date");
        assert_eq!(format_history_date(at), "2024-03-07 09:05");
    }

    proptest! {
        /// Property: the display amount always carries exactly one sign.
        #[test]
        fn prop_display_has_single_sign(amount in "[+-]?[0-9]{1,6}(\\.[0-9]{1,4})?") {
            let win = format_amount_display(&amount, GameOutcome::Win);
            let loss = format_amount_display(&amount, GameOutcome::Loss);
            prop_assert!(win.starts_with('+'));
            prop_assert!(loss.starts_with('-'));
            prop_assert!(!win[1..].starts_with(['+', '-']));
            prop_assert!(!loss[1..].starts_with(['+', '-']));
        }

        /// Property: a win's display amount recovers the unsigned amount.
        #[test]
        fn prop_win_display_round_trips(amount in "[0-9]{1,6}(\\.[0-9]{1,4})?") {
            let display = format_amount_display(&amount, GameOutcome::Win);
            prop_assert_eq!(reward_amount_from_display(&display), amount);
        }
    }
}
