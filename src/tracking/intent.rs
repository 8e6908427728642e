//! Lead intent tiers derived from the delay between send and first open.
//!
//! The thresholds are fixed business constants. Every surface that shows an
//! intent tier (distribution detail, intent table, exports) goes through
//! [`assess`] so the rule cannot drift between views.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub const HIGH_INTENT_WINDOW_HOURS: i64 = 24;
pub const MEDIUM_INTENT_WINDOW_HOURS: i64 = 72;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentTier {
    Unopened,
    Low,
    Medium,
    High,
}

impl IntentTier {
    pub fn as_str(self) -> &'static str {
        match self {
            IntentTier::Unopened => "unopened",
            IntentTier::Low => "low",
            IntentTier::Medium => "medium",
            IntentTier::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IntentScore {
    pub tier: IntentTier,
    pub hours_to_open: Option<f64>,
}

pub fn tier(sent_at: NaiveDateTime, first_open_at: Option<NaiveDateTime>) -> IntentTier {
    let Some(opened) = first_open_at else {
        return IntentTier::Unopened;
    };

    let delay = opened - sent_at;
    if delay <= Duration::hours(HIGH_INTENT_WINDOW_HOURS) {
        IntentTier::High
    } else if delay <= Duration::hours(MEDIUM_INTENT_WINDOW_HOURS) {
        IntentTier::Medium
    } else {
        IntentTier::Low
    }
}

pub fn assess(sent_at: NaiveDateTime, first_open_at: Option<NaiveDateTime>) -> IntentScore {
    // Clock skew between sender and viewer can put the open before the send.
    let hours_to_open = first_open_at.map(|opened| {
        let seconds = (opened - sent_at).num_seconds().max(0);
        (seconds as f64 / 3600.0 * 10.0).round() / 10.0
    });

    IntentScore {
        tier: tier(sent_at, first_open_at),
        hours_to_open,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sent() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 3)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    #[test]
    fn unopened_without_first_open() {
        assert_eq!(tier(sent(), None), IntentTier::Unopened);
        assert_eq!(assess(sent(), None).hours_to_open, None);
    }

    #[test]
    fn tiers_follow_fixed_windows() {
        let t = sent();
        assert_eq!(
            tier(t, Some(t + Duration::hours(23) + Duration::minutes(59))),
            IntentTier::High
        );
        assert_eq!(tier(t, Some(t + Duration::hours(24))), IntentTier::High);
        assert_eq!(
            tier(t, Some(t + Duration::hours(24) + Duration::minutes(1))),
            IntentTier::Medium
        );
        assert_eq!(tier(t, Some(t + Duration::hours(72))), IntentTier::Medium);
        assert_eq!(tier(t, Some(t + Duration::hours(73))), IntentTier::Low);
    }

    #[test]
    fn open_before_send_counts_as_high() {
        let t = sent();
        let score = assess(t, Some(t - Duration::minutes(5)));
        assert_eq!(score.tier, IntentTier::High);
        assert_eq!(score.hours_to_open, Some(0.0));
    }

    #[test]
    fn hours_to_open_rounds_to_one_decimal() {
        let t = sent();
        let score = assess(t, Some(t + Duration::minutes(90)));
        assert_eq!(score.hours_to_open, Some(1.5));
    }

    #[test]
    fn tiers_order_by_responsiveness() {
        assert!(IntentTier::High > IntentTier::Medium);
        assert!(IntentTier::Medium > IntentTier::Low);
        assert!(IntentTier::Low > IntentTier::Unopened);
        assert_eq!(
            serde_json::to_string(&IntentTier::Medium).unwrap(),
            "\"medium\""
        );
    }
}
