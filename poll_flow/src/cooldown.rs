//! The per-session cooldown gate.
//!
//! Both functions are pure: the caller supplies the current time and the
//! time of the session's last successful vote.

use crate::config::Timestamp;

/// True while fewer than `cooldown_seconds` have elapsed since the last vote.
pub fn is_blocked(now: Timestamp, last_action_time: Timestamp, cooldown_seconds: u64) -> bool {
    now.seconds_since(last_action_time) < cooldown_seconds as f64
}

/// Whole seconds left before the session may vote again.
///
/// Only meaningful while [`is_blocked`] holds; the result is zero or
/// negative otherwise.
pub fn remaining_seconds(now: Timestamp, last_action_time: Timestamp, cooldown_seconds: u64) -> i64 {
    cooldown_seconds as i64 - now.seconds_since(last_action_time).floor() as i64
}
