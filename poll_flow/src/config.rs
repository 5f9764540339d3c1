// ********* Input data structures ***********

use std::error::Error;
use std::fmt::Display;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// A point in time, in seconds since the Unix epoch.
///
/// The fractional part is kept: the cooldown gate compares differences
/// of timestamps, and only the displayed remaining time is truncated.
#[derive(PartialEq, PartialOrd, Debug, Clone, Copy)]
pub struct Timestamp(pub f64);

impl Timestamp {
    /// "Never". A fresh session starts with this as its last vote time.
    pub const EPOCH: Timestamp = Timestamp(0.0);

    pub fn now() -> Timestamp {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Timestamp(elapsed)
    }

    pub fn seconds_since(&self, earlier: Timestamp) -> f64 {
        self.0 - earlier.0
    }

    /// RFC 3339 rendering in UTC, with microseconds.
    ///
    /// `None` if the value is not finite or outside the range of dates
    /// chrono can represent.
    pub fn to_iso8601(&self) -> Option<String> {
        if !self.0.is_finite() {
            return None;
        }
        let secs = self.0.floor() as i64;
        let nanos = ((self.0 - self.0.floor()) * 1e9) as u32;
        Utc.timestamp_opt(secs, nanos)
            .single()
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    /// Accepts RFC 3339 strings and naive `YYYY-MM-DDTHH:MM:SS[.f]` strings.
    /// Naive strings are read as UTC.
    pub fn parse_iso8601(s: &str) -> Option<Timestamp> {
        let s = s.trim();
        let dt: DateTime<Utc> = match DateTime::parse_from_rfc3339(s) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(_) => {
                let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
                Utc.from_utc_datetime(&naive)
            }
        };
        let micros = dt.timestamp_micros();
        Some(Timestamp(micros as f64 / 1e6))
    }
}

/// One row of the vote store. Rows are only ever appended.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub struct VoteRecord {
    /// ISO-8601 time of the vote.
    pub timestamp: String,
    pub option: String,
}

impl VoteRecord {
    pub fn new(now: Timestamp, option: &str) -> Result<VoteRecord, FlowErrors> {
        let timestamp = now
            .to_iso8601()
            .ok_or_else(|| FlowErrors::InvalidTimestamp(now.0.to_string()))?;
        Ok(VoteRecord {
            timestamp,
            option: option.to_string(),
        })
    }
}

/// One of the choices presented to voters.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct PollOption {
    pub name: String,
    /// Shown in the confirmation dialog.
    pub description: String,
}

// ********* Configuration **********

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct PollRules {
    /// Seconds during which a session may not vote again after a vote.
    pub cooldown_seconds: u64,
}

impl PollRules {
    pub const DEFAULT_RULES: PollRules = PollRules {
        cooldown_seconds: 10,
    };
}

impl Default for PollRules {
    fn default() -> Self {
        PollRules::DEFAULT_RULES
    }
}

/// A validated poll: the options (in declaration order) and the rules.
///
/// Use the [`crate::builder::Builder`] to construct one.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Poll {
    pub(crate) options: Vec<PollOption>,
    pub(crate) rules: PollRules,
}

impl Poll {
    pub fn options(&self) -> &[PollOption] {
        &self.options
    }

    pub fn rules(&self) -> &PollRules {
        &self.rules
    }

    pub fn option(&self, name: &str) -> Option<&PollOption> {
        self.options.iter().find(|o| o.name == name)
    }
}

/// Errors raised while assembling a poll or driving a session through it.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum FlowErrors {
    EmptyPoll,
    BlankOption,
    DuplicateOption(String),
    ZeroCooldown,
    /// A selection that is not one of the declared options.
    UnknownOption(String),
    /// A clock reading that cannot be written as a date.
    InvalidTimestamp(String),
}

impl Error for FlowErrors {}

impl Display for FlowErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowErrors::EmptyPoll => write!(f, "the poll has no options"),
            FlowErrors::BlankOption => write!(f, "option names may not be blank"),
            FlowErrors::DuplicateOption(name) => write!(f, "option {:?} is declared twice", name),
            FlowErrors::ZeroCooldown => write!(f, "the cooldown must be at least one second"),
            FlowErrors::UnknownOption(name) => write!(f, "{:?} is not an option of this poll", name),
            FlowErrors::InvalidTimestamp(t) => write!(f, "{} is not a valid vote time", t),
        }
    }
}
