//! Core data types shared across the engine
//!
//! # Key Types
//!
//! - **`TimeRange`**: query window `[start, end]` in UTC
//! - **`Clock`**: source of the evaluation instant (`SystemClock`, `FixedClock`)
//! - **`parse_period`**: period argument parsing (`90`, `"5m"`, `"PT1H30M"`)
//!
//! # Example
//!
//! ```rust
//! use chrono::{Duration, TimeZone, Utc};
//! use kuba_mql::types::{parse_period_str, TimeRange};
//!
//! let start = Utc.timestamp_opt(0, 0).unwrap();
//! let range = TimeRange::new(start, start + Duration::minutes(5)).unwrap();
//! assert_eq!(range.duration(), Duration::minutes(5));
//! assert_eq!(parse_period_str("PT5M").unwrap(), Duration::minutes(5));
//! ```

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Time window for a select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive start
    pub start: DateTime<Utc>,
    /// Inclusive end
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Create a new range, rejecting `start > end`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, String> {
        if start > end {
            return Err(format!(
                "start {} is after end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            ));
        }
        Ok(Self { start, end })
    }

    /// Range of `lookback` ending at `now`, clamped to the earliest instant
    pub fn ending_at(now: DateTime<Utc>, lookback: Duration) -> Self {
        Self {
            start: now
                .checked_sub_signed(lookback)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: now,
        }
    }

    /// Check if timestamp is within range
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.start && time <= self.end
    }

    /// Length of the window
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Source of the evaluation instant
///
/// Alert staleness checks and default time ranges are computed against this
/// rather than reading the system time directly.
pub trait Clock: Send + Sync + 'static {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock
#[derive(Debug)]
pub struct FixedClock {
    now: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    /// Create a clock frozen at `now`
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Move the clock to `now`
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

// ============================================================================
// Period parsing
// ============================================================================

const OUT_OF_RANGE: &str = "out of range";

/// Longest period any argument may specify (100 years)
pub fn max_period() -> Duration {
    Duration::days(36_500)
}

fn within_bounds(period: Duration) -> Result<Duration, String> {
    if period > max_period() {
        Err(OUT_OF_RANGE.to_string())
    } else {
        Ok(period)
    }
}

fn whole_seconds(secs: i64) -> Result<Duration, String> {
    if secs < 0 {
        return Err("period must not be negative".to_string());
    }
    Duration::try_seconds(secs)
        .ok_or_else(|| OUT_OF_RANGE.to_string())
        .and_then(within_bounds)
}

/// Parse a period argument
///
/// Accepts a non-negative integer number of seconds or any string accepted by
/// [`parse_period_str`]. Periods longer than [`max_period`] are rejected.
pub fn parse_period(value: &serde_json::Value) -> Result<Duration, String> {
    match value {
        serde_json::Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(secs), _) => whole_seconds(secs),
            (None, Some(_)) => Err(OUT_OF_RANGE.to_string()),
            (None, None) => Err(format!("period must be a whole number of seconds, got {}", n)),
        },
        serde_json::Value::String(s) => parse_period_str(s),
        other => Err(format!("expected a period, got {}", other)),
    }
}

/// Parse `30s` / `5m` / `1h` / `2d` / `1w`, a bare integer of seconds, or an
/// ISO-8601 duration such as `PT1H30M` or `P1D`
pub fn parse_period_str(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("period must not be empty".to_string());
    }

    if let Some(rest) = s.strip_prefix('P').or_else(|| s.strip_prefix('p')) {
        return parse_iso_period(rest, input).and_then(within_bounds);
    }

    if let Ok(secs) = s.parse::<i64>() {
        return whole_seconds(secs);
    }

    // All digits but too large for i64
    let Some(split) = s.find(|c: char| !c.is_ascii_digit()) else {
        return Err(OUT_OF_RANGE.to_string());
    };
    let (amount, unit) = s.split_at(split);
    if amount.is_empty() {
        return Err(format!("invalid period '{}'", input));
    }
    let amount: i64 = amount.parse().map_err(|_| OUT_OF_RANGE.to_string())?;
    unit_duration(unit, amount, input).and_then(within_bounds)
}

fn unit_duration(unit: &str, amount: i64, input: &str) -> Result<Duration, String> {
    let period = match unit.to_ascii_lowercase().as_str() {
        "ms" | "millis" | "milliseconds" => Duration::try_milliseconds(amount),
        "s" | "sec" | "secs" | "second" | "seconds" => Duration::try_seconds(amount),
        "m" | "min" | "mins" | "minute" | "minutes" => Duration::try_minutes(amount),
        "h" | "hr" | "hour" | "hours" => Duration::try_hours(amount),
        "d" | "day" | "days" => Duration::try_days(amount),
        "w" | "week" | "weeks" => Duration::try_weeks(amount),
        _ => return Err(format!("unknown period unit '{}' in '{}'", unit, input)),
    };
    period.ok_or_else(|| OUT_OF_RANGE.to_string())
}

fn parse_iso_period(rest: &str, input: &str) -> Result<Duration, String> {
    let invalid = || format!("invalid ISO-8601 period '{}'", input);
    let rest = rest.to_ascii_uppercase();
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (rest.as_str(), None),
    };
    if time_part == Some("") {
        return Err(invalid());
    }

    let mut total = Duration::zero();
    let mut seen = false;

    for (part, in_time) in [(Some(date_part), false), (time_part, true)] {
        let Some(part) = part else { continue };
        for (digits, designator) in iso_components(part).ok_or_else(invalid)? {
            seen = true;
            let amount: i64 = digits.parse().map_err(|_| OUT_OF_RANGE.to_string())?;
            let component = match (in_time, designator) {
                (false, 'W') => Duration::try_weeks(amount),
                (false, 'D') => Duration::try_days(amount),
                (true, 'H') => Duration::try_hours(amount),
                (true, 'M') => Duration::try_minutes(amount),
                (true, 'S') => Duration::try_seconds(amount),
                _ => return Err(invalid()),
            };
            total = component
                .and_then(|c| total.checked_add(&c))
                .ok_or_else(|| OUT_OF_RANGE.to_string())?;
        }
    }

    if seen {
        Ok(total)
    } else {
        Err(invalid())
    }
}

fn iso_components(part: &str) -> Option<Vec<(String, char)>> {
    let mut components = Vec::new();
    let mut digits = String::new();
    for c in part.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else {
            if digits.is_empty() {
                return None;
            }
            components.push((std::mem::take(&mut digits), c));
        }
    }
    // Trailing digits without a designator
    if !digits.is_empty() {
        return None;
    }
    Some(components)
}
