//! Flexible date inputs and trailing-twelve-month / rolling-window helpers.
//!
//! Vendor payloads represent dates inconsistently (RFC3339 strings, epoch
//! millis, already-parsed `DateTime`s). `DateLike` normalizes all of them at
//! the call site so the rest of the derivation pipeline only ever sees
//! `DateTime<Utc>`.

use chrono::{DateTime, TimeZone, Utc};

/// Anything that can be coerced into a UTC instant.
pub trait DateLike {
    fn to_utc(&self) -> Option<DateTime<Utc>>;
}

impl DateLike for DateTime<Utc> {
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        Some(*self)
    }
}

impl DateLike for &str {
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self)
            .ok()
            .map(|d| d.with_timezone(&Utc))
    }
}

impl DateLike for String {
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        self.as_str().to_utc()
    }
}

impl DateLike for i64 {
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(*self).single()
    }
}

/// A (date, value) observation over which TTM/rolling aggregation runs.
#[derive(Debug, Clone, Copy)]
pub struct DatedValue {
    pub at: DateTime<Utc>,
    pub value: f64,
}

/// Sum of `value` for all observations within the trailing 12 months of
/// `now`, anchored at the most recent observation date <= `now`. Returns
/// `None` if there are no observations at or before `now`.
pub fn ttm(observations: &[DatedValue], now: DateTime<Utc>) -> Option<f64> {
    let anchor = observations
        .iter()
        .filter(|o| o.at <= now)
        .map(|o| o.at)
        .max()?;
    let window_start = anchor - chrono::Duration::days(365);
    let sum: f64 = observations
        .iter()
        .filter(|o| o.at > window_start && o.at <= anchor)
        .map(|o| o.value)
        .sum();
    Some(sum)
}

/// Sum of `value` over the trailing `window_days` ending at `now` (inclusive).
pub fn rolling_window(observations: &[DatedValue], now: DateTime<Utc>, window_days: i64) -> f64 {
    let window_start = now - chrono::Duration::days(window_days);
    observations
        .iter()
        .filter(|o| o.at > window_start && o.at <= now)
        .map(|o| o.value)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(days_ago: i64, value: f64) -> DatedValue {
        DatedValue {
            at: Utc::now() - Duration::days(days_ago),
            value,
        }
    }

    #[test]
    fn ttm_sums_trailing_year_only() {
        let now = Utc::now();
        let obs = vec![at(10, 100.0), at(100, 100.0), at(400, 999.0)];
        let sum = ttm(&obs, now).unwrap();
        assert!((sum - 200.0).abs() < 1e-6);
    }

    #[test]
    fn ttm_empty_is_none() {
        assert!(ttm(&[], Utc::now()).is_none());
    }

    #[test]
    fn rolling_window_respects_bounds() {
        let now = Utc::now();
        let obs = vec![at(5, 10.0), at(40, 10.0)];
        assert!((rolling_window(&obs, now, 30) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn string_date_parses_rfc3339() {
        let s = "2024-01-15T00:00:00Z";
        assert!(s.to_utc().is_some());
    }

    #[test]
    fn epoch_millis_parses() {
        let millis: i64 = 1_700_000_000_000;
        assert!(millis.to_utc().is_some());
    }
}
