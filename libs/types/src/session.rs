//! Trading-session date type
//!
//! The session clock is a plain trading date owned by the ticker plant
//! engine; every rollover advances it by exactly one day. This wrapper
//! keeps date arithmetic and the timestamp-to-date mapping in one place.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionDateError {
    #[error("invalid session date: {0}")]
    Invalid(String),
}

/// A trading date (no time component).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionDate(NaiveDate);

impl SessionDate {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Parse from `YYYY-MM-DD`.
    pub fn parse(s: &str) -> Result<Self, SessionDateError> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Self)
            .map_err(|e| SessionDateError::Invalid(format!("{}: {}", s, e)))
    }

    /// Trading date of a Unix-nanosecond timestamp (UTC).
    pub fn from_nanos(nanos: i64) -> Self {
        Self(DateTime::<Utc>::from_timestamp_nanos(nanos).date_naive())
    }

    /// The next trading date (calendar successor).
    pub fn next(&self) -> Self {
        Self(self.0.succ_opt().unwrap_or(self.0))
    }

    /// Signed day count from `self` to `other`.
    pub fn days_until(&self, other: SessionDate) -> i64 {
        (other.0 - self.0).num_days()
    }

    /// Compact `YYYYMMDD` form used in segment file names.
    pub fn compact(&self) -> String {
        format!(
            "{:04}{:02}{:02}",
            self.0.year(),
            self.0.month(),
            self.0.day()
        )
    }

    pub fn as_naive(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for SessionDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl From<NaiveDate> for SessionDate {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let d = SessionDate::parse("2024-02-16").unwrap();
        assert_eq!(d.to_string(), "2024-02-16");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(SessionDate::parse("16/02/2024").is_err());
        assert!(SessionDate::parse("not-a-date").is_err());
    }

    #[test]
    fn test_from_nanos() {
        // 2024-02-16T22:37:36.789Z
        let d = SessionDate::from_nanos(1_708_123_056_789_000_000);
        assert_eq!(d, SessionDate::parse("2024-02-16").unwrap());
    }

    #[test]
    fn test_next_crosses_month_boundary() {
        let d = SessionDate::parse("2024-02-29").unwrap();
        assert_eq!(d.next(), SessionDate::parse("2024-03-01").unwrap());
    }

    #[test]
    fn test_days_until() {
        let d1 = SessionDate::parse("2024-02-16").unwrap();
        let d2 = SessionDate::parse("2024-02-18").unwrap();
        assert_eq!(d1.days_until(d2), 2);
        assert_eq!(d2.days_until(d1), -2);
        assert_eq!(d1.days_until(d1), 0);
    }

    #[test]
    fn test_compact() {
        let d = SessionDate::parse("2024-02-05").unwrap();
        assert_eq!(d.compact(), "20240205");
    }

    #[test]
    fn test_ordering() {
        let d1 = SessionDate::parse("2024-02-16").unwrap();
        let d2 = SessionDate::parse("2024-02-17").unwrap();
        assert!(d1 < d2);
    }

    #[test]
    fn test_serde_roundtrip() {
        let d = SessionDate::parse("2024-02-16").unwrap();
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, "\"2024-02-16\"");
        let back: SessionDate = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
    }
}
