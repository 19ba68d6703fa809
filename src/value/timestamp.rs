// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Timestamp scalar: seconds since epoch plus nanosecond remainder.

use crate::error::{TroveError, TroveResult};
use chrono::{DateTime, TimeZone, Utc};
use std::cmp::Ordering;
use std::fmt;

/// Point in time as (seconds, nanoseconds) relative to the Unix epoch.
///
/// Negative values represent instants before the epoch. The two fields must
/// agree in sign: one negative and the other positive is rejected at
/// construction. `|nanoseconds|` is always below one billion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp {
    seconds: i64,
    nanoseconds: i32,
}

const NANOS_PER_SEC: i32 = 1_000_000_000;

impl Timestamp {
    /// Creates a timestamp, validating sign agreement and nanosecond range.
    pub fn new(seconds: i64, nanoseconds: i32) -> TroveResult<Self> {
        if nanoseconds.abs() >= NANOS_PER_SEC {
            return Err(TroveError::IllegalCombination {
                reason: format!("timestamp nanoseconds out of range: {}", nanoseconds),
            });
        }
        if (seconds > 0 && nanoseconds < 0) || (seconds < 0 && nanoseconds > 0) {
            return Err(TroveError::IllegalCombination {
                reason: format!(
                    "timestamp seconds and nanoseconds differ in sign: {}:{}",
                    seconds, nanoseconds
                ),
            });
        }
        Ok(Self {
            seconds,
            nanoseconds,
        })
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn nanoseconds(&self) -> i32 {
        self.nanoseconds
    }

    /// Converts from a chrono UTC datetime.
    pub fn from_datetime(dt: DateTime<Utc>) -> TroveResult<Self> {
        Self::new(dt.timestamp(), dt.timestamp_subsec_nanos() as i32)
    }

    /// Converts to a chrono UTC datetime, if representable.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        // chrono expects a non-negative nanosecond remainder
        let (s, ns) = if self.nanoseconds < 0 {
            (self.seconds - 1, (NANOS_PER_SEC + self.nanoseconds) as u32)
        } else {
            (self.seconds, self.nanoseconds as u32)
        };
        Utc.timestamp_opt(s, ns).single()
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seconds
            .cmp(&other.seconds)
            .then(self.nanoseconds.cmp(&other.nanoseconds))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}:{}", self.seconds, self.nanoseconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_sign_rejected() {
        assert!(Timestamp::new(1, -1).is_err());
        assert!(Timestamp::new(-1, 1).is_err());
        assert!(Timestamp::new(0, -5).is_ok());
        assert!(Timestamp::new(-3, -5).is_ok());
    }

    #[test]
    fn test_nanos_range() {
        assert!(Timestamp::new(0, 1_000_000_000).is_err());
        assert!(Timestamp::new(0, 999_999_999).is_ok());
    }

    #[test]
    fn test_ordering() {
        let a = Timestamp::new(10, 5).unwrap();
        let b = Timestamp::new(10, 6).unwrap();
        let c = Timestamp::new(11, 0).unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_datetime_roundtrip() {
        let ts = Timestamp::new(1_700_000_000, 123).unwrap();
        let dt = ts.to_datetime().unwrap();
        let back = Timestamp::from_datetime(dt).unwrap();
        assert_eq!(ts, back);
    }
}
