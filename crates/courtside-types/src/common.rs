//! Common primitives shared across the workspace

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{CourtsideError, Result};

/// Calendar date of a game, stored as explicit components so CSV metadata
/// columns (`Year`, `Month`, `Day`) round-trip without parsing ambiguity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GameDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl GameDate {
    pub fn new(year: i32, month: u32, day: u32) -> Self {
        Self { year, month, day }
    }

    /// Sortable integer key (YYYYMMDD).
    pub fn key(&self) -> i64 {
        self.year as i64 * 10_000 + self.month as i64 * 100 + self.day as i64
    }

    /// ISO `YYYY-MM-DD` string.
    pub fn iso(&self) -> String {
        format!("{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }

    /// Parse a `YYYY-MM-DD` string (longer strings are truncated to the
    /// date prefix, matching upstream documents that embed timestamps).
    pub fn parse_iso(s: &str) -> Result<Self> {
        let prefix: String = s.chars().take(10).collect();
        let parts: Vec<&str> = prefix.split('-').collect();
        if parts.len() != 3 {
            return Err(CourtsideError::InvalidInput(format!(
                "invalid date string: {}",
                s
            )));
        }
        Ok(Self {
            year: parts[0].parse()?,
            month: parts[1].parse()?,
            day: parts[2].parse()?,
        })
    }

    fn naive(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }

    /// Days from `other` to `self`; 0 when either date is invalid.
    pub fn days_since(&self, other: &GameDate) -> i64 {
        match (self.naive(), other.naive()) {
            (Some(a), Some(b)) => (a - b).num_days(),
            _ => 0,
        }
    }

    /// The date `n` days before this one.
    pub fn minus_days(&self, n: i64) -> GameDate {
        match self.naive() {
            Some(d) => {
                let shifted = d - Duration::days(n);
                use chrono::Datelike;
                GameDate::new(shifted.year(), shifted.month(), shifted.day())
            }
            None => *self,
        }
    }
}

impl std::fmt::Display for GameDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.iso())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_key_orders_chronologically() {
        let a = GameDate::new(2023, 10, 24);
        let b = GameDate::new(2024, 1, 3);
        assert!(a.key() < b.key());
        assert!(a < b);
    }

    #[test]
    fn iso_round_trip() {
        let d = GameDate::parse_iso("2023-10-24T19:30:00Z").unwrap();
        assert_eq!(d, GameDate::new(2023, 10, 24));
        assert_eq!(d.iso(), "2023-10-24");
    }

    #[test]
    fn day_arithmetic_crosses_month_boundaries() {
        let d = GameDate::new(2024, 3, 2);
        assert_eq!(d.minus_days(3), GameDate::new(2024, 2, 28));
        assert_eq!(d.days_since(&GameDate::new(2024, 2, 28)), 3);
    }
}
