// File: crates/chart-feed/src/series.rs
// Summary: OHLCV bar model plus the symbol period / price-adjustment selectors used in fetch requests.
// Notes:
// - Bars are not validated (low <= open,close <= high is the caller's business).
// - Timestamps are epoch milliseconds and strictly increasing within one series.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ohlcv {
    pub timestamp: i64, // epoch ms
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Ohlcv {
    pub const fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self { timestamp, open, high, low, close, volume }
    }

    /// Timestamp as a UTC datetime; `None` when out of chrono's range.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

/// Bar period requested from the upstream source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "5m")]
    Minute5,
    #[serde(rename = "15m")]
    Minute15,
    #[serde(rename = "30m")]
    Minute30,
    #[serde(rename = "60m")]
    Minute60,
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Period::Minute1 => "1m",
            Period::Minute5 => "5m",
            Period::Minute15 => "15m",
            Period::Minute30 => "30m",
            Period::Minute60 => "60m",
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1m" | "1" => Ok(Period::Minute1),
            "5m" | "5" => Ok(Period::Minute5),
            "15m" | "15" => Ok(Period::Minute15),
            "30m" | "30" => Ok(Period::Minute30),
            "60m" | "60" | "1h" => Ok(Period::Minute60),
            "daily" | "day" | "1d" => Ok(Period::Daily),
            "weekly" | "week" | "1w" => Ok(Period::Weekly),
            "monthly" | "month" => Ok(Period::Monthly),
            other => Err(ParseError::new("period", other)),
        }
    }
}

/// Price adjustment applied upstream for splits/dividends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Adjust {
    #[default]
    None,
    Forward,
    Backward,
}

impl fmt::Display for Adjust {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Adjust::None => "none",
            Adjust::Forward => "forward",
            Adjust::Backward => "backward",
        };
        f.write_str(s)
    }
}

impl FromStr for Adjust {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" => Ok(Adjust::None),
            "forward" | "qfq" => Ok(Adjust::Forward),
            "backward" | "hfq" => Ok(Adjust::Backward),
            other => Err(ParseError::new("adjust mode", other)),
        }
    }
}

/// Bar whose timestamp is closest to `timestamp` in an ascending series.
/// Equidistant neighbours resolve to the earlier bar.
pub fn nearest(data: &[Ohlcv], timestamp: i64) -> Option<&Ohlcv> {
    let idx = data.partition_point(|p| p.timestamp < timestamp);
    let after = data.get(idx);
    let before = idx.checked_sub(1).and_then(|i| data.get(i));
    match (before, after) {
        (Some(b), Some(a)) => {
            if timestamp.abs_diff(b.timestamp) <= a.timestamp.abs_diff(timestamp) { Some(b) } else { Some(a) }
        }
        (b, a) => b.or(a),
    }
}

/// Bars with `from <= timestamp <= to` in an ascending series.
pub fn window(data: &[Ohlcv], from: i64, to: i64) -> &[Ohlcv] {
    if from > to { return &[]; }
    let lo = data.partition_point(|p| p.timestamp < from);
    let hi = data.partition_point(|p| p.timestamp <= to);
    &data[lo..hi.max(lo)]
}
