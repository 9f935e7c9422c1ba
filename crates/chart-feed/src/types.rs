// File: crates/chart-feed/src/types.rs
// Summary: Shared loader types (status, chunk provenance, fetch request, progress).

use crate::series::{Adjust, Ohlcv, Period};

/// Loader lifecycle, one value per loader instance.
/// Idle -> Loading -> Completed | Error; Error is retryable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadingStatus {
    #[default]
    Idle,
    Loading,
    Completed,
    Error,
}

/// Slice of the cached series produced by one fetch.
/// Contract: `start_index..=end_index` addresses the cached series; both shift on eviction.
/// A partially evicted chunk loses its oldest bars from `data` and is clamped to
/// `start_index = 0`, so `data` always mirrors the addressed range.
#[derive(Clone, Debug, PartialEq)]
pub struct DataChunk {
    pub data: Vec<Ohlcv>,
    pub start_index: isize,
    pub end_index: isize,
    pub is_first: bool,
    /// No older data exists upstream.
    pub is_last: bool,
}

impl DataChunk {
    pub fn len(&self) -> usize { self.data.len() }
    pub fn is_empty(&self) -> bool { self.data.is_empty() }
}

/// Request handed to the injected [`DataLoader`](crate::loader::DataLoader).
/// Timestamps are inclusive bounds in epoch ms.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadRequest {
    pub symbol: String,
    pub period: Period,
    pub from_timestamp: Option<i64>,
    pub to_timestamp: Option<i64>,
    pub limit: Option<usize>,
    pub adjust: Adjust,
}

impl LoadRequest {
    /// Most recent `limit` bars.
    pub fn latest(symbol: impl Into<String>, period: Period, limit: usize, adjust: Adjust) -> Self {
        Self { symbol: symbol.into(), period, from_timestamp: None, to_timestamp: None, limit: Some(limit), adjust }
    }

    /// Up to `limit` bars strictly older than `before`.
    pub fn older_than(symbol: impl Into<String>, period: Period, before: i64, limit: usize, adjust: Adjust) -> Self {
        Self {
            symbol: symbol.into(),
            period,
            from_timestamp: None,
            to_timestamp: Some(before.saturating_sub(1)),
            limit: Some(limit),
            adjust,
        }
    }

    /// Every bar in `from..=to`.
    pub fn range(symbol: impl Into<String>, period: Period, from: i64, to: i64, adjust: Adjust) -> Self {
        Self { symbol: symbol.into(), period, from_timestamp: Some(from), to_timestamp: Some(to), limit: None, adjust }
    }
}

/// Load progress; `total` is an upper-bound estimate until history is exhausted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoadProgress {
    pub loaded: usize,
    pub total: usize,
    pub percentage: f64,
}
