// File: crates/chart-feed/src/downsample.rs
// Summary: Downsampling strategies for OHLCV series (stride, extremes, OHLC buckets, LTTB).
// Notes:
// - Every strategy preserves input order; selection never reorders timestamps.
// - Inputs at or under the budget come back unchanged for every method.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use crate::error::{DownsampleError, ParseError};
use crate::series::Ohlcv;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Identity regardless of size.
    None,
    /// Evenly spaced stride sampling.
    Simple,
    /// Highest-high and lowest-low point per bucket.
    Extreme,
    /// One aggregated candle per bucket.
    Ohlc,
    /// Largest-Triangle-Three-Buckets over close prices.
    Lttb,
}

impl Method {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::None => "none",
            Method::Simple => "simple",
            Method::Extreme => "extreme",
            Method::Ohlc => "ohlc",
            Method::Lttb => "lttb",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(Method::None),
            "simple" => Ok(Method::Simple),
            "extreme" | "minmax" => Ok(Method::Extreme),
            "ohlc" => Ok(Method::Ohlc),
            "lttb" => Ok(Method::Lttb),
            other => Err(ParseError::new("downsample method", other)),
        }
    }
}

/// Reduce `data` to roughly `max_points` bars using `method`.
///
/// With `keep_last` the final output bar always carries the input's final timestamp.
/// LTTB anchors both endpoints whatever `keep_last` says; the other methods may end
/// before the final bar when it is off.
/// Length bounds: SIMPLE/OHLC/LTTB stay within `max_points + 1`, EXTREME between
/// `max_points` and `2 * max_points`.
pub fn downsample(
    data: &[Ohlcv],
    max_points: usize,
    method: Method,
    keep_last: bool,
) -> Result<Vec<Ohlcv>, DownsampleError> {
    if max_points == 0 {
        return Err(DownsampleError::InvalidMaxPoints(max_points));
    }
    if data.len() <= max_points {
        return Ok(data.to_vec());
    }
    let mut out = match method {
        Method::None => return Ok(data.to_vec()),
        Method::Simple => stride(data, max_points),
        Method::Extreme => extremes(data, max_points, keep_last),
        Method::Ohlc => aggregate_ohlc(data, max_points, keep_last),
        Method::Lttb => lttb(data, max_points),
    };
    if keep_last {
        ensure_last(&mut out, data);
    }
    Ok(out)
}

/// Pick exactly `max_points` evenly spaced bars (fractional stride).
pub fn stride(data: &[Ohlcv], max_points: usize) -> Vec<Ohlcv> {
    let n = data.len();
    if max_points == 0 || n <= max_points { return data.to_vec(); }
    // i * n / max_points is strictly increasing because n > max_points
    (0..max_points).map(|i| data[i * n / max_points]).collect()
}

/// Split `n` bars into `buckets` contiguous ranges whose sizes differ by at most one.
/// Requires `n >= buckets`.
pub fn bucket_ranges(n: usize, buckets: usize) -> impl Iterator<Item = Range<usize>> {
    (0..buckets).map(move |i| (i * n / buckets)..((i + 1) * n / buckets))
}

/// Per bucket (`max_points` of them), emit the highest-high bar and, when it is a
/// different bar, the lowest-low bar, in timestamp order.
pub fn extremes(data: &[Ohlcv], max_points: usize, keep_last: bool) -> Vec<Ohlcv> {
    let n = data.len();
    if max_points == 0 || n <= max_points { return data.to_vec(); }
    let cap = max_points * 2;
    let mut out = Vec::with_capacity(cap);
    for range in bucket_ranges(n, max_points) {
        let chunk = &data[range];
        let mut hi = 0usize;
        let mut lo = 0usize;
        for (k, p) in chunk.iter().enumerate().skip(1) {
            if p.high > chunk[hi].high { hi = k; }
            if p.low < chunk[lo].low { lo = k; }
        }
        if chunk[hi].timestamp == chunk[lo].timestamp {
            out.push(chunk[hi]);
        } else {
            out.push(chunk[hi.min(lo)]);
            out.push(chunk[hi.max(lo)]);
        }
    }
    // Room for the true last bar without breaking the 2x bound.
    if keep_last && out.len() >= cap && out.last().map(|p| p.timestamp) != Some(data[n - 1].timestamp) {
        out.pop();
    }
    out
}

/// Aggregate into exactly `max_points` synthesized candles.
/// With `keep_last` the final raw bar is kept out of the buckets and appended as-is.
pub fn aggregate_ohlc(data: &[Ohlcv], max_points: usize, keep_last: bool) -> Vec<Ohlcv> {
    let n = data.len();
    if max_points == 0 || n <= max_points { return data.to_vec(); }
    let body = if keep_last { &data[..n - 1] } else { data };
    let mut out: Vec<Ohlcv> = bucket_ranges(body.len(), max_points).map(|r| aggregate(&body[r])).collect();
    if keep_last { out.push(data[n - 1]); }
    out
}

/// Aggregate OHLCV bars into fixed-size buckets of `bucket` width.
/// For each bucket: open=first.open, close=last.close, high=max high, low=min low,
/// volume=sum, timestamp=first.timestamp.
pub fn aggregate_ohlc_buckets(data: &[Ohlcv], bucket: usize) -> Vec<Ohlcv> {
    if bucket <= 1 || data.len() <= 1 { return data.to_vec(); }
    data.chunks(bucket).map(aggregate).collect()
}

fn aggregate(chunk: &[Ohlcv]) -> Ohlcv {
    let first = chunk[0];
    let last = chunk[chunk.len() - 1];
    let mut low = first.low;
    let mut high = first.high;
    let mut volume = 0.0f64;
    for p in chunk {
        low = low.min(p.low);
        high = high.max(p.high);
        volume += p.volume;
    }
    Ohlcv { timestamp: first.timestamp, open: first.open, high, low, close: last.close, volume }
}

/// Largest-Triangle-Three-Buckets over the close price (x = bar index).
/// Always keeps the first and last bar; returns `threshold` bars.
pub fn lttb(data: &[Ohlcv], threshold: usize) -> Vec<Ohlcv> {
    lttb_indices(data.len(), threshold, |i| data[i].close)
        .into_iter()
        .map(|i| data[i])
        .collect()
}

/// Index selection behind [`lttb`]; `y` maps a bar index to its plotted value.
pub fn lttb_indices(n: usize, threshold: usize, y: impl Fn(usize) -> f64) -> Vec<usize> {
    if threshold == 0 || n == 0 { return Vec::new(); }
    if threshold >= n || n <= 2 { return (0..n).collect(); }
    if threshold == 1 { return vec![0]; }

    let bucket_size = (n - 2) as f64 / (threshold - 2).max(1) as f64;
    let mut sampled = Vec::with_capacity(threshold);
    sampled.push(0);

    let mut a = 0usize; // index selected in the previous bucket

    for i in 0..(threshold - 2) {
        let start = (1.0 + (i as f64) * bucket_size).floor() as usize;
        let end = ((1.0 + ((i + 1) as f64) * bucket_size).floor() as usize).min(n - 1);

        // Average of the next bucket (end..next_end), the last bar for the final bucket.
        let next_end = ((1.0 + ((i + 2) as f64) * bucket_size).floor() as usize).min(n - 1);
        let rs = end.max(1);
        let re = next_end.max(rs + 1);
        let count = (re - rs) as f64;
        let avg_x = (rs..re).map(|k| k as f64).sum::<f64>() / count;
        let avg_y = (rs..re).map(&y).sum::<f64>() / count;

        let a_x = a as f64;
        let a_y = y(a);
        let mut max_area = -1.0f64;
        let mut max_idx = start;
        for k in start..end.max(start + 1) {
            // Twice the triangle area; the factor does not change the argmax.
            let area = ((a_x - k as f64) * (avg_y - a_y) - (a_x - avg_x) * (y(k) - a_y)).abs();
            if area > max_area {
                max_area = area;
                max_idx = k;
            }
        }
        sampled.push(max_idx);
        a = max_idx;
    }

    sampled.push(n - 1);
    sampled
}

fn ensure_last(out: &mut Vec<Ohlcv>, data: &[Ohlcv]) {
    if let Some(last) = data.last() {
        if out.last().map(|p| p.timestamp) != Some(last.timestamp) {
            out.push(*last);
        }
    }
}
