// File: crates/demo/src/main.rs
// Summary: Demo replays an OHLCV CSV through the lazy loader (initial load, paging back, display view, lookups).
// Usage: feed-demo [bars.csv] [loader_config.json]

use anyhow::{Context, Result};
use async_trait::async_trait;
use chart_feed::{
    series, Adjust, CancelToken, DataLoader, FetchError, LazyLoader, LoadRequest, LoaderConfig, Ohlcv, Period,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Serves bars from memory the way a paging history endpoint would.
struct CsvHistory {
    bars: Vec<Ohlcv>,
    latency: Duration,
}

#[async_trait]
impl DataLoader for CsvHistory {
    async fn load(&self, request: LoadRequest, cancel: CancelToken) -> Result<Vec<Ohlcv>, FetchError> {
        tokio::select! {
            _ = tokio::time::sleep(self.latency) => {}
            _ = cancel.cancelled() => return Err("request cancelled".into()),
        }
        let from = request.from_timestamp.unwrap_or(i64::MIN);
        let to = request.to_timestamp.unwrap_or(i64::MAX);
        let hits = series::window(&self.bars, from, to);
        let hits = match request.limit {
            Some(limit) => &hits[hits.len().saturating_sub(limit)..],
            None => hits,
        };
        Ok(hits.to_vec())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Accept path from CLI or fall back to sample filename (supports .csv/.cvs swap)
    let mut args = std::env::args().skip(1);
    let raw = args
        .next()
        .unwrap_or_else(|| "binanceus_CRVUSDT_6h_2023-09-13_to_2025-01-21.cvs".to_string());
    let config = match args.next() {
        Some(p) => load_config(Path::new(&p))?,
        None => LoaderConfig::default(),
    };

    let (path, used_alt) = resolve_path(&raw)?;
    println!("Using input file: {}", path.display());
    if used_alt {
        println!("  (extension swapped between .csv/.cvs)");
    }

    let bars = load_ohlcv_csv(&path).with_context(|| format!("failed to load CSV '{}'", path.display()))?;
    if bars.is_empty() {
        anyhow::bail!("no bars loaded; check headers/delimiter.");
    }
    let period = infer_period(&bars);
    let symbol = symbol_from(&path);
    println!("Loaded {} bars for {} ({})", bars.len(), symbol, period);

    let history = CsvHistory { bars, latency: Duration::from_millis(5) };
    let loader = LazyLoader::new(config, history)?;

    let initial = loader.initialize(symbol.as_str(), period, Adjust::None).await?;
    println!("Initial chunk: {} bars, {} cached after preload", initial.len(), loader.len());

    // Page back until history runs out or the cache is full.
    while loader.has_more() && loader.len() < loader.config().max_cache_size {
        let older = loader.load_more().await?;
        if older.is_empty() {
            break;
        }
        let p = loader.progress();
        info!(loaded = p.loaded, total = p.total, pct = format!("{:.1}", p.percentage), "paged back");
    }
    let p = loader.progress();
    println!(
        "Cached {} bars in {} chunks ({:.1}% of estimated {})",
        p.loaded,
        loader.loaded_chunks().len(),
        p.percentage,
        p.total
    );

    let all = loader.all_data();
    let display = loader.display_data(None)?;
    println!("Display view: {} of {} bars", display.len(), all.len());
    let out = out_name_with(&path, "display");
    write_bars_csv(&out, &display)?;
    println!("Wrote {}", out.display());

    // Cursor lookup at the midpoint of the cached range.
    if let (Some(first), Some(last)) = (all.first(), all.last()) {
        let mid = first.timestamp + (last.timestamp - first.timestamp) / 2;
        if let Some(bar) = loader.find_nearest(mid) {
            println!("Nearest to {}: {} close={:.4}", fmt_ts(mid), fmt_ts(bar.timestamp), bar.close);
        }

        // Jump-to-date: serve from cache when possible, else fetch the window.
        let from = first.timestamp;
        let to = from + 7 * 24 * 3_600_000;
        let mut window = loader.data_in_range(from, to);
        if window.is_empty() {
            warn!(from, to, "window not cached; fetching");
            window = loader.load_range(from, to, Adjust::None).await?;
        }
        println!("First week of cache: {} bars from {}", window.len(), fmt_ts(from));
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<LoaderConfig> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    let cfg: LoaderConfig = serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    println!("Using config: {}", path.display());
    Ok(cfg)
}

/// Resolve path, trying .csv/.cvs swap if needed.
/// Returns (actual_path, used_alt)
fn resolve_path(raw: &str) -> Result<(PathBuf, bool)> {
    let p = Path::new(raw);
    if p.exists() {
        return Ok((p.to_path_buf(), false));
    }
    if let Some(alt) = swap_ext(p) {
        if alt.exists() {
            return Ok((alt, true));
        }
    }
    anyhow::bail!("file not found: {}", p.display());
}

fn swap_ext(p: &Path) -> Option<PathBuf> {
    let mut alt = p.to_path_buf();
    let ext = p.extension()?.to_string_lossy().to_lowercase();
    match ext.as_str() {
        "cvs" => {
            alt.set_extension("csv");
            Some(alt)
        }
        "csv" => {
            alt.set_extension("cvs");
            Some(alt)
        }
        _ => None,
    }
}

/// Symbol is the second `_` field of Binance-style names (exchange_SYMBOL_period_...).
fn symbol_from(path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("UNKNOWN");
    stem.split('_').nth(1).unwrap_or(stem).to_uppercase()
}

/// Produce output file name like target/out/bars_<stem>_<suffix>.csv
fn out_name_with(input: &Path, suffix: &str) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("bars");
    let short = stem.split('_').take(3).collect::<Vec<_>>().join("_");
    let mut out = PathBuf::from("target/out");
    std::fs::create_dir_all(&out).ok();
    if short.is_empty() {
        out.push(format!("bars_{}.csv", suffix));
    } else {
        out.push(format!("bars_{}_{}.csv", short, suffix));
    }
    out
}

fn write_bars_csv(path: &Path, bars: &[Ohlcv]) -> Result<()> {
    let mut w = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    for b in bars {
        w.serialize(b)?;
    }
    w.flush()?;
    Ok(())
}

/// Load Binance-like OHLCV CSV, sorted ascending with duplicate timestamps dropped.
fn load_ohlcv_csv(path: &Path) -> Result<Vec<Ohlcv>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let headers = rdr
        .headers()?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect::<Vec<_>>();
    info!(?headers, "csv headers");

    let idx = |names: &[&str]| -> Option<usize> {
        headers.iter().position(|h| names.contains(&h.as_str()))
    };

    // Common Binance headers
    let i_time = idx(&["time", "timestamp", "open_time", "date", "datetime"]);
    let i_open = idx(&["open", "o"]);
    let i_high = idx(&["high", "h"]);
    let i_low = idx(&["low", "l"]);
    let i_close = idx(&["close", "c", "adj_close", "close_price"]);
    let i_volume = idx(&["volume", "vol", "v"]);

    if i_open.is_none() || i_high.is_none() || i_low.is_none() || i_close.is_none() {
        warn!("could not find one of open/high/low/close columns");
    }
    if i_time.is_none() {
        warn!("no time column; using row index as timestamp");
    }

    let mut out = Vec::new();
    let mut row_index = 0_i64;

    for rec in rdr.records() {
        let rec = rec?;
        let parse = |i: Option<usize>| -> Option<f64> { i.and_then(|ix| rec.get(ix)).and_then(|s| s.trim().parse::<f64>().ok()) };

        let timestamp = i_time.and_then(|ix| rec.get(ix)).and_then(parse_time_ms).unwrap_or(row_index);
        row_index += 1;

        if let (Some(o), Some(h), Some(l), Some(c)) = (parse(i_open), parse(i_high), parse(i_low), parse(i_close)) {
            let v = parse(i_volume).unwrap_or(0.0);
            out.push(Ohlcv::new(timestamp, o, h, l, c, v));
        }
    }
    out.sort_by_key(|b| b.timestamp);
    out.dedup_by_key(|b| b.timestamp);
    Ok(out)
}

/// Epoch seconds/milliseconds or a date/datetime string, as epoch ms.
fn parse_time_ms(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(n) = s.parse::<i64>() {
        // below 10^12 is epoch seconds
        return Some(if n < 10_i64.pow(12) { n * 1000 } else { n });
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// Closest period to the median bar spacing.
fn infer_period(bars: &[Ohlcv]) -> Period {
    let mut gaps = bars.windows(2).map(|w| w[1].timestamp - w[0].timestamp).collect::<Vec<_>>();
    if gaps.is_empty() {
        return Period::Daily;
    }
    gaps.sort_unstable();
    let median = gaps[gaps.len() / 2];
    const MIN: i64 = 60_000;
    const DAY: i64 = 24 * 60 * MIN;
    [
        (MIN, Period::Minute1),
        (5 * MIN, Period::Minute5),
        (15 * MIN, Period::Minute15),
        (30 * MIN, Period::Minute30),
        (60 * MIN, Period::Minute60),
        (DAY, Period::Daily),
        (7 * DAY, Period::Weekly),
        (30 * DAY, Period::Monthly),
    ]
    .into_iter()
    .min_by_key(|(ms, _)| ms.abs_diff(median))
    .map(|(_, p)| p)
    .unwrap_or_default()
}

fn fmt_ts(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}
