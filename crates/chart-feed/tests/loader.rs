// File: crates/chart-feed/tests/loader.rs
// Purpose: Lazy loader lifecycle against an in-memory history: chunking, exhaustion, eviction,
// overlapping-fetch guard, failure propagation, cancellation, lookups.

use async_trait::async_trait;
use chart_feed::{
    loader_fn, Adjust, CancelToken, DataLoader, FetchError, LazyLoader, LoadRequest, LoaderConfig, LoaderError,
    LoadingStatus, Ohlcv, Period,
};
use std::sync::{Arc, Mutex};

const STEP: i64 = 60_000;

fn history(n: usize) -> Vec<Ohlcv> {
    (0..n)
        .map(|i| {
            let c = 100.0 + (i as f64 * 0.02).cos() * 3.0;
            Ohlcv::new(i as i64 * STEP, c, c + 1.0, c - 1.0, c, 500.0)
        })
        .collect()
}

/// Serves `bars` newest-first-by-limit, like a paging REST endpoint.
#[derive(Default)]
struct MockSource {
    bars: Vec<Ohlcv>,
    fail_calls: Vec<usize>,
    block_calls: Vec<usize>,
    /// Calls that take several scheduler turns to answer.
    slow_calls: Vec<usize>,
    descending: bool,
    /// Answer with the newest bars regardless of the requested window.
    ignore_bounds: bool,
    calls: Mutex<Vec<LoadRequest>>,
}

impl MockSource {
    fn new(bars: Vec<Ohlcv>) -> Self {
        Self { bars, ..Self::default() }
    }
    fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
    fn request(&self, i: usize) -> LoadRequest {
        self.calls.lock().unwrap()[i].clone()
    }
}

#[async_trait]
impl DataLoader for MockSource {
    async fn load(&self, request: LoadRequest, cancel: CancelToken) -> Result<Vec<Ohlcv>, FetchError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            calls.len()
        };
        // suspension point, like a network round-trip
        tokio::task::yield_now().await;
        if self.block_calls.contains(&call) {
            cancel.cancelled().await;
            return Err("request aborted".into());
        }
        if self.slow_calls.contains(&call) {
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
        }
        if self.fail_calls.contains(&call) {
            return Err(format!("upstream unavailable (call {call})").into());
        }
        let (from, to) = match self.ignore_bounds {
            true => (i64::MIN, i64::MAX),
            false => (request.from_timestamp.unwrap_or(i64::MIN), request.to_timestamp.unwrap_or(i64::MAX)),
        };
        let matching: Vec<Ohlcv> = self.bars.iter().filter(|b| b.timestamp >= from && b.timestamp <= to).copied().collect();
        let mut out = match request.limit {
            Some(limit) => matching[matching.len().saturating_sub(limit)..].to_vec(),
            None => matching,
        };
        if self.descending {
            out.reverse();
        }
        Ok(out)
    }
}

fn config(initial: usize, chunk: usize, max_cache: usize, preload: usize) -> LoaderConfig {
    LoaderConfig {
        initial_load_size: initial,
        chunk_size: chunk,
        max_cache_size: max_cache,
        preload_chunks: preload,
        ..LoaderConfig::default()
    }
}

fn loader(source: MockSource, cfg: LoaderConfig) -> LazyLoader<Arc<MockSource>> {
    LazyLoader::new(cfg, Arc::new(source)).expect("valid config")
}

#[tokio::test]
async fn initialize_loads_most_recent_chunk() {
    let bars = history(5_000);
    let l = loader(MockSource::new(bars.clone()), config(1_000, 500, 10_000, 0));
    assert_eq!(l.status(), LoadingStatus::Idle);

    let first = l.initialize("AAPL", Period::Daily, Adjust::Forward).await.unwrap();
    assert_eq!(first.len(), 1_000);
    assert_eq!(first.first(), bars.get(4_000));
    assert_eq!(first.last(), bars.last());
    assert_eq!(l.status(), LoadingStatus::Completed);
    assert_eq!(l.symbol().as_deref(), Some("AAPL"));

    let req = l.source().request(0);
    assert_eq!(req.limit, Some(1_000));
    assert_eq!(req.adjust, Adjust::Forward);
    assert_eq!(req.to_timestamp, None);

    let chunks = l.loaded_chunks();
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].is_first && !chunks[0].is_last);
    assert_eq!((chunks[0].start_index, chunks[0].end_index), (0, 999));
    assert!(l.has_more());
}

#[tokio::test]
async fn load_more_prepends_older_chunks() {
    let bars = history(5_000);
    let l = loader(MockSource::new(bars.clone()), config(1_000, 500, 10_000, 0));
    l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();

    let older = l.load_more().await.unwrap();
    assert_eq!(older.len(), 500);
    assert_eq!(older.last().unwrap().timestamp, bars[3_999].timestamp);
    assert_eq!(l.source().request(1).to_timestamp, Some(bars[4_000].timestamp - 1));

    let all = l.all_data();
    assert_eq!(all.len(), 1_500);
    assert_eq!(all[..], bars[3_500..]);

    let chunks = l.loaded_chunks();
    assert_eq!(chunks.len(), 2);
    assert_eq!((chunks[0].start_index, chunks[0].end_index), (500, 1_499));
    assert_eq!((chunks[1].start_index, chunks[1].end_index), (0, 499));
    assert!(!chunks[1].is_first);
}

#[tokio::test]
async fn exhaustion_stops_fetching() {
    let l = loader(MockSource::new(history(1_200)), config(1_000, 500, 10_000, 0));
    l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();

    let tail = l.load_more().await.unwrap();
    assert_eq!(tail.len(), 200);
    assert!(l.loaded_chunks().last().unwrap().is_last);
    assert_eq!(l.source().calls(), 2);

    let again = l.load_more().await.unwrap();
    assert!(again.is_empty());
    assert_eq!(l.source().calls(), 2, "exhausted loader must not fetch");

    let progress = l.progress();
    assert_eq!((progress.loaded, progress.total), (1_200, 1_200));
    assert_eq!(progress.percentage, 100.0);
    assert!(!l.has_more());
}

#[tokio::test]
async fn empty_result_marks_previous_chunk_last() {
    // exactly two full chunks upstream; the boundary is only known after an empty fetch
    let l = loader(MockSource::new(history(1_500)), config(1_000, 500, 10_000, 0));
    l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();
    assert_eq!(l.load_more().await.unwrap().len(), 500);
    assert!(!l.loaded_chunks().last().unwrap().is_last);

    assert!(l.load_more().await.unwrap().is_empty());
    let chunks = l.loaded_chunks();
    assert_eq!(chunks.len(), 2);
    assert!(chunks[1].is_last);
    assert_eq!(l.status(), LoadingStatus::Completed);
    assert_eq!(l.progress().percentage, 100.0);
}

#[tokio::test]
async fn progress_estimates_one_more_chunk() {
    let l = loader(MockSource::new(history(5_000)), config(1_000, 500, 10_000, 0));
    l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();
    let p = l.progress();
    assert_eq!((p.loaded, p.total), (1_000, 1_500));
    assert!((p.percentage - 66.666).abs() < 0.01);
}

#[tokio::test]
async fn short_initial_load_is_exhausted_and_skips_preload() {
    let l = loader(MockSource::new(history(300)), config(1_000, 500, 10_000, 3));
    let data = l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();
    assert_eq!(data.len(), 300);
    assert!(l.loaded_chunks()[0].is_last);
    assert_eq!(l.source().calls(), 1);
    assert!(l.load_more().await.unwrap().is_empty());
}

#[tokio::test]
async fn preload_warms_cache_sequentially() {
    let l = loader(MockSource::new(history(5_000)), config(1_000, 500, 10_000, 2));
    let data = l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();
    assert_eq!(data.len(), 1_000);
    assert_eq!(l.len(), 2_000);
    assert_eq!(l.source().calls(), 3);
    let chunks = l.loaded_chunks();
    assert_eq!(chunks.len(), 3);
    // each chunk strictly older than the one loaded before it
    for w in chunks.windows(2) {
        assert!(w[1].data.last().unwrap().timestamp < w[0].data.first().unwrap().timestamp);
    }
}

#[tokio::test]
async fn cache_ceiling_evicts_oldest() {
    let l = loader(MockSource::new(history(5_000)), config(1_000, 500, 2_000, 0));
    l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();

    let mut evicted = Vec::new();
    for _ in 0..3 {
        evicted = l.load_more().await.unwrap();
    }
    let all = l.all_data();
    assert_eq!(all.len(), 2_000);
    let oldest_retained = all[0].timestamp;
    assert_eq!(evicted.len(), 500);
    assert!(evicted.iter().all(|p| p.timestamp < oldest_retained));

    // fully evicted chunk dropped, survivors re-indexed onto the truncated series
    let chunks = l.loaded_chunks();
    assert_eq!(chunks.len(), 3);
    for c in &chunks {
        assert!(c.start_index >= 0);
        let slice = &all[c.start_index as usize..=c.end_index as usize];
        assert_eq!(slice, &c.data[..]);
    }
    assert_eq!((chunks[0].start_index, chunks[0].end_index), (1_000, 1_999));
}

#[tokio::test]
async fn partially_evicted_chunk_is_trimmed() {
    let l = loader(MockSource::new(history(5_000)), config(1_000, 500, 1_200, 0));
    l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();
    l.load_more().await.unwrap();

    let all = l.all_data();
    assert_eq!(all.len(), 1_200);
    let chunks = l.loaded_chunks();
    assert_eq!(chunks.len(), 2);
    assert_eq!((chunks[1].start_index, chunks[1].end_index), (0, 199));
    assert_eq!(chunks[1].data.len(), 200);
    assert_eq!(chunks[1].data[..], all[..200]);
}

#[tokio::test]
async fn overlapping_load_more_fetches_once() {
    let l = loader(MockSource::new(history(5_000)), config(1_000, 500, 10_000, 0));
    l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();
    assert_eq!(l.source().calls(), 1);

    let (a, b) = tokio::join!(l.load_more(), l.load_more());
    assert_eq!(a.unwrap().len(), 500);
    assert!(b.unwrap().is_empty());
    assert_eq!(l.source().calls(), 2);
    assert_eq!(l.status(), LoadingStatus::Completed);
}

#[tokio::test]
async fn load_more_before_initialize_is_rejected() {
    let l = loader(MockSource::new(history(10)), config(5, 5, 100, 0));
    assert!(matches!(l.load_more().await, Err(LoaderError::NotInitialized)));
    assert!(matches!(l.load_range(0, 10, Adjust::None).await, Err(LoaderError::NotInitialized)));
    assert_eq!(l.source().calls(), 0);
}

#[tokio::test]
async fn initialize_failure_sets_error_and_is_retryable() {
    let source = MockSource { fail_calls: vec![1], ..MockSource::new(history(2_000)) };
    let l = loader(source, config(1_000, 500, 10_000, 0));

    let err = l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap_err();
    assert!(matches!(err, LoaderError::Fetch(_)));
    assert!(err.is_retryable());
    assert!(err.to_string().contains("upstream unavailable"));
    assert_eq!(l.status(), LoadingStatus::Error);
    assert!(l.last_error().is_some());
    assert!(l.all_data().is_empty());

    let data = l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();
    assert_eq!(data.len(), 1_000);
    assert_eq!(l.status(), LoadingStatus::Completed);
    assert!(l.last_error().is_none());
}

#[tokio::test]
async fn load_more_failure_propagates_then_recovers() {
    let source = MockSource { fail_calls: vec![2], ..MockSource::new(history(5_000)) };
    let l = loader(source, config(1_000, 500, 10_000, 0));
    l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();

    assert!(matches!(l.load_more().await, Err(LoaderError::Fetch(_))));
    assert_eq!(l.status(), LoadingStatus::Error);
    assert_eq!(l.len(), 1_000);
    assert_eq!(l.loaded_chunks().len(), 1);

    assert_eq!(l.load_more().await.unwrap().len(), 500);
    assert_eq!(l.status(), LoadingStatus::Completed);
    assert!(l.last_error().is_none());
}

#[tokio::test]
async fn preload_failure_is_swallowed() {
    let source = MockSource { fail_calls: vec![2], ..MockSource::new(history(5_000)) };
    let l = loader(source, config(1_000, 500, 10_000, 3));

    let data = l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();
    assert_eq!(data.len(), 1_000);
    assert_eq!(l.source().calls(), 2, "preloading stops at the first failure");
    assert_eq!(l.status(), LoadingStatus::Error);
    assert!(matches!(l.last_error(), Some(LoaderError::Fetch(_))));
    assert_eq!(l.load_more().await.unwrap().len(), 500);
}

#[tokio::test]
async fn cancel_discards_in_flight_fetch() {
    let source = MockSource { block_calls: vec![2], ..MockSource::new(history(5_000)) };
    let l = loader(source, config(1_000, 500, 10_000, 0));
    l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();

    let (res, _) = tokio::join!(l.load_more(), async {
        tokio::task::yield_now().await;
        assert_eq!(l.status(), LoadingStatus::Loading);
        l.cancel();
    });
    assert!(matches!(res, Err(LoaderError::Cancelled)));
    assert_eq!(l.status(), LoadingStatus::Completed);
    assert_eq!(l.len(), 1_000);
    assert!(l.last_error().is_none());

    // next call fetches normally
    assert_eq!(l.load_more().await.unwrap().len(), 500);
}

#[tokio::test]
async fn reinitialize_supersedes_in_flight_session() {
    let source = MockSource { block_calls: vec![1], ..MockSource::new(history(3_000)) };
    let l = loader(source, config(1_000, 500, 10_000, 0));

    let (old, new) = tokio::join!(l.initialize("SLOW", Period::Daily, Adjust::None), async {
        tokio::task::yield_now().await;
        l.initialize("FAST", Period::Weekly, Adjust::None).await
    });
    assert!(matches!(old, Err(LoaderError::Cancelled)));
    assert_eq!(new.unwrap().len(), 1_000);
    assert_eq!(l.symbol().as_deref(), Some("FAST"));
    assert_eq!(l.period(), Period::Weekly);
    assert_eq!(l.len(), 1_000);
    assert_eq!(l.status(), LoadingStatus::Completed);
}

#[tokio::test]
async fn reset_returns_to_idle() {
    let l = loader(MockSource::new(history(3_000)), config(1_000, 500, 10_000, 1));
    l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();
    l.reset();
    assert_eq!(l.status(), LoadingStatus::Idle);
    assert!(l.is_empty());
    assert!(l.loaded_chunks().is_empty());
    assert!(l.symbol().is_none());
    assert!(matches!(l.load_more().await, Err(LoaderError::NotInitialized)));
}

#[tokio::test]
async fn load_range_leaves_bookkeeping_alone() {
    let bars = history(5_000);
    let l = loader(MockSource::new(bars.clone()), config(1_000, 500, 10_000, 0));
    l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();

    let from = bars[100].timestamp;
    let to = bars[110].timestamp;
    let window = l.load_range(from, to, Adjust::Backward).await.unwrap();
    assert_eq!(window[..], bars[100..=110]);

    let req = l.source().request(1);
    assert_eq!((req.from_timestamp, req.to_timestamp, req.limit), (Some(from), Some(to), None));
    assert_eq!(req.adjust, Adjust::Backward);
    assert_eq!(l.len(), 1_000);
    assert_eq!(l.loaded_chunks().len(), 1);

    assert!(matches!(l.load_range(to, from, Adjust::None).await, Err(LoaderError::InvalidRange { .. })));
}

#[tokio::test]
async fn load_range_failure_sets_error_and_keeps_cache() {
    let source = MockSource { fail_calls: vec![2], ..MockSource::new(history(5_000)) };
    let l = loader(source, config(1_000, 500, 10_000, 0));
    l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();
    let before = l.all_data();

    let err = l.load_range(0, 10 * STEP, Adjust::None).await.unwrap_err();
    assert!(matches!(err, LoaderError::Fetch(_)));
    assert_eq!(l.status(), LoadingStatus::Error);
    assert!(matches!(l.last_error(), Some(LoaderError::Fetch(_))));
    assert_eq!(l.all_data(), before);
    assert_eq!(l.loaded_chunks().len(), 1);
    assert!(l.has_more());
}

#[tokio::test]
async fn failed_range_does_not_reopen_load_more_gate() {
    // call 2: slow load_more, call 3: failing load_range
    let source = MockSource { slow_calls: vec![2], fail_calls: vec![3], ..MockSource::new(history(5_000)) };
    let l = loader(source, config(1_000, 500, 10_000, 0));
    l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();

    let (older, (range, again)) = tokio::join!(l.load_more(), async {
        let range = l.load_range(0, 10 * STEP, Adjust::None).await;
        assert_eq!(l.status(), LoadingStatus::Loading);
        let again = l.load_more().await;
        (range, again)
    });
    assert!(matches!(range, Err(LoaderError::Fetch(_))));
    assert!(again.unwrap().is_empty());
    assert_eq!(older.unwrap().len(), 500);

    assert_eq!(l.source().calls(), 3, "second load_more must not reach the source");
    assert_eq!(l.len(), 1_500);
    assert!(l.has_more());
    assert!(l.loaded_chunks().iter().all(|c| !c.is_last));
    assert_eq!(l.status(), LoadingStatus::Completed);
    assert_eq!(l.load_more().await.unwrap().len(), 500);
}

#[tokio::test]
async fn overlapping_answer_is_not_exhaustion() {
    // source ignores `to`, so it keeps answering with bars already cached
    let source = MockSource { ignore_bounds: true, ..MockSource::new(history(5_000)) };
    let l = loader(source, config(1_000, 500, 10_000, 0));
    l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();

    assert!(l.load_more().await.unwrap().is_empty());
    assert_eq!(l.len(), 1_000);
    assert_eq!(l.loaded_chunks().len(), 1);
    assert!(!l.loaded_chunks()[0].is_last);
    assert!(l.has_more());
    assert_eq!(l.status(), LoadingStatus::Completed);
}

#[tokio::test]
async fn descending_source_is_cached_ascending() {
    let bars = history(2_000);
    let source = MockSource { descending: true, ..MockSource::new(bars.clone()) };
    let l = loader(source, config(1_000, 500, 10_000, 1));
    l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();
    let all = l.all_data();
    assert_eq!(all[..], bars[500..]);
}

#[tokio::test]
async fn nearest_lookup_with_tie_break() {
    let bars: Vec<Ohlcv> = [100, 200, 300].iter().map(|&t| Ohlcv::new(t, 1.0, 2.0, 0.5, 1.5, 10.0)).collect();
    let l = loader(MockSource::new(bars), config(10, 10, 100, 0));
    assert!(l.find_nearest(150).is_none());
    l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();

    assert_eq!(l.find_nearest(140).unwrap().timestamp, 100);
    assert_eq!(l.find_nearest(260).unwrap().timestamp, 300);
    // equidistant resolves to the earlier bar
    assert_eq!(l.find_nearest(250).unwrap().timestamp, 200);
    assert_eq!(l.find_nearest(150).unwrap().timestamp, 100);
    assert_eq!(l.find_nearest(200).unwrap().timestamp, 200);
    assert_eq!(l.find_nearest(-5).unwrap().timestamp, 100);
    assert_eq!(l.find_nearest(10_000).unwrap().timestamp, 300);
}

#[tokio::test]
async fn data_in_range_reads_cache() {
    let bars = history(1_000);
    let l = loader(MockSource::new(bars.clone()), config(1_000, 500, 10_000, 0));
    l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();
    let got = l.data_in_range(bars[10].timestamp, bars[19].timestamp + 1);
    assert_eq!(got[..], bars[10..20]);
    assert!(l.data_in_range(5, 1).is_empty());
}

#[tokio::test]
async fn display_data_follows_policy() {
    let bars = history(3_000);
    let l = loader(MockSource::new(bars.clone()), config(3_000, 500, 10_000, 0));
    l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();

    let auto = l.display_data(None).unwrap();
    assert!(auto.len() >= 2_000 && auto.len() <= 3_000);
    assert!(auto.iter().all(|p| bars.contains(p)));
    assert_eq!(auto.last(), bars.last());

    let capped = l.display_data(Some(100)).unwrap();
    assert!(capped.len() >= 100 && capped.len() <= 200);
    assert_eq!(capped.last(), bars.last());

    assert!(matches!(l.display_data(Some(0)), Err(LoaderError::Downsample(_))));
}

#[tokio::test]
async fn display_data_raw_when_disabled() {
    let cfg = LoaderConfig { enable_downsampling: false, ..config(3_000, 500, 10_000, 0) };
    let l = loader(MockSource::new(history(3_000)), cfg);
    l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();
    assert_eq!(l.display_data(None).unwrap().len(), 3_000);
    assert_eq!(l.display_data(Some(10)).unwrap().len(), 3_000);
}

#[tokio::test]
async fn all_data_snapshot_is_stable_across_fetches() {
    let l = loader(MockSource::new(history(5_000)), config(1_000, 500, 10_000, 0));
    l.initialize("AAPL", Period::Daily, Adjust::None).await.unwrap();
    let snapshot = l.all_data();
    l.load_more().await.unwrap();
    assert_eq!(snapshot.len(), 1_000);
    assert_eq!(l.all_data().len(), 1_500);
}

#[tokio::test]
async fn closure_loader() {
    let bars = Arc::new(history(800));
    let source = {
        let bars = bars.clone();
        loader_fn(move |req: LoadRequest, _cancel: CancelToken| {
            let bars = bars.clone();
            async move {
                let to = req.to_timestamp.unwrap_or(i64::MAX);
                let hits: Vec<Ohlcv> = bars.iter().filter(|b| b.timestamp <= to).copied().collect();
                let limit = req.limit.unwrap_or(hits.len());
                Ok::<_, FetchError>(hits[hits.len().saturating_sub(limit)..].to_vec())
            }
        })
    };
    let l = LazyLoader::new(config(500, 500, 10_000, 1), source).unwrap();
    l.initialize("MSFT", Period::Minute5, Adjust::None).await.unwrap();
    assert_eq!(l.len(), 800);
    assert!(!l.has_more());
}

#[test]
fn invalid_config_is_rejected() {
    let res = LazyLoader::new(config(0, 500, 10_000, 0), MockSource::default());
    assert!(matches!(res, Err(LoaderError::InvalidConfig(_))));
}
