// File: crates/chart-feed/src/loader.rs
// Summary: Chunked lazy loader; fetches history backwards, caches it with a FIFO ceiling, serves display views.
// Notes:
// - The cached series is ascending by timestamp; older chunks are prepended.
// - State sits behind a mutex that is never held across an await. `Loading` gates
//   overlapping `load_more` calls.
// - Every fetch carries a session epoch; results from a superseded session are dropped.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cancel::{CancelHandle, CancelToken};
use crate::config::LoaderConfig;
use crate::downsample::{downsample, Method};
use crate::error::{FetchError, LoaderError};
use crate::series::{self, Adjust, Ohlcv, Period};
use crate::types::{DataChunk, LoadProgress, LoadRequest, LoadingStatus};

/// Upstream bar source (network/API layer).
///
/// Contract: results are sorted by timestamp in one direction; an empty result means
/// no more data for the request, never an error.
#[async_trait]
pub trait DataLoader: Send + Sync {
    async fn load(&self, request: LoadRequest, cancel: CancelToken) -> Result<Vec<Ohlcv>, FetchError>;
}

#[async_trait]
impl<T: DataLoader + ?Sized> DataLoader for Arc<T> {
    async fn load(&self, request: LoadRequest, cancel: CancelToken) -> Result<Vec<Ohlcv>, FetchError> {
        (**self).load(request, cancel).await
    }
}

/// [`DataLoader`] backed by an async closure.
pub struct FnLoader<F>(F);

pub fn loader_fn<F, Fut>(f: F) -> FnLoader<F>
where
    F: Fn(LoadRequest, CancelToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Ohlcv>, FetchError>> + Send,
{
    FnLoader(f)
}

#[async_trait]
impl<F, Fut> DataLoader for FnLoader<F>
where
    F: Fn(LoadRequest, CancelToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Ohlcv>, FetchError>> + Send,
{
    async fn load(&self, request: LoadRequest, cancel: CancelToken) -> Result<Vec<Ohlcv>, FetchError> {
        (self.0)(request, cancel).await
    }
}

struct Session {
    series: Arc<Vec<Ohlcv>>,
    chunks: Vec<DataChunk>,
    status: LoadingStatus,
    last_error: Option<LoaderError>,
    symbol: Option<String>,
    period: Period,
    adjust: Adjust,
    initialized: bool,
    exhausted: bool,
    epoch: u64,
    cancel: CancelHandle,
}

impl Session {
    fn new(epoch: u64) -> Self {
        Self {
            series: Arc::new(Vec::new()),
            chunks: Vec::new(),
            status: LoadingStatus::Idle,
            last_error: None,
            symbol: None,
            period: Period::default(),
            adjust: Adjust::default(),
            initialized: false,
            exhausted: false,
            epoch,
            cancel: CancelHandle::new(),
        }
    }

    /// Signal the in-flight fetch and start a new epoch so its result is dropped.
    fn supersede(&mut self) {
        self.cancel.cancel();
        self.cancel = CancelHandle::new();
        self.epoch += 1;
    }

    fn fail(&mut self, err: FetchError) -> LoaderError {
        let err = LoaderError::fetch(err);
        self.status = LoadingStatus::Error;
        self.last_error = Some(err.clone());
        err
    }
}

pub struct LazyLoader<L> {
    config: LoaderConfig,
    source: L,
    state: Mutex<Session>,
}

impl<L: DataLoader> LazyLoader<L> {
    pub fn new(config: LoaderConfig, source: L) -> Result<Self, LoaderError> {
        config.validate()?;
        Ok(Self { config, source, state: Mutex::new(Session::new(0)) })
    }

    /// Start a fresh session: fetch the most recent `initial_load_size` bars, then
    /// warm the cache with up to `preload_chunks` older chunks.
    ///
    /// Preload failures are logged and leave `status = Error`, but the call still
    /// returns the initial bars.
    pub async fn initialize(&self, symbol: impl Into<String>, period: Period, adjust: Adjust) -> Result<Vec<Ohlcv>, LoaderError> {
        let symbol = symbol.into();
        let (epoch, token) = {
            let mut st = self.state.lock();
            st.supersede();
            let epoch = st.epoch;
            *st = Session {
                symbol: Some(symbol.clone()),
                period,
                adjust,
                status: LoadingStatus::Loading,
                ..Session::new(epoch)
            };
            (st.epoch, st.cancel.token())
        };

        let limit = self.config.initial_load_size;
        info!(%symbol, %period, %adjust, limit, "initializing lazy loader");
        let result = self.source.load(LoadRequest::latest(symbol.as_str(), period, limit, adjust), token).await;

        let (data, exhausted) = {
            let mut st = self.state.lock();
            if st.epoch != epoch {
                debug!(%symbol, "initialize superseded; dropping result");
                return Err(LoaderError::Cancelled);
            }
            let raw = result.map_err(|e| st.fail(e))?;
            let is_last = raw.len() < limit;
            let data = ascending(raw);
            st.series = Arc::new(data.clone());
            st.chunks.push(DataChunk {
                data: data.clone(),
                start_index: 0,
                end_index: data.len() as isize - 1,
                is_first: true,
                is_last,
            });
            st.initialized = true;
            st.exhausted = is_last;
            st.status = LoadingStatus::Completed;
            self.enforce_cache_limit(&mut st);
            (data, is_last)
        };
        info!(%symbol, bars = data.len(), exhausted, "initial chunk loaded");

        if !exhausted {
            for n in 0..self.config.preload_chunks {
                if self.epoch() != epoch { break; }
                match self.load_more().await {
                    Ok(bars) if bars.is_empty() => break,
                    Ok(bars) => debug!(%symbol, chunk = n + 1, bars = bars.len(), "preloaded chunk"),
                    Err(err) => {
                        warn!(%symbol, chunk = n + 1, error = %err, "preload failed; continuing with loaded data");
                        break;
                    }
                }
            }
        }
        Ok(data)
    }

    /// Fetch the next `chunk_size` bars older than the oldest cached bar.
    ///
    /// Returns `[]` without fetching while another fetch is in flight or once history
    /// is exhausted. An empty return is not an error, and only an empty upstream
    /// response marks history exhausted.
    ///
    /// Once the cache holds `max_cache_size` bars, each new chunk is evicted as soon
    /// as it lands, so the next call asks for the same bars again. Callers paging
    /// until `[]` must also stop at the ceiling (see [`LazyLoader::len`]).
    pub async fn load_more(&self) -> Result<Vec<Ohlcv>, LoaderError> {
        let (epoch, token, request) = {
            let mut st = self.state.lock();
            if st.status == LoadingStatus::Loading {
                debug!("load_more skipped: fetch already in flight");
                return Ok(Vec::new());
            }
            let symbol = match (&st.symbol, st.initialized) {
                (Some(symbol), true) => symbol.clone(),
                _ => return Err(LoaderError::NotInitialized),
            };
            if st.exhausted || st.chunks.last().is_some_and(|c| c.is_last) {
                return Ok(Vec::new());
            }
            let request = match st.series.first() {
                Some(oldest) => LoadRequest::older_than(symbol, st.period, oldest.timestamp, self.config.chunk_size, st.adjust),
                None => LoadRequest::latest(symbol, st.period, self.config.chunk_size, st.adjust),
            };
            st.status = LoadingStatus::Loading;
            (st.epoch, st.cancel.token(), request)
        };

        debug!(symbol = %request.symbol, before = ?request.to_timestamp, limit = ?request.limit, "fetching older chunk");
        let result = self.source.load(request, token).await;

        let mut st = self.state.lock();
        if st.epoch != epoch {
            debug!("load_more superseded; dropping result");
            return Err(LoaderError::Cancelled);
        }
        let raw = result.map_err(|e| st.fail(e))?;
        st.status = LoadingStatus::Completed;
        st.last_error = None;

        if raw.is_empty() {
            // The previous chunk is now known to be the oldest.
            if let Some(prev) = st.chunks.last_mut() {
                prev.is_last = true;
            }
            st.exhausted = true;
            info!(bars = st.series.len(), "history exhausted");
            return Ok(Vec::new());
        }

        let raw_len = raw.len();
        let oldest = st.series.first().map(|p| p.timestamp);
        let mut data = ascending(raw);
        if let Some(oldest) = oldest {
            data.retain(|p| p.timestamp < oldest);
        }
        if data.is_empty() {
            warn!(returned = raw_len, "source returned no bars older than the cache; nothing appended");
            return Ok(Vec::new());
        }

        let n = data.len() as isize;
        for chunk in st.chunks.iter_mut() {
            chunk.start_index += n;
            chunk.end_index += n;
        }
        let is_last = raw_len < self.config.chunk_size;
        Arc::make_mut(&mut st.series).splice(0..0, data.iter().copied());
        st.chunks.push(DataChunk { data: data.clone(), start_index: 0, end_index: n - 1, is_first: false, is_last });
        st.exhausted = is_last;
        self.enforce_cache_limit(&mut st);
        debug!(bars = data.len(), cached = st.series.len(), is_last, "chunk appended");
        Ok(data)
    }

    /// One-shot fetch of `from..=to` for jump-to-date navigation. Leaves the cache and
    /// chunk bookkeeping untouched.
    ///
    /// A failure sets `status = Error`, except while a `load_more` is in flight: then
    /// only `last_error` is recorded and `Loading` keeps gating further fetches.
    pub async fn load_range(&self, from: i64, to: i64, adjust: Adjust) -> Result<Vec<Ohlcv>, LoaderError> {
        if from > to {
            return Err(LoaderError::InvalidRange { from, to });
        }
        let (epoch, token, request) = {
            let st = self.state.lock();
            let Some(symbol) = st.symbol.clone() else {
                return Err(LoaderError::NotInitialized);
            };
            (st.epoch, st.cancel.token(), LoadRequest::range(symbol, st.period, from, to, adjust))
        };

        debug!(symbol = %request.symbol, from, to, "fetching range");
        let result = self.source.load(request, token).await;

        let mut st = self.state.lock();
        if st.epoch != epoch {
            return Err(LoaderError::Cancelled);
        }
        match result {
            Ok(raw) => Ok(ascending(raw)),
            Err(e) if st.status == LoadingStatus::Loading => {
                let err = LoaderError::fetch(e);
                warn!(from, to, error = %err, "range fetch failed during load_more");
                st.last_error = Some(err.clone());
                Err(err)
            }
            Err(e) => Err(st.fail(e)),
        }
    }

    /// Cancel the in-flight fetch, if any. Its result will not be committed.
    pub fn cancel(&self) {
        let mut st = self.state.lock();
        if st.status != LoadingStatus::Loading { return; }
        st.supersede();
        st.status = if st.initialized { LoadingStatus::Completed } else { LoadingStatus::Idle };
        info!(symbol = ?st.symbol, "in-flight fetch cancelled");
    }

    /// Drop every cached bar and return to `Idle`, cancelling in-flight work.
    pub fn reset(&self) {
        let mut st = self.state.lock();
        st.supersede();
        let epoch = st.epoch;
        *st = Session::new(epoch);
        debug!("lazy loader reset");
    }

    /// Snapshot of the cached series; later fetches do not mutate it.
    pub fn all_data(&self) -> Arc<Vec<Ohlcv>> {
        self.state.lock().series.clone()
    }

    /// Render-ready view of the cached series.
    ///
    /// `None` uses the size-tier policy; `Some(n)` uses the tier's method (LTTB for
    /// identity tiers) with a budget of `n`.
    pub fn display_data(&self, max_points: Option<usize>) -> Result<Vec<Ohlcv>, LoaderError> {
        let data = self.all_data();
        if !self.config.enable_downsampling {
            return Ok(data.to_vec());
        }
        let policy = &self.config.policy;
        match max_points {
            None => Ok(policy.apply(&data, self.config.keep_last)),
            Some(n) => {
                let method = policy.select(data.len()).map_or(Method::Lttb, |plan| plan.method);
                Ok(downsample(&data, n, method, self.config.keep_last)?)
            }
        }
    }

    pub fn find_nearest(&self, timestamp: i64) -> Option<Ohlcv> {
        let data = self.all_data();
        series::nearest(&data, timestamp).copied()
    }

    /// Cached bars within `from..=to`.
    pub fn data_in_range(&self, from: i64, to: i64) -> Vec<Ohlcv> {
        let data = self.all_data();
        series::window(&data, from, to).to_vec()
    }

    pub fn progress(&self) -> LoadProgress {
        let st = self.state.lock();
        let loaded = st.series.len();
        let total = if st.exhausted { loaded } else { loaded + self.config.chunk_size };
        let percentage = match total {
            0 if st.exhausted => 100.0,
            0 => 0.0,
            t => loaded as f64 / t as f64 * 100.0,
        };
        LoadProgress { loaded, total, percentage }
    }

    pub fn status(&self) -> LoadingStatus { self.state.lock().status }
    pub fn last_error(&self) -> Option<LoaderError> { self.state.lock().last_error.clone() }
    pub fn loaded_chunks(&self) -> Vec<DataChunk> { self.state.lock().chunks.clone() }
    pub fn symbol(&self) -> Option<String> { self.state.lock().symbol.clone() }
    pub fn period(&self) -> Period { self.state.lock().period }
    pub fn len(&self) -> usize { self.state.lock().series.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
    pub fn config(&self) -> &LoaderConfig { &self.config }
    pub fn source(&self) -> &L { &self.source }

    /// More history may exist upstream.
    pub fn has_more(&self) -> bool {
        let st = self.state.lock();
        st.initialized && !st.exhausted
    }

    fn epoch(&self) -> u64 { self.state.lock().epoch }

    /// Evict the oldest bars beyond `max_cache_size` and shift chunk indices to match.
    fn enforce_cache_limit(&self, st: &mut Session) {
        let len = st.series.len();
        let max = self.config.max_cache_size;
        if len <= max { return; }
        let excess = len - max;
        Arc::make_mut(&mut st.series).drain(..excess);
        let shift = excess as isize;
        let before = st.chunks.len();
        st.chunks.retain_mut(|chunk| {
            chunk.start_index -= shift;
            chunk.end_index -= shift;
            if chunk.end_index < 0 {
                return false;
            }
            if chunk.start_index < 0 {
                chunk.data.drain(..chunk.start_index.unsigned_abs());
                chunk.start_index = 0;
            }
            true
        });
        let oldest = st.series.first().and_then(|p| p.datetime());
        debug!(excess, dropped_chunks = before - st.chunks.len(), oldest = ?oldest, "cache ceiling reached; evicted oldest bars");
    }
}

/// Loaders may answer in either direction; the cache is ascending.
fn ascending(mut data: Vec<Ohlcv>) -> Vec<Ohlcv> {
    if data.len() > 1 && data[0].timestamp > data[data.len() - 1].timestamp {
        data.reverse();
    }
    data
}
