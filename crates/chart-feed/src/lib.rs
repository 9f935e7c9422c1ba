// File: crates/chart-feed/src/lib.rs
// Summary: Library entry point; exports OHLCV downsampling and the chunked lazy loader.

pub mod series;
pub mod types;
pub mod error;
pub mod config;
pub mod cancel;
pub mod downsample;
pub mod policy;
pub mod loader;

pub use series::{Adjust, Ohlcv, Period};
pub use types::{DataChunk, LoadProgress, LoadRequest, LoadingStatus};
pub use error::{DownsampleError, FetchError, LoaderError, ParseError, PolicyError};
pub use config::LoaderConfig;
pub use cancel::{CancelHandle, CancelToken};
pub use downsample::{downsample, lttb, aggregate_ohlc_buckets, Method};
pub use policy::{auto_downsample, DownsamplePolicy, Plan, Tier};
pub use loader::{loader_fn, DataLoader, FnLoader, LazyLoader};
