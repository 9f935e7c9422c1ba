// File: crates/chart-feed/src/config.rs
// Summary: Lazy loader configuration with defaults and validation.

use serde::{Deserialize, Serialize};

use crate::error::LoaderError;
use crate::policy::DownsamplePolicy;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Most-recent bars requested by `initialize`.
    pub initial_load_size: usize,
    /// Bars requested per `load_more`.
    pub chunk_size: usize,
    /// Ceiling on cached bars; the oldest are evicted beyond it.
    pub max_cache_size: usize,
    /// Extra chunks fetched right after `initialize`.
    pub preload_chunks: usize,
    pub enable_downsampling: bool,
    /// Display views always end on the newest real bar.
    pub keep_last: bool,
    pub policy: DownsamplePolicy,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            initial_load_size: 1_000,
            chunk_size: 500,
            max_cache_size: 10_000,
            preload_chunks: 1,
            enable_downsampling: true,
            keep_last: true,
            policy: DownsamplePolicy::default(),
        }
    }
}

impl LoaderConfig {
    pub fn validate(&self) -> Result<(), LoaderError> {
        if self.initial_load_size == 0 {
            return Err(LoaderError::InvalidConfig("initial_load_size must be greater than zero".into()));
        }
        if self.chunk_size == 0 {
            return Err(LoaderError::InvalidConfig("chunk_size must be greater than zero".into()));
        }
        if self.max_cache_size < self.initial_load_size {
            return Err(LoaderError::InvalidConfig(format!(
                "max_cache_size ({}) is below initial_load_size ({})",
                self.max_cache_size, self.initial_load_size
            )));
        }
        self.policy.validate()?;
        Ok(())
    }
}
