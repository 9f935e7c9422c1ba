// File: crates/chart-feed/src/error.rs
// Summary: Error types for downsampling and the lazy loader.

use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Error type returned by injected data loaders.
pub type FetchError = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DownsampleError {
    #[error("max_points must be greater than zero, got {0}")]
    InvalidMaxPoints(usize),
}

/// Unrecognised name for a period, adjustment or downsample method.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self { kind, value: value.to_string() }
    }
}

/// Malformed tier table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("tier {index}: bound {bound} does not increase")]
    NotIncreasing { index: usize, bound: usize },
    #[error("tier {index}: only the last tier may be unbounded")]
    UnboundedNotLast { index: usize },
    #[error("tier {index}: max_points must be greater than zero")]
    ZeroBudget { index: usize },
}

#[derive(Debug, Clone, Error)]
pub enum LoaderError {
    /// Upstream failure, surfaced verbatim.
    #[error("data loader failed: {0}")]
    Fetch(#[source] Arc<dyn StdError + Send + Sync + 'static>),

    #[error("loader has not been initialized")]
    NotInitialized,

    /// Superseded by `initialize`, `reset` or `cancel`; nothing was committed.
    #[error("fetch cancelled before its result was committed")]
    Cancelled,

    #[error("invalid range: from {from} is after to {to}")]
    InvalidRange { from: i64, to: i64 },

    #[error("invalid loader config: {0}")]
    InvalidConfig(String),

    #[error("invalid downsample policy: {0}")]
    InvalidPolicy(#[from] PolicyError),

    #[error(transparent)]
    Downsample(#[from] DownsampleError),
}

impl LoaderError {
    pub fn fetch(err: FetchError) -> Self {
        Self::Fetch(Arc::from(err))
    }

    /// Whether calling the same operation again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LoaderError::Fetch(_) | LoaderError::Cancelled)
    }
}
