// File: crates/chart-feed/src/policy.rs
// Summary: Size-tier policy choosing a downsampling method and point budget from series length.

use serde::{Deserialize, Serialize};

use crate::downsample::{downsample, Method};
use crate::error::PolicyError;
use crate::series::Ohlcv;

/// Budget and method chosen for one series length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub max_points: usize,
    pub method: Method,
}

/// One row of the tier table. `up_to = None` is unbounded; `plan = None` is identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub up_to: Option<usize>,
    pub plan: Option<Plan>,
}

impl Tier {
    pub const fn identity(up_to: usize) -> Self {
        Self { up_to: Some(up_to), plan: None }
    }
    pub const fn bounded(up_to: usize, max_points: usize, method: Method) -> Self {
        Self { up_to: Some(up_to), plan: Some(Plan { max_points, method }) }
    }
    pub const fn unbounded(max_points: usize, method: Method) -> Self {
        Self { up_to: None, plan: Some(Plan { max_points, method }) }
    }

    fn covers(&self, len: usize) -> bool {
        self.up_to.map_or(true, |max| len <= max)
    }
}

/// Default tiers, ordered by `up_to`, each more aggressive than the previous.
pub const DEFAULT_TIERS: [Tier; 5] = [
    Tier::identity(1_000),
    Tier::bounded(5_000, 2_000, Method::Extreme),
    Tier::bounded(10_000, 1_500, Method::Extreme),
    Tier::bounded(50_000, 1_000, Method::Lttb),
    Tier::unbounded(500, Method::Lttb),
];

/// Ordered tier table; the first tier covering the length wins.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownsamplePolicy {
    pub tiers: Vec<Tier>,
}

impl Default for DownsamplePolicy {
    fn default() -> Self { Self { tiers: DEFAULT_TIERS.to_vec() } }
}

impl DownsamplePolicy {
    pub fn new(tiers: Vec<Tier>) -> Self { Self { tiers } }

    /// Plan for a series of `len` bars; `None` means render as-is.
    pub fn select(&self, len: usize) -> Option<Plan> {
        self.tiers.iter().find(|t| t.covers(len)).and_then(|t| t.plan)
    }

    /// Apply the selected plan. Tiers with a zero budget fall back to identity.
    pub fn apply(&self, data: &[Ohlcv], keep_last: bool) -> Vec<Ohlcv> {
        match self.select(data.len()) {
            Some(plan) => downsample(data, plan.max_points, plan.method, keep_last)
                .unwrap_or_else(|_| data.to_vec()),
            None => data.to_vec(),
        }
    }

    /// Tier-table sanity: ascending bounds, only the final tier unbounded, non-zero budgets.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let mut prev: Option<usize> = None;
        for (i, tier) in self.tiers.iter().enumerate() {
            match tier.up_to {
                Some(up_to) => {
                    if prev.is_some_and(|p| up_to <= p) {
                        return Err(PolicyError::NotIncreasing { index: i, bound: up_to });
                    }
                    prev = Some(up_to);
                }
                None if i + 1 != self.tiers.len() => {
                    return Err(PolicyError::UnboundedNotLast { index: i });
                }
                None => {}
            }
            if let Some(plan) = tier.plan {
                if plan.max_points == 0 {
                    return Err(PolicyError::ZeroBudget { index: i });
                }
            }
        }
        Ok(())
    }
}

/// Downsample with the default tier table.
pub fn auto_downsample(data: &[Ohlcv], keep_last: bool) -> Vec<Ohlcv> {
    DownsamplePolicy::default().apply(data, keep_last)
}
