//! Visitor bucketing for experiments and feature flags.
//!
//! Two modes share one hash ([`unit_hash`]) but reduce it differently:
//!
//! - [`BucketMode::Flag`]: threshold against `traffic_percent / 100`. Ramp-stable: raising the
//!   percentage only ever moves visitors from off to on.
//! - [`BucketMode::Experiment`]: visitors above the threshold are excluded; the rest are
//!   rescaled into `[0, 1)` and split evenly across variants. Not ramp-stable: changing the
//!   percentage mid-run reshuffles variant membership.
//!
//! The modes must stay distinct. Rescaling in flag mode would break the monotonic on-set that
//! auto-ramp relies on.

use serde::{Deserialize, Serialize};

use crate::unit_hash;

/// How a traffic percentage is applied to the unit hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketMode {
    /// Fixed-allocation A/B test.
    Experiment,
    /// Progressive on/off rollout.
    Flag,
}

/// Result of bucketing one visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignment {
    /// Visitor falls outside the experiment's traffic allocation.
    Excluded,
    /// Variant index (in flag mode: `0` = off, `1` = on).
    Variant(usize),
}

impl Assignment {
    /// Integer wire form: `-1` for [`Assignment::Excluded`], otherwise the variant index.
    #[must_use]
    pub fn as_index(self) -> i64 {
        match self {
            Self::Excluded => -1,
            Self::Variant(i) => i as i64,
        }
    }

    /// The variant index, if assigned.
    #[must_use]
    pub fn variant(self) -> Option<usize> {
        match self {
            Self::Excluded => None,
            Self::Variant(i) => Some(i),
        }
    }

    /// True for a flag visitor in the "on" state.
    #[must_use]
    pub fn is_on(self) -> bool {
        self == Self::Variant(1)
    }
}

/// Assign a visitor.
///
/// `traffic_percent` is clamped to `[0, 100]` (NaN is treated as `0`). `variant_count` is only
/// consulted in experiment mode; a count of zero is treated as one so the result is always a
/// valid index.
#[must_use]
pub fn bucket(
    visitor_key: &str,
    experiment_key: &str,
    variant_count: usize,
    traffic_percent: f64,
    mode: BucketMode,
) -> Assignment {
    let fraction = traffic_fraction(traffic_percent);
    let h = unit_hash(visitor_key, experiment_key);

    match mode {
        BucketMode::Flag => {
            if h < fraction {
                Assignment::Variant(1)
            } else {
                Assignment::Variant(0)
            }
        }
        BucketMode::Experiment => {
            if h >= fraction {
                return Assignment::Excluded;
            }
            let n = variant_count.max(1);
            let scaled = (h / fraction) * n as f64;
            let idx = (scaled.floor() as usize).min(n - 1);
            Assignment::Variant(idx)
        }
    }
}

/// [`bucket`] in its integer wire form (`-1` = not in experiment).
#[must_use]
pub fn bucket_index(
    visitor_key: &str,
    experiment_key: &str,
    variant_count: usize,
    traffic_percent: f64,
    mode: BucketMode,
) -> i64 {
    bucket(visitor_key, experiment_key, variant_count, traffic_percent, mode).as_index()
}

fn traffic_fraction(traffic_percent: f64) -> f64 {
    if traffic_percent.is_nan() {
        return 0.0;
    }
    traffic_percent.clamp(0.0, 100.0) / 100.0
}
