//! Day-scoped memoization of bucketing results.
//!
//! [`bucket`](crate::bucket) is pure, so its results can be cached freely. The cache here is an
//! explicitly constructed object: callers own its lifecycle and pass it into request handlers.
//! Entries live for one UTC day (as reported by the injected [`Clock`]) and are dropped in bulk
//! when the day rolls over or when the entry cap is reached.

use std::collections::HashMap;

use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{bucket, Assignment, BucketMode, Clock};

/// Configuration for [`AssignmentCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentCacheConfig {
    /// Upper bound on cached entries; reaching it clears the cache.
    pub max_entries: usize,
}

impl Default for AssignmentCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    visitor: String,
    experiment: String,
    variant_count: usize,
    traffic_bits: u64,
    mode: BucketMode,
}

#[derive(Debug, Default)]
struct Inner {
    day: Option<NaiveDate>,
    entries: HashMap<Key, Assignment>,
}

/// Memoizing front for [`bucket`].
#[derive(Debug, Default)]
pub struct AssignmentCache {
    cfg: AssignmentCacheConfig,
    inner: Mutex<Inner>,
}

impl AssignmentCache {
    pub fn new(cfg: AssignmentCacheConfig) -> Self {
        Self {
            cfg,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Bucket a visitor, reusing a cached answer from the same day when present.
    pub fn assign(
        &self,
        clock: &dyn Clock,
        visitor_key: &str,
        experiment_key: &str,
        variant_count: usize,
        traffic_percent: f64,
        mode: BucketMode,
    ) -> Assignment {
        let today = clock.now().date_naive();
        let key = Key {
            visitor: visitor_key.to_string(),
            experiment: experiment_key.to_string(),
            variant_count,
            // -0.0 and 0.0 behave identically in `bucket`; normalize so they share an entry.
            traffic_bits: (traffic_percent + 0.0).to_bits(),
            mode,
        };

        let mut inner = self.inner.lock();
        if inner.day != Some(today) {
            inner.entries.clear();
            inner.day = Some(today);
        }
        if let Some(a) = inner.entries.get(&key) {
            return *a;
        }

        let a = bucket(visitor_key, experiment_key, variant_count, traffic_percent, mode);
        if inner.entries.len() >= self.cfg.max_entries.max(1) {
            inner.entries.clear();
        }
        inner.entries.insert(key, a);
        a
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.day = None;
    }
}
