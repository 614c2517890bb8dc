//! Per-variant statistics folded from pre-aggregated query rows.
//!
//! [`VariantStats`] are derived, never persisted: every evaluation re-reads the aggregation
//! source and rebuilds them from scratch.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ConversionCounts, Result};

/// Event type attached to a count row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Impression,
    Conversion,
    /// Any other event; ignored by the evaluators.
    Other(String),
}

impl EventType {
    pub fn parse(s: &str) -> Self {
        match s {
            "impression" => Self::Impression,
            "conversion" => Self::Conversion,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One `{variant, eventType, count}` aggregation row.
///
/// `variant` is the variant index rendered as a decimal string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountRow {
    pub variant: String,
    pub event_type: String,
    pub count: i64,
}

/// One `{variant, totalRevenue}` aggregation row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueRow {
    pub variant: String,
    pub total_revenue: f64,
}

/// Pre-aggregated query surface for one experiment's events.
pub trait AggregationSource: Send + Sync {
    fn variant_counts(&self, experiment_id: &str) -> Result<Vec<CountRow>>;
    fn variant_revenue(&self, experiment_id: &str) -> Result<Vec<RevenueRow>>;
}

impl<A: AggregationSource + ?Sized> AggregationSource for std::sync::Arc<A> {
    fn variant_counts(&self, experiment_id: &str) -> Result<Vec<CountRow>> {
        (**self).variant_counts(experiment_id)
    }
    fn variant_revenue(&self, experiment_id: &str) -> Result<Vec<RevenueRow>> {
        (**self).variant_revenue(experiment_id)
    }
}

/// Counts for one variant.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantStats {
    pub impressions: i64,
    pub conversions: i64,
    pub total_revenue: f64,
}

impl VariantStats {
    /// Conversions per impression; `0.0` with no impressions.
    pub fn conversion_rate(&self) -> f64 {
        let c = self.counts().clamped();
        if c.total == 0 {
            0.0
        } else {
            c.conversions as f64 / c.total as f64
        }
    }

    /// Revenue per impression; `0.0` with no impressions.
    pub fn revenue_per_impression(&self) -> f64 {
        if self.impressions <= 0 || !self.total_revenue.is_finite() {
            0.0
        } else {
            self.total_revenue / self.impressions as f64
        }
    }

    /// Binomial view for the estimator: conversions out of impressions.
    pub fn counts(&self) -> ConversionCounts {
        ConversionCounts::new(self.conversions, self.impressions)
    }
}

/// Fold aggregation rows into exactly `variant_count` stats, indexed by variant.
///
/// Rows with a non-numeric or out-of-range variant are skipped. Repeated rows for the same
/// variant and event type are summed.
pub fn collect_variant_stats(
    variant_count: usize,
    counts: &[CountRow],
    revenue: &[RevenueRow],
) -> Vec<VariantStats> {
    let mut out = vec![VariantStats::default(); variant_count];

    for row in counts {
        let Some(idx) = parse_variant(&row.variant, variant_count) else {
            debug!("Skipping count row for unknown variant {:?}", row.variant);
            continue;
        };
        let s = &mut out[idx];
        match EventType::parse(&row.event_type) {
            EventType::Impression => s.impressions = s.impressions.saturating_add(row.count),
            EventType::Conversion => s.conversions = s.conversions.saturating_add(row.count),
            EventType::Other(_) => {}
        }
    }

    for row in revenue {
        let Some(idx) = parse_variant(&row.variant, variant_count) else {
            debug!("Skipping revenue row for unknown variant {:?}", row.variant);
            continue;
        };
        if row.total_revenue.is_finite() {
            out[idx].total_revenue += row.total_revenue;
        }
    }

    out
}

fn parse_variant(s: &str, variant_count: usize) -> Option<usize> {
    s.trim().parse::<usize>().ok().filter(|&i| i < variant_count)
}

/// In-memory [`AggregationSource`] keyed by experiment id.
///
/// Useful for replays and tests; rows are returned verbatim.
#[derive(Debug, Default)]
pub struct StaticAggregates {
    rows: RwLock<BTreeMap<String, (Vec<CountRow>, Vec<RevenueRow>)>>,
}

impl StaticAggregates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the rows for `experiment_id`.
    pub fn set(&self, experiment_id: &str, counts: Vec<CountRow>, revenue: Vec<RevenueRow>) {
        self.rows
            .write()
            .insert(experiment_id.to_string(), (counts, revenue));
    }

    /// Replace the rows for `experiment_id` with `(impressions, conversions)` per variant index.
    pub fn set_counts(&self, experiment_id: &str, per_variant: &[(i64, i64)]) {
        let mut counts = Vec::with_capacity(per_variant.len() * 2);
        for (i, &(impressions, conversions)) in per_variant.iter().enumerate() {
            counts.push(CountRow {
                variant: i.to_string(),
                event_type: "impression".to_string(),
                count: impressions,
            });
            counts.push(CountRow {
                variant: i.to_string(),
                event_type: "conversion".to_string(),
                count: conversions,
            });
        }
        self.set(experiment_id, counts, Vec::new());
    }
}

impl AggregationSource for StaticAggregates {
    fn variant_counts(&self, experiment_id: &str) -> Result<Vec<CountRow>> {
        Ok(self
            .rows
            .read()
            .get(experiment_id)
            .map(|(c, _)| c.clone())
            .unwrap_or_default())
    }

    fn variant_revenue(&self, experiment_id: &str) -> Result<Vec<RevenueRow>> {
        Ok(self
            .rows
            .read()
            .get(experiment_id)
            .map(|(_, r)| r.clone())
            .unwrap_or_default())
    }
}
