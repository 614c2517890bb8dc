//! Automatic flag traffic escalation.
//!
//! A flag's probability is `P(on beats off)`. Each evaluation above `threshold` extends a
//! persisted streak; once the streak reaches `required_hits`, the flag moves to the next
//! schedule step above its current traffic and the streak restarts. Any evaluation at or below
//! the threshold resets the streak to zero (no hysteresis).
//!
//! Ramping relies on [`BucketMode::Flag`](crate::BucketMode::Flag) being ramp-stable: visitors
//! already "on" stay "on" as traffic grows.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    Clock, Error, Experiment, ExperimentKind, ExperimentRepository, KeyValueStore, RampCounters,
    Result, UpdateOutcome,
};

/// Auto-ramp settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RampConfig {
    /// An evaluation qualifies when `P(on beats off) > threshold`.
    pub threshold: f64,
    /// Consecutive qualifying evaluations needed for one ramp step.
    pub required_hits: u32,
    /// Traffic percentages to step through, ascending.
    pub schedule: Vec<f64>,
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            threshold: 0.95,
            required_hits: 3,
            schedule: vec![10.0, 25.0, 50.0, 75.0, 100.0],
        }
    }
}

impl RampConfig {
    /// Smallest schedule step strictly above `current`.
    pub fn next_step(&self, current: f64) -> Option<f64> {
        self.schedule
            .iter()
            .copied()
            .filter(|s| s.is_finite() && *s > current)
            .min_by(f64::total_cmp)
    }
}

/// Outcome of one auto-ramp evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RampDecision {
    /// Not an active flag.
    NotApplicable,
    /// No "on" probability was available.
    NoProbability,
    /// Probability at or below threshold; the streak was reset.
    Reset { previous_hits: u32 },
    /// Probability above threshold; streak extended but not yet long enough.
    Counting { hits: u32, required: u32 },
    /// Traffic stepped up and the streak reset.
    Ramped { from: f64, to: f64 },
    /// Streak is long enough but there is no higher step.
    AtMaximum { hits: u32 },
    /// A step was due but the record changed underneath us; traffic was not written and the
    /// streak was discarded.
    Superseded { hits: u32 },
}

/// True when auto-ramp should look at `experiment` at all.
pub fn auto_ramp_applies(experiment: &Experiment) -> bool {
    experiment.kind == ExperimentKind::Flag && experiment.is_active()
}

/// Evaluate auto-ramp for one flag.
///
/// `probabilities` is aligned with `experiment.variants`; index 1 is `P(on beats off)`.
pub fn evaluate_auto_ramp<S: KeyValueStore>(
    repo: &dyn ExperimentRepository,
    counters: &RampCounters<S>,
    clock: &dyn Clock,
    cfg: &RampConfig,
    experiment: &Experiment,
    probabilities: &[Option<f64>],
) -> Result<RampDecision> {
    if !auto_ramp_applies(experiment) {
        return Ok(RampDecision::NotApplicable);
    }
    let Some(p) = probabilities.get(1).copied().flatten() else {
        return Ok(RampDecision::NoProbability);
    };
    let id = experiment.id.as_str();

    let previous = match counters.get(id) {
        Ok(n) => n,
        Err(err @ Error::MalformedCounter { .. }) => {
            warn!("Treating ramp counter for '{id}' as 0: {err}");
            0
        }
        Err(err) => return Err(err),
    };

    if p.is_nan() || p <= cfg.threshold {
        counters.reset(id)?;
        if previous > 0 {
            debug!("Ramp streak for '{id}' reset from {previous} (p={p:.4})");
        }
        return Ok(RampDecision::Reset {
            previous_hits: previous,
        });
    }

    let hits = previous.saturating_add(1);
    if hits < cfg.required_hits {
        counters.set(id, hits)?;
        debug!("Ramp streak for '{id}' at {hits}/{} (p={p:.4})", cfg.required_hits);
        return Ok(RampDecision::Counting {
            hits,
            required: cfg.required_hits,
        });
    }

    let from = experiment.traffic_percent;
    let Some(to) = cfg.next_step(from) else {
        counters.set(id, hits)?;
        debug!("Flag '{id}' already at top of ramp schedule ({from}%)");
        return Ok(RampDecision::AtMaximum { hits });
    };

    // Streak is spent before traffic moves.
    counters.reset(id)?;

    let now = clock.now();
    let mut step = |e: &mut Experiment| {
        e.traffic_percent = to;
        e.updated_at = Some(now);
    };
    match repo.update_if_active(id, Some(experiment.revision), &mut step)? {
        UpdateOutcome::Applied(_) => {
            info!("Ramped flag '{id}' from {from}% to {to}% after {hits} qualifying checks");
            Ok(RampDecision::Ramped { from, to })
        }
        other => {
            warn!("Ramp step for '{id}' not applied, streak discarded: {other:?}");
            Ok(RampDecision::Superseded { hits })
        }
    }
}
