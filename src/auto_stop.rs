//! Automatic experiment termination.
//!
//! Once every variant has enough impressions, the first non-control variant (in index order)
//! whose probability of beating control crosses either threshold ends the experiment:
//! above `win_threshold` that variant wins, below `lose_threshold` control wins.
//!
//! The rule is first-match, not strongest-match: if variants 1 and 2 both qualify, variant 1
//! is chosen even when variant 2 has the more extreme probability.
//!
//! Near-misses leave no trace. Every evaluation starts from the current counts alone.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    Clock, Experiment, ExperimentKind, ExperimentRepository, ExperimentStatus, Result,
    UpdateOutcome, VariantStats,
};

/// Decision thresholds for auto-stop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoStopConfig {
    /// A variant wins when `P(variant beats control) > win_threshold`.
    pub win_threshold: f64,
    /// Control wins when `P(variant beats control) < lose_threshold`.
    pub lose_threshold: f64,
}

impl Default for AutoStopConfig {
    fn default() -> Self {
        Self {
            win_threshold: 0.99,
            lose_threshold: 0.01,
        }
    }
}

/// Outcome of one auto-stop evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StopDecision {
    /// Not an active experiment with auto-stop enabled.
    NotApplicable,
    /// Some variant is below the minimum sample gate.
    InsufficientSamples {
        variant: usize,
        impressions: i64,
        required: i64,
    },
    /// No variant crossed a threshold.
    NoDecision,
    /// The experiment was completed with `winner`.
    Completed {
        winner: String,
        winner_index: usize,
        /// The probability that triggered the decision (of the deciding non-control variant).
        probability: f64,
    },
    /// A winner was found but the record changed underneath us; nothing was written.
    Superseded,
}

/// The deciding `(winner_index, probability)`, if any variant crosses a threshold.
///
/// `probabilities` is aligned with variant indices; index 0 (control) is ignored.
pub fn find_winner(cfg: &AutoStopConfig, probabilities: &[Option<f64>]) -> Option<(usize, f64)> {
    probabilities
        .iter()
        .enumerate()
        .skip(1)
        .find_map(|(i, p)| {
            let p = (*p)?;
            if p > cfg.win_threshold {
                Some((i, p))
            } else if p < cfg.lose_threshold {
                Some((0, p))
            } else {
                None
            }
        })
}

/// True when auto-stop should look at `experiment` at all.
pub fn auto_stop_applies(experiment: &Experiment) -> bool {
    experiment.kind == ExperimentKind::Experiment && experiment.auto_stop && experiment.is_active()
}

/// Evaluate auto-stop for one experiment and persist a completion if warranted.
///
/// `stats` and `probabilities` are aligned with `experiment.variants`; missing trailing entries
/// count as zero impressions. The completion write is guarded by the repository: it only lands
/// if the record is still active at the revision we read.
pub fn evaluate_auto_stop(
    repo: &dyn ExperimentRepository,
    clock: &dyn Clock,
    cfg: &AutoStopConfig,
    experiment: &Experiment,
    stats: &[VariantStats],
    probabilities: &[Option<f64>],
) -> Result<StopDecision> {
    if !auto_stop_applies(experiment) {
        return Ok(StopDecision::NotApplicable);
    }

    let required = experiment.min_samples_per_variant.max(0);
    for variant in 0..experiment.variants.len() {
        let impressions = stats.get(variant).map_or(0, |s| s.impressions);
        if impressions < required {
            debug!(
                "Auto-stop for '{}' gated: variant {variant} has {impressions}/{required} impressions",
                experiment.id
            );
            return Ok(StopDecision::InsufficientSamples {
                variant,
                impressions,
                required,
            });
        }
    }

    let Some((winner_index, probability)) = find_winner(cfg, probabilities) else {
        return Ok(StopDecision::NoDecision);
    };
    let Some(winner) = experiment.variant_name(winner_index).map(str::to_string) else {
        warn!(
            "Auto-stop for '{}' picked variant {winner_index} which has no name",
            experiment.id
        );
        return Ok(StopDecision::NoDecision);
    };

    let now = clock.now();
    let mut complete = |e: &mut Experiment| {
        e.status = ExperimentStatus::Completed;
        e.winner = Some(winner.clone());
        e.completed_at = Some(now);
        e.updated_at = Some(now);
    };
    let outcome = repo.update_if_active(&experiment.id, Some(experiment.revision), &mut complete)?;

    match outcome {
        UpdateOutcome::Applied(_) => {
            info!(
                "Auto-stopped '{}': winner '{winner}' (variant {winner_index}, p={probability:.4})",
                experiment.id
            );
            Ok(StopDecision::Completed {
                winner,
                winner_index,
                probability,
            })
        }
        other => {
            warn!("Auto-stop completion for '{}' not applied: {other:?}", experiment.id);
            Ok(StopDecision::Superseded)
        }
    }
}
