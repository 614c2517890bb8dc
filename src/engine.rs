//! Read-results pipeline and assignment entry point.
//!
//! One `read_results` call:
//! 1. loads the record (a miss is [`Evaluation::NotFound`], not an error),
//! 2. folds fresh aggregation rows into per-variant stats,
//! 3. estimates `P(variant beats control)` for each non-control variant,
//! 4. hands both to the evaluator matching the record's kind (auto-stop for experiments,
//!    auto-ramp for flags), which may write to the store.
//!
//! Failures before step 4's write leave the store untouched, so a failed evaluation is safe to
//! retry on the next cycle.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    collect_variant_stats, evaluate_auto_ramp, evaluate_auto_stop, AggregationSource,
    Assignment, AssignmentCache, AssignmentCacheConfig, AutoStopConfig, Clock, ConversionCounts,
    Error, Estimator, EstimatorConfig, Experiment, ExperimentKind, ExperimentRepository,
    ExperimentStatus, KeyValueStore, KvExperimentRepository, RampConfig, RampCounters,
    RampDecision, Result, StopDecision, VariantStats,
};

/// Engine-wide configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub estimator: EstimatorConfig,
    pub auto_stop: AutoStopConfig,
    pub ramp: RampConfig,
    pub cache: AssignmentCacheConfig,
}

impl EngineConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// What the kind-specific evaluator decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Stop(StopDecision),
    Ramp(RampDecision),
}

/// Raw statistics plus the decision for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsReport {
    /// The record after any write the evaluator made.
    pub experiment: Experiment,
    /// Aligned with `experiment.variants`.
    pub stats: Vec<VariantStats>,
    /// Aligned with `experiment.variants`; index 0 is `None`.
    pub probabilities: Vec<Option<f64>>,
    pub decision: Decision,
}

/// Result of [`ResultsEngine::read_results`].
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    NotFound,
    Report(Box<ResultsReport>),
}

impl Evaluation {
    pub fn report(&self) -> Option<&ResultsReport> {
        match self {
            Self::NotFound => None,
            Self::Report(r) => Some(r),
        }
    }
}

/// Result of [`ResultsEngine::assign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignOutcome {
    NotFound,
    /// The record is paused or completed; experiments assign nobody and flags read as off.
    Inactive(ExperimentStatus),
    Assigned {
        assignment: Assignment,
        /// Name of the assigned variant; `None` when excluded.
        variant: Option<String>,
    },
}

/// Ties the repository, ramp counters, aggregation source, clock, and estimator together.
pub struct ResultsEngine<S, A, C> {
    repo: KvExperimentRepository<S>,
    counters: RampCounters<S>,
    aggregates: A,
    clock: C,
    estimator: Estimator,
    cfg: EngineConfig,
}

impl<S, A, C> ResultsEngine<S, A, C>
where
    S: KeyValueStore + Clone,
    A: AggregationSource,
    C: Clock,
{
    /// Records and ramp counters share `store`.
    pub fn new(store: S, aggregates: A, clock: C, cfg: EngineConfig) -> Self {
        Self {
            repo: KvExperimentRepository::new(store.clone()),
            counters: RampCounters::new(store),
            aggregates,
            clock,
            estimator: Estimator::new(cfg.estimator),
            cfg,
        }
    }

    pub fn repository(&self) -> &KvExperimentRepository<S> {
        &self.repo
    }

    pub fn counters(&self) -> &RampCounters<S> {
        &self.counters
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Recompute statistics for `id` and run its evaluator.
    pub fn read_results(&self, id: &str) -> Result<Evaluation> {
        self.evaluate(id, None)
    }

    /// Like [`read_results`](Self::read_results), but gives up with
    /// [`Error::DeadlineExceeded`] if `deadline` passes before the evaluator runs.
    pub fn read_results_with_deadline(&self, id: &str, deadline: Instant) -> Result<Evaluation> {
        self.evaluate(id, Some(deadline))
    }

    /// Evaluate several records; one failure does not stop the rest.
    pub fn evaluate_many<'a, I>(&self, ids: I) -> Vec<(String, Result<Evaluation>)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        ids.into_iter()
            .map(|id| {
                let res = self.read_results(id);
                if let Err(ref err) = res {
                    warn!("Evaluation of '{id}' failed: {err}");
                }
                (id.to_string(), res)
            })
            .collect()
    }

    /// Bucket `visitor_key` into record `id`.
    pub fn assign(&self, visitor_key: &str, id: &str) -> Result<AssignOutcome> {
        self.assign_inner(None, visitor_key, id)
    }

    /// [`assign`](Self::assign) through a caller-owned [`AssignmentCache`].
    pub fn assign_cached(
        &self,
        cache: &AssignmentCache,
        visitor_key: &str,
        id: &str,
    ) -> Result<AssignOutcome> {
        self.assign_inner(Some(cache), visitor_key, id)
    }

    /// A fresh cache sized from this engine's configuration.
    pub fn new_cache(&self) -> AssignmentCache {
        AssignmentCache::new(self.cfg.cache)
    }

    fn assign_inner(
        &self,
        cache: Option<&AssignmentCache>,
        visitor_key: &str,
        id: &str,
    ) -> Result<AssignOutcome> {
        let Some(e) = self.repo.get(id)? else {
            return Ok(AssignOutcome::NotFound);
        };
        if !e.is_active() {
            return Ok(AssignOutcome::Inactive(e.status));
        }
        let assignment = match cache {
            Some(cache) => cache.assign(
                &self.clock,
                visitor_key,
                &e.id,
                e.variants.len(),
                e.traffic_percent,
                e.bucket_mode(),
            ),
            None => e.assign(visitor_key),
        };
        let variant = assignment
            .variant()
            .and_then(|i| e.variant_name(i))
            .map(str::to_string);
        Ok(AssignOutcome::Assigned {
            assignment,
            variant,
        })
    }

    fn evaluate(&self, id: &str, deadline: Option<Instant>) -> Result<Evaluation> {
        let Some(experiment) = self.repo.get(id)? else {
            debug!("No record for '{id}'");
            return Ok(Evaluation::NotFound);
        };

        let counts = self.aggregates.variant_counts(id)?;
        let revenue = self.aggregates.variant_revenue(id)?;
        let stats = collect_variant_stats(experiment.variants.len(), &counts, &revenue);
        check_deadline(deadline)?;

        let binomial: Vec<ConversionCounts> = stats.iter().map(VariantStats::counts).collect();
        let probabilities = self.estimator.multi_variant(&binomial);
        check_deadline(deadline)?;

        let decision = match experiment.kind {
            ExperimentKind::Experiment => Decision::Stop(evaluate_auto_stop(
                &self.repo,
                &self.clock,
                &self.cfg.auto_stop,
                &experiment,
                &stats,
                &probabilities,
            )?),
            ExperimentKind::Flag => Decision::Ramp(evaluate_auto_ramp(
                &self.repo,
                &self.counters,
                &self.clock,
                &self.cfg.ramp,
                &experiment,
                &probabilities,
            )?),
        };

        let wrote = matches!(
            decision,
            Decision::Stop(StopDecision::Completed { .. })
                | Decision::Ramp(RampDecision::Ramped { .. })
        );
        let experiment = if wrote {
            self.repo.get(id)?.unwrap_or(experiment)
        } else {
            experiment
        };

        Ok(Evaluation::Report(Box::new(ResultsReport {
            experiment,
            stats,
            probabilities,
            decision,
        })))
    }
}

fn check_deadline(deadline: Option<Instant>) -> Result<()> {
    match deadline {
        Some(d) if Instant::now() >= d => Err(Error::DeadlineExceeded),
        _ => Ok(()),
    }
}
