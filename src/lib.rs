//! `splitgate`: deterministic visitor bucketing and Bayesian decision loops for experiments
//! and feature flags.
//!
//! Two halves:
//!
//! - **Assignment** ([`bucket`], [`Experiment::assign`], [`AssignmentCache`]): a pure function
//!   of `(visitor key, experiment key, variant count, traffic percent, mode)`. FNV-1a over the
//!   concatenated keys, reduced to `[0, 1)` at `1 / 10_000` resolution.
//! - **Decisions** ([`ResultsEngine::read_results`]): per-variant counts from an aggregation
//!   source feed a Beta-Binomial Monte Carlo estimate of `P(variant beats control)`
//!   ([`Estimator`]), which drives either auto-stop (experiments) or auto-ramp (flags).
//!
//! **Goals:**
//! - **Deterministic assignment**: same inputs, same bucket, on every platform.
//! - **Ramp-stable flags**: raising a flag's traffic never turns a visitor off.
//! - **Idempotent decisions**: a completed or paused record is never re-decided; a decision is
//!   either fully written or not written at all.
//! - **Explicit seams**: the key-value store, aggregation source, and clock are traits; the
//!   assignment cache is an injected object, not global state.
//!
//! **Non-goals:**
//! - No adaptive (bandit) allocation, targeting, or attribution.
//! - No distributed locking. Concurrent evaluators can lose counter updates; record writes are
//!   guarded by status and revision only.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use splitgate::{
//!     EngineConfig, Experiment, ExperimentRepository, MemoryStore, ResultsEngine,
//!     StaticAggregates, SystemClock,
//! };
//!
//! let agg = Arc::new(StaticAggregates::new());
//! let engine = ResultsEngine::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::clone(&agg),
//!     SystemClock,
//!     EngineConfig::default(),
//! );
//!
//! let exp = Experiment::new("checkout", vec!["control".into(), "one-page".into()], 100.0)?;
//! engine.repository().put(&exp)?;
//! agg.set_counts("checkout", &[(1000, 10), (1000, 900)]);
//!
//! let ev = engine.read_results("checkout")?;
//! let report = ev.report().expect("record exists");
//! assert_eq!(report.experiment.winner.as_deref(), Some("one-page"));
//! # Ok::<(), splitgate::Error>(())
//! ```

mod error;
pub use error::{Error, Result};

mod stable_hash;
pub use stable_hash::*;

mod bucket;
pub use bucket::*;

mod clock;
pub use clock::*;

mod cache;
pub use cache::*;

mod beta;
pub use beta::*;

mod stats;
pub use stats::*;

mod experiment;
pub use experiment::*;

mod store;
pub use store::*;

mod auto_stop;
pub use auto_stop::*;

mod auto_ramp;
pub use auto_ramp::*;

mod engine;
pub use engine::*;
