//! End-to-end decision scenarios through `ResultsEngine`.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use splitgate::{
    AssignOutcome, Clock, Decision, EngineConfig, Error, EstimatorConfig, Evaluation, Experiment,
    ExperimentRepository, ExperimentStatus, FixedClock, KeyValueStore, MemoryStore, RampDecision,
    ResultsEngine, StaticAggregates, StopDecision,
};

type Engine = ResultsEngine<Arc<MemoryStore>, Arc<StaticAggregates>, Arc<FixedClock>>;

struct World {
    store: Arc<MemoryStore>,
    agg: Arc<StaticAggregates>,
    clock: Arc<FixedClock>,
    engine: Engine,
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn world() -> World {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    let agg = Arc::new(StaticAggregates::new());
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 9, 2, 10, 30, 0).unwrap(),
    ));
    let cfg = EngineConfig {
        estimator: EstimatorConfig {
            seed: Some(2024),
            ..EstimatorConfig::default()
        },
        ..EngineConfig::default()
    };
    let engine = ResultsEngine::new(
        Arc::clone(&store),
        Arc::clone(&agg),
        Arc::clone(&clock),
        cfg,
    );
    World {
        store,
        agg,
        clock,
        engine,
    }
}

fn names(n: &[&str]) -> Vec<String> {
    n.iter().map(|s| s.to_string()).collect()
}

fn report(ev: Evaluation) -> Box<splitgate::ResultsReport> {
    match ev {
        Evaluation::Report(r) => r,
        Evaluation::NotFound => panic!("expected a report"),
    }
}

// ---------------------------------------------------------------------------
// Auto-stop
// ---------------------------------------------------------------------------

#[test]
fn clear_winner_completes_experiment() {
    let w = world();
    let exp = Experiment::new("checkout", names(&["control", "treatment"]), 100.0).unwrap();
    w.engine.repository().put(&exp).unwrap();
    w.agg.set_counts("checkout", &[(1000, 10), (1000, 900)]);

    let r = report(w.engine.read_results("checkout").unwrap());
    assert!(matches!(
        r.decision,
        Decision::Stop(StopDecision::Completed { winner_index: 1, .. })
    ));
    assert_eq!(r.experiment.status, ExperimentStatus::Completed);
    assert_eq!(r.experiment.winner.as_deref(), Some("treatment"));
    assert_eq!(r.experiment.completed_at, Some(w.clock.now()));
    assert_eq!(r.stats[1].conversions, 900);

    let stored = w.engine.repository().get("checkout").unwrap().unwrap();
    assert_eq!(stored.status, ExperimentStatus::Completed);
    assert_eq!(stored.winner.as_deref(), Some("treatment"));
}

#[test]
fn clear_loser_hands_the_win_to_control() {
    let w = world();
    let exp = Experiment::new("banner", names(&["control", "red"]), 100.0).unwrap();
    w.engine.repository().put(&exp).unwrap();
    w.agg.set_counts("banner", &[(1000, 300), (1000, 20)]);

    let r = report(w.engine.read_results("banner").unwrap());
    assert_eq!(r.experiment.winner.as_deref(), Some("control"));
}

#[test]
fn under_sampled_variant_blocks_decision() {
    let w = world();
    let exp = Experiment::new("checkout", names(&["control", "treatment"]), 100.0).unwrap();
    w.engine.repository().put(&exp).unwrap();
    w.agg.set_counts("checkout", &[(1000, 10), (99, 90)]);

    let r = report(w.engine.read_results("checkout").unwrap());
    assert!(matches!(
        r.decision,
        Decision::Stop(StopDecision::InsufficientSamples { variant: 1, .. })
    ));
    let stored = w.engine.repository().get("checkout").unwrap().unwrap();
    assert_eq!(stored.status, ExperimentStatus::Active);
    assert!(stored.winner.is_none());
}

#[test]
fn custom_min_samples_is_respected() {
    let w = world();
    let exp = Experiment::new("small", names(&["a", "b"]), 100.0)
        .unwrap()
        .with_min_samples(2_000);
    w.engine.repository().put(&exp).unwrap();
    w.agg.set_counts("small", &[(1000, 10), (1000, 900)]);

    let r = report(w.engine.read_results("small").unwrap());
    assert!(matches!(
        r.decision,
        Decision::Stop(StopDecision::InsufficientSamples { required: 2_000, .. })
    ));
}

#[test]
fn completed_experiment_is_not_re_decided() {
    let w = world();
    let exp = Experiment::new("checkout", names(&["control", "treatment"]), 100.0).unwrap();
    w.engine.repository().put(&exp).unwrap();
    w.agg.set_counts("checkout", &[(1000, 10), (1000, 900)]);
    w.engine.read_results("checkout").unwrap();
    let first = w.engine.repository().get("checkout").unwrap().unwrap();

    // Counts flip; the decision must not.
    w.agg.set_counts("checkout", &[(5000, 4000), (5000, 10)]);
    w.clock.advance(chrono::Duration::days(1));
    let r = report(w.engine.read_results("checkout").unwrap());
    assert_eq!(r.decision, Decision::Stop(StopDecision::NotApplicable));
    assert_eq!(w.engine.repository().get("checkout").unwrap().unwrap(), first);
}

#[test]
fn paused_experiment_is_left_alone() {
    let w = world();
    let mut exp = Experiment::new("checkout", names(&["control", "treatment"]), 100.0).unwrap();
    exp.status = ExperimentStatus::Paused;
    w.engine.repository().put(&exp).unwrap();
    w.agg.set_counts("checkout", &[(1000, 10), (1000, 900)]);

    let r = report(w.engine.read_results("checkout").unwrap());
    assert_eq!(r.decision, Decision::Stop(StopDecision::NotApplicable));
    assert_eq!(
        w.engine.repository().get("checkout").unwrap().unwrap().status,
        ExperimentStatus::Paused
    );
}

#[test]
fn failed_write_is_retried_next_cycle() {
    let w = world();
    let exp = Experiment::new("checkout", names(&["control", "treatment"]), 100.0).unwrap();
    w.engine.repository().put(&exp).unwrap();
    w.agg.set_counts("checkout", &[(1000, 10), (1000, 900)]);

    w.store.set_read_only(true);
    assert!(matches!(
        w.engine.read_results("checkout"),
        Err(Error::Store { .. })
    ));
    assert!(w.engine.repository().get("checkout").unwrap().unwrap().is_active());

    w.store.set_read_only(false);
    let r = report(w.engine.read_results("checkout").unwrap());
    assert_eq!(r.experiment.status, ExperimentStatus::Completed);
}

// ---------------------------------------------------------------------------
// Auto-ramp
// ---------------------------------------------------------------------------

fn strong_flag(w: &World, id: &str, pct: f64) {
    w.engine
        .repository()
        .put(&Experiment::flag(id, pct).unwrap())
        .unwrap();
    w.agg.set_counts(id, &[(1000, 10), (1000, 900)]);
}

fn ramp_decision(w: &World, id: &str) -> RampDecision {
    match report(w.engine.read_results(id).unwrap()).decision {
        Decision::Ramp(d) => d,
        other => panic!("expected a ramp decision, got {other:?}"),
    }
}

#[test]
fn three_strong_checks_ramp_flag_one_step() {
    let w = world();
    strong_flag(&w, "new-nav", 10.0);

    assert!(matches!(ramp_decision(&w, "new-nav"), RampDecision::Counting { hits: 1, .. }));
    assert!(matches!(ramp_decision(&w, "new-nav"), RampDecision::Counting { hits: 2, .. }));
    assert_eq!(
        ramp_decision(&w, "new-nav"),
        RampDecision::Ramped { from: 10.0, to: 25.0 }
    );
    assert_eq!(
        w.engine.repository().get("new-nav").unwrap().unwrap().traffic_percent,
        25.0
    );
    assert_eq!(w.store.get("ramp:new-nav").unwrap().as_deref(), Some("0"));
}

#[test]
fn interrupted_streak_does_not_ramp() {
    let w = world();
    strong_flag(&w, "new-nav", 10.0);

    ramp_decision(&w, "new-nav");
    ramp_decision(&w, "new-nav");
    // One neutral observation discards the streak.
    w.agg.set_counts("new-nav", &[(1000, 500), (1000, 500)]);
    assert!(matches!(
        ramp_decision(&w, "new-nav"),
        RampDecision::Reset { previous_hits: 2 }
    ));
    w.agg.set_counts("new-nav", &[(1000, 10), (1000, 900)]);
    ramp_decision(&w, "new-nav");
    ramp_decision(&w, "new-nav");
    assert_eq!(
        w.engine.repository().get("new-nav").unwrap().unwrap().traffic_percent,
        10.0
    );
}

#[test]
fn flag_climbs_the_whole_schedule_and_stops_at_100() {
    let w = world();
    strong_flag(&w, "dark-mode", 0.0);

    let mut seen = Vec::new();
    for _ in 0..(6 * 3) {
        if let RampDecision::Ramped { to, .. } = ramp_decision(&w, "dark-mode") {
            seen.push(to);
        }
    }
    assert_eq!(seen, vec![10.0, 25.0, 50.0, 75.0, 100.0]);
    assert!(matches!(
        ramp_decision(&w, "dark-mode"),
        RampDecision::Counting { .. } | RampDecision::AtMaximum { .. }
    ));
    assert_eq!(
        w.engine.repository().get("dark-mode").unwrap().unwrap().traffic_percent,
        100.0
    );
}

#[test]
fn ramping_never_turns_visitors_off() {
    let w = world();
    strong_flag(&w, "rollout", 10.0);
    let visitors: Vec<String> = (0..500).map(|i| format!("user-{i}")).collect();
    let on_before: Vec<bool> = visitors
        .iter()
        .map(|v| matches!(
            w.engine.assign(v, "rollout").unwrap(),
            AssignOutcome::Assigned { assignment, .. } if assignment.is_on()
        ))
        .collect();

    for _ in 0..3 {
        ramp_decision(&w, "rollout");
    }
    assert_eq!(
        w.engine.repository().get("rollout").unwrap().unwrap().traffic_percent,
        25.0
    );

    for (v, was_on) in visitors.iter().zip(on_before) {
        let AssignOutcome::Assigned { assignment, .. } = w.engine.assign(v, "rollout").unwrap()
        else {
            panic!("flag should be active");
        };
        if was_on {
            assert!(assignment.is_on(), "{v} turned off after ramp");
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline robustness
// ---------------------------------------------------------------------------

#[test]
fn batch_evaluation_survives_missing_and_malformed_records() {
    let w = world();
    let exp = Experiment::new("good", names(&["a", "b"]), 100.0).unwrap();
    w.engine.repository().put(&exp).unwrap();
    w.agg.set_counts("good", &[(1000, 10), (1000, 900)]);
    w.store
        .put("experiment:broken", "{\"id\": 42".to_string())
        .unwrap();

    let results = w.engine.evaluate_many(["broken", "missing", "good"]);
    assert_eq!(results.len(), 3);
    assert!(matches!(results[0].1, Err(Error::Serialization(_))));
    assert!(matches!(results[1].1, Ok(Evaluation::NotFound)));
    let good = results[2].1.as_ref().unwrap().report().unwrap();
    assert_eq!(good.experiment.status, ExperimentStatus::Completed);
}
