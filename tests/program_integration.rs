//! End-to-end program tests
//!
//! Programs are built and executed through the public engine API against
//! the in-memory store:
//! 1. Memoization of shared stages
//! 2. Union / Top-N / Diff stages
//! 3. Threshold and data-absence alerts
//! 4. Warnings and error propagation
//! 5. Cancellation and timeouts

use chrono::{DateTime, Duration, TimeZone, Utc};
use kuba_mql::alert::AlertEvaluationSummary;
use kuba_mql::query::error::{BuildError, ExecutionErrorKind};
use kuba_mql::query::result::{DataPoint, SeriesResult};
use kuba_mql::store::StoreError;
use kuba_mql::types::FixedClock;
use kuba_mql::{EngineConfig, Error, InMemoryStore, QueryEngine, StageSpec, TimeRange};
use serde_json::json;
use std::sync::Arc;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn points(values: &[(i64, f64)]) -> Vec<DataPoint> {
    values.iter().map(|(t, v)| DataPoint::new(at(*t), *v)).collect()
}

fn window() -> TimeRange {
    TimeRange::new(at(0), at(600)).unwrap()
}

fn engine_at(store: Arc<InMemoryStore>, now: i64) -> QueryEngine {
    QueryEngine::new(store, EngineConfig::default())
        .expect("default config is valid")
        .with_clock(Arc::new(FixedClock::new(at(now))))
}

/// Four hosts whose value sums are 5, 1, 9 and 3
fn scored_store() -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    for (host, score) in [("a", 5.0), ("b", 1.0), ("c", 9.0), ("d", 3.0)] {
        store.insert("requests", &[("host", host)], points(&[(0, score)]));
    }
    Arc::new(store)
}

fn hosts(series: &[&SeriesResult]) -> Vec<String> {
    series.iter().map(|s| s.tags()["host"][0].clone()).collect()
}

// ============================================================================
// CATEGORY 1: MEMOIZATION
// ============================================================================

/// Test: A select read by two consumers hits the store once
#[tokio::test]
async fn test_shared_select_executes_once() {
    let store = scored_store();
    let engine = engine_at(store.clone(), 600);

    let result = engine
        .run(&[
            StageSpec::select("requests")
                .named("raw")
                .range(window())
                .arg("group_by", json!(["host"])),
            StageSpec::aggregate("top").named("best").of(["raw"]).arg("count", 1),
            StageSpec::aggregate("bottom").named("worst").of(["raw"]).arg("count", 1),
            StageSpec::aggregate("union").of(["best", "worst"]),
        ])
        .await
        .unwrap();

    assert_eq!(store.query_count(), 1);
    let series: Vec<_> = result.series().collect();
    assert_eq!(hosts(&series), vec!["c", "b"]);
}

/// Test: Identical but separate selects are separate stages
#[tokio::test]
async fn test_identical_selects_are_not_merged() {
    let store = scored_store();
    let engine = engine_at(store.clone(), 600);

    engine
        .run(&[
            StageSpec::select("requests").named("a").range(window()),
            StageSpec::select("requests").named("b").range(window()),
            StageSpec::aggregate("union").of(["a", "b"]),
        ])
        .await
        .unwrap();

    assert_eq!(store.query_count(), 2);
}

// ============================================================================
// CATEGORY 2: SET OPERATIONS
// ============================================================================

/// Test: Union of two two-series queries yields one query of four series
#[tokio::test]
async fn test_union_concatenates_results() {
    let store = scored_store();
    let engine = engine_at(store, 600);

    let result = engine
        .run(&[
            StageSpec::select("requests")
                .named("ab")
                .range(window())
                .arg("tags", json!({"host": ["a", "b"]}))
                .arg("group_by", json!(["host"])),
            StageSpec::select("requests")
                .named("cd")
                .arg("tags", json!({"host": ["c", "d"]}))
                .arg("group_by", json!(["host"])),
            StageSpec::aggregate("union").of(["ab", "cd"]),
        ])
        .await
        .unwrap();

    assert_eq!(result.queries().len(), 1);
    let series: Vec<_> = result.series().collect();
    assert_eq!(hosts(&series), vec!["a", "b", "c", "d"]);
    assert_eq!(result.queries()[0].sample_size(), 4);
}

/// Test: Top-2 and inverted top-2 over scores [5, 1, 9, 3]
#[tokio::test]
async fn test_top_and_inverted_top() {
    let engine = engine_at(scored_store(), 600);
    let program = |invert: bool| {
        vec![
            StageSpec::select("requests").range(window()).arg("group_by", json!(["host"])),
            StageSpec::aggregate("top").arg("count", 2).arg("invert", invert),
        ]
    };

    let top = engine.run(&program(false)).await.unwrap();
    let scores: Vec<f64> = top.series().map(SeriesResult::value_sum).collect();
    assert_eq!(scores, vec![9.0, 5.0]);

    let bottom = engine.run(&program(true)).await.unwrap();
    let scores: Vec<f64> = bottom.series().map(SeriesResult::value_sum).collect();
    assert_eq!(scores, vec![1.0, 3.0]);
}

/// Test: Diff over a union runs in-engine and drops the first point
#[tokio::test]
async fn test_diff_in_engine() {
    let store = InMemoryStore::new();
    store.insert("counter", &[("host", "a")], points(&[(0, 1.0), (60, 4.0), (120, 10.0)]));
    let engine = engine_at(Arc::new(store), 600);

    let result = engine
        .run(&[
            StageSpec::select("counter").named("c").range(window()),
            StageSpec::aggregate("union").named("u").of(["c"]),
            StageSpec::aggregate("diff").of(["u"]),
        ])
        .await
        .unwrap();

    let series = result.series().next().unwrap();
    assert_eq!(series.values(), points(&[(60, 3.0), (120, 6.0)]).as_slice());
    assert_eq!(series.tags()["host"], vec!["a"]);
}

// ============================================================================
// CATEGORY 3: ALERTS
// ============================================================================

fn dip_store() -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    store.insert(
        "cpu",
        &[("host", "a")],
        points(&[(0, 11.0), (1, 9.0), (2, 11.0), (3, 9.0)]),
    );
    Arc::new(store)
}

/// Test: Zero recovery splits a dip into two windows
#[tokio::test]
async fn test_threshold_without_recovery() {
    let engine = engine_at(dip_store(), 600);
    let result = engine
        .run(&[
            StageSpec::select("cpu").range(window()),
            StageSpec::aggregate("threshold").arg("threshold", 10).arg("operator", ">"),
        ])
        .await
        .unwrap();

    let alerts = result.series().next().unwrap().alerts();
    let windows: Vec<_> = alerts.iter().map(|a| (a.time, a.end_time)).collect();
    assert_eq!(windows, vec![(at(0), Some(at(1))), (at(2), Some(at(3)))]);
    assert_eq!(alerts[0].args["host"], "a");
    assert_eq!(alerts[0].args["name"], "cpu");
}

/// Test: A recovery period bridges the dip
#[tokio::test]
async fn test_threshold_with_recovery() {
    let engine = engine_at(dip_store(), 600);
    let result = engine
        .run(&[
            StageSpec::select("cpu").range(window()),
            StageSpec::aggregate("threshold")
                .arg("threshold", 10)
                .arg("operator", "greater_than")
                .arg("recovery_period", "2s"),
        ])
        .await
        .unwrap();

    let alerts = result.series().next().unwrap().alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!((alerts[0].time, alerts[0].end_time), (at(0), Some(at(3))));
}

/// Test: A gap longer than dwell opens at the gap start plus dwell
#[tokio::test]
async fn test_data_absent_gap() {
    let store = InMemoryStore::new();
    store.insert("heartbeat", &[], points(&[(0, 1.0), (1, 1.0), (10, 1.0)]));
    let engine = engine_at(Arc::new(store), 10);

    let result = engine
        .run(&[
            StageSpec::select("heartbeat").range(TimeRange::new(at(0), at(10)).unwrap()),
            StageSpec::aggregate("dataabsent").arg("dwell_period", 2),
        ])
        .await
        .unwrap();

    let alerts = result.series().next().unwrap().alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].time, at(3));
    assert_eq!(alerts[0].end_time, Some(at(10)));
}

/// Test: Stacked alert stages keep earlier triggers
#[tokio::test]
async fn test_stacked_alerts_and_summary() {
    let store = InMemoryStore::new();
    store.insert("cpu", &[("host", "a")], points(&[(0, 50.0), (60, 95.0), (120, 96.0)]));
    store.insert("cpu", &[("host", "b")], points(&[(0, 10.0), (60, 12.0), (120, 11.0)]));
    let engine = engine_at(Arc::new(store), 3_600);

    let result = engine
        .run(&[
            StageSpec::select("cpu").range(window()).arg("group_by", json!(["host"])),
            StageSpec::aggregate("threshold").arg("threshold", 90).arg("operator", ">="),
            StageSpec::aggregate("dataabsent").arg("dwell_period", "5m"),
        ])
        .await
        .unwrap();

    let series: Vec<_> = result.series().collect();
    // host a: one threshold window plus the stale-data trigger
    assert_eq!(series[0].alerts().len(), 2);
    assert!(series[0].alerts()[1].is_ongoing());
    assert_eq!(series[0].alerts()[0].group_by["host"], "a");
    // host b: stale only
    assert_eq!(series[1].alerts().len(), 1);

    let summary = AlertEvaluationSummary::from_result(&result).unwrap();
    assert_eq!(summary.series_name, "cpu");
    assert_eq!(summary.group_bys, vec!["host"]);
    assert_eq!(summary.firing.len(), 2);

    let active = result.active_alerts(at(3_600), Duration::seconds(120));
    assert_eq!(active.len(), 3);
}

// ============================================================================
// CATEGORY 4: WARNINGS AND ERRORS
// ============================================================================

/// Test: An unknown argument is a warning, not a failure
#[tokio::test]
async fn test_unknown_argument_warning() {
    let engine = engine_at(dip_store(), 600);
    let result = engine
        .run(&[
            StageSpec::select("cpu").range(window()),
            StageSpec::aggregate("threshold")
                .arg("threshold", 10)
                .arg("operator", ">")
                .arg("foo", "bar"),
        ])
        .await
        .unwrap();

    assert!(result.warnings().iter().any(|w| w.contains("foo")));
}

/// Test: Unknown arguments of a lifted aggregator and its select both surface
#[tokio::test]
async fn test_lifted_warnings_survive() {
    let store = dip_store();
    let engine = engine_at(store.clone(), 600);
    let result = engine
        .run(&[
            StageSpec::select("cpu").range(window()).arg("colour", "red"),
            StageSpec::aggregate("max").arg("period", "1m").arg("shape", "round"),
        ])
        .await
        .unwrap();

    assert_eq!(result.warnings().len(), 2);
    assert!(result.warnings().iter().any(|w| w.contains("colour")));
    assert!(result.warnings().iter().any(|w| w.contains("shape")));
    // unknown args are not forwarded to the backend
    let sent = &store.recorded_queries()[0].metrics[0].aggregators[0];
    assert!(sent.extra.is_empty());
}

/// Test: Build errors are reported before anything runs
#[tokio::test]
async fn test_build_error_runs_nothing() {
    let store = dip_store();
    let engine = engine_at(store.clone(), 600);
    let err = engine
        .run(&[
            StageSpec::select("cpu").named("raw"),
            StageSpec::aggregate("union").of(["raw", "missing"]),
        ])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Build(BuildError::UndefinedStageReference(ref name)) if name == "missing"
    ));
    assert_eq!(store.query_count(), 0);
}

/// Test: A store failure fails the whole program with the select's identity
#[tokio::test]
async fn test_store_failure_fails_program() {
    let store = dip_store();
    store.fail_with(StoreError::Backend("disk on fire".into()));
    let engine = engine_at(store, 600);

    let graph = engine
        .build(&[
            StageSpec::select("cpu").named("raw"),
            StageSpec::aggregate("union").named("u").of(["raw"]),
            StageSpec::aggregate("top").of(["u"]),
        ])
        .unwrap();
    let select_id = graph.stages()[0].id();

    let err = engine.execute(&graph).await.unwrap_err();
    assert_eq!(err.kind, ExecutionErrorKind::Store);
    assert_eq!(err.stage(), Some(select_id));
    assert!(err.to_string().contains("disk on fire"));
}

// ============================================================================
// CATEGORY 5: DEADLINES
// ============================================================================

/// Test: A slow store trips the caller's deadline
#[tokio::test(start_paused = true)]
async fn test_timeout_cancels_program() {
    let store = dip_store();
    store.set_latency(std::time::Duration::from_secs(30));
    let engine = engine_at(store, 600);

    let err = engine
        .run_with_timeout(&[StageSpec::select("cpu")], std::time::Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
}

/// Test: The configured deadline is used when none is given
#[tokio::test(start_paused = true)]
async fn test_config_timeout() {
    let store = dip_store();
    store.set_latency(std::time::Duration::from_secs(60));
    let mut config = EngineConfig::default();
    config.executor.timeout_secs = 2;
    let engine = QueryEngine::new(store, config).unwrap();

    let err = engine
        .run_with_config_timeout(&[StageSpec::select("cpu")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(d) if d == std::time::Duration::from_secs(2)));
}
