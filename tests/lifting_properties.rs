//! Property tests for aggregator lifting
//!
//! Lifting folds an aggregator into a select's backend query. These tests
//! check that the rewritten query only differs by the appended aggregator
//! and that the lifted program returns the same data as running the
//! aggregator as its own stage.

use chrono::{DateTime, TimeZone, Utc};
use kuba_mql::query::args::ArgReader;
use kuba_mql::query::operators::AggregationSpec;
use kuba_mql::query::registry::AggregatorKind;
use kuba_mql::query::result::DataPoint;
use kuba_mql::query::{PlannerConfig, QueryPlanner};
use kuba_mql::types::FixedClock;
use kuba_mql::{EngineConfig, InMemoryStore, QueryEngine, StageSpec, TimeRange};
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

const LIFTABLE: &[&str] = &["min", "max", "merge", "count", "avg", "sum", "diff", "percentile"];

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn aggregate(name: &str, period_secs: i64) -> StageSpec {
    let spec = StageSpec::aggregate(name);
    let spec = match AggregatorKind::from_name(name) {
        Some(kind) if kind.has_sampling() => spec.arg("period", period_secs),
        _ => spec,
    };
    if name == "percentile" {
        spec.arg("percentile", 90)
    } else {
        spec
    }
}

fn select(hosts: &[String], group: bool) -> StageSpec {
    let mut spec = StageSpec::select("cpu").range(TimeRange::new(at(0), at(3_600)).unwrap());
    if !hosts.is_empty() {
        spec = spec.arg("tags", json!({ "host": hosts }));
    }
    if group {
        spec = spec.arg("group_by", json!(["host"]));
    }
    spec
}

/// Samples keyed by timestamp, so no two series share a timestamp
fn store(values: &BTreeMap<i64, (i32, usize)>) -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    for host in 0..3 {
        let points: Vec<DataPoint> = values
            .iter()
            .filter(|(_, (_, h))| *h == host)
            .map(|(t, (v, _))| DataPoint::new(at(*t), f64::from(*v)))
            .collect();
        store.insert("cpu", &[("host", format!("h{}", host).as_str())], points);
    }
    Arc::new(store)
}

proptest! {
    /// Lifted query == original query + aggregator on every metric
    #[test]
    fn prop_lifting_only_appends_aggregator(
        which in 0..LIFTABLE.len(),
        period in 1i64..600,
        hosts in prop::collection::vec("h[0-2]", 0..3),
        group in any::<bool>(),
    ) {
        let name = LIFTABLE[which];
        let planner = QueryPlanner::new().with_clock(Arc::new(FixedClock::new(at(3_600))));

        let plain = planner.build(&[select(&hosts, group)]).unwrap();
        let lifted = planner.build(&[select(&hosts, group), aggregate(name, period)]).unwrap();

        let kind = AggregatorKind::from_name(name).unwrap();
        let args = aggregate(name, period).args;
        let spec = AggregationSpec::from_args(
            kind,
            &mut ArgReader::new(&args),
            PlannerConfig::default().default_sampling_period,
        ).unwrap();

        let expected = plain.root().select_query().unwrap().with_aggregator(spec.to_aggregator());
        prop_assert_eq!(lifted.len(), 1);
        prop_assert_eq!(lifted.root().select_query().unwrap(), &expected);
    }

    /// Lifted and in-engine execution return the same series
    #[test]
    fn prop_lifted_matches_in_engine(
        which in 0..LIFTABLE.len(),
        period in prop::sample::select(vec![30i64, 60, 300]),
        values in prop::collection::btree_map(0i64..3_600, (-100i32..100, 0usize..3), 1..60),
        group in any::<bool>(),
    ) {
        let name = LIFTABLE[which];
        let store = store(&values);
        let engine = QueryEngine::new(store, EngineConfig::default())
            .unwrap()
            .with_clock(Arc::new(FixedClock::new(at(3_600))));

        let lifted = vec![select(&[], group), aggregate(name, period)];
        // union in between keeps the aggregator out of the select
        let in_engine = vec![
            select(&[], group).named("raw"),
            StageSpec::aggregate("union").named("u").of(["raw"]),
            aggregate(name, period).of(["u"]),
        ];

        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let (a, b) = rt.block_on(async {
            (engine.run(&lifted).await.unwrap(), engine.run(&in_engine).await.unwrap())
        });

        let a: Vec<_> = a.series().map(|s| (s.tags().clone(), s.values().to_vec())).collect();
        let b: Vec<_> = b.series().map(|s| (s.tags().clone(), s.values().to_vec())).collect();
        prop_assert_eq!(a, b);
    }
}

/// Test: A select consumed by a dedicated stage is not lifted into later
#[test]
fn test_second_consumer_is_not_lifted() {
    let planner = QueryPlanner::new();
    let graph = planner
        .build(&[
            select(&[], false).named("raw"),
            StageSpec::aggregate("max").named("m"),
            StageSpec::aggregate("min").of(["raw"]),
        ])
        .unwrap();

    assert_eq!(graph.root().aggregator(), Some(AggregatorKind::Min));
    let input = &graph.root().dependencies()[0];
    assert!(input.select_query().unwrap().metrics[0].aggregators.is_empty());
}
