//! In-memory reference store
//!
//! Serves [`MetricsQuery`] requests from series held in process. It applies
//! tag filters, tag grouping and aggregator chains the way a remote
//! time-series backend would, and records every query it receives so tests
//! can assert on round-trips and on the exact query shape.

use super::{MetricsQuery, MetricsQueryResponse, Metric, StoreError, TimeSeriesStore};
use crate::query::operators::aggregation::AggregationSpec;
use crate::query::result::{DataPoint, GroupBy, Query, SeriesResult};
use crate::types::TimeRange;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One raw series
#[derive(Debug, Clone)]
struct StoredSeries {
    name: String,
    tags: BTreeMap<String, String>,
    points: Vec<DataPoint>,
}

impl StoredSeries {
    fn matches(&self, metric: &Metric) -> bool {
        self.name == metric.name
            && metric.tags.iter().all(|(key, allowed)| {
                self.tags
                    .get(key)
                    .map(|value| allowed.contains(value))
                    .unwrap_or(false)
            })
    }
}

/// Process-local [`TimeSeriesStore`]
#[derive(Debug, Default)]
pub struct InMemoryStore {
    series: RwLock<Vec<StoredSeries>>,
    recorded: Mutex<Vec<MetricsQuery>>,
    calls: AtomicUsize,
    failure: RwLock<Option<StoreError>>,
    latency: RwLock<Option<Duration>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a raw series
    ///
    /// Points for an existing `(name, tags)` series are appended.
    pub fn insert(&self, name: &str, tags: &[(&str, &str)], points: Vec<DataPoint>) {
        let tags: BTreeMap<String, String> = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut series = self.series.write();
        match series.iter_mut().find(|s| s.name == name && s.tags == tags) {
            Some(existing) => existing.points.extend(points),
            None => series.push(StoredSeries {
                name: name.to_string(),
                tags,
                points,
            }),
        }
    }

    /// Make every following query fail
    pub fn fail_with(&self, error: StoreError) {
        *self.failure.write() = Some(error);
    }

    /// Stop failing queries
    pub fn clear_failure(&self) {
        *self.failure.write() = None;
    }

    /// Delay every query by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = Some(latency);
    }

    /// Number of queries received, including failed ones
    pub fn query_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every query received, in arrival order
    pub fn recorded_queries(&self) -> Vec<MetricsQuery> {
        self.recorded.lock().clone()
    }

    fn evaluate_metric(&self, metric: &Metric, range: &TimeRange) -> Result<Query, StoreError> {
        let aggregations = metric
            .aggregators
            .iter()
            .map(AggregationSpec::from_aggregator)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::InvalidQuery)?;

        let series = self.series.read();
        let mut groups: BTreeMap<Vec<String>, Group> = BTreeMap::new();
        let mut sample_size = 0u64;

        for stored in series.iter().filter(|s| s.matches(metric)) {
            let key: Option<Vec<String>> = metric
                .group_by
                .iter()
                .map(|tag| stored.tags.get(tag).cloned())
                .collect();
            // Series missing a grouping tag don't belong to any group
            let Some(key) = key else { continue };

            let group = groups.entry(key).or_default();
            for (k, v) in &stored.tags {
                let values = group.tags.entry(k.clone()).or_default();
                if !values.contains(v) {
                    values.push(v.clone());
                }
            }
            let in_range = stored.points.iter().filter(|p| range.contains(p.time));
            for point in in_range {
                group.points.push(point.clone());
                sample_size += 1;
            }
        }

        let results = groups
            .into_iter()
            .map(|(key, group)| {
                let points = aggregations
                    .iter()
                    .fold(group.points, |points, spec| spec.apply(&points));

                let mut result = SeriesResult::new(metric.name.clone())
                    .with_tags(group.tags)
                    .with_values(points);
                if !metric.group_by.is_empty() {
                    result = result.with_group_by(vec![GroupBy::Tag {
                        tags: metric.group_by.clone(),
                        group: metric.group_by.iter().cloned().zip(key).collect(),
                    }]);
                }
                result
            })
            .collect();

        Ok(Query::new(results).with_sample_size(sample_size))
    }
}

#[derive(Debug, Default)]
struct Group {
    tags: BTreeMap<String, Vec<String>>,
    points: Vec<DataPoint>,
}

#[async_trait]
impl TimeSeriesStore for InMemoryStore {
    async fn query_metrics(&self, query: &MetricsQuery) -> Result<MetricsQueryResponse, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.recorded.lock().push(query.clone());

        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let failure = self.failure.read().clone();
        if let Some(error) = failure {
            return Err(error);
        }

        let queries = query
            .metrics
            .iter()
            .map(|metric| self.evaluate_metric(metric, &query.range))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MetricsQueryResponse {
            queries,
            errors: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::operators::aggregation::AggregationFunction;
    use crate::store::Aggregator;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn points(values: &[(i64, f64)]) -> Vec<DataPoint> {
        values.iter().map(|(t, v)| DataPoint::new(at(*t), *v)).collect()
    }

    fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.insert("cpu", &[("host", "a"), ("dc", "east")], points(&[(0, 1.0), (60, 2.0)]));
        store.insert("cpu", &[("host", "b"), ("dc", "east")], points(&[(0, 10.0), (60, 20.0)]));
        store.insert("cpu", &[("host", "c"), ("dc", "west")], points(&[(30, 5.0)]));
        store.insert("mem", &[("host", "a")], points(&[(0, 100.0)]));
        store
    }

    fn query(metric: Metric) -> MetricsQuery {
        MetricsQuery {
            range: TimeRange::new(at(0), at(3600)).unwrap(),
            metrics: vec![metric],
        }
    }

    #[tokio::test]
    async fn test_ungrouped_merges_all_matching_series() {
        let store = seeded();
        let response = store.query_metrics(&query(Metric::new("cpu"))).await.unwrap();
        let q = &response.queries[0];
        assert_eq!(q.results().len(), 1);
        assert_eq!(q.sample_size(), 5);
        let series = &q.results()[0];
        assert_eq!(series.tags()["host"], vec!["a", "b", "c"]);
        assert!(series.group_by().is_empty());
    }

    #[tokio::test]
    async fn test_tag_filter_and_group_by() {
        let store = seeded();
        let mut metric = Metric::new("cpu");
        metric.tags.insert("dc".to_string(), vec!["east".to_string()]);
        metric.group_by = vec!["host".to_string()];

        let response = store.query_metrics(&query(metric)).await.unwrap();
        let results = response.queries[0].results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tags()["host"], vec!["a"]);
        assert_eq!(
            results[1].group_by(),
            &[GroupBy::Tag {
                tags: vec!["host".to_string()],
                group: BTreeMap::from([("host".to_string(), "b".to_string())]),
            }]
        );
    }

    #[tokio::test]
    async fn test_aggregator_chain() {
        let store = seeded();
        let mut metric = Metric::new("cpu");
        metric.aggregators.push(
            AggregationSpec {
                function: AggregationFunction::Sum,
                period: Some(chrono::Duration::hours(1)),
            }
            .to_aggregator(),
        );
        let response = store.query_metrics(&query(metric)).await.unwrap();
        assert_eq!(response.queries[0].results()[0].values(), points(&[(0, 38.0)]).as_slice());
    }

    #[tokio::test]
    async fn test_unknown_aggregator_rejected() {
        let store = seeded();
        let mut metric = Metric::new("cpu");
        metric.aggregators.push(Aggregator {
            name: "stddev".to_string(),
            sampling: None,
            extra: BTreeMap::new(),
        });
        let err = store.query_metrics(&query(metric)).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn test_failure_and_recording() {
        let store = seeded();
        store.fail_with(StoreError::Backend("boom".into()));
        assert!(store.query_metrics(&query(Metric::new("cpu"))).await.is_err());
        store.clear_failure();
        assert!(store.query_metrics(&query(Metric::new("mem"))).await.is_ok());
        assert_eq!(store.query_count(), 2);
        assert_eq!(store.recorded_queries()[1].metrics[0].name, "mem");
    }

    #[tokio::test]
    async fn test_no_matching_series() {
        let store = seeded();
        let response = store.query_metrics(&query(Metric::new("disk"))).await.unwrap();
        assert!(response.queries[0].results().is_empty());
        assert_eq!(response.queries[0].sample_size(), 0);
    }
}
