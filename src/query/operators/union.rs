//! Union Operator - concatenate dependency results

use crate::query::error::ExecutionError;
use crate::query::result::{Query, TimeSeriesResult};
use crate::query::stage::{DependencyResults, StageContext, StageOperation};
use async_trait::async_trait;

/// Concatenates the series of all dependencies into one query
///
/// Series keep dependency declaration order and are passed through
/// untouched: no reordering, no deduplication. The sample size is the sum
/// over every input query.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnionOperator;

#[async_trait]
impl StageOperation for UnionOperator {
    fn name(&self) -> &'static str {
        "union"
    }

    async fn execute(
        &self,
        _ctx: &StageContext,
        inputs: &DependencyResults,
    ) -> Result<TimeSeriesResult, ExecutionError> {
        let queries: Vec<&Query> = inputs
            .iter()
            .flat_map(|result| result.queries().iter())
            .collect();
        let sample_size = queries.iter().map(|q| q.sample_size()).sum();
        let series = queries
            .into_iter()
            .flat_map(|q| q.results().iter().cloned())
            .collect();
        Ok(TimeSeriesResult::new(vec![
            Query::new(series).with_sample_size(sample_size)
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::result::{DataPoint, SeriesResult};
    use crate::query::stage::StageId;
    use crate::store::InMemoryStore;
    use crate::types::SystemClock;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn result_with(names: &[&str]) -> TimeSeriesResult {
        let series = names
            .iter()
            .map(|name| {
                SeriesResult::new(*name)
                    .with_tag("source", *name)
                    .with_values(vec![DataPoint::new(Utc.timestamp_opt(0, 0).unwrap(), 1.0)])
            })
            .collect();
        TimeSeriesResult::new(vec![Query::new(series)])
    }

    #[tokio::test]
    async fn test_union_keeps_every_series() {
        let ctx = StageContext {
            store: Arc::new(InMemoryStore::new()),
            clock: Arc::new(SystemClock),
        };
        let left = result_with(&["a", "b"]);
        let right = result_with(&["c", "d"]);
        let mut inputs = DependencyResults::new();
        inputs.insert(StageId::next(), Arc::new(left.clone()));
        inputs.insert(StageId::next(), Arc::new(right.clone()));

        let result = UnionOperator.execute(&ctx, &inputs).await.unwrap();
        assert_eq!(result.queries().len(), 1);
        assert_eq!(result.queries()[0].sample_size(), 4);

        let expected: Vec<_> = left.series().chain(right.series()).cloned().collect();
        assert_eq!(result.queries()[0].results(), expected.as_slice());
    }

    #[tokio::test]
    async fn test_union_of_nothing() {
        let ctx = StageContext {
            store: Arc::new(InMemoryStore::new()),
            clock: Arc::new(SystemClock),
        };
        let result = UnionOperator
            .execute(&ctx, &DependencyResults::new())
            .await
            .unwrap();
        assert_eq!(result.series().count(), 0);
    }
}
