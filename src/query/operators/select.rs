//! Select Operator - leaf read from the backing store

use crate::metrics;
use crate::query::error::ExecutionError;
use crate::query::result::{Query, TimeSeriesResult};
use crate::query::stage::{DependencyResults, StageContext, StageOperation};
use crate::store::MetricsQuery;
use async_trait::async_trait;
use tracing::debug;

/// Sends its backend query, as-is, to the store
#[derive(Debug, Clone, PartialEq)]
pub struct SelectOperator {
    query: MetricsQuery,
}

impl SelectOperator {
    /// Create a select for a backend query
    pub fn new(query: MetricsQuery) -> Self {
        Self { query }
    }

    /// Backend query
    pub fn query(&self) -> &MetricsQuery {
        &self.query
    }
}

#[async_trait]
impl StageOperation for SelectOperator {
    fn name(&self) -> &'static str {
        "select"
    }

    async fn execute(
        &self,
        ctx: &StageContext,
        _inputs: &DependencyResults,
    ) -> Result<TimeSeriesResult, ExecutionError> {
        let response = ctx.store.query_metrics(&self.query).await;
        metrics::record_store_query(response.is_ok());
        let response = response.map_err(ExecutionError::store)?;

        debug!(
            metrics = self.query.metrics.len(),
            queries = response.queries.len(),
            range = %self.query.range,
            "Select returned"
        );

        // Re-establish point ordering in case the backend didn't
        let queries = response
            .queries
            .into_iter()
            .map(|query| {
                let series = query
                    .results()
                    .iter()
                    .map(|s| s.clone().with_values(s.values().to_vec()))
                    .collect();
                Query::clone(&query).with_results(series)
            })
            .collect();

        Ok(TimeSeriesResult::new(queries).with_errors(response.errors))
    }
}
