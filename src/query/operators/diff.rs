//! Diff Operator - pairwise differences per series

use crate::query::error::ExecutionError;
use crate::query::result::{DataPoint, Query, TimeSeriesResult};
use crate::query::stage::{DependencyResults, StageContext, StageOperation};
use async_trait::async_trait;

/// Replace each series' values with `value[i] - value[i-1]`
///
/// The output point carries the later sample's time. Pairs where either side
/// is non-numeric produce no point.
pub fn pairwise_difference(points: &[DataPoint]) -> Vec<DataPoint> {
    points
        .windows(2)
        .filter_map(|pair| {
            let previous = pair[0].as_f64()?;
            let current = pair[1].as_f64()?;
            Some(DataPoint::new(pair[1].time, current - previous))
        })
        .collect()
}

/// Dedicated diff stage
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffOperator;

#[async_trait]
impl StageOperation for DiffOperator {
    fn name(&self) -> &'static str {
        "diff"
    }

    async fn execute(
        &self,
        _ctx: &StageContext,
        inputs: &DependencyResults,
    ) -> Result<TimeSeriesResult, ExecutionError> {
        let queries = inputs
            .iter()
            .flat_map(|result| result.queries().iter())
            .map(|query| {
                let series = query
                    .results()
                    .iter()
                    .map(|s| s.clone().with_values(pairwise_difference(s.values())))
                    .collect();
                Query::clone(query).with_results(series)
            })
            .collect();
        Ok(TimeSeriesResult::new(queries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::result::{DataValue, GroupBy, SeriesResult};
    use crate::query::stage::StageId;
    use crate::store::InMemoryStore;
    use crate::types::SystemClock;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_pairwise_difference() {
        let input = vec![
            DataPoint::new(at(0), 1.0),
            DataPoint::new(at(1), 4.0),
            DataPoint::new(at(2), 2.0),
        ];
        assert_eq!(
            pairwise_difference(&input),
            vec![DataPoint::new(at(1), 3.0), DataPoint::new(at(2), -2.0)]
        );
        assert!(pairwise_difference(&input[..1]).is_empty());
        assert!(pairwise_difference(&[]).is_empty());
    }

    #[test]
    fn test_opaque_pairs_skipped() {
        let input = vec![
            DataPoint::new(at(0), 1.0),
            DataPoint::with_value(at(1), DataValue::Opaque(serde_json::json!("x"))),
            DataPoint::new(at(2), 5.0),
            DataPoint::new(at(3), 6.0),
        ];
        assert_eq!(pairwise_difference(&input), vec![DataPoint::new(at(3), 1.0)]);
    }

    #[tokio::test]
    async fn test_metadata_preserved() {
        let ctx = StageContext {
            store: Arc::new(InMemoryStore::new()),
            clock: Arc::new(SystemClock),
        };
        let group_by = vec![GroupBy::Tag {
            tags: vec!["host".to_string()],
            group: BTreeMap::from([("host".to_string(), "a".to_string())]),
        }];
        let series = SeriesResult::new("requests")
            .with_tag("host", "a")
            .with_group_by(group_by.clone())
            .with_values(vec![DataPoint::new(at(0), 10.0), DataPoint::new(at(60), 25.0)]);
        let mut inputs = DependencyResults::new();
        inputs.insert(
            StageId::next(),
            Arc::new(TimeSeriesResult::new(vec![Query::new(vec![series])])),
        );

        let result = DiffOperator.execute(&ctx, &inputs).await.unwrap();
        let out = &result.queries()[0].results()[0];
        assert_eq!(out.name(), "requests");
        assert_eq!(out.group_by(), group_by.as_slice());
        assert_eq!(out.values(), &[DataPoint::new(at(60), 15.0)]);
    }

    proptest! {
        #[test]
        fn prop_diff_drops_exactly_one_point(values in prop::collection::vec(-1e6..1e6f64, 1..50)) {
            let input: Vec<_> = values
                .iter()
                .enumerate()
                .map(|(i, v)| DataPoint::new(at(i as i64), *v))
                .collect();
            let out = pairwise_difference(&input);
            prop_assert_eq!(out.len(), input.len() - 1);
            for (i, point) in out.iter().enumerate() {
                prop_assert_eq!(point.time, input[i + 1].time);
                prop_assert_eq!(point.as_f64(), Some(values[i + 1] - values[i]));
            }
        }
    }
}
