//! Top/Bottom-N Filter - keep the best scoring series
//!
//! Every series across every dependency is scored by the sum of its numeric
//! values. A bounded heap of size `count` keeps the winners, which are
//! emitted as one synthesized query, best first.

use crate::query::args::ArgReader;
use crate::query::error::{BuildError, ExecutionError};
use crate::query::registry::AggregatorKind;
use crate::query::result::{Query, SeriesResult, TimeSeriesResult};
use crate::query::stage::{DependencyResults, StageContext, StageOperation};
use async_trait::async_trait;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Series with its ranking score
#[derive(Debug, Clone)]
struct RankedSeries {
    score: f64,
    series: SeriesResult,
}

impl PartialEq for RankedSeries {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankedSeries {}

impl PartialOrd for RankedSeries {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankedSeries {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.total_cmp(&other.score)
    }
}

/// Keep the `count` highest (or, inverted, lowest) scoring series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopOperator {
    count: usize,
    invert: bool,
}

impl TopOperator {
    /// Create a filter
    pub fn new(count: usize, invert: bool) -> Self {
        Self {
            count: count.max(1),
            invert,
        }
    }

    /// Validate `count` (default 1, at least 1) and `invert`
    ///
    /// `bottom` always inverts and does not read `invert`.
    pub fn from_args(kind: AggregatorKind, args: &mut ArgReader<'_>) -> Result<Self, BuildError> {
        let count = args.optional_usize("count")?.unwrap_or(1);
        if count < 1 {
            return Err(BuildError::invalid_argument("count", "must be at least 1"));
        }
        let invert = match kind {
            AggregatorKind::Bottom => true,
            _ => args.optional_bool("invert")?.unwrap_or(false),
        };
        Ok(Self { count, invert })
    }

    /// Number of series kept
    pub fn count(&self) -> usize {
        self.count
    }

    /// Whether the lowest scores win
    pub fn is_inverted(&self) -> bool {
        self.invert
    }

    fn highest<I: IntoIterator<Item = RankedSeries>>(&self, ranked: I) -> Vec<RankedSeries> {
        // Min-heap of the current winners; the root is the weakest
        let mut heap: BinaryHeap<Reverse<RankedSeries>> = BinaryHeap::new();
        for candidate in ranked {
            heap.push(Reverse(candidate));
            if heap.len() > self.count {
                heap.pop();
            }
        }
        let mut winners: Vec<_> = heap.into_iter().map(|r| r.0).collect();
        winners.sort_by(|a, b| b.cmp(a));
        winners
    }

    fn lowest<I: IntoIterator<Item = RankedSeries>>(&self, ranked: I) -> Vec<RankedSeries> {
        // Max-heap of the current winners; the root is the weakest
        let mut heap: BinaryHeap<RankedSeries> = BinaryHeap::new();
        for candidate in ranked {
            heap.push(candidate);
            if heap.len() > self.count {
                heap.pop();
            }
        }
        heap.into_sorted_vec()
    }
}

#[async_trait]
impl StageOperation for TopOperator {
    fn name(&self) -> &'static str {
        if self.invert {
            "bottom"
        } else {
            "top"
        }
    }

    async fn execute(
        &self,
        _ctx: &StageContext,
        inputs: &DependencyResults,
    ) -> Result<TimeSeriesResult, ExecutionError> {
        let ranked = inputs
            .iter()
            .flat_map(|result| result.series())
            .map(|series| RankedSeries {
                score: series.value_sum(),
                series: series.clone(),
            });

        let winners = if self.invert {
            self.lowest(ranked)
        } else {
            self.highest(ranked)
        };

        let series = winners.into_iter().map(|r| r.series).collect();
        Ok(TimeSeriesResult::new(vec![Query::new(series)]))
    }
}
