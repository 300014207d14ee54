//! Stage operators
//!
//! Concrete [`StageOperation`](crate::query::stage::StageOperation)
//! implementations for everything except alert evaluation:
//!
//! - `select`: leaf read from the backing store
//! - `union`: concatenate dependency queries
//! - `diff`: pairwise differences per series
//! - `top`: keep the N highest (or lowest) scoring series
//! - `aggregation`: bucketed min/max/sum/avg/count/percentile/merge, shared
//!   with the in-memory store so lifted and in-engine aggregation agree

pub mod aggregation;
pub mod diff;
pub mod select;
pub mod top;
pub mod union;

pub use aggregation::{AggregateOperator, AggregationFunction, AggregationSpec};
pub use diff::DiffOperator;
pub use select::SelectOperator;
pub use top::TopOperator;
pub use union::UnionOperator;

/// Numerically stable accumulators
pub mod numeric {
    /// Kahan summation for reduced floating-point error
    #[derive(Debug, Clone, Copy, Default)]
    pub struct KahanSum {
        sum: f64,
        compensation: f64,
    }

    impl KahanSum {
        /// Create a new sum accumulator
        pub fn new() -> Self {
            Self::default()
        }

        /// Add a value to the sum
        #[inline]
        pub fn add(&mut self, value: f64) {
            let y = value - self.compensation;
            let t = self.sum + y;
            self.compensation = (t - self.sum) - y;
            self.sum = t;
        }

        /// Get the current sum
        #[inline]
        pub fn sum(&self) -> f64 {
            self.sum
        }
    }

    /// Incremental mean
    #[derive(Debug, Clone, Copy, Default)]
    pub struct RunningMean {
        count: u64,
        mean: f64,
    }

    impl RunningMean {
        /// Create an empty mean
        pub fn new() -> Self {
            Self::default()
        }

        /// Fold in one value
        #[inline]
        pub fn add(&mut self, value: f64) {
            self.count += 1;
            self.mean += (value - self.mean) / self.count as f64;
        }

        /// Current mean, `None` before the first value
        pub fn mean(&self) -> Option<f64> {
            (self.count > 0).then_some(self.mean)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_kahan_sum_small_increments() {
            let mut sum = KahanSum::new();
            for _ in 0..10 {
                sum.add(0.1);
            }
            assert!((sum.sum() - 1.0).abs() < 1e-15);
        }

        #[test]
        fn test_running_mean() {
            let mut mean = RunningMean::new();
            assert_eq!(mean.mean(), None);
            for v in [2.0, 4.0, 6.0] {
                mean.add(v);
            }
            assert_eq!(mean.mean(), Some(4.0));
        }
    }
}
