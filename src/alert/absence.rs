//! Data-absence alert
//!
//! Looks at the spacing between consecutive samples rather than their
//! values. A gap longer than `dwell_period` is a breach that opens a trigger
//! at `a.time + dwell`. Once samples arrive regularly again for longer than
//! `recovery_period`, the trigger closes at the end of the last gap. A trigger
//! still open when the walk ends closes at the evaluation instant.
//!
//! After the walk the series tail is checked against the evaluation instant:
//! a series whose last sample is older than `dwell + freshness_cutoff` gets an
//! ongoing trigger with no end.

use crate::alert::{SeriesEvaluator, TriggerFactory};
use crate::query::args::ArgReader;
use crate::query::error::BuildError;
use crate::query::planner::PlannerConfig;
use crate::query::result::{AlertTrigger, DataPoint, SeriesResult};
use chrono::{DateTime, Duration, Utc};

/// Missing-data detector
#[derive(Debug, Clone, PartialEq)]
pub struct DataAbsentEvaluator {
    dwell_period: Duration,
    recovery_period: Duration,
    freshness_cutoff: Duration,
}

impl Default for DataAbsentEvaluator {
    fn default() -> Self {
        Self {
            dwell_period: Duration::minutes(1),
            recovery_period: Duration::zero(),
            freshness_cutoff: Duration::seconds(120),
        }
    }
}

impl DataAbsentEvaluator {
    /// Create an evaluator with the given dwell period
    pub fn new(dwell_period: Duration) -> Self {
        Self {
            dwell_period,
            ..Self::default()
        }
    }

    /// Set the recovery period
    pub fn with_recovery_period(mut self, period: Duration) -> Self {
        self.recovery_period = period;
        self
    }

    /// Set the staleness margin
    pub fn with_freshness_cutoff(mut self, cutoff: Duration) -> Self {
        self.freshness_cutoff = cutoff;
        self
    }

    /// Validate `dwell_period` and `recovery_period`
    pub fn from_args(args: &mut ArgReader<'_>, config: &PlannerConfig) -> Result<Self, BuildError> {
        let dwell_period = args
            .optional_period("dwell_period")?
            .unwrap_or(config.data_absent_dwell);
        if dwell_period <= Duration::zero() {
            return Err(BuildError::invalid_argument("dwell_period", "must be positive"));
        }
        let recovery_period = args
            .optional_period("recovery_period")?
            .unwrap_or(config.default_recovery_period);

        Ok(Self::new(dwell_period)
            .with_recovery_period(recovery_period)
            .with_freshness_cutoff(config.freshness_cutoff))
    }

    fn message(&self) -> String {
        format!(
            "Missing data for at least {} minutes.",
            self.dwell_period.num_minutes()
        )
    }
}

impl SeriesEvaluator for DataAbsentEvaluator {
    fn name(&self) -> &'static str {
        "dataabsent"
    }

    fn evaluate(
        &self,
        series: &SeriesResult,
        points: &[DataPoint],
        now: DateTime<Utc>,
    ) -> Vec<AlertTrigger> {
        let Some(last) = points.last() else {
            return Vec::new();
        };

        let mut factory = TriggerFactory::new(series);
        let mut triggers = Vec::new();
        let mut open: Option<AlertTrigger> = None;
        let mut breach_last: Option<DateTime<Utc>> = None;

        for pair in points.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let gap_start = a
                .time
                .checked_add_signed(self.dwell_period)
                .filter(|start| *start < b.time);
            if let Some(start) = gap_start {
                if open.is_none() {
                    open = Some(factory.open(start, self.message()));
                }
                breach_last = Some(b.time);
            } else if let Some(last_gap) = breach_last.filter(|_| open.is_some()) {
                if b.time.signed_duration_since(last_gap) > self.recovery_period {
                    if let Some(mut trigger) = open.take() {
                        trigger.end_time = Some(last_gap);
                        triggers.push(trigger);
                    }
                }
            }
        }

        if let Some(mut trigger) = open {
            trigger.end_time = Some(now);
            triggers.push(trigger);
        }

        let stale_since = match (
            last.time.checked_add_signed(self.dwell_period),
            now.checked_sub_signed(self.freshness_cutoff),
        ) {
            (Some(since), Some(fresh_after)) if since < fresh_after => Some(since),
            _ => None,
        };
        if let Some(since) = stale_since {
            triggers.push(factory.open(since, self.message()));
        }

        triggers
    }
}
