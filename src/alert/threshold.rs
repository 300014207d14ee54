//! Threshold alert
//!
//! A point breaches when `value <operator> threshold` holds. The evaluator is
//! a two-state machine walked left to right over a series:
//!
//! ```text
//!   OK ──breach held for dwell──▶ BUILDING ──non-breach after recovery──▶ OK
//!                                    │ ▲
//!                                    └─┘ breach / non-breach within recovery
//! ```
//!
//! Closing is driven by samples, not wall-clock time: a trigger only closes
//! when a non-breaching sample arrives more than `recovery_period` after the
//! last breach, and its end is that sample's time. A trigger still open when
//! the series ends is closed at the final sample's time.

use crate::alert::{SeriesEvaluator, TriggerFactory};
use crate::query::args::ArgReader;
use crate::query::error::BuildError;
use crate::query::planner::PlannerConfig;
use crate::query::result::{AlertTrigger, DataPoint, SeriesResult};
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::str::FromStr;

/// Comparison between a sample and the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `value == threshold`
    EqualTo,
    /// `value > threshold`
    GreaterThan,
    /// `value >= threshold`
    GreaterThanOrEqualTo,
    /// `value < threshold`
    LessThan,
    /// `value <= threshold`
    LessThanOrEqualTo,
    /// `value != threshold`
    NotEqualTo,
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "=" | "==" | "eq" | "equal_to" => Ok(Self::EqualTo),
            ">" | "gt" | "greater_than" => Ok(Self::GreaterThan),
            ">=" | "gte" | "greater_than_or_equal_to" => Ok(Self::GreaterThanOrEqualTo),
            "<" | "lt" | "less_than" => Ok(Self::LessThan),
            "<=" | "lte" | "less_than_or_equal_to" => Ok(Self::LessThanOrEqualTo),
            "!=" | "<>" | "ne" | "not_equal_to" => Ok(Self::NotEqualTo),
            _ => Err(format!("unknown operator '{}'", s)),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::EqualTo => "==",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqualTo => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqualTo => "<=",
            Self::NotEqualTo => "!=",
        };
        f.write_str(symbol)
    }
}

impl Operator {
    /// Whether `value` breaches `threshold`
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::EqualTo => value == threshold,
            Self::GreaterThan => value > threshold,
            Self::GreaterThanOrEqualTo => value >= threshold,
            Self::LessThan => value < threshold,
            Self::LessThanOrEqualTo => value <= threshold,
            Self::NotEqualTo => value != threshold,
        }
    }

    /// Phrase used in trigger messages
    pub fn describe(&self) -> &'static str {
        match self {
            Self::EqualTo => "equal to",
            Self::GreaterThan => "greater than",
            Self::GreaterThanOrEqualTo => "greater than or equal to",
            Self::LessThan => "less than",
            Self::LessThanOrEqualTo => "less than or equal to",
            Self::NotEqualTo => "not equal to",
        }
    }
}

/// Threshold state machine parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdEvaluator {
    threshold: f64,
    operator: Operator,
    recovery_period: Duration,
    dwell_period: Duration,
}

impl ThresholdEvaluator {
    /// Create an evaluator with zero dwell and recovery
    pub fn new(threshold: f64, operator: Operator) -> Self {
        Self {
            threshold,
            operator,
            recovery_period: Duration::zero(),
            dwell_period: Duration::zero(),
        }
    }

    /// Set the recovery period
    pub fn with_recovery_period(mut self, period: Duration) -> Self {
        self.recovery_period = period;
        self
    }

    /// Set the dwell period
    pub fn with_dwell_period(mut self, period: Duration) -> Self {
        self.dwell_period = period;
        self
    }

    /// Validate `threshold`, `operator`, `recovery_period`, `dwell_period`
    pub fn from_args(args: &mut ArgReader<'_>, config: &PlannerConfig) -> Result<Self, BuildError> {
        let threshold = args.required_f64("threshold")?;
        if !threshold.is_finite() {
            return Err(BuildError::invalid_argument("threshold", "must be finite"));
        }
        let operator = args
            .required_str("operator")?
            .parse::<Operator>()
            .map_err(|reason| BuildError::invalid_argument("operator", reason))?;
        let recovery_period = args
            .optional_period("recovery_period")?
            .unwrap_or(config.default_recovery_period);
        let dwell_period = args
            .optional_period("dwell_period")?
            .unwrap_or(config.default_dwell_period);

        Ok(Self::new(threshold, operator)
            .with_recovery_period(recovery_period)
            .with_dwell_period(dwell_period))
    }

    fn breaches(&self, point: &DataPoint) -> bool {
        point
            .as_f64()
            .map(|v| self.operator.check(v, self.threshold))
            .unwrap_or(false)
    }

    fn message(&self, point: &DataPoint) -> String {
        format!(
            "value of {} at {} was {} threshold of {}",
            point.value,
            point.time.to_rfc3339(),
            self.operator.describe(),
            self.threshold
        )
    }
}

impl SeriesEvaluator for ThresholdEvaluator {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn evaluate(
        &self,
        series: &SeriesResult,
        points: &[DataPoint],
        _now: DateTime<Utc>,
    ) -> Vec<AlertTrigger> {
        let mut factory = TriggerFactory::new(series);
        let mut triggers = Vec::new();

        let mut open: Option<AlertTrigger> = None;
        // Start of the current uninterrupted run of breaches
        let mut run_start: Option<DateTime<Utc>> = None;
        let mut last_breach: Option<DateTime<Utc>> = None;

        for point in points {
            if self.breaches(point) {
                let start = *run_start.get_or_insert(point.time);
                if point.time.signed_duration_since(start) >= self.dwell_period {
                    if open.is_none() {
                        open = Some(factory.open(point.time, self.message(point)));
                    }
                    last_breach = Some(point.time);
                }
            } else {
                if let Some(last) = last_breach {
                    if point.time.signed_duration_since(last) > self.recovery_period {
                        if let Some(mut trigger) = open.take() {
                            trigger.end_time = Some(point.time);
                            triggers.push(trigger);
                        }
                        last_breach = None;
                    }
                }
                run_start = None;
            }
        }

        if let (Some(mut trigger), Some(last)) = (open, points.last()) {
            trigger.end_time = Some(last.time);
            triggers.push(trigger);
        }

        triggers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn points(values: &[(i64, f64)]) -> Vec<DataPoint> {
        values.iter().map(|(t, v)| DataPoint::new(at(*t), *v)).collect()
    }

    fn windows(triggers: &[AlertTrigger]) -> Vec<(i64, Option<i64>)> {
        triggers
            .iter()
            .map(|t| (t.time.timestamp(), t.end_time.map(|e| e.timestamp())))
            .collect()
    }

    fn evaluate(evaluator: &ThresholdEvaluator, values: &[(i64, f64)]) -> Vec<AlertTrigger> {
        let series = SeriesResult::new("cpu").with_values(points(values));
        evaluator.evaluate(&series, series.values(), at(1_000))
    }

    const DIP: &[(i64, f64)] = &[(0, 11.0), (1, 9.0), (2, 11.0), (3, 9.0)];

    #[test]
    fn test_zero_recovery_closes_on_first_ok_sample() {
        let evaluator = ThresholdEvaluator::new(10.0, Operator::GreaterThan);
        let triggers = evaluate(&evaluator, DIP);
        assert_eq!(windows(&triggers), vec![(0, Some(1)), (2, Some(3))]);
    }

    #[test]
    fn test_recovery_period_bridges_dip() {
        let evaluator = ThresholdEvaluator::new(10.0, Operator::GreaterThan)
            .with_recovery_period(Duration::seconds(2));
        let triggers = evaluate(&evaluator, DIP);
        assert_eq!(windows(&triggers), vec![(0, Some(3))]);
    }

    #[test]
    fn test_open_at_end_closes_at_last_sample() {
        let evaluator = ThresholdEvaluator::new(10.0, Operator::GreaterThan);
        let triggers = evaluate(&evaluator, &[(0, 1.0), (5, 20.0), (9, 30.0)]);
        assert_eq!(windows(&triggers), vec![(5, Some(9))]);
    }

    #[test]
    fn test_dwell_requires_sustained_breach() {
        let evaluator = ThresholdEvaluator::new(10.0, Operator::GreaterThan)
            .with_dwell_period(Duration::seconds(2));
        // A one-sample spike never opens; the 3-sample run opens once dwell is met
        let triggers = evaluate(
            &evaluator,
            &[(0, 11.0), (1, 9.0), (2, 11.0), (3, 11.0), (4, 11.0), (5, 9.0)],
        );
        assert_eq!(windows(&triggers), vec![(4, Some(5))]);
    }

    #[test]
    fn test_extreme_periods_do_not_overflow() {
        let evaluator = ThresholdEvaluator::new(10.0, Operator::GreaterThan)
            .with_dwell_period(Duration::days(36_500))
            .with_recovery_period(Duration::days(36_500));
        assert!(evaluate(&evaluator, DIP).is_empty());

        let earliest = DateTime::<Utc>::MIN_UTC.timestamp() + 1;
        let latest = DateTime::<Utc>::MAX_UTC.timestamp();
        let spanning = ThresholdEvaluator::new(10.0, Operator::GreaterThan)
            .with_recovery_period(Duration::days(36_500));
        let triggers = evaluate(&spanning, &[(earliest, 11.0), (latest, 9.0)]);
        assert_eq!(windows(&triggers), vec![(earliest, Some(latest))]);

        let config = PlannerConfig::default();
        let args: BTreeMap<String, serde_json::Value> = serde_json::from_value(json!({
            "threshold": 10,
            "operator": ">",
            "dwell_period": "100000000d",
        }))
        .unwrap();
        let err = ThresholdEvaluator::from_args(&mut ArgReader::new(&args), &config).unwrap_err();
        assert!(matches!(err, BuildError::InvalidArgument { ref field, .. } if field == "dwell_period"));
    }

    #[test]
    fn test_no_breach_no_trigger() {
        let evaluator = ThresholdEvaluator::new(10.0, Operator::GreaterThan);
        assert!(evaluate(&evaluator, &[(0, 1.0), (1, 2.0)]).is_empty());
        assert!(evaluate(&evaluator, &[]).is_empty());
    }

    #[test]
    fn test_message_and_args() {
        let evaluator = ThresholdEvaluator::new(10.0, Operator::GreaterThanOrEqualTo);
        let series = SeriesResult::new("cpu")
            .with_tag("host", "a")
            .with_values(points(&[(0, 12.5)]));
        let triggers = evaluator.evaluate(&series, series.values(), at(0));
        assert_eq!(
            triggers[0].message,
            format!(
                "value of 12.5 at {} was greater than or equal to threshold of 10",
                at(0).to_rfc3339()
            )
        );
        assert_eq!(triggers[0].args["name"], "cpu");
        assert_eq!(triggers[0].args["host"], "a");
    }

    #[test]
    fn test_operator_parsing() {
        assert_eq!("=".parse::<Operator>().unwrap(), Operator::EqualTo);
        assert_eq!("GREATER_THAN".parse::<Operator>().unwrap(), Operator::GreaterThan);
        assert_eq!("<>".parse::<Operator>().unwrap(), Operator::NotEqualTo);
        assert_eq!("<=".parse::<Operator>().unwrap(), Operator::LessThanOrEqualTo);
        assert!("~".parse::<Operator>().is_err());
        assert_eq!(Operator::GreaterThanOrEqualTo.to_string(), ">=");
        assert!(Operator::NotEqualTo.check(1.0, 2.0));
        assert!(!Operator::LessThan.check(2.0, 2.0));
    }

    #[test]
    fn test_from_args() {
        let args: BTreeMap<String, serde_json::Value> = serde_json::from_value(json!({
            "threshold": 10,
            "operator": "greater_than",
            "recovery_period": "PT2S",
        }))
        .unwrap();
        let evaluator =
            ThresholdEvaluator::from_args(&mut ArgReader::new(&args), &PlannerConfig::default())
                .unwrap();
        assert_eq!(
            evaluator,
            ThresholdEvaluator::new(10.0, Operator::GreaterThan)
                .with_recovery_period(Duration::seconds(2))
        );

        let bad: BTreeMap<String, serde_json::Value> =
            serde_json::from_value(json!({"threshold": 10, "operator": "~"})).unwrap();
        let err = ThresholdEvaluator::from_args(&mut ArgReader::new(&bad), &PlannerConfig::default())
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidArgument { ref field, .. } if field == "operator"));
    }

    proptest! {
        #[test]
        fn prop_triggers_are_ordered_and_disjoint(
            values in prop::collection::vec(0.0..20.0f64, 0..60),
            recovery in 0i64..5,
        ) {
            let evaluator = ThresholdEvaluator::new(10.0, Operator::GreaterThan)
                .with_recovery_period(Duration::seconds(recovery));
            let input: Vec<(i64, f64)> = values.iter().enumerate().map(|(i, v)| (i as i64, *v)).collect();
            let triggers = evaluate(&evaluator, &input);

            for trigger in &triggers {
                let end = trigger.end_time.unwrap();
                prop_assert!(trigger.time <= end);
            }
            for pair in triggers.windows(2) {
                prop_assert!(pair[0].end_time.unwrap() <= pair[1].time);
            }
        }
    }
}
