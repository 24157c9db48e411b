//! Per-user fee plan.
//!
//! A plan is either an amount table (interval boundaries, each interval
//! with its own calibration points and ceiling) or a single formula in
//! `x` and `y`. Only the active schedule is carried here; the store keeps
//! the other mode's data around untouched and never reads it back.

use crate::{
    config::EngineConfig,
    error::{FeeError, FeeResult},
    frequency::bucket_index,
    regression::{fit_regression, FeeCurve},
    types::UserId,
};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An admin-supplied (frequency, fee ratio) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub frequency: f64,
    pub ratio:     f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeMode {
    AmountTable,
    Formula,
}

impl FeeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            FeeMode::AmountTable => "table",
            FeeMode::Formula     => "formula",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "table"   => Some(FeeMode::AmountTable),
            "formula" => Some(FeeMode::Formula),
            _ => None,
        }
    }
}

/// Chart-editor data for one amount interval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntervalCalibration {
    /// Ceiling for this interval. The plan-wide ceiling applies when unset.
    #[serde(default)]
    pub max_fee_ratio: Option<Decimal>,
    #[serde(default)]
    pub points:        Vec<CalibrationPoint>,
}

/// The interval an amount falls into, resolved against a plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketCalibration<'a> {
    pub lower_limit: Decimal,
    pub ceiling:     Decimal,
    pub points:      &'a [CalibrationPoint],
}

impl BucketCalibration<'_> {
    pub fn fit(&self) -> FeeCurve {
        fit_regression(self.points, self.ceiling.to_f64().unwrap_or(0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FeeSchedule {
    AmountTable {
        /// Ascending lower limits of the amount buckets.
        intervals:   Vec<Decimal>,
        /// Keyed by interval lower limit. Intervals without an entry use
        /// the identity curve under the plan-wide ceiling.
        #[serde(default)]
        calibration: BTreeMap<Decimal, IntervalCalibration>,
    },
    Formula {
        expression: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeePlan {
    pub user_id:       UserId,
    /// Hard cap on the fee ratio, in every mode and every interval.
    pub max_fee_ratio: Decimal,
    pub schedule:      FeeSchedule,
    pub created_at:    DateTime<Utc>,
    pub updated_at:    DateTime<Utc>,
}

impl FeePlan {
    /// The plan a user gets on first access: an uncalibrated amount table,
    /// which yields the identity curve `max_fee_ratio * freq`.
    pub fn default_for(user_id: UserId, config: &EngineConfig) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            max_fee_ratio: config.default_max_fee_ratio,
            schedule: FeeSchedule::AmountTable {
                intervals:   config.default_intervals.clone(),
                calibration: BTreeMap::new(),
            },
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mode(&self) -> FeeMode {
        match self.schedule {
            FeeSchedule::AmountTable { .. } => FeeMode::AmountTable,
            FeeSchedule::Formula { .. }     => FeeMode::Formula,
        }
    }

    /// Bucket boundaries used for frequency. Formula mode has one global bucket.
    pub fn bucket_boundaries(&self) -> &[Decimal] {
        match &self.schedule {
            FeeSchedule::AmountTable { intervals, .. } => intervals,
            FeeSchedule::Formula { .. } => &[],
        }
    }

    /// Lower limits of every bucket: 0 for the leading one, then each
    /// interval boundary.
    pub fn bucket_lower_limits(&self) -> Vec<Decimal> {
        let mut limits = vec![Decimal::ZERO];
        for b in self.bucket_boundaries() {
            if !limits.contains(b) {
                limits.push(*b);
            }
        }
        limits
    }

    /// Calibration of the bucket holding `amount`. Formula plans resolve
    /// to the single global bucket with no points.
    pub fn bucket_calibration(&self, amount: Decimal) -> BucketCalibration<'_> {
        let boundaries = self.bucket_boundaries();
        let index = bucket_index(boundaries, amount);
        let lower_limit = if index == 0 { Decimal::ZERO } else { boundaries[index - 1] };
        self.calibration_at(lower_limit)
    }

    fn calibration_at(&self, lower_limit: Decimal) -> BucketCalibration<'_> {
        let entry = match &self.schedule {
            FeeSchedule::AmountTable { calibration, .. } => calibration.get(&lower_limit),
            FeeSchedule::Formula { .. } => None,
        };
        BucketCalibration {
            lower_limit,
            ceiling: entry
                .and_then(|c| c.max_fee_ratio)
                .unwrap_or(self.max_fee_ratio)
                .min(self.max_fee_ratio),
            points: entry.map(|c| c.points.as_slice()).unwrap_or(&[]),
        }
    }

    /// One fitted curve per bucket, keyed by lower limit. Empty in formula mode.
    pub fn fitted_curves(&self) -> BTreeMap<Decimal, FeeCurve> {
        match self.schedule {
            FeeSchedule::AmountTable { .. } => self
                .bucket_lower_limits()
                .into_iter()
                .map(|limit| (limit, self.calibration_at(limit).fit()))
                .collect(),
            FeeSchedule::Formula { .. } => BTreeMap::new(),
        }
    }

    /// Structural checks run once, when the admin surface saves a plan.
    /// The inactive mode's data is not part of the plan and is not checked.
    pub fn validate(&self) -> FeeResult<()> {
        if !(Decimal::ZERO..=Decimal::ONE).contains(&self.max_fee_ratio) {
            return Err(invalid(format!(
                "max_fee_ratio {} is outside [0, 1]",
                self.max_fee_ratio
            )));
        }

        match &self.schedule {
            FeeSchedule::AmountTable { intervals, calibration } => {
                if let Some(negative) = intervals.iter().find(|b| **b < Decimal::ZERO) {
                    return Err(invalid(format!("interval boundary {negative} is negative")));
                }
                if let Some(pair) = intervals.windows(2).find(|w| w[0] >= w[1]) {
                    return Err(invalid(format!(
                        "intervals must be strictly ascending, found {} before {}",
                        pair[0], pair[1]
                    )));
                }
                for (limit, entry) in calibration {
                    if !limit.is_zero() && !intervals.contains(limit) {
                        return Err(invalid(format!(
                            "calibration for {limit} does not match an interval lower limit"
                        )));
                    }
                    if let Some(max) = entry.max_fee_ratio {
                        if max < Decimal::ZERO || max > self.max_fee_ratio {
                            return Err(invalid(format!(
                                "interval {limit}: max_fee_ratio {max} is outside [0, {}]",
                                self.max_fee_ratio
                            )));
                        }
                    }
                }
            }
            FeeSchedule::Formula { expression } => {
                if expression.trim().is_empty() {
                    return Err(invalid("formula mode requires a formula".to_string()));
                }
            }
        }
        Ok(())
    }
}

fn invalid(reason: String) -> FeeError {
    FeeError::InvalidPlanConfiguration { reason }
}
