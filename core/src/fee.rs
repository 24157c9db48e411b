//! Fee computer: one payment amount in, one fee amount out.
//!
//! RULE: Computing a fee never fails. A broken formula or unusable
//! calibration degrades to a zero (or identity-curve) fee so the payment
//! itself always goes through.

use crate::{
    formula::Formula,
    frequency::bucket_frequency,
    plan::{FeePlan, FeeSchedule},
};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Fees are kept to cents.
pub const FEE_DECIMAL_PLACES: u32 = 2;

/// Curves and formulas compute ratios in `f64`; the ratio is snapped to
/// this many places before it meets a decimal amount.
pub const RATIO_DECIMAL_PLACES: u32 = 10;

/// Smallest fee worth recording (0.01).
pub fn minimum_fee() -> Decimal {
    Decimal::new(1, FEE_DECIMAL_PLACES)
}

/// A computed fee plus the inputs that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeQuote {
    pub fee:       Decimal,
    /// Snapped ratio, within the ceiling of the bucket that priced it.
    pub ratio:     Decimal,
    pub frequency: f64,
    /// Set when a formula failed and the ratio defaulted to 0.
    pub fallback_reason: Option<String>,
}

/// Compute the fee for `amount` under `plan`.
///
/// `history` holds the user's other stored payment amounts; the payment
/// being priced must not be in it.
pub fn compute_fee(amount: Decimal, plan: &FeePlan, history: &[Decimal]) -> FeeQuote {
    let abs_amount = amount.abs();
    let frequency = bucket_frequency(history, plan.bucket_boundaries(), abs_amount);
    let bucket = plan.bucket_calibration(abs_amount);

    let (raw_ratio, fallback_reason) = match &plan.schedule {
        FeeSchedule::Formula { expression } => {
            let x = abs_amount.to_f64().unwrap_or(f64::MAX);
            match Formula::parse(expression).and_then(|f| f.eval(x, frequency)) {
                Ok(value) => (value, None),
                Err(e) => {
                    log::warn!(
                        "fee: formula '{expression}' failed for user {}: {e}; fee defaults to 0",
                        plan.user_id
                    );
                    (0.0, Some(e.to_string()))
                }
            }
        }
        FeeSchedule::AmountTable { .. } => (bucket.fit().ratio_at(frequency), None),
    };
    let ratio = snap_ratio(raw_ratio, bucket.ceiling);

    FeeQuote {
        fee: fee_from_ratio(abs_amount, ratio),
        ratio,
        frequency,
        fallback_reason,
    }
}

/// Clamp an `f64` ratio into `[0, ceiling]` and snap it to
/// [`RATIO_DECIMAL_PLACES`]. NaN is no fee.
pub fn snap_ratio(ratio: f64, ceiling: Decimal) -> Decimal {
    let ceiling = ceiling.max(Decimal::ZERO);
    if ratio.is_nan() {
        return Decimal::ZERO;
    }
    let clamped = ratio.clamp(0.0, ceiling.to_f64().unwrap_or(0.0));
    Decimal::from_f64(clamped)
        .map(|r| r.round_dp_with_strategy(RATIO_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero))
        .unwrap_or(Decimal::ZERO)
        .min(ceiling)
}

/// `abs_amount * ratio`, capped at `abs_amount`, rounded half-up to cents.
/// Anything under one cent is no fee at all.
pub fn fee_from_ratio(abs_amount: Decimal, ratio: Decimal) -> Decimal {
    let abs_amount = abs_amount.abs();
    if ratio <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let raw = abs_amount.checked_mul(ratio).unwrap_or(abs_amount).min(abs_amount);
    // Sub-cent amounts could round above themselves; the cap wins.
    let ceiling = abs_amount.round_dp_with_strategy(FEE_DECIMAL_PLACES, RoundingStrategy::ToZero);
    let rounded = raw
        .round_dp_with_strategy(FEE_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
        .min(ceiling);
    if rounded < minimum_fee() {
        Decimal::ZERO
    } else {
        rounded
    }
}
