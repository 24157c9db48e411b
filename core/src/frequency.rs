//! Frequency calculator: how common a payment's amount range is in the
//! user's own history.
//!
//! Boundaries `b0 < b1 < … < bn` split absolute amounts into buckets
//! `[0, b0)`, `[b0, b1)`, …, `[bn, ∞)`. No boundaries means one global bucket.
//! The caller passes a history that already excludes the payment being
//! created or updated.

use rust_decimal::Decimal;

/// Index of the bucket holding `amount.abs()`.
pub fn bucket_index(boundaries: &[Decimal], amount: Decimal) -> usize {
    let abs = amount.abs();
    boundaries.partition_point(|b| *b <= abs)
}

/// Fraction of `history` whose absolute amount shares a bucket with `amount`.
/// An empty history yields 0.
pub fn bucket_frequency(history: &[Decimal], boundaries: &[Decimal], amount: Decimal) -> f64 {
    if history.is_empty() {
        return 0.0;
    }
    let target = bucket_index(boundaries, amount);
    let hits = history
        .iter()
        .filter(|h| bucket_index(boundaries, **h) == target)
        .count();
    let frequency = hits as f64 / history.len() as f64;
    log::debug!(
        "frequency: bucket {target} holds {hits}/{} payments ({frequency:.4})",
        history.len()
    );
    frequency
}
