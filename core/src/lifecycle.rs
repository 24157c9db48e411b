//! Fee record lifecycle: apply, refund and recompute fees tied 1:1 to
//! payment items.
//!
//! States per payment item: `NoFee` and `FeeApplied`. The fee is always a
//! debit: `stored = requested - fee` for income and expenses alike, so
//! 100.00 with a 0.01 fee stores 99.99 and -100.00 stores -100.01.
//!
//! These functions are pure. Persisting the returned amounts and records
//! (atomically with the payment item) is the caller's job.

use crate::{
    fee::{compute_fee, FeeQuote},
    plan::FeePlan,
    types::{PaymentItemId, RecordId, UserId},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeState {
    NoFee,
    FeeApplied,
}

/// A fee charged against one payment item, frozen at application time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeRecord {
    pub record_id:       RecordId,
    pub payment_item_id: PaymentItemId,
    pub user_id:         UserId,
    /// Always positive.
    pub fee_amount:      Decimal,
    /// Requested amount before the fee was taken off.
    pub original_amount: Decimal,
    pub created_at:      DateTime<Utc>,
}

/// Result of pricing a payment: what to store and which record (if any) to keep.
#[derive(Debug, Clone, PartialEq)]
pub struct FeeApplication {
    pub requested_amount: Decimal,
    pub stored_amount:    Decimal,
    pub quote:            FeeQuote,
    pub record:           Option<FeeRecord>,
}

impl FeeApplication {
    pub fn state(&self) -> FeeState {
        if self.record.is_some() {
            FeeState::FeeApplied
        } else {
            FeeState::NoFee
        }
    }

    pub fn fee(&self) -> Decimal {
        self.record
            .as_ref()
            .map(|r| r.fee_amount)
            .unwrap_or(Decimal::ZERO)
    }
}

/// The amount a payment item returns to once its fee is undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeRefund {
    pub restored_amount: Decimal,
    pub refunded_fee:    Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeeRecomputation {
    pub refund:      FeeRefund,
    pub application: FeeApplication,
}

/// Price a new payment item. A zero fee, or one the stored amount cannot
/// absorb without overflowing, leaves the amount untouched and creates no
/// record.
pub fn apply_fee(
    payment_item_id: PaymentItemId,
    user_id: UserId,
    requested_amount: Decimal,
    plan: &FeePlan,
    history: &[Decimal],
) -> FeeApplication {
    let quote = compute_fee(requested_amount, plan, history);

    let stored_amount = match requested_amount.checked_sub(quote.fee) {
        Some(stored) if quote.fee > Decimal::ZERO => stored,
        Some(_) => return without_fee(requested_amount, quote),
        None => {
            log::warn!(
                "user={user_id} item={payment_item_id}: fee {} on {requested_amount} overflows; no fee applied",
                quote.fee
            );
            return without_fee(requested_amount, quote);
        }
    };

    let record = FeeRecord {
        record_id: uuid::Uuid::new_v4().to_string(),
        payment_item_id,
        user_id,
        fee_amount: quote.fee,
        original_amount: requested_amount,
        created_at: Utc::now(),
    };
    FeeApplication {
        requested_amount,
        stored_amount,
        quote,
        record: Some(record),
    }
}

fn without_fee(requested_amount: Decimal, quote: FeeQuote) -> FeeApplication {
    FeeApplication {
        requested_amount,
        stored_amount: requested_amount,
        quote,
        record: None,
    }
}

/// Undo a fee. Restores the recorded original amount exactly, whatever
/// the plan looks like now.
pub fn refund_fee(stored_amount: Decimal, record: Option<&FeeRecord>) -> FeeRefund {
    match record {
        Some(r) => FeeRefund {
            restored_amount: r.original_amount,
            refunded_fee:    r.fee_amount,
        },
        None => FeeRefund {
            restored_amount: stored_amount,
            refunded_fee:    Decimal::ZERO,
        },
    }
}

/// Replace the fee of an existing payment item whose amount changed:
/// refund the old fee in full, then price `new_requested_amount` against
/// the current plan. Never an incremental delta.
pub fn recompute_fee(
    payment_item_id: PaymentItemId,
    user_id: UserId,
    stored_amount: Decimal,
    existing: Option<&FeeRecord>,
    new_requested_amount: Decimal,
    plan: &FeePlan,
    history: &[Decimal],
) -> FeeRecomputation {
    let refund = refund_fee(stored_amount, existing);
    let application = apply_fee(payment_item_id, user_id, new_requested_amount, plan, history);
    FeeRecomputation { refund, application }
}
