//! Fee audit events.
//!
//! RULE: Every fee-affecting mutation appends its events to the
//! `fee_event_log` table inside the same transaction as the mutation.

use crate::{
    plan::FeeMode,
    types::{PaymentItemId, UserId},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Every event the fee engine records.
/// Variants are only ever appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeeEvent {
    // ── Plan events ────────────────────────────────
    PlanCreated {
        user_id:       UserId,
        mode:          FeeMode,
        max_fee_ratio: Decimal,
    },
    PlanUpdated {
        user_id:       UserId,
        mode:          FeeMode,
        max_fee_ratio: Decimal,
    },

    // ── Payment item events ────────────────────────
    FeeApplied {
        user_id:         UserId,
        payment_item_id: PaymentItemId,
        fee_amount:      Decimal,
        original_amount: Decimal,
        stored_amount:   Decimal,
    },
    FeeRefunded {
        user_id:         UserId,
        payment_item_id: PaymentItemId,
        fee_amount:      Decimal,
        restored_amount: Decimal,
    },
    FeeRecomputed {
        user_id:         UserId,
        payment_item_id: PaymentItemId,
        old_fee:         Decimal,
        new_fee:         Decimal,
        stored_amount:   Decimal,
    },
    FormulaFallback {
        user_id:         UserId,
        payment_item_id: PaymentItemId,
        reason:          String,
    },
}

impl FeeEvent {
    /// Stable name for the `event_type` column.
    pub fn type_name(&self) -> &'static str {
        match self {
            FeeEvent::PlanCreated { .. }     => "plan_created",
            FeeEvent::PlanUpdated { .. }     => "plan_updated",
            FeeEvent::FeeApplied { .. }      => "fee_applied",
            FeeEvent::FeeRefunded { .. }     => "fee_refunded",
            FeeEvent::FeeRecomputed { .. }   => "fee_recomputed",
            FeeEvent::FormulaFallback { .. } => "formula_fallback",
        }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            FeeEvent::PlanCreated { user_id, .. }
            | FeeEvent::PlanUpdated { user_id, .. }
            | FeeEvent::FeeApplied { user_id, .. }
            | FeeEvent::FeeRefunded { user_id, .. }
            | FeeEvent::FeeRecomputed { user_id, .. }
            | FeeEvent::FormulaFallback { user_id, .. } => *user_id,
        }
    }
}

/// One persisted row of the fee event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub user_id:    UserId,
    pub event_type: String,
    pub payload:    String, // JSON-serialized FeeEvent
    pub created_at: String,
}
