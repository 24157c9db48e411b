//! The fee engine facade: what payment-item handlers and the admin
//! surface call.
//!
//! RULES:
//!   - Every mutation runs inside one store transaction: the payment
//!     amount, the fee record and the audit events commit or roll back
//!     together.
//!   - A fee computation never fails a payment mutation. Only storage
//!     errors and missing items do.
//!   - Saving a plan never touches existing fee records.

use crate::{
    config::EngineConfig,
    error::{FeeError, FeeResult},
    event::{EventLogEntry, FeeEvent},
    fee::{compute_fee, FeeQuote},
    formula::{validate_formula, FormulaValidation},
    lifecycle::{apply_fee, recompute_fee, refund_fee, FeeApplication, FeeRecord},
    plan::FeePlan,
    regression::FeeCurve,
    store::{FeeStore, PaymentItemRow},
    types::{PaymentItemId, UserId},
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

pub struct FeeEngine {
    pub store: FeeStore,
    config:    EngineConfig,
}

/// What a payment mutation persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentOutcome {
    pub item:            PaymentItemRow,
    pub fee:             Decimal,
    pub record:          Option<FeeRecord>,
    pub fallback_reason: Option<String>,
}

impl FeeEngine {
    pub fn new(store: FeeStore, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// In-memory, migrated engine with test defaults.
    pub fn build_test() -> FeeResult<Self> {
        let store = FeeStore::in_memory()?;
        store.migrate()?;
        Ok(Self::new(store, EngineConfig::default_test()))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Admin surface ──────────────────────────────────────────

    /// The user's plan, created with defaults on first access.
    pub fn fee_plan(&self, user_id: UserId) -> FeeResult<FeePlan> {
        self.store
            .atomically(|store| load_or_create_plan(store, &self.config, user_id))
    }

    /// Validate and persist a whole plan. Existing fee records are not
    /// re-evaluated.
    pub fn save_fee_plan(&self, mut plan: FeePlan) -> FeeResult<FeePlan> {
        plan.validate()?;

        self.store.atomically(|store| {
            let existing = store.fee_plan(plan.user_id)?;
            let now = Utc::now();
            plan.created_at = existing.as_ref().map(|p| p.created_at).unwrap_or(now);
            plan.updated_at = now;

            store.upsert_fee_plan(&plan, &plan.fitted_curves())?;

            let event = if existing.is_some() {
                FeeEvent::PlanUpdated {
                    user_id:       plan.user_id,
                    mode:          plan.mode(),
                    max_fee_ratio: plan.max_fee_ratio,
                }
            } else {
                FeeEvent::PlanCreated {
                    user_id:       plan.user_id,
                    mode:          plan.mode(),
                    max_fee_ratio: plan.max_fee_ratio,
                }
            };
            store.append_event(&event)?;

            log::info!(
                "user={} fee plan saved: mode={:?} max_fee_ratio={}",
                plan.user_id,
                plan.mode(),
                plan.max_fee_ratio
            );
            Ok(plan)
        })
    }

    /// Dry-run a formula against the configured samples. Mutates nothing.
    pub fn validate_formula(&self, expression: &str) -> FormulaValidation {
        validate_formula(expression, &self.config.validation_samples)
    }

    /// Curves stored with the user's last amount-table save, keyed by
    /// interval lower limit.
    pub fn fee_curves(&self, user_id: UserId) -> FeeResult<BTreeMap<Decimal, FeeCurve>> {
        self.store.fee_plan_curves(user_id)
    }

    /// Price `amount` without persisting anything.
    pub fn quote_fee(
        &self,
        user_id: UserId,
        amount: Decimal,
        exclude: Option<PaymentItemId>,
    ) -> FeeResult<FeeQuote> {
        let plan = self.fee_plan(user_id)?;
        let history = self.store.payment_amounts(user_id, exclude)?;
        Ok(compute_fee(amount, &plan, &history))
    }

    // ── Payment item mutations ─────────────────────────────────

    pub fn create_payment_item(
        &self,
        user_id: UserId,
        requested_amount: Decimal,
        description: Option<&str>,
    ) -> FeeResult<PaymentOutcome> {
        self.store.atomically(|store| {
            let plan = load_or_create_plan(store, &self.config, user_id)?;
            let history = store.payment_amounts(user_id, None)?;

            let item_id = store.insert_payment_item(user_id, requested_amount, description)?;
            let application = apply_fee(item_id, user_id, requested_amount, &plan, &history);
            persist_application(store, item_id, &application)?;

            if let Some(record) = &application.record {
                store.append_event(&FeeEvent::FeeApplied {
                    user_id,
                    payment_item_id: item_id,
                    fee_amount:      record.fee_amount,
                    original_amount: record.original_amount,
                    stored_amount:   application.stored_amount,
                })?;
                log::info!(
                    "user={user_id} item={item_id}: fee {} applied, {} -> {}",
                    record.fee_amount,
                    requested_amount,
                    application.stored_amount
                );
            }
            log_fallback(store, user_id, item_id, &application)?;

            outcome(store, item_id, application)
        })
    }

    /// Full replace of an item's fee after its amount changed.
    pub fn update_payment_amount(
        &self,
        item_id: PaymentItemId,
        new_requested_amount: Decimal,
    ) -> FeeResult<PaymentOutcome> {
        self.store.atomically(|store| {
            let item = store
                .payment_item(item_id)?
                .ok_or(FeeError::PaymentItemNotFound { item_id })?;
            let user_id = item.user_id;
            let existing = store.fee_record(item_id)?;

            let plan = load_or_create_plan(store, &self.config, user_id)?;
            let history = store.payment_amounts(user_id, Some(item_id))?;

            let recomputation = recompute_fee(
                item_id,
                user_id,
                item.amount,
                existing.as_ref(),
                new_requested_amount,
                &plan,
                &history,
            );
            let refund = recomputation.refund;
            let application = recomputation.application;

            store.delete_fee_record(item_id)?;
            persist_application(store, item_id, &application)?;

            if refund.refunded_fee > Decimal::ZERO {
                store.append_event(&FeeEvent::FeeRefunded {
                    user_id,
                    payment_item_id: item_id,
                    fee_amount:      refund.refunded_fee,
                    restored_amount: refund.restored_amount,
                })?;
            }
            store.append_event(&FeeEvent::FeeRecomputed {
                user_id,
                payment_item_id: item_id,
                old_fee:         refund.refunded_fee,
                new_fee:         application.fee(),
                stored_amount:   application.stored_amount,
            })?;
            log::info!(
                "user={user_id} item={item_id}: fee recomputed {} -> {}, stored {}",
                refund.refunded_fee,
                application.fee(),
                application.stored_amount
            );
            log_fallback(store, user_id, item_id, &application)?;

            outcome(store, item_id, application)
        })
    }

    /// Delete an item and its fee record. Nothing else is adjusted.
    pub fn delete_payment_item(&self, item_id: PaymentItemId) -> FeeResult<()> {
        self.store.atomically(|store| {
            let item = store
                .payment_item(item_id)?
                .ok_or(FeeError::PaymentItemNotFound { item_id })?;
            let record = store.fee_record(item_id)?;

            store.delete_payment_item(item_id)?;

            if let Some(record) = record {
                let refund = refund_fee(item.amount, Some(&record));
                store.append_event(&FeeEvent::FeeRefunded {
                    user_id:         item.user_id,
                    payment_item_id: item_id,
                    fee_amount:      refund.refunded_fee,
                    restored_amount: refund.restored_amount,
                })?;
                log::info!(
                    "user={} item={item_id}: deleted, fee {} discarded",
                    item.user_id,
                    refund.refunded_fee
                );
            }
            Ok(())
        })
    }

    pub fn payment_item(&self, item_id: PaymentItemId) -> FeeResult<Option<PaymentItemRow>> {
        self.store.payment_item(item_id)
    }

    pub fn fee_record(&self, item_id: PaymentItemId) -> FeeResult<Option<FeeRecord>> {
        self.store.fee_record(item_id)
    }

    pub fn events_for_user(&self, user_id: UserId) -> FeeResult<Vec<EventLogEntry>> {
        self.store.events_for_user(user_id)
    }
}

fn load_or_create_plan(
    store: &FeeStore,
    config: &EngineConfig,
    user_id: UserId,
) -> FeeResult<FeePlan> {
    if let Some(plan) = store.fee_plan(user_id)? {
        return Ok(plan);
    }

    let plan = FeePlan::default_for(user_id, config);
    store.upsert_fee_plan(&plan, &plan.fitted_curves())?;
    store.append_event(&FeeEvent::PlanCreated {
        user_id,
        mode:          plan.mode(),
        max_fee_ratio: plan.max_fee_ratio,
    })?;
    log::info!("user={user_id} fee plan created with defaults");
    Ok(plan)
}

fn persist_application(
    store: &FeeStore,
    item_id: PaymentItemId,
    application: &FeeApplication,
) -> FeeResult<()> {
    store.update_payment_amount(item_id, application.stored_amount)?;
    if let Some(record) = &application.record {
        store.insert_fee_record(record)?;
    }
    Ok(())
}

fn log_fallback(
    store: &FeeStore,
    user_id: UserId,
    item_id: PaymentItemId,
    application: &FeeApplication,
) -> FeeResult<()> {
    if let Some(reason) = &application.quote.fallback_reason {
        store.append_event(&FeeEvent::FormulaFallback {
            user_id,
            payment_item_id: item_id,
            reason: reason.clone(),
        })?;
    }
    Ok(())
}

fn outcome(
    store: &FeeStore,
    item_id: PaymentItemId,
    application: FeeApplication,
) -> FeeResult<PaymentOutcome> {
    let item = store
        .payment_item(item_id)?
        .ok_or(FeeError::PaymentItemNotFound { item_id })?;
    Ok(PaymentOutcome {
        item,
        fee: application.fee(),
        fallback_reason: application.quote.fallback_reason,
        record: application.record,
    })
}
