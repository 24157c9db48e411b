//! Shared primitive types used across the fee engine.

/// Owner of a fee plan and of payment items.
pub type UserId = i64;

/// Row id of a payment item in the store.
pub type PaymentItemId = i64;

/// Stable identifier of a persisted fee record.
pub type RecordId = String;
