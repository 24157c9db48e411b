//! feebook-core: the per-user transaction fee engine.
//!
//! Leaf to root: `formula` and `regression` produce a fee ratio,
//! `frequency` supplies the frequency input, `fee` turns a ratio into a
//! rounded fee, `lifecycle` ties fees to payment items, and `engine`
//! wires all of it to the SQLite `store` one transaction at a time.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod fee;
pub mod formula;
pub mod frequency;
pub mod lifecycle;
pub mod plan;
pub mod regression;
pub mod store;
pub mod types;

pub use engine::{FeeEngine, PaymentOutcome};
pub use error::{FeeError, FeeResult, FormulaError, RegressionInputError};
pub use fee::{compute_fee, FeeQuote};
pub use formula::{validate_formula, FormulaValidation};
pub use lifecycle::{apply_fee, recompute_fee, refund_fee, FeeRecord, FeeState};
pub use plan::{BucketCalibration, CalibrationPoint, FeeMode, FeePlan, FeeSchedule, IntervalCalibration};
pub use regression::{fit_regression, FeeCurve};
