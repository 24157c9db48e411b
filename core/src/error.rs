use crate::types::PaymentItemId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeeError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Formula error: {0}")]
    Formula(#[from] FormulaError),

    #[error("Regression input error: {0}")]
    RegressionInput(#[from] RegressionInputError),

    #[error("Invalid fee plan configuration: {reason}")]
    InvalidPlanConfiguration { reason: String },

    #[error("Payment item {item_id} not found")]
    PaymentItemNotFound { item_id: PaymentItemId },

    #[error("Stored value in column '{column}' is not a decimal: {value}")]
    InvalidStoredValue { column: &'static str, value: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type FeeResult<T> = Result<T, FeeError>;

/// Failure to parse or evaluate a fee formula.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("formula is empty")]
    Empty,

    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("malformed number '{text}'")]
    MalformedNumber { text: String },

    #[error("unexpected token '{found}' at position {pos}, expected {expected}")]
    UnexpectedToken {
        found:    String,
        pos:      usize,
        expected: &'static str,
    },

    #[error("unknown identifier '{name}' (allowed variables: x, y)")]
    UnknownIdentifier { name: String },

    #[error("function '{name}' is not allowed")]
    UnknownFunction { name: String },

    #[error("function '{name}' takes {expected} argument(s), got {got}")]
    Arity {
        name:     String,
        expected: &'static str,
        got:      usize,
    },

    #[error("expression nests deeper than {limit} levels")]
    TooDeep { limit: usize },

    #[error("expression has more than {limit} tokens")]
    TooLong { limit: usize },

    #[error("division by zero")]
    DivisionByZero,

    #[error("math domain error in {op}")]
    Domain { op: &'static str },

    #[error("numeric overflow in {op}")]
    Overflow { op: &'static str },
}

/// Calibration points that cannot be fitted without guessing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegressionInputError {
    #[error("calibration point ({frequency}, {ratio}) is not finite")]
    NonFinite { frequency: f64, ratio: f64 },

    #[error("calibration frequency {frequency} is outside [0, 1]")]
    FrequencyOutOfRange { frequency: f64 },

    #[error("frequency {frequency} has conflicting ratios {first} and {second}")]
    ConflictingRatios {
        frequency: f64,
        first:     f64,
        second:    f64,
    },

    #[error("normal equations for degree {degree} are singular")]
    Singular { degree: usize },
}
