//! Formula evaluator tests.
//!
//! Tests cover: acceptance of the whitelisted grammar, rejection of every
//! construct outside it, dry-run validation against the sample inputs,
//! and the silent zero-fee fallback when a saved formula is broken.

use feebook_core::{
    compute_fee,
    config::EngineConfig,
    engine::FeeEngine,
    formula::{evaluate_formula, Formula},
    plan::{FeePlan, FeeSchedule},
    validate_formula, FormulaError,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn samples() -> Vec<feebook_core::config::FormulaSample> {
    EngineConfig::default_test().validation_samples
}

fn formula_plan(expression: &str) -> FeePlan {
    let mut plan = FeePlan::default_for(1, &EngineConfig::default_test());
    plan.schedule = FeeSchedule::Formula {
        expression: expression.to_string(),
    };
    plan
}

#[test]
fn whitelisted_formulas_validate() {
    let formulas = [
        "x*y+0.05",
        "0.0001",
        "min(0.05, 0.001 * x)",
        "max(0, 0.02 - y / 100)",
        "abs(-x) * 0.0001",
        "sqrt(x) / 1000",
        "log(x + 1) / 100",
        "log(x + 1, 10) / 100",
        "exp(-y) * 0.01",
        "pow(y, 2) * 0.05",
        "y ** 2 * 0.05",
        "x % 7 / 1000",
        "-(y - 1) * 0.01",
        "floor(x / 100) * 0.001 + ceil(y) * 0.001 + round(0.5)",
        "  ( x )  *  ( y )  ",
    ];
    for f in formulas {
        let result = validate_formula(f, &samples());
        assert!(result.valid, "'{f}' should validate, got {:?}", result.reason);
        assert_eq!(result.reason, None);
    }
}

#[test]
fn disallowed_constructs_fail_with_reason() {
    let cases = [
        ("x.real", "'.'"),
        ("[x for x in y]", "'['"),
        ("__import__('os')", "'_'"),
        ("x[0]", "'['"),
        ("x = 1", "'='"),
        ("x; y", "';'"),
        ("lambda", "lambda"),
        ("eval(x)", "eval"),
        ("open(x)", "open"),
        ("sqrt", "sqrt"),
        ("x(1)", "'x'"),
        ("'text'", "'''"),
    ];
    for (f, needle) in cases {
        let result = validate_formula(f, &samples());
        assert!(!result.valid, "'{f}' should be rejected");
        let reason = result.reason.expect("rejection carries a reason");
        assert!(
            reason.contains(needle),
            "reason for '{f}' should mention {needle}; got: {reason}"
        );
    }
}

#[test]
fn undefined_variable_is_named_in_reason() {
    let result = validate_formula("x * z", &samples());
    assert!(!result.valid);
    let reason = result.reason.unwrap();
    assert!(reason.contains("'z'"), "got: {reason}");
}

#[test]
fn malformed_syntax_is_rejected() {
    assert_eq!(Formula::parse(""), Err(FormulaError::Empty));
    assert_eq!(Formula::parse("   "), Err(FormulaError::Empty));
    assert!(matches!(Formula::parse("1 +"), Err(FormulaError::UnexpectedToken { .. })));
    assert!(matches!(Formula::parse("(x"), Err(FormulaError::UnexpectedToken { .. })));
    assert!(matches!(Formula::parse("x y"), Err(FormulaError::UnexpectedToken { .. })));
    assert!(matches!(Formula::parse("min(x,)"), Err(FormulaError::UnexpectedToken { .. })));
    assert!(matches!(Formula::parse("1.2.3"), Err(FormulaError::MalformedNumber { .. })));
    assert!(matches!(Formula::parse("x ** * 2"), Err(FormulaError::UnexpectedToken { .. })));
}

/// The dry-run evaluates the formula, so runtime faults at the sample
/// points fail validation too.
#[test]
fn sample_evaluation_faults_fail_validation() {
    let result = validate_formula("0.01 / y", &samples());
    assert!(!result.valid);
    assert!(result.reason.unwrap().contains("division by zero"));

    let result = validate_formula("log(x)", &samples());
    assert!(!result.valid);
    assert!(result.reason.unwrap().contains("domain"));
}

#[test]
fn evaluation_binds_both_variables() {
    let value = evaluate_formula("x * y + 0.5", 4.0, 0.25).unwrap();
    assert_eq!(value, 1.5);
}

/// A broken formula never blocks a payment: the fee is simply 0.
#[test]
fn broken_formula_yields_zero_fee_silently() {
    let plan = formula_plan("x * z");
    let quote = compute_fee(dec!(100.00), &plan, &[dec!(50.00)]);
    assert_eq!(quote.fee, Decimal::ZERO);
    assert_eq!(quote.ratio, Decimal::ZERO);
    assert!(quote.fallback_reason.unwrap().contains("'z'"));

    let plan = formula_plan("1 / (y - 1)");
    // One historical payment in the single global bucket -> y = 1.
    let quote = compute_fee(dec!(100.00), &plan, &[dec!(10.00)]);
    assert_eq!(quote.frequency, 1.0);
    assert_eq!(quote.fee, Decimal::ZERO);
    assert!(quote.fallback_reason.is_some());
}

/// The engine's dry run neither reads nor writes the user's plan.
#[test]
fn validation_does_not_depend_on_plan_state() {
    let engine = FeeEngine::build_test().unwrap();
    let mut plan = FeePlan::default_for(1, engine.config());
    plan.schedule = FeeSchedule::Formula {
        expression: "0.01".to_string(),
    };
    engine.save_fee_plan(plan).unwrap();
    let plan_before = engine.fee_plan(1).unwrap();
    let events_before = event_ids(&engine);

    let valid = engine.validate_formula("x * y");
    assert!(valid.valid, "{valid:?}");
    let invalid = engine.validate_formula("x * z");
    assert!(!invalid.valid);
    assert_eq!(engine.validate_formula("x * y"), valid);

    assert_eq!(engine.fee_plan(1).unwrap(), plan_before);
    assert_eq!(event_ids(&engine), events_before);
}

fn event_ids(engine: &FeeEngine) -> Vec<Option<i64>> {
    engine.events_for_user(1).unwrap().into_iter().map(|e| e.id).collect()
}
