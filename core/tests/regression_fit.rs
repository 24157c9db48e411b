//! Regression fitter tests.
//!
//! Tests cover: the exact behavior at 0, 1, 2 and 3+ calibration points,
//! the degree cap, output clamping, and recovery from malformed point sets.

use feebook_core::{
    fit_regression,
    regression::{try_fit_regression, CurveKind, MAX_DEGREE},
    CalibrationPoint, RegressionInputError,
};

const TOL: f64 = 1e-9;

fn pt(frequency: f64, ratio: f64) -> CalibrationPoint {
    CalibrationPoint { frequency, ratio }
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < TOL,
        "expected {expected}, got {actual}"
    );
}

/// No points: ratio scales linearly with frequency up to the ceiling.
#[test]
fn zero_points_is_identity_curve() {
    let curve = fit_regression(&[], 0.05);
    assert_eq!(curve.kind(), CurveKind::Identity);
    assert_close(curve.ratio_at(0.5), 0.025);
    assert_close(curve.ratio_at(0.0), 0.0);
    assert_close(curve.ratio_at(1.0), 0.05);
}

/// One point: proportional through the origin, so doubling the
/// frequency doubles the ratio.
#[test]
fn one_point_is_proportional_through_origin() {
    let curve = fit_regression(&[pt(0.2, 0.01)], 0.05);
    assert_eq!(curve.kind(), CurveKind::Proportional);
    assert_close(curve.ratio_at(0.2), 0.01);
    assert_close(curve.ratio_at(0.4), 0.02);
    assert_close(curve.ratio_at(0.0), 0.0);
}

#[test]
fn one_point_at_zero_frequency_is_constant() {
    let curve = fit_regression(&[pt(0.0, 0.03)], 0.05);
    assert_eq!(curve.kind(), CurveKind::Constant);
    assert_close(curve.ratio_at(0.0), 0.03);
    assert_close(curve.ratio_at(0.7), 0.03);
}

#[test]
fn two_points_interpolate_linearly() {
    let curve = fit_regression(&[pt(0.0, 0.0), pt(1.0, 0.05)], 0.05);
    assert_eq!(curve.kind(), CurveKind::Linear);
    assert_close(curve.ratio_at(0.5), 0.025);
    assert_close(curve.ratio_at(0.25), 0.0125);
}

/// Two points extrapolate past the segment ends (before the final clamp).
#[test]
fn two_points_extrapolate_then_clamp() {
    let curve = fit_regression(&[pt(0.2, 0.01), pt(0.4, 0.02)], 0.05);
    assert_close(curve.ratio_at(0.8), 0.04);
    assert_close(curve.raw_at(0.0), 0.0);

    let steep = fit_regression(&[pt(0.0, 0.0), pt(0.5, 0.05)], 0.05);
    assert_close(steep.raw_at(1.0), 0.1);
    assert_close(steep.ratio_at(1.0), 0.05);

    let falling = fit_regression(&[pt(0.5, 0.0), pt(1.0, 0.05)], 0.05);
    assert_close(falling.raw_at(0.0), -0.05);
    assert_close(falling.ratio_at(0.0), 0.0);
}

/// Input order does not matter; points are sorted by frequency first.
#[test]
fn two_points_order_independent() {
    let a = fit_regression(&[pt(0.0, 0.0), pt(1.0, 0.05)], 0.05);
    let b = fit_regression(&[pt(1.0, 0.05), pt(0.0, 0.0)], 0.05);
    assert_close(a.ratio_at(0.3), b.ratio_at(0.3));
}

#[test]
fn three_points_fit_exact_quadratic() {
    let points = [pt(1.0, 0.04), pt(0.0, 0.01), pt(0.5, 0.02)];
    let curve = fit_regression(&points, 0.05);
    assert_eq!(curve.kind(), CurveKind::Polynomial { degree: 2 });
    for p in &points {
        assert_close(curve.ratio_at(p.frequency), p.ratio);
    }
    // 0.01 + 0.01 f + 0.02 f^2
    assert_close(curve.ratio_at(0.25), 0.01375);
}

#[test]
fn degree_is_capped_at_five() {
    let points: Vec<_> = (0..10)
        .map(|i| {
            let f = i as f64 / 9.0;
            pt(f, 0.01 + 0.03 * f)
        })
        .collect();
    let curve = fit_regression(&points, 0.05);
    assert_eq!(curve.kind(), CurveKind::Polynomial { degree: MAX_DEGREE });
    assert_eq!(curve.coefficients().len(), MAX_DEGREE + 1);
    // Least squares reproduces data that is already a line.
    assert_close(curve.ratio_at(0.33), 0.01 + 0.03 * 0.33);
}

/// Closely clustered frequencies still fit; the fit works in a scaled variable.
#[test]
fn clustered_points_still_fit() {
    let points = [
        pt(0.10, 0.010),
        pt(0.11, 0.012),
        pt(0.12, 0.013),
        pt(0.13, 0.015),
        pt(0.14, 0.016),
        pt(0.15, 0.018),
    ];
    let curve = try_fit_regression(&points, 0.05).expect("well-posed fit");
    assert_eq!(curve.kind(), CurveKind::Polynomial { degree: 5 });
    for p in &points {
        assert!((curve.ratio_at(p.frequency) - p.ratio).abs() < 1e-7);
    }
}

#[test]
fn output_never_leaves_ratio_range() {
    // Degree-5 interpolation through a zig-zag rings between the points.
    let points = [
        pt(0.0, 0.0),
        pt(0.2, 0.05),
        pt(0.4, 0.0),
        pt(0.6, 0.05),
        pt(0.8, 0.0),
        pt(1.0, 0.05),
    ];
    let curve = fit_regression(&points, 0.05);
    for i in 0..=100 {
        let r = curve.ratio_at(i as f64 / 100.0);
        assert!((0.0..=0.05).contains(&r), "ratio {r} escaped [0, 0.05]");
    }
}

#[test]
fn ratios_above_ceiling_are_clamped_before_fitting() {
    let curve = fit_regression(&[pt(0.0, 0.0), pt(1.0, 0.5)], 0.05);
    assert_close(curve.ratio_at(1.0), 0.05);
    assert_close(curve.ratio_at(0.5), 0.025);
}

#[test]
fn exact_duplicates_are_merged() {
    let curve = fit_regression(&[pt(0.2, 0.01), pt(0.2, 0.01)], 0.05);
    assert_eq!(curve.kind(), CurveKind::Proportional);
}

/// Same frequency, different ratios: ambiguous, so the identity curve is used.
#[test]
fn conflicting_duplicates_fall_back_to_identity() {
    let points = [pt(0.5, 0.01), pt(0.5, 0.02)];
    assert!(matches!(
        try_fit_regression(&points, 0.05),
        Err(RegressionInputError::ConflictingRatios { .. })
    ));
    let curve = fit_regression(&points, 0.05);
    assert_eq!(curve.kind(), CurveKind::Identity);
    assert_close(curve.ratio_at(0.5), 0.025);
}

#[test]
fn out_of_range_or_non_finite_points_fall_back_to_identity() {
    assert!(matches!(
        try_fit_regression(&[pt(1.5, 0.01)], 0.05),
        Err(RegressionInputError::FrequencyOutOfRange { .. })
    ));
    assert!(matches!(
        try_fit_regression(&[pt(f64::NAN, 0.01)], 0.05),
        Err(RegressionInputError::NonFinite { .. })
    ));
    assert_eq!(fit_regression(&[pt(-0.1, 0.01)], 0.05).kind(), CurveKind::Identity);
}
