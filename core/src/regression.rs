//! Regression fitter: turns admin calibration points into a fee curve
//! `f(frequency) -> ratio`.
//!
//! Point count decides the curve shape:
//!   0       `max_fee_ratio * freq`
//!   1       proportional through the origin (constant when the point sits at freq 0)
//!   2       straight line through both points, extrapolated
//!   3+      least-squares polynomial of degree min(n - 1, 5)
//!
//! Every curve's output is clamped to `[0, max_fee_ratio]`.

use crate::{error::RegressionInputError, plan::CalibrationPoint};
use serde::{Deserialize, Serialize};

/// Highest polynomial degree ever fitted.
pub const MAX_DEGREE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveKind {
    /// No calibration: ratio scales linearly with frequency up to the ceiling.
    Identity,
    Proportional,
    Constant,
    Linear,
    Polynomial { degree: usize },
}

/// A fitted fee curve.
///
/// Coefficients are in ascending powers of `t = (freq - center) / scale`.
/// Polynomial fits map their frequency span onto `[-1, 1]`; every other
/// kind uses `center = 0, scale = 1`, i.e. plain powers of frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeCurve {
    kind:          CurveKind,
    coefficients:  Vec<f64>,
    center:        f64,
    scale:         f64,
    max_fee_ratio: f64,
}

impl FeeCurve {
    /// The 0-point curve.
    pub fn identity(max_fee_ratio: f64) -> Self {
        Self::in_frequency(CurveKind::Identity, vec![0.0, max_fee_ratio], max_fee_ratio)
    }

    fn in_frequency(kind: CurveKind, coefficients: Vec<f64>, max_fee_ratio: f64) -> Self {
        Self {
            kind,
            coefficients,
            center: 0.0,
            scale: 1.0,
            max_fee_ratio,
        }
    }

    pub fn kind(&self) -> CurveKind {
        self.kind
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Unclamped polynomial value (Horner).
    pub fn raw_at(&self, frequency: f64) -> f64 {
        let t = (frequency - self.center) / self.scale;
        self.coefficients.iter().rev().fold(0.0, |acc, c| acc * t + c)
    }

    /// Fee ratio at `frequency`, clamped to `[0, max_fee_ratio]`.
    pub fn ratio_at(&self, frequency: f64) -> f64 {
        let raw = self.raw_at(frequency);
        if raw.is_nan() {
            return 0.0;
        }
        raw.clamp(0.0, self.max_fee_ratio.max(0.0))
    }
}

/// Fit a curve, recovering from bad input by falling back to the identity curve.
pub fn fit_regression(points: &[CalibrationPoint], max_fee_ratio: f64) -> FeeCurve {
    match try_fit_regression(points, max_fee_ratio) {
        Ok(curve) => curve,
        Err(e) => {
            log::warn!("regression: {e}; falling back to identity curve");
            FeeCurve::identity(max_fee_ratio)
        }
    }
}

/// Fit a curve, reporting input that cannot be repaired unambiguously.
pub fn try_fit_regression(
    points: &[CalibrationPoint],
    max_fee_ratio: f64,
) -> Result<FeeCurve, RegressionInputError> {
    let points = sanitize_points(points, max_fee_ratio)?;

    let curve = match points.as_slice() {
        [] => FeeCurve::identity(max_fee_ratio),
        [p] if p.frequency > 0.0 => FeeCurve::in_frequency(
            CurveKind::Proportional,
            vec![0.0, p.ratio / p.frequency],
            max_fee_ratio,
        ),
        [p] => FeeCurve::in_frequency(CurveKind::Constant, vec![p.ratio], max_fee_ratio),
        [a, b] => {
            let slope = (b.ratio - a.ratio) / (b.frequency - a.frequency);
            FeeCurve::in_frequency(
                CurveKind::Linear,
                vec![a.ratio - slope * a.frequency, slope],
                max_fee_ratio,
            )
        }
        _ => {
            let degree = (points.len() - 1).min(MAX_DEGREE);
            // Points are sorted and distinct, so the span is positive.
            let lo = points[0].frequency;
            let hi = points[points.len() - 1].frequency;
            let center = (lo + hi) / 2.0;
            let scale = (hi - lo) / 2.0;
            let coefficients = least_squares(&points, degree, center, scale)?;
            FeeCurve {
                kind: CurveKind::Polynomial { degree },
                coefficients,
                center,
                scale,
                max_fee_ratio,
            }
        }
    };

    log::debug!(
        "regression: fitted {:?} through {} point(s), coefficients {:?}",
        curve.kind,
        points.len(),
        curve.coefficients
    );
    Ok(curve)
}

/// Clamp ratios into range, drop exact duplicates and sort by frequency.
fn sanitize_points(
    points: &[CalibrationPoint],
    max_fee_ratio: f64,
) -> Result<Vec<CalibrationPoint>, RegressionInputError> {
    let ceiling = max_fee_ratio.max(0.0);
    let mut cleaned: Vec<CalibrationPoint> = Vec::with_capacity(points.len());

    for p in points {
        if !p.frequency.is_finite() || !p.ratio.is_finite() {
            return Err(RegressionInputError::NonFinite {
                frequency: p.frequency,
                ratio:     p.ratio,
            });
        }
        if !(0.0..=1.0).contains(&p.frequency) {
            return Err(RegressionInputError::FrequencyOutOfRange { frequency: p.frequency });
        }
        let ratio = p.ratio.clamp(0.0, ceiling);
        match cleaned.iter().find(|q| q.frequency == p.frequency) {
            Some(q) if q.ratio == ratio => continue,
            Some(q) => {
                return Err(RegressionInputError::ConflictingRatios {
                    frequency: p.frequency,
                    first:     q.ratio,
                    second:    ratio,
                })
            }
            None => cleaned.push(CalibrationPoint { frequency: p.frequency, ratio }),
        }
    }

    cleaned.sort_by(|a, b| a.frequency.total_cmp(&b.frequency));
    Ok(cleaned)
}

/// Solve the normal equations `(VᵀV) c = Vᵀr` for a degree-`degree` fit
/// in the scaled variable `t = (freq - center) / scale`.
fn least_squares(
    points: &[CalibrationPoint],
    degree: usize,
    center: f64,
    scale: f64,
) -> Result<Vec<f64>, RegressionInputError> {
    let n = degree + 1;

    // power_sums[k] = Σ t^k for k in 0..=2*degree
    let mut power_sums = vec![0.0; 2 * degree + 1];
    let mut rhs = vec![0.0; n];
    for p in points {
        let t = (p.frequency - center) / scale;
        let mut pow = 1.0;
        for (k, sum) in power_sums.iter_mut().enumerate() {
            *sum += pow;
            if k < n {
                rhs[k] += pow * p.ratio;
            }
            pow *= t;
        }
    }

    let mut matrix: Vec<Vec<f64>> = (0..n)
        .map(|row| (0..n).map(|col| power_sums[row + col]).collect())
        .collect();

    solve(&mut matrix, &mut rhs).ok_or(RegressionInputError::Singular { degree })
}

/// Gaussian elimination with partial pivoting. Overwrites its inputs.
fn solve(matrix: &mut [Vec<f64>], rhs: &mut [f64]) -> Option<Vec<f64>> {
    const EPSILON: f64 = 1e-12;
    let n = rhs.len();

    for col in 0..n {
        let pivot = (col..n).max_by(|&a, &b| matrix[a][col].abs().total_cmp(&matrix[b][col].abs()))?;
        if matrix[pivot][col].abs() < EPSILON {
            return None;
        }
        matrix.swap(col, pivot);
        rhs.swap(col, pivot);

        for row in col + 1..n {
            let factor = matrix[row][col] / matrix[col][col];
            for k in col..n {
                matrix[row][k] -= factor * matrix[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut solution = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| matrix[row][k] * solution[k]).sum();
        solution[row] = (rhs[row] - tail) / matrix[row][row];
    }
    solution.iter().all(|c| c.is_finite()).then_some(solution)
}
