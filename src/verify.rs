//! Host reference oracle for the matrix workload.
//!
//! The reference product is a plain serial triple loop accumulating in f64,
//! sharing no code with the device kernels it checks.

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};

/// Dense row-major f32 matrix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            for j in 0..cols {
                data.push(f(i, j));
            }
        }
        Self { rows, cols, data }
    }

    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        let len = rows.checked_mul(cols).ok_or_else(|| {
            BenchError::ShapeMismatch(format!("{rows}x{cols} matrix is too large"))
        })?;
        if data.len() != len {
            return Err(BenchError::ShapeMismatch(format!(
                "{rows}x{cols} matrix needs {len} elements, got {}",
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Wrap row-major `data` the caller already sized as `rows * cols`.
    pub(crate) fn from_row_major(rows: usize, cols: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), rows * cols);
        Self { rows, cols, data }
    }

    pub fn identity(n: usize) -> Self {
        Self::scaled_identity(n, 1.0)
    }

    pub fn scaled_identity(n: usize, scale: f32) -> Self {
        Self::from_fn(n, n, |i, j| if i == j { scale } else { 0.0 })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.data[i * self.cols + j]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }
}

/// `a × b` in f64, row-major.
pub fn reference_matmul(a: &Matrix, b: &Matrix) -> Result<Vec<f64>> {
    if a.cols != b.rows {
        return Err(BenchError::ShapeMismatch(format!(
            "cannot multiply {}x{} by {}x{}",
            a.rows, a.cols, b.rows, b.cols
        )));
    }
    let (n, m, p) = (a.rows, a.cols, b.cols);
    let mut out = vec![0.0f64; n * p];
    for i in 0..n {
        for k in 0..m {
            let aik = a.data[i * m + k] as f64;
            for j in 0..p {
                out[i * p + j] += aik * b.data[k * p + j] as f64;
            }
        }
    }
    Ok(out)
}

/// Largest elementwise deviation; a NaN anywhere counts as infinite.
pub fn max_abs_error(actual: &[f32], expected: &[f64]) -> f64 {
    actual
        .iter()
        .zip(expected)
        .map(|(&x, &y)| {
            let d = (x as f64 - y).abs();
            if d.is_nan() {
                f64::INFINITY
            } else {
                d
            }
        })
        .fold(0.0, f64::max)
}

/// JSON has no infinity or NaN, so non-finite values travel as strings.
mod non_finite {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_nan() {
            s.serialize_str("nan")
        } else if v.is_infinite() {
            s.serialize_str(if *v > 0.0 { "inf" } else { "-inf" })
        } else {
            s.serialize_f64(*v)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Number(v) => Ok(v),
            Repr::Text(t) => match t.as_str() {
                "nan" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(serde::de::Error::custom(format!(
                    "expected a number, \"inf\", \"-inf\" or \"nan\", got \"{other}\""
                ))),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    #[serde(with = "non_finite")]
    pub max_abs_error: f64,
    pub tolerance: f64,
    pub passed: bool,
}

/// Verification outcome recorded on a report.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verification {
    /// The workload has no independent oracle.
    NotApplicable,
    Checked(VerificationResult),
}

impl Verification {
    pub fn result(&self) -> Option<&VerificationResult> {
        match self {
            Verification::NotApplicable => None,
            Verification::Checked(r) => Some(r),
        }
    }

    pub fn passed(&self) -> Option<bool> {
        self.result().map(|r| r.passed)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ReferenceVerifier {
    tolerance: f64,
}

impl ReferenceVerifier {
    pub fn new(tolerance: f64) -> Result<Self> {
        if tolerance.is_nan() || tolerance < 0.0 {
            return Err(BenchError::InvalidConfig(format!(
                "tolerance must be >= 0, got {tolerance}"
            )));
        }
        Ok(Self { tolerance })
    }

    /// Compare `accelerated` with the host product of `inputs`.
    pub fn verify(&self, accelerated: &Matrix, inputs: (&Matrix, &Matrix)) -> Result<VerificationResult> {
        let (a, b) = inputs;
        let reference = reference_matmul(a, b)?;
        if accelerated.rows != a.rows || accelerated.cols != b.cols {
            return Err(BenchError::ShapeMismatch(format!(
                "output is {}x{}, expected {}x{}",
                accelerated.rows, accelerated.cols, a.rows, b.cols
            )));
        }
        let max_abs_error = max_abs_error(&accelerated.data, &reference);
        Ok(VerificationResult {
            max_abs_error,
            tolerance: self.tolerance,
            passed: max_abs_error <= self.tolerance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_product_is_exact() {
        let i4 = Matrix::identity(4);
        for tol in [0.0, 1e-6, 1.0] {
            let r = ReferenceVerifier::new(tol).unwrap().verify(&i4, (&i4, &i4)).unwrap();
            assert_eq!(r.max_abs_error, 0.0);
            assert!(r.passed);
        }
    }

    #[test]
    fn row_index_pattern_matches_closed_form() {
        let n = 4;
        let a = Matrix::from_fn(n, n, |i, j| (i + j) as f32);
        let b = Matrix::from_fn(n, n, |_, _| 1.0);
        let product = reference_matmul(&a, &b).unwrap();
        for i in 0..n {
            // sum_k (i + k) = n*i + n(n-1)/2
            let expected = (n * i + n * (n - 1) / 2) as f64;
            for j in 0..n {
                assert!((product[i * n + j] - expected).abs() <= 1e-3);
            }
        }
    }

    #[test]
    fn deviation_above_tolerance_fails() {
        let i2 = Matrix::identity(2);
        let off = Matrix::from_vec(2, 2, vec![1.0, 0.0, 0.5, 1.0]).unwrap();
        let r = ReferenceVerifier::new(0.1).unwrap().verify(&off, (&i2, &i2)).unwrap();
        assert!((r.max_abs_error - 0.5).abs() < 1e-12);
        assert!(!r.passed);
    }

    #[test]
    fn nan_output_never_passes() {
        let i2 = Matrix::identity(2);
        let bad = Matrix::from_vec(2, 2, vec![f32::NAN, 0.0, 0.0, 1.0]).unwrap();
        let r = ReferenceVerifier::new(1e9).unwrap().verify(&bad, (&i2, &i2)).unwrap();
        assert!(r.max_abs_error.is_infinite());
        assert!(!r.passed);
    }

    #[test]
    fn shape_errors_are_reported() {
        let a = Matrix::zeros(2, 3);
        let b = Matrix::zeros(2, 3);
        assert!(matches!(reference_matmul(&a, &b), Err(BenchError::ShapeMismatch(_))));

        let i2 = Matrix::identity(2);
        let wrong = Matrix::zeros(3, 3);
        let v = ReferenceVerifier::new(1e-3).unwrap();
        assert!(matches!(v.verify(&wrong, (&i2, &i2)), Err(BenchError::ShapeMismatch(_))));
        assert!(Matrix::from_vec(2, 2, vec![0.0; 3]).is_err());
    }

    #[test]
    fn negative_or_nan_tolerance_is_rejected() {
        assert!(ReferenceVerifier::new(-1e-3).is_err());
        assert!(ReferenceVerifier::new(f64::NAN).is_err());
    }

    #[test]
    fn non_finite_error_survives_json() {
        for (err, text) in [(f64::INFINITY, "inf"), (f64::NAN, "nan")] {
            let checked = Verification::Checked(VerificationResult {
                max_abs_error: err,
                tolerance: 1e-3,
                passed: false,
            });
            let json = serde_json::to_value(checked).unwrap();
            assert_eq!(json["max_abs_error"], text);

            let back: Verification = serde_json::from_value(json).unwrap();
            let r = back.result().copied().unwrap();
            assert_eq!(r.max_abs_error.is_nan(), err.is_nan());
            assert_eq!(r.max_abs_error.is_infinite(), err.is_infinite());
        }
        let bogus = serde_json::json!({
            "status": "checked", "max_abs_error": "huge", "tolerance": 0.0, "passed": false
        });
        assert!(serde_json::from_value::<Verification>(bogus).is_err());
    }

    #[test]
    fn oversized_shape_is_an_error() {
        assert!(matches!(
            Matrix::from_vec(usize::MAX, 2, Vec::new()),
            Err(BenchError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn not_applicable_serializes_with_status_tag() {
        let json = serde_json::to_value(Verification::NotApplicable).unwrap();
        assert_eq!(json, serde_json::json!({"status": "not_applicable"}));

        let checked = Verification::Checked(VerificationResult {
            max_abs_error: 0.0,
            tolerance: 1e-3,
            passed: true,
        });
        let json = serde_json::to_value(checked).unwrap();
        assert_eq!(json["status"], "checked");
        assert_eq!(json["passed"], true);
    }
}
