//! # Interpolation and quadrature helpers
//!
//! Small numerical toolbox shared by the calibration tables, the cosmology integrals and the
//! mass posterior:
//!
//! - [`CubicSpline`] – natural cubic spline through tabulated points (Q(θ), posterior resampling),
//! - [`linspace`] – evenly spaced grid including both end points,
//! - [`trapz`] – trapezoidal integral of sampled values,
//! - [`simpson`] – composite Simpson integral of a closure,
//! - [`interp_linear`] – piecewise linear interpolation with end-point clamping.
//!
//! Every constructor validates its input and reports a [`NemoError::MalformedTable`] instead of
//! panicking, since tables come from user-provided files.

use crate::nemo_errors::NemoError;

/// Natural cubic spline (zero second derivative at both ends).
///
/// Each segment `i` stores `[a, b, c, d]` so that
/// `S(x) = a + b·(x − xᵢ) + c·(x − xᵢ)² + d·(x − xᵢ)³`.
#[derive(Debug, Clone, PartialEq)]
pub struct CubicSpline {
    x: Vec<f64>,
    coeffs: Vec<[f64; 4]>,
    y_last: f64,
}

impl CubicSpline {
    /// Build a natural cubic spline through `(x, y)`.
    ///
    /// Arguments
    /// -----------------
    /// * `x` – abscissae, strictly increasing.
    /// * `y` – ordinates, same length as `x`.
    ///
    /// Return
    /// ----------
    /// * The spline, or [`NemoError::MalformedTable`] when fewer than two points are given,
    ///   the lengths differ, or `x` is not strictly increasing.
    ///
    /// Two points give a straight line.
    pub fn new(x: &[f64], y: &[f64]) -> Result<Self, NemoError> {
        if x.len() != y.len() {
            return Err(malformed(format!(
                "spline abscissae ({}) and ordinates ({}) differ in length",
                x.len(),
                y.len()
            )));
        }
        let n = x.len();
        if n < 2 {
            return Err(malformed("need at least 2 points for a spline".into()));
        }
        if x.windows(2)
            .any(|w| w[1].partial_cmp(&w[0]) != Some(std::cmp::Ordering::Greater))
        {
            return Err(malformed(
                "spline abscissae must be strictly increasing".into(),
            ));
        }

        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();

        let mut alpha = vec![0.0; n];
        for i in 1..n - 1 {
            alpha[i] = 3.0 / h[i] * (y[i + 1] - y[i]) - 3.0 / h[i - 1] * (y[i] - y[i - 1]);
        }

        // Thomas algorithm on the tridiagonal system for c
        let mut l = vec![1.0; n];
        let mut mu = vec![0.0; n];
        let mut z = vec![0.0; n];
        for i in 1..n - 1 {
            l[i] = 2.0 * (x[i + 1] - x[i - 1]) - h[i - 1] * mu[i - 1];
            mu[i] = h[i] / l[i];
            z[i] = (alpha[i] - h[i - 1] * z[i - 1]) / l[i];
        }

        let mut c = vec![0.0; n];
        let mut coeffs = vec![[0.0; 4]; n - 1];
        for j in (0..n - 1).rev() {
            c[j] = z[j] - mu[j] * c[j + 1];
            let b = (y[j + 1] - y[j]) / h[j] - h[j] * (c[j + 1] + 2.0 * c[j]) / 3.0;
            let d = (c[j + 1] - c[j]) / (3.0 * h[j]);
            coeffs[j] = [y[j], b, c[j], d];
        }

        Ok(CubicSpline {
            x: x.to_vec(),
            coeffs,
            y_last: y[n - 1],
        })
    }

    /// Lower and upper bound of the tabulated abscissae.
    pub fn domain(&self) -> (f64, f64) {
        (self.x[0], self.x[self.x.len() - 1])
    }

    /// Evaluate the spline at `x`.
    ///
    /// Outside the tabulated range the end segments are extrapolated; use
    /// [`CubicSpline::evaluate_clamped`] to hold the boundary values instead. NaN gives NaN.
    pub fn evaluate(&self, x: f64) -> f64 {
        if x.is_nan() {
            return f64::NAN;
        }
        let (lo, hi) = self.domain();
        if x == hi {
            return self.y_last;
        }
        let i = if x <= lo {
            0
        } else if x >= hi {
            self.coeffs.len() - 1
        } else {
            // partition_point returns the first knot > x, which is at least 1 here
            self.x.partition_point(|&k| k <= x).saturating_sub(1)
        };
        let [a, b, c, d] = self.coeffs[i];
        let dx = x - self.x[i];
        a + dx * (b + dx * (c + dx * d))
    }

    /// Evaluate with `x` clamped to the tabulated range.
    pub fn evaluate_clamped(&self, x: f64) -> f64 {
        let (lo, hi) = self.domain();
        self.evaluate(x.clamp(lo, hi))
    }
}

fn malformed(reason: String) -> NemoError {
    NemoError::MalformedTable {
        path: "<in-memory table>".into(),
        reason,
    }
}

/// `n` evenly spaced samples over `[start, stop]`, both ends included.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { stop } else { start + step * i as f64 })
                .collect()
        }
    }
}

/// Trapezoidal integral of `y` sampled at `x`.
///
/// Returns `0.0` when fewer than two samples are given.
pub fn trapz(y: &[f64], x: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| 0.5 * (xs[1] - xs[0]) * (ys[0] + ys[1]))
        .sum()
}

/// Composite Simpson integral of `f` over `[a, b]` with `n` intervals (rounded up to even).
pub fn simpson<F: Fn(f64) -> f64>(f: F, a: f64, b: f64, n: usize) -> f64 {
    let n = if n % 2 == 1 { n + 1 } else { n.max(2) };
    let h = (b - a) / n as f64;
    let inner: f64 = (1..n)
        .map(|i| {
            let w = if i % 2 == 1 { 4.0 } else { 2.0 };
            w * f(a + h * i as f64)
        })
        .sum();
    h / 3.0 * (f(a) + inner + f(b))
}

/// Piecewise linear interpolation of `(xp, fp)` at `x`, clamped to the end values.
///
/// `xp` must be increasing; an empty table yields NaN.
pub fn interp_linear(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let n = xp.len().min(fp.len());
    if n == 0 {
        return f64::NAN;
    }
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[n - 1] {
        return fp[n - 1];
    }
    let i = xp[..n].partition_point(|&k| k <= x) - 1;
    let t = (x - xp[i]) / (xp[i + 1] - xp[i]);
    fp[i] + t * (fp[i + 1] - fp[i])
}

#[cfg(test)]
mod interpolation_test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_spline_passes_through_knots() {
        let x = [0.0, 1.0, 2.0, 3.0, 4.5];
        let y = [1.0, 2.0, 0.5, -1.0, 3.0];
        let spline = CubicSpline::new(&x, &y).unwrap();
        for (xi, yi) in x.iter().zip(y.iter()) {
            assert_relative_eq!(spline.evaluate(*xi), *yi, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_spline_reproduces_line() {
        let x = linspace(0.0, 10.0, 11);
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v - 2.0).collect();
        let spline = CubicSpline::new(&x, &y).unwrap();
        assert_relative_eq!(spline.evaluate(2.5), 5.5, epsilon = 1e-12);
        assert_relative_eq!(spline.evaluate(7.25), 19.75, epsilon = 1e-12);
        // clamped evaluation holds the boundary value
        assert_relative_eq!(spline.evaluate_clamped(20.0), 28.0, epsilon = 1e-12);
        assert_relative_eq!(spline.evaluate_clamped(-5.0), -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_spline_nan_input() {
        let spline = CubicSpline::new(&[0.5, 5.0, 20.0], &[0.6, 0.9, 1.0]).unwrap();
        assert!(spline.evaluate(f64::NAN).is_nan());
        assert!(spline.evaluate_clamped(f64::NAN).is_nan());
    }

    #[test]
    fn test_spline_smooth_function() {
        let x = linspace(0.0, std::f64::consts::PI, 50);
        let y: Vec<f64> = x.iter().map(|v| v.sin()).collect();
        let spline = CubicSpline::new(&x, &y).unwrap();
        assert_relative_eq!(spline.evaluate(1.0), 1.0_f64.sin(), epsilon = 1e-4);
    }

    #[test]
    fn test_spline_rejects_bad_input() {
        assert!(CubicSpline::new(&[0.0], &[1.0]).is_err());
        assert!(CubicSpline::new(&[0.0, 1.0], &[1.0]).is_err());
        assert!(CubicSpline::new(&[0.0, 0.0, 1.0], &[1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn test_linspace() {
        let g = linspace(13.0, 16.0, 300);
        assert_eq!(g.len(), 300);
        assert_eq!(g[0], 13.0);
        assert_eq!(g[299], 16.0);
        assert!(linspace(0.0, 1.0, 0).is_empty());
        assert_eq!(linspace(2.0, 5.0, 1), vec![2.0]);
    }

    #[test]
    fn test_trapz_and_simpson() {
        let x = linspace(0.0, 1.0, 1001);
        let y: Vec<f64> = x.iter().map(|v| v * v).collect();
        assert_relative_eq!(trapz(&y, &x), 1.0 / 3.0, epsilon = 1e-6);
        assert_relative_eq!(simpson(|v| v * v, 0.0, 1.0, 10), 1.0 / 3.0, epsilon = 1e-14);
        assert_eq!(trapz(&[1.0], &[0.0]), 0.0);
    }

    #[test]
    fn test_interp_linear() {
        let xp = [0.0, 1.0, 2.0];
        let fp = [0.0, 10.0, 30.0];
        assert_relative_eq!(interp_linear(0.5, &xp, &fp), 5.0);
        assert_relative_eq!(interp_linear(1.5, &xp, &fp), 20.0);
        assert_eq!(interp_linear(-1.0, &xp, &fp), 0.0);
        assert_eq!(interp_linear(3.0, &xp, &fp), 30.0);
        assert!(interp_linear(1.0, &[], &[]).is_nan());
    }
}
