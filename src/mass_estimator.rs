//! # SZ mass estimation
//!
//! Converts a cluster's central Compton parameter `y0` and redshift into a mass under the
//! scaling relation
//!
//! ```text
//! y0 = tenToA0 · E(z)^Ez_gamma · (1+z)^onePlusRedshift_power · (M500/Mpivot)^(1+B0) · Q(θ500) · fRel
//! ```
//!
//! where `Q(θ500)` is the tile's filter-mismatch function and `fRel` the relativistic correction.
//! Because θ500 depends on M500, the relation is evaluated on a mass grid
//! (`log10 M500 ∈ [13, 16]`, 300 points) with θ500 derived from each grid mass, which makes the
//! Q/θ/M self-consistency exact on the grid.
//!
//! Posterior
//! -----------------
//! * `ln P(y0 | M, z) = −(ln y0 − ln y0_pred)² / (2 (σ_lny² + σ_int²))`, with
//!   `σ_lny = ln(y0 + σ_y0) − ln y0`; a non-positive prediction has zero likelihood.
//! * With a redshift error `zErr > 0` the likelihood is summed over a Gaussian `P(z)` on
//!   `z ∈ [0, 2]` (401 points).
//! * The **Uncorr** estimate uses `P(y0 | M)` alone; the debiased estimate multiplies it by the
//!   mass-function prior `P(log10 M | z)` ([`MassFunction::p_log10m`]).
//!
//! Point estimate
//! -----------------
//! The posterior is resampled with a cubic spline on 10 000 points and normalised; its mode is
//! the estimate. A symmetric index window around the mode is grown until it encloses at least
//! 68.27% of the probability; the window edges give the asymmetric errors. A window running off
//! the grid is a [`NemoError::PosteriorOutOfRange`].
//!
//! All reported masses are in units of 1e14 MSun.
use std::f64::consts::PI;
use std::fmt;

use crate::calibration::QFunction;
use crate::constants::{
    ArcMin, MSun, Redshift, ARCMIN_PER_DEG, MASS_UNIT_MSUN, ONE_SIGMA_PROBABILITY,
};
use crate::cosmology::Cosmology;
use crate::interpolation::{linspace, trapz, CubicSpline};
use crate::mass_function::MassFunction;
use crate::nemo_errors::NemoError;
use crate::options::MassOptions;
use crate::relativistic::weighted_frel;

pub const LOG10M_MIN: f64 = 13.0;
pub const LOG10M_MAX: f64 = 16.0;
pub const N_MASS_GRID: usize = 300;
pub const N_FINE_GRID: usize = 10_000;
pub const PHOTO_Z_MAX: f64 = 2.0;
pub const N_PHOTO_Z: usize = 401;

/// Mass with asymmetric 1σ errors, in units of 1e14 MSun.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MassEstimate {
    pub mass: f64,
    pub err_plus: f64,
    pub err_minus: f64,
}

impl MassEstimate {
    pub fn new(mass: f64, err_plus: f64, err_minus: f64) -> Self {
        MassEstimate {
            mass,
            err_plus,
            err_minus,
        }
    }

    /// `mass / factor`, with the fractional errors of the mass and of the factor added in
    /// quadrature.
    pub fn recalibrated(&self, factor: f64, factor_err: f64) -> MassEstimate {
        let mass = self.mass / factor;
        let frac_f = factor_err / factor;
        let combine = |err: f64| {
            let frac = if self.mass > 0.0 { err / self.mass } else { 0.0 };
            mass * (frac * frac + frac_f * frac_f).sqrt()
        };
        MassEstimate {
            mass,
            err_plus: combine(self.err_plus),
            err_minus: combine(self.err_minus),
        }
    }
}

impl fmt::Display for MassEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.3} (+{:.3} / -{:.3}) x 1e14 MSun",
            self.mass, self.err_plus, self.err_minus
        )
    }
}

/// Mass estimation outcome for one cluster (M500c).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassResult {
    /// Mass-function debiased estimate (`None` when debiasing is off).
    pub debiased: Option<MassEstimate>,
    /// Estimate without the mass-function prior.
    pub uncorr: MassEstimate,
    /// Q at the reported estimate.
    pub q: f64,
}

impl MassResult {
    /// The debiased estimate when available, otherwise the uncorrected one.
    pub fn best(&self) -> MassEstimate {
        self.debiased.unwrap_or(self.uncorr)
    }
}

/// Measured signal of one cluster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalInput {
    /// Central Compton parameter (dimensionless, not scaled by 1e-4).
    pub y0: f64,
    pub y0_err: f64,
    pub z: Redshift,
    pub z_err: f64,
}

/// Background quantities needed per redshift.
#[derive(Debug, Clone, Copy)]
struct RedshiftTerms {
    z: Redshift,
    e_z: f64,
    d_a: f64,
    rho_crit: f64,
    evolution: f64,
}

/// Scaling-relation evaluator and posterior machinery for one run.
pub struct MassEstimator<'a> {
    opts: &'a MassOptions,
    cosmo: Cosmology,
    mass_function: &'a dyn MassFunction,
    log10m: Vec<f64>,
}

impl<'a> MassEstimator<'a> {
    pub fn new(opts: &'a MassOptions, mass_function: &'a dyn MassFunction) -> Self {
        MassEstimator {
            opts,
            cosmo: opts.cosmology(),
            mass_function,
            log10m: linspace(LOG10M_MIN, LOG10M_MAX, N_MASS_GRID),
        }
    }

    pub fn cosmology(&self) -> &Cosmology {
        &self.cosmo
    }

    /// The log10 M500 grid (MSun).
    pub fn mass_grid(&self) -> &[f64] {
        &self.log10m
    }

    fn redshift_terms(&self, z: Redshift) -> RedshiftTerms {
        let e_z = self.cosmo.e_z(z);
        RedshiftTerms {
            z,
            e_z,
            d_a: self.cosmo.angular_diameter_distance(z),
            rho_crit: self.cosmo.critical_density(z),
            evolution: self.opts.ten_to_a0
                * e_z.powf(self.opts.ez_gamma)
                * (1.0 + z).powf(self.opts.one_plus_redshift_power),
        }
    }

    fn theta500(m500: MSun, terms: &RedshiftTerms) -> ArcMin {
        let r500 = (3.0 * m500 / (4.0 * PI * 500.0 * terms.rho_crit)).cbrt();
        (r500 / terms.d_a).atan().to_degrees() * ARCMIN_PER_DEG
    }

    fn predict(
        &self,
        m500: MSun,
        terms: &RedshiftTerms,
        q_fn: &QFunction,
        weights: &[(f64, f64)],
    ) -> (f64, ArcMin, f64) {
        let theta = Self::theta500(m500, terms);
        let q = q_fn.evaluate(theta);
        let f_rel = if self.opts.relativistic_correction {
            weighted_frel(terms.z, m500, weights, &self.cosmo)
        } else {
            1.0
        };
        let y0 = terms.evolution * (m500 / self.opts.m_pivot).powf(1.0 + self.opts.b0) * q * f_rel;
        (y0, theta, q)
    }

    /// θ500 (arcmin) of a cluster of mass `m500` (MSun) at `z`.
    pub fn theta500_arcmin(&self, m500: MSun, z: Redshift) -> ArcMin {
        Self::theta500(m500, &self.redshift_terms(z))
    }

    /// Predicted `(y0, θ500, Q)` for `log10 M500` at `z`.
    pub fn y0_from_log10m(
        &self,
        log10m: f64,
        z: Redshift,
        q_fn: &QFunction,
        weights: &[(f64, f64)],
    ) -> (f64, ArcMin, f64) {
        self.predict(10f64.powf(log10m), &self.redshift_terms(z), q_fn, weights)
    }

    /// Normalised `P(y0 | log10 M)` on the mass grid, marginalised over `P(z)`.
    pub fn likelihood(
        &self,
        signal: &SignalInput,
        q_fn: &QFunction,
        weights: &[(f64, f64)],
    ) -> Result<Vec<f64>, NemoError> {
        let (z_grid, pz): (Vec<f64>, Vec<f64>) = if signal.z_err > 0.0 {
            let zs = linspace(0.0, PHOTO_Z_MAX, N_PHOTO_Z);
            let raw: Vec<f64> = zs
                .iter()
                .map(|zi| (-(signal.z - zi).powi(2) / (2.0 * signal.z_err.powi(2))).exp())
                .collect();
            let norm = trapz(&raw, &zs);
            (zs, raw.into_iter().map(|p| p / norm).collect())
        } else {
            (vec![signal.z], vec![1.0])
        };
        let terms: Vec<RedshiftTerms> = z_grid.iter().map(|&z| self.redshift_terms(z)).collect();

        let ln_y0 = signal.y0.ln();
        let sigma_ln_y0 = (signal.y0 + signal.y0_err).ln() - ln_y0;
        let variance = sigma_ln_y0.powi(2) + self.opts.sigma_int.powi(2);

        let p: Vec<f64> = self
            .log10m
            .iter()
            .map(|&lm| {
                let m = 10f64.powf(lm);
                terms
                    .iter()
                    .zip(pz.iter())
                    .map(|(t, &w)| {
                        let (y0_pred, _, _) = self.predict(m, t, q_fn, weights);
                        if y0_pred > 0.0 {
                            let d = ln_y0 - y0_pred.ln();
                            w * (-d * d / (2.0 * variance)).exp()
                        } else {
                            0.0
                        }
                    })
                    .sum()
            })
            .collect();

        let norm = trapz(&p, &self.log10m);
        if !(norm > 0.0 && norm.is_finite()) {
            return Err(NemoError::DegeneratePosterior {
                y0: signal.y0,
                z: signal.z,
            });
        }
        Ok(p.into_iter().map(|v| v / norm).collect())
    }

    /// Estimate M500 with and (optionally) without mass-function debiasing.
    ///
    /// Arguments
    /// -----------------
    /// * `signal` – y0, its error, redshift and redshift error; must be valid (`y0 > 0`, finite z).
    /// * `q_fn` – Q function of the cluster's tile.
    /// * `weights` – relativistic frequency weights of the cluster's tile.
    /// * `debias` – apply the mass-function prior.
    ///
    /// Return
    /// ----------
    /// * A [`MassResult`] with masses in 1e14 MSun and Q evaluated at the reported estimate.
    pub fn estimate(
        &self,
        signal: &SignalInput,
        q_fn: &QFunction,
        weights: &[(f64, f64)],
        debias: bool,
    ) -> Result<MassResult, NemoError> {
        let p_y0 = self.likelihood(signal, q_fn, weights)?;
        let out_of_range = || NemoError::PosteriorOutOfRange {
            y0: signal.y0,
            z: signal.z,
        };

        let uncorr = mass_from_posterior(&p_y0, &self.log10m).ok_or_else(out_of_range)?;

        let debiased = if debias {
            let prior = self.mass_function.p_log10m(signal.z, &self.log10m);
            let posterior: Vec<f64> = p_y0.iter().zip(&prior).map(|(a, b)| a * b).collect();
            if !posterior.iter().any(|&v| v > 0.0) {
                return Err(NemoError::DegeneratePosterior {
                    y0: signal.y0,
                    z: signal.z,
                });
            }
            Some(mass_from_posterior(&posterior, &self.log10m).ok_or_else(out_of_range)?)
        } else {
            None
        };

        let reported = debiased.unwrap_or(uncorr);
        let m500 = reported.mass * MASS_UNIT_MSUN;
        let terms = self.redshift_terms(signal.z);
        let q = q_fn.evaluate(Self::theta500(m500, &terms));

        Ok(MassResult {
            debiased,
            uncorr,
            q,
        })
    }
}

/// Mode and 68.27% window of a posterior sampled on `log10m`.
///
/// Return
/// ----------
/// * The estimate in 1e14 MSun, or `None` when the window runs off the grid or the posterior
///   cannot be normalised.
pub fn mass_from_posterior(p: &[f64], log10m: &[f64]) -> Option<MassEstimate> {
    let spline = CubicSpline::new(log10m, p).ok()?;
    let (lo, hi) = spline.domain();
    let fine_x = linspace(lo, hi, N_FINE_GRID);
    let raw: Vec<f64> = fine_x.iter().map(|&x| spline.evaluate(x)).collect();
    let norm = trapz(&raw, &fine_x);
    if !(norm > 0.0 && norm.is_finite()) {
        return None;
    }
    let fine_p: Vec<f64> = raw.into_iter().map(|v| v / norm).collect();

    // first index of the maximum
    let index = fine_p
        .iter()
        .enumerate()
        .fold(0, |best, (i, &v)| if v > fine_p[best] { i } else { best });
    let log_m = fine_x[index];

    // cumulative trapezoid: cum[i] = ∫ from fine_x[0] to fine_x[i]
    let mut cum = vec![0.0; fine_p.len()];
    for i in 1..fine_p.len() {
        cum[i] = cum[i - 1] + 0.5 * (fine_x[i] - fine_x[i - 1]) * (fine_p[i] + fine_p[i - 1]);
    }

    let n_fine = fine_p.len();
    for n in 0..n_fine {
        if n > index || index + n >= n_fine {
            return None;
        }
        let (min_i, max_i) = (index - n, index + n);
        // probability in the half-open window [min_i, max_i)
        let prob = if max_i > min_i {
            cum[max_i - 1] - cum[min_i]
        } else {
            0.0
        };
        if prob >= ONE_SIGMA_PROBABILITY {
            let m = 10f64.powf(log_m);
            return Some(MassEstimate {
                mass: m / MASS_UNIT_MSUN,
                err_plus: (10f64.powf(fine_x[max_i]) - m) / MASS_UNIT_MSUN,
                err_minus: (m - 10f64.powf(fine_x[min_i])) / MASS_UNIT_MSUN,
            });
        }
    }
    None
}
