//! # Halo mass function models
//!
//! The mass estimator only needs the *shape* of `dn/dlog10M` at the cluster redshift to correct
//! for Eddington bias; normalisation is irrelevant because the prior is renormalised over the
//! mass grid ([`MassFunction::p_log10m`]).
//!
//! Implementations
//! -----------------
//! * [`TabulatedMassFunction`] – a `z,log10M,dndlog10M` grid produced by an external halo
//!   mass-function code, interpolated in `log10(dn)` along mass and linearly in z.
//! * [`Tinker08MassFunction`] – built-in Tinker et al. (2008) fit on a BBKS power spectrum,
//!   used when no table is configured.
use std::f64::consts::PI;

use camino::Utf8Path;
use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::catalog::Catalog;
use crate::constants::Redshift;
use crate::cosmology::Cosmology;
use crate::interpolation::{interp_linear, linspace, simpson, trapz, CubicSpline};
use crate::mass_definition::MassDefinition;
use crate::nemo_errors::NemoError;

/// Abundance of haloes per unit volume and log10 mass.
pub trait MassFunction: Send + Sync {
    /// `dn/dlog10M` at `log10m` (MSun) and `z`, up to a z-dependent constant.
    fn dn_dlog10m(&self, log10m: f64, z: Redshift) -> f64;

    /// Prior `P(log10M | z)` on `log10m_grid`, normalised to unit integral.
    ///
    /// Falls back to a flat prior when the model gives no mass in the grid.
    fn p_log10m(&self, z: Redshift, log10m_grid: &[f64]) -> Vec<f64> {
        let raw: Vec<f64> = log10m_grid
            .iter()
            .map(|&m| self.dn_dlog10m(m, z))
            .collect();
        normalise(raw, log10m_grid)
    }
}

fn normalise(raw: Vec<f64>, grid: &[f64]) -> Vec<f64> {
    let raw: Vec<f64> = raw.into_iter().map(|p| p.max(0.0)).collect();
    let norm = trapz(&raw, grid);
    if norm > 0.0 && norm.is_finite() {
        raw.into_iter().map(|p| p / norm).collect()
    } else {
        let span = grid.last().unwrap_or(&1.0) - grid.first().unwrap_or(&0.0);
        vec![1.0 / span.max(f64::MIN_POSITIVE); grid.len()]
    }
}

/// Overdensities (w.r.t. the mean) of the Tinker et al. (2008) fits, with their `A, a, b, c`.
const TINKER_DELTA: [f64; 9] = [200.0, 300.0, 400.0, 600.0, 800.0, 1200.0, 1600.0, 2400.0, 3200.0];
const TINKER_BIG_A: [f64; 9] = [0.186, 0.200, 0.212, 0.218, 0.248, 0.255, 0.260, 0.260, 0.260];
const TINKER_A: [f64; 9] = [1.47, 1.52, 1.56, 1.61, 1.87, 2.13, 2.30, 2.53, 2.66];
const TINKER_B: [f64; 9] = [2.57, 2.25, 2.05, 1.87, 1.59, 1.51, 1.46, 1.44, 1.41];
const TINKER_C: [f64; 9] = [1.19, 1.27, 1.34, 1.45, 1.58, 1.80, 1.97, 2.24, 2.44];

/// Range and sampling of the tabulated σ(M) (log10 MSun).
const SIGMA_LOG10M_MIN: f64 = 11.5;
const SIGMA_LOG10M_MAX: f64 = 16.5;
const N_SIGMA: usize = 101;

/// ln k integration range (k in Mpc⁻¹) and Simpson intervals for σ(R).
const LN_K_MIN: f64 = -9.2;
const LN_K_MAX: f64 = 4.6;
const N_LN_K: usize = 1200;

/// BBKS transfer function with the Sugiyama (1995) shape parameter; `k` in Mpc⁻¹.
fn bbks_transfer(k: f64, cosmo: &Cosmology) -> f64 {
    let h = cosmo.little_h();
    let gamma = cosmo.om0 * h * (-cosmo.ob0 * (1.0 + (2.0 * h).sqrt() / cosmo.om0)).exp();
    let q = k / (gamma * h);
    if q < 1e-8 {
        return 1.0;
    }
    let poly = 1.0 + 3.89 * q + (16.1 * q).powi(2) + (5.46 * q).powi(3) + (6.71 * q).powi(4);
    (1.0 + 2.34 * q).ln() / (2.34 * q) * poly.powf(-0.25)
}

/// Fourier transform of a spherical top-hat.
fn top_hat(x: f64) -> f64 {
    if x < 1e-3 {
        1.0 - x * x / 10.0
    } else {
        3.0 * (x.sin() - x * x.cos()) / x.powi(3)
    }
}

/// Unnormalised `σ²(R)` at z = 0 for a comoving radius `r` (Mpc).
fn sigma2_unnormalised(r: f64, cosmo: &Cosmology) -> f64 {
    simpson(
        |ln_k| {
            let k = ln_k.exp();
            let t = bbks_transfer(k, cosmo);
            let w = top_hat(k * r);
            k.powf(3.0 + cosmo.ns) * t * t * w * w
        },
        LN_K_MIN,
        LN_K_MAX,
        N_LN_K,
    ) / (2.0 * PI * PI)
}

/// Tinker et al. (2008) halo mass function on a BBKS linear power spectrum normalised to σ8.
///
/// `dn/dlog10M = f(σ) · ρ̄m / M · |dlnσ/dlog10M|`, with
/// `f(σ) = A [(σ/b)^−a + 1] exp(−c/σ²)`. The fit parameters are interpolated in log Δm, where
/// `Δm` is the overdensity of `definition` relative to the mean matter density at z, and evolve
/// as `A ∝ (1+z)^−0.14`, `a ∝ (1+z)^−0.06`, `b ∝ (1+z)^−α`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tinker08MassFunction {
    cosmo: Cosmology,
    definition: MassDefinition,
    /// ln σ(M, z = 0) against log10 M.
    ln_sigma0: CubicSpline,
    rho_m0: f64,
}

impl Tinker08MassFunction {
    /// Mass function for M500c haloes.
    pub fn new(cosmo: Cosmology) -> Result<Self, NemoError> {
        Self::for_definition(cosmo, MassDefinition::M500C)
    }

    /// Tabulates σ(M) once; fails with [`NemoError::InvalidMassOption`] when the cosmology
    /// gives no usable power spectrum.
    pub fn for_definition(cosmo: Cosmology, definition: MassDefinition) -> Result<Self, NemoError> {
        let rho_m0 = cosmo.mean_density(0.0);
        let r8 = 8.0 / cosmo.little_h();
        let amplitude = cosmo.sigma8.powi(2) / sigma2_unnormalised(r8, &cosmo);

        let log10m = linspace(SIGMA_LOG10M_MIN, SIGMA_LOG10M_MAX, N_SIGMA);
        let ln_sigma: Vec<f64> = log10m
            .iter()
            .map(|&lm| {
                let r = (3.0 * 10f64.powf(lm) / (4.0 * PI * rho_m0)).cbrt();
                0.5 * (amplitude * sigma2_unnormalised(r, &cosmo)).ln()
            })
            .collect();
        if ln_sigma.iter().any(|v| !v.is_finite()) {
            return Err(NemoError::InvalidMassOption(format!(
                "no finite σ(M) for cosmology {cosmo}"
            )));
        }
        Ok(Tinker08MassFunction {
            cosmo,
            definition,
            ln_sigma0: CubicSpline::new(&log10m, &ln_sigma)?,
            rho_m0,
        })
    }

    /// σ(M, z) for `log10m` (MSun) given the growth factor at z.
    fn sigma(&self, log10m: f64, growth: f64) -> f64 {
        self.ln_sigma0.evaluate(log10m).exp() * growth
    }

    /// σ(M, z = 0).
    pub fn sigma0(&self, log10m: f64) -> f64 {
        self.sigma(log10m, 1.0)
    }

    /// Overdensity of the mass definition relative to the mean matter density at z.
    pub fn delta_mean(&self, z: Redshift) -> f64 {
        self.definition.threshold_density(z, &self.cosmo) / self.cosmo.mean_density(z)
    }

    /// Tinker `(A, a, b, c)` at overdensity `delta_m` (clamped to the fitted range) and z.
    fn parameters(delta_m: f64, z: Redshift) -> (f64, f64, f64, f64) {
        let log_delta: Vec<f64> = TINKER_DELTA.iter().map(|d| d.log10()).collect();
        let x = delta_m.clamp(TINKER_DELTA[0], TINKER_DELTA[8]).log10();
        let big_a = interp_linear(x, &log_delta, &TINKER_BIG_A);
        let a = interp_linear(x, &log_delta, &TINKER_A);
        let b = interp_linear(x, &log_delta, &TINKER_B);
        let c = interp_linear(x, &log_delta, &TINKER_C);
        let alpha = 10f64.powf(-(0.75 / (delta_m.max(TINKER_DELTA[0]) / 75.0).log10()).powf(1.2));
        let opz = 1.0 + z;
        (big_a * opz.powf(-0.14), a * opz.powf(-0.06), b * opz.powf(-alpha), c)
    }

    fn dn_dlog10m_with(&self, log10m: f64, growth: f64, params: (f64, f64, f64, f64)) -> f64 {
        let (big_a, a, b, c) = params;
        let sigma = self.sigma(log10m, growth);
        let step = 1e-3;
        let dln_sigma = (self.ln_sigma0.evaluate(log10m + step)
            - self.ln_sigma0.evaluate(log10m - step))
            / (2.0 * step);
        let f_sigma = big_a * ((sigma / b).powf(-a) + 1.0) * (-c / (sigma * sigma)).exp();
        f_sigma * self.rho_m0 / 10f64.powf(log10m) * dln_sigma.abs()
    }
}

impl MassFunction for Tinker08MassFunction {
    fn dn_dlog10m(&self, log10m: f64, z: Redshift) -> f64 {
        let growth = self.cosmo.growth_factor(z);
        self.dn_dlog10m_with(log10m, growth, Self::parameters(self.delta_mean(z), z))
    }

    fn p_log10m(&self, z: Redshift, log10m_grid: &[f64]) -> Vec<f64> {
        // growth integral and fit parameters once per call
        let growth = self.cosmo.growth_factor(z);
        let params = Self::parameters(self.delta_mean(z), z);
        let raw: Vec<f64> = log10m_grid
            .iter()
            .map(|&m| self.dn_dlog10m_with(m, growth, params))
            .collect();
        normalise(raw, log10m_grid)
    }
}

/// `dn/dlog10M` tabulated on a (z, log10M) grid.
#[derive(Debug, Clone, PartialEq)]
pub struct TabulatedMassFunction {
    z: Vec<f64>,
    /// Per z slice: (log10M, log10 dn/dlog10M), sorted by mass.
    slices: Vec<(Vec<f64>, Vec<f64>)>,
}

impl TabulatedMassFunction {
    /// Build from a `z,log10M,dndlog10M` table. Non-positive abundances are floored.
    pub fn from_catalog(table: &Catalog, origin: &str) -> Result<Self, NemoError> {
        let z = table.floats("z")?;
        let m = table.floats("log10M")?;
        let dn = table.floats("dndlog10M")?;
        if z.is_empty() {
            return Err(NemoError::MalformedTable {
                path: origin.to_string(),
                reason: "empty mass function table".into(),
            });
        }

        let groups = z
            .iter()
            .zip(m.iter())
            .zip(dn.iter())
            .map(|((&z, &m), &dn)| (OrderedFloat(z), (m, dn.max(f64::MIN_POSITIVE).log10())))
            .into_group_map();

        let mut zs = Vec::with_capacity(groups.len());
        let mut slices = Vec::with_capacity(groups.len());
        for (zk, mut points) in groups.into_iter().sorted_by_key(|(k, _)| *k) {
            points.sort_by(|a, b| a.0.total_cmp(&b.0));
            zs.push(zk.into_inner());
            slices.push(points.into_iter().unzip());
        }
        Ok(TabulatedMassFunction { z: zs, slices })
    }

    pub fn load(path: &Utf8Path) -> Result<Self, NemoError> {
        Self::from_catalog(&Catalog::read(path)?, path.as_str())
    }

    fn log_dn_at_slice(&self, k: usize, log10m: f64) -> f64 {
        let (m, ld) = &self.slices[k];
        interp_linear(log10m, m, ld)
    }
}

impl MassFunction for TabulatedMassFunction {
    fn dn_dlog10m(&self, log10m: f64, z: Redshift) -> f64 {
        let n = self.z.len();
        if n == 1 || z <= self.z[0] {
            return 10f64.powf(self.log_dn_at_slice(0, log10m));
        }
        if z >= self.z[n - 1] {
            return 10f64.powf(self.log_dn_at_slice(n - 1, log10m));
        }
        let hi = self.z.partition_point(|&zk| zk <= z);
        let lo = hi - 1;
        let t = (z - self.z[lo]) / (self.z[hi] - self.z[lo]);
        let a = 10f64.powf(self.log_dn_at_slice(lo, log10m));
        let b = 10f64.powf(self.log_dn_at_slice(hi, log10m));
        a + t * (b - a)
    }
}

#[cfg(test)]
mod mass_function_test {
    use super::*;
    use crate::catalog::csv_io::parse_csv;
    use crate::interpolation::linspace;
    use approx::assert_relative_eq;

    #[test]
    fn test_sigma8_normalisation() {
        let cosmo = Cosmology::default();
        let mf = Tinker08MassFunction::new(cosmo).unwrap();
        // mass inside an 8/h Mpc sphere at the mean density
        let r8: f64 = 8.0 / cosmo.little_h();
        let m8 = 4.0 / 3.0 * PI * r8.powi(3) * cosmo.mean_density(0.0);
        assert_relative_eq!(mf.sigma0(m8.log10()), 0.8, max_relative = 1e-3);
        // fluctuations fall with scale
        assert!(mf.sigma0(13.0) > mf.sigma0(14.0));
        assert!(mf.sigma0(14.0) > mf.sigma0(15.0));
        let s15 = mf.sigma0(15.0);
        assert!(s15 > 0.3 && s15 < 0.6, "σ(1e15) = {s15}");
    }

    #[test]
    fn test_tinker_prior_is_normalised_and_falling() {
        let mf = Tinker08MassFunction::new(Cosmology::default()).unwrap();
        let grid = linspace(13.0, 16.0, 300);
        let p = mf.p_log10m(0.3, &grid);
        assert_relative_eq!(trapz(&p, &grid), 1.0, epsilon = 1e-12);
        assert!(p.windows(2).all(|w| w[1] < w[0]));
        // haloes of a given mass are rarer at higher redshift
        assert!(mf.dn_dlog10m(15.0, 1.0) < mf.dn_dlog10m(15.0, 0.2));
        // abundance of 1e14 MSun haloes, order of 1e-5 per Mpc³ per dex at z = 0
        let n14 = mf.dn_dlog10m(14.0, 0.0);
        assert!(n14 > 1e-6 && n14 < 1e-4, "dn/dlog10M(1e14) = {n14}");
    }

    #[test]
    fn test_delta_mean_for_500c() {
        let cosmo = Cosmology::default();
        let mf = Tinker08MassFunction::new(cosmo).unwrap();
        assert_relative_eq!(mf.delta_mean(0.0), 500.0 / 0.3, max_relative = 1e-12);
        assert_relative_eq!(mf.delta_mean(1.0), 500.0 / cosmo.omega_m_z(1.0), max_relative = 1e-12);
    }

    #[test]
    fn test_tabulated_interpolation() {
        let text = "z,log10M,dndlog10M\n\
                    0.0,14.0,1e-4\n0.0,15.0,1e-6\n\
                    1.0,14.0,1e-5\n1.0,15.0,1e-8\n";
        let mf = TabulatedMassFunction::from_catalog(&parse_csv(text, "mf").unwrap(), "mf").unwrap();
        assert_relative_eq!(mf.dn_dlog10m(14.0, 0.0), 1e-4, max_relative = 1e-12);
        // log-linear in mass
        assert_relative_eq!(mf.dn_dlog10m(14.5, 0.0), 1e-5, max_relative = 1e-12);
        // linear in z
        assert_relative_eq!(mf.dn_dlog10m(14.0, 0.5), 5.5e-5, max_relative = 1e-12);
        // clamped outside the z range
        assert_relative_eq!(mf.dn_dlog10m(15.0, 3.0), 1e-8, max_relative = 1e-12);
    }

    #[test]
    fn test_flat_fallback() {
        struct Empty;
        impl MassFunction for Empty {
            fn dn_dlog10m(&self, _: f64, _: Redshift) -> f64 {
                0.0
            }
        }
        let grid = linspace(13.0, 16.0, 4);
        let p = Empty.p_log10m(0.5, &grid);
        assert_relative_eq!(trapz(&p, &grid), 1.0, epsilon = 1e-12);
    }
}
