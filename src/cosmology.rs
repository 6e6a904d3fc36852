//! # Flat ΛCDM background cosmology
//!
//! Minimal background model used by the mass estimator and the mass-definition converter:
//!
//! - `E(z) = H(z)/H0 = sqrt(Ωm(1+z)³ + ΩΛ)` with `ΩΛ = 1 − Ωm`,
//! - comoving and angular-diameter distances (Mpc),
//! - critical and mean matter densities (MSun Mpc⁻³),
//! - linear growth factor `D(z)` normalised to `D(0) = 1`.
//!
//! Units follow the nemo conventions: H0 in km s⁻¹ Mpc⁻¹ and `G = 4.301e-9 MSun⁻¹ km² s⁻² Mpc`.

use std::f64::consts::PI;
use std::fmt;

use crate::constants::{Redshift, C_KM_S, G_MSUN_KM2_S2_MPC};
use crate::interpolation::simpson;

/// Number of Simpson intervals for the distance and growth integrals.
const INTEGRATION_STEPS: usize = 1000;

/// Background cosmology parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cosmology {
    /// Hubble constant (km s⁻¹ Mpc⁻¹)
    pub h0: f64,
    /// Matter density today
    pub om0: f64,
    /// Baryon density today (only carried to the mass function)
    pub ob0: f64,
    /// Amplitude of matter fluctuations
    pub sigma8: f64,
    /// Scalar spectral index
    pub ns: f64,
}

impl Default for Cosmology {
    fn default() -> Self {
        Cosmology {
            h0: 70.0,
            om0: 0.3,
            ob0: 0.05,
            sigma8: 0.8,
            ns: 0.95,
        }
    }
}

impl Cosmology {
    pub fn new(h0: f64, om0: f64, ob0: f64, sigma8: f64, ns: f64) -> Self {
        Cosmology {
            h0,
            om0,
            ob0,
            sigma8,
            ns,
        }
    }

    /// Dark-energy density today (flat universe).
    #[inline]
    pub fn ol0(&self) -> f64 {
        1.0 - self.om0
    }

    /// Dimensionless Hubble parameter h = H0 / 100.
    #[inline]
    pub fn little_h(&self) -> f64 {
        self.h0 / 100.0
    }

    /// E(z) = H(z) / H0.
    #[inline]
    pub fn e_z(&self, z: Redshift) -> f64 {
        (self.om0 * (1.0 + z).powi(3) + self.ol0()).sqrt()
    }

    /// H(z) in km s⁻¹ Mpc⁻¹.
    #[inline]
    pub fn hubble(&self, z: Redshift) -> f64 {
        self.h0 * self.e_z(z)
    }

    /// Matter density parameter at redshift z.
    pub fn omega_m_z(&self, z: Redshift) -> f64 {
        self.om0 * (1.0 + z).powi(3) / self.e_z(z).powi(2)
    }

    /// Line-of-sight comoving distance (Mpc).
    pub fn comoving_distance(&self, z: Redshift) -> f64 {
        if z <= 0.0 {
            return 0.0;
        }
        let dh = C_KM_S / self.h0;
        dh * simpson(|zp| 1.0 / self.e_z(zp), 0.0, z, INTEGRATION_STEPS)
    }

    /// Angular-diameter distance (Mpc).
    pub fn angular_diameter_distance(&self, z: Redshift) -> f64 {
        self.comoving_distance(z) / (1.0 + z)
    }

    /// Critical density ρc(z) = 3H(z)² / (8πG) in MSun Mpc⁻³.
    pub fn critical_density(&self, z: Redshift) -> f64 {
        3.0 * self.hubble(z).powi(2) / (8.0 * PI * G_MSUN_KM2_S2_MPC)
    }

    /// Mean matter density ρm(z) = Ωm(z)·ρc(z) in MSun Mpc⁻³.
    pub fn mean_density(&self, z: Redshift) -> f64 {
        self.omega_m_z(z) * self.critical_density(z)
    }

    /// Unnormalised linear growth, `E(a) ∫₀ᵃ da' / (a' E(a'))³`.
    fn growth_integral(&self, z: Redshift) -> f64 {
        let a = 1.0 / (1.0 + z);
        let integrand = |ap: f64| {
            if ap <= 0.0 {
                return 0.0;
            }
            let ae = (self.om0 / ap + self.ol0() * ap * ap).sqrt();
            1.0 / ae.powi(3)
        };
        self.e_z(z) * simpson(integrand, 0.0, a, INTEGRATION_STEPS)
    }

    /// Linear growth factor normalised to `D(0) = 1`.
    pub fn growth_factor(&self, z: Redshift) -> f64 {
        self.growth_integral(z) / self.growth_integral(0.0)
    }
}

impl fmt::Display for Cosmology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "flat ΛCDM (H0={}, Ωm={}, Ωb={}, σ8={}, ns={})",
            self.h0, self.om0, self.ob0, self.sigma8, self.ns
        )
    }
}

#[cfg(test)]
mod cosmology_test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_e_z() {
        let c = Cosmology::default();
        assert_relative_eq!(c.e_z(0.0), 1.0);
        assert_relative_eq!(c.e_z(1.0), (0.3 * 8.0 + 0.7_f64).sqrt(), epsilon = 1e-14);
    }

    #[test]
    fn test_distances() {
        let c = Cosmology::default();
        // Reference values for H0=70, Om=0.3 flat: D_C(z=0.5) ≈ 1888.6 Mpc, D_A(z=1) ≈ 1651.9 Mpc
        assert_relative_eq!(c.comoving_distance(0.5), 1888.6, max_relative = 1e-3);
        assert_relative_eq!(c.angular_diameter_distance(1.0), 1651.9, max_relative = 1e-3);
        assert_eq!(c.comoving_distance(0.0), 0.0);
    }

    #[test]
    fn test_densities() {
        let c = Cosmology::default();
        // ρc0 = 3 H0² / (8πG) ≈ 1.36e11 MSun/Mpc³ for H0 = 70
        assert_relative_eq!(c.critical_density(0.0), 1.3598e11, max_relative = 1e-3);
        assert_relative_eq!(
            c.mean_density(0.7),
            0.3 * 1.7_f64.powi(3) * c.critical_density(0.0),
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_growth_factor() {
        let c = Cosmology::default();
        assert_relative_eq!(c.growth_factor(0.0), 1.0, epsilon = 1e-12);
        // Growth is suppressed in the past; D(z=1) ≈ 0.61 for Om=0.3
        let d1 = c.growth_factor(1.0);
        assert!(d1 > 0.58 && d1 < 0.64, "D(1) = {d1}");
        assert!(c.growth_factor(2.0) < d1);
    }
}
