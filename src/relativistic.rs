//! # Relativistic SZ correction
//!
//! `fRel = 1 + δ_SZE` following the expansion of Itoh et al. (1998, eqs. 2.25–2.30) to fourth
//! order in θe = kT / (me c²). The electron temperature comes from the Arnaud et al. (2005)
//! M–T relation:
//!
//! ```text
//! T = 5 keV · (E(z) M500 / 3.84e14)^(1/1.71)
//! ```
//!
//! When the y map is a weighted combination of frequency maps, the correction is the
//! weight-averaged fRel over the tile's observing frequencies ([`weighted_frel`]).
use crate::constants::{
    Redshift, C_M_S, E_CHARGE, H_PLANCK, K_BOLTZMANN, MSun, M_ELECTRON, T_CMB,
};
use crate::cosmology::Cosmology;

/// Arnaud et al. (2005) M–T normalisation (MSun) and slope.
const MT_NORM: f64 = 3.84e14;
const MT_SLOPE: f64 = 1.71;

/// Electron temperature (keV) of a cluster of mass `m500` at `z`.
pub fn temperature_kev(z: Redshift, m500: MSun, cosmo: &Cosmology) -> f64 {
    5.0 * (cosmo.e_z(z) * m500 / MT_NORM).powf(1.0 / MT_SLOPE)
}

/// Relativistic correction factor at a single observing frequency.
pub fn frel(z: Redshift, m500: MSun, obs_freq_ghz: f64, cosmo: &Cosmology) -> f64 {
    let t_kelvin = temperature_kev(z, m500, cosmo) * (1000.0 * E_CHARGE) / K_BOLTZMANN;
    let theta_e = K_BOLTZMANN * t_kelvin / (M_ELECTRON * C_M_S * C_M_S);

    let x = H_PLANCK * obs_freq_ghz * 1e9 / (K_BOLTZMANN * T_CMB);
    let xt = x * (x / 2.0).cosh() / (x / 2.0).sinh();
    let st = x / (x / 2.0).sinh();
    let s2 = st * st;
    let s4 = s2 * s2;
    let s6 = s4 * s2;
    let s8 = s4 * s4;
    let p = |n: i32| xt.powi(n);

    let y0 = -4.0 + xt;

    let y1 = -10.0 + 47.0 / 2.0 * xt - 42.0 / 5.0 * p(2) + 7.0 / 10.0 * p(3)
        + s2 * (-21.0 / 5.0 + 7.0 / 5.0 * xt);

    let y2 = -15.0 / 2.0 + 1023.0 / 8.0 * xt - 868.0 / 5.0 * p(2) + 329.0 / 5.0 * p(3)
        - 44.0 / 5.0 * p(4)
        + 11.0 / 30.0 * p(5)
        + s2 * (-434.0 / 5.0 + 658.0 / 5.0 * xt - 242.0 / 5.0 * p(2) + 143.0 / 30.0 * p(3))
        + s4 * (-44.0 / 5.0 + 187.0 / 60.0 * xt);

    let y3 = 15.0 / 2.0 + 2505.0 / 8.0 * xt - 7098.0 / 5.0 * p(2) + 14253.0 / 10.0 * p(3)
        - 18594.0 / 35.0 * p(4)
        + 12059.0 / 140.0 * p(5)
        - 128.0 / 21.0 * p(6)
        + 16.0 / 105.0 * p(7)
        + s2 * (-7098.0 / 10.0 + 14253.0 / 5.0 * xt - 102267.0 / 35.0 * p(2)
            + 156767.0 / 140.0 * p(3)
            - 1216.0 / 7.0 * p(4)
            + 64.0 / 7.0 * p(5))
        + s4 * (-18594.0 / 35.0 + 205003.0 / 280.0 * xt - 1920.0 / 7.0 * p(2)
            + 1024.0 / 35.0 * p(3))
        + s6 * (-544.0 / 21.0 + 992.0 / 105.0 * xt);

    let y4 = -135.0 / 32.0 + 30375.0 / 128.0 * xt - 62391.0 / 10.0 * p(2)
        + 614727.0 / 40.0 * p(3)
        - 124389.0 / 10.0 * p(4)
        + 355703.0 / 80.0 * p(5)
        - 16568.0 / 21.0 * p(6)
        + 7516.0 / 105.0 * p(7)
        - 22.0 / 7.0 * p(8)
        + 11.0 / 210.0 * p(9)
        + s2 * (-62391.0 / 20.0 + 614727.0 / 20.0 * xt - 1368279.0 / 20.0 * p(2)
            + 4624139.0 / 80.0 * p(3)
            - 157396.0 / 7.0 * p(4)
            + 30064.0 / 7.0 * p(5)
            - 2717.0 / 7.0 * p(6)
            + 2761.0 / 210.0 * p(7))
        + s4 * (-124389.0 / 10.0 + 6046951.0 / 160.0 * xt - 248520.0 / 7.0 * p(2)
            + 481024.0 / 35.0 * p(3)
            - 15972.0 / 7.0 * p(4)
            + 18689.0 / 140.0 * p(5))
        + s6 * (-70414.0 / 21.0 + 465992.0 / 105.0 * xt - 11792.0 / 7.0 * p(2)
            + 19778.0 / 105.0 * p(3))
        + s8 * (-682.0 / 7.0 + 7601.0 / 210.0 * xt);

    let ex = x.exp();
    let delta_sze = (x.powi(3) / (ex - 1.0))
        * (theta_e * x * ex / (ex - 1.0))
        * (y0 + y1 * theta_e + y2 * theta_e.powi(2) + y3 * theta_e.powi(3) + y4 * theta_e.powi(4));

    1.0 + delta_sze
}

/// Weight-averaged fRel over `(obsFreqGHz, weight)` pairs.
///
/// Returns `1.0` (no correction) when the weights sum to zero.
pub fn weighted_frel(
    z: Redshift,
    m500: MSun,
    weights: &[(f64, f64)],
    cosmo: &Cosmology,
) -> f64 {
    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    if total == 0.0 {
        return 1.0;
    }
    weights
        .iter()
        .map(|&(freq, w)| w * frel(z, m500, freq, cosmo))
        .sum::<f64>()
        / total
}

#[cfg(test)]
mod relativistic_test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_temperature() {
        let c = Cosmology::default();
        assert_relative_eq!(temperature_kev(0.0, MT_NORM, &c), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_frel_decrement_is_reduced() {
        let c = Cosmology::default();
        // At 148 GHz the relativistic correction lowers the decrement by a few per cent
        // for a massive cluster, and less for a lighter one.
        let heavy = frel(0.3, 1e15, 148.0, &c);
        let light = frel(0.3, 1e14, 148.0, &c);
        assert!(heavy < 1.0 && heavy > 0.85, "fRel = {heavy}");
        assert!(light < 1.0 && light > heavy, "fRel = {light}");
    }

    #[test]
    fn test_weighted_frel() {
        let c = Cosmology::default();
        let single = frel(0.5, 5e14, 148.0, &c);
        assert_relative_eq!(weighted_frel(0.5, 5e14, &[(148.0, 1.0)], &c), single);
        let mixed = weighted_frel(0.5, 5e14, &[(98.0, 1.0), (148.0, 3.0)], &c);
        let expected = (frel(0.5, 5e14, 98.0, &c) + 3.0 * single) / 4.0;
        assert_relative_eq!(mixed, expected, epsilon = 1e-14);
        assert_eq!(weighted_frel(0.5, 5e14, &[], &c), 1.0);
    }
}
