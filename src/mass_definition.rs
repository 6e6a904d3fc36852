//! # Halo mass definitions and conversions
//!
//! A mass definition is an overdensity Δ with respect to a reference density ρ, either the
//! critical density (`c`) or the mean matter density (`m`): `M_Δρ = (4π/3) R³ Δ ρ(z)`.
//!
//! Conversions assume an NFW profile whose concentration comes from a concentration–mass
//! relation ([`ConcMassRelation`]) calibrated in that relation's *native* definition
//! (200m for Bhattacharya et al. 2013, 200c for Duffy et al. 2008).
//!
//! Algorithm
//! -----------------
//! * **native → target**: with `c` from the relation and `r_s = R_native / c`, the target radius
//!   solves `f(r_s/R_t) = (Δt ρt)/(Δn ρn) · f(1/c)` where
//!   `f(x) = x³ [ln(1 + 1/x) − 1/(1 + x)]` (Hu & Kravtsov 2003). `f` is inverted with Brent's
//!   method on `x ∈ [1e-4, 1e4]`.
//! * **target → native**: fixed-point iteration on a scale factor `s` with `M_native = s·M`,
//!   starting at `s = 3`, until `|1 − M/M(s)| < 1e-6`; more than
//!   [`MAX_SIZE_MATCH_ITER`] iterations is a [`NemoError::ConversionNonConvergence`].
//! * Any other pair goes through the native definition.
//!
//! The fractional uncertainty of a mass is carried unchanged to the converted value
//! ([`MassConverter::convert_with_errors`]).
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use roots::{find_root_brent, SimpleConvergency};
use serde::Deserialize;

use crate::constants::{MSun, Redshift, MAX_SIZE_MATCH_ITER};
use crate::cosmology::Cosmology;
use crate::nemo_errors::NemoError;

const CONVERSION_TOLERANCE: f64 = 1e-6;
const HK_X_MIN: f64 = 1e-4;
const HK_X_MAX: f64 = 1e4;

/// Reference density of a mass definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum RhoType {
    #[default]
    Critical,
    Matter,
}

impl RhoType {
    /// Single-letter suffix used in column labels.
    pub fn suffix(&self) -> char {
        match self {
            RhoType::Critical => 'c',
            RhoType::Matter => 'm',
        }
    }

    /// Reference density (MSun Mpc⁻³) at `z`.
    pub fn density(&self, z: Redshift, cosmo: &Cosmology) -> f64 {
        match self {
            RhoType::Critical => cosmo.critical_density(z),
            RhoType::Matter => cosmo.mean_density(z),
        }
    }
}

impl FromStr for RhoType {
    type Err = NemoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" | "c" => Ok(RhoType::Critical),
            "matter" | "mean" | "m" => Ok(RhoType::Matter),
            other => Err(NemoError::UnknownRhoType(other.to_string())),
        }
    }
}

impl TryFrom<String> for RhoType {
    type Error = NemoError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for RhoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RhoType::Critical => "critical",
            RhoType::Matter => "matter",
        })
    }
}

/// Overdensity-based halo mass definition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassDefinition {
    pub delta: f64,
    pub rho: RhoType,
}

impl MassDefinition {
    pub const M500C: MassDefinition = MassDefinition {
        delta: 500.0,
        rho: RhoType::Critical,
    };
    pub const M200C: MassDefinition = MassDefinition {
        delta: 200.0,
        rho: RhoType::Critical,
    };
    pub const M200M: MassDefinition = MassDefinition {
        delta: 200.0,
        rho: RhoType::Matter,
    };

    pub fn new(delta: f64, rho: RhoType) -> Self {
        MassDefinition { delta, rho }
    }

    /// Output column label: `M500` for 500c, otherwise `M{Δ}{c|m}` (e.g. `M200m`).
    pub fn label(&self) -> String {
        if *self == Self::M500C {
            "M500".to_string()
        } else {
            format!("M{}{}", self.delta, self.rho.suffix())
        }
    }

    /// Δ·ρ(z) in MSun Mpc⁻³.
    pub fn threshold_density(&self, z: Redshift, cosmo: &Cosmology) -> f64 {
        self.delta * self.rho.density(z, cosmo)
    }

    /// Halo radius (Mpc) enclosing mass `m` under this definition.
    pub fn radius(&self, m: MSun, z: Redshift, cosmo: &Cosmology) -> f64 {
        (3.0 * m / (4.0 * PI * self.threshold_density(z, cosmo))).cbrt()
    }

    /// Mass enclosed within `r` (Mpc) under this definition.
    pub fn mass(&self, r: f64, z: Redshift, cosmo: &Cosmology) -> MSun {
        4.0 / 3.0 * PI * r.powi(3) * self.threshold_density(z, cosmo)
    }
}

impl fmt::Display for MassDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.delta, self.rho.suffix())
    }
}

/// Concentration–mass relation used for mass-definition conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum ConcMassRelation {
    /// Bhattacharya et al. (2013), c200m, full sample.
    #[default]
    Bhattacharya13,
    /// Duffy et al. (2008), c200c, full NFW sample.
    Duffy08,
}

impl ConcMassRelation {
    /// Definition in which the relation is calibrated.
    pub fn native_definition(&self) -> MassDefinition {
        match self {
            ConcMassRelation::Bhattacharya13 => MassDefinition::M200M,
            ConcMassRelation::Duffy08 => MassDefinition::M200C,
        }
    }

    /// Concentration of a halo of native mass `m_native` at `z`.
    pub fn concentration(&self, m_native: MSun, z: Redshift, cosmo: &Cosmology) -> f64 {
        let h = cosmo.little_h();
        match self {
            ConcMassRelation::Bhattacharya13 => {
                let dz = cosmo.growth_factor(z);
                let nu = (1.12 * (m_native / (5e13 / h)).powf(0.3) + 0.53) / dz;
                dz.powf(1.15) * 9.0 * nu.powf(-0.29)
            }
            ConcMassRelation::Duffy08 => {
                5.71 * (m_native / (2e12 / h)).powf(-0.084) * (1.0 + z).powf(-0.47)
            }
        }
    }
}

impl FromStr for ConcMassRelation {
    type Err = NemoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "B13" | "Bhattacharya13" => Ok(ConcMassRelation::Bhattacharya13),
            "D08" | "Duffy08" => Ok(ConcMassRelation::Duffy08),
            other => Err(NemoError::UnknownConcMassRelation(other.to_string())),
        }
    }
}

impl TryFrom<String> for ConcMassRelation {
    type Error = NemoError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for ConcMassRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConcMassRelation::Bhattacharya13 => "B13",
            ConcMassRelation::Duffy08 => "D08",
        })
    }
}

/// Hu & Kravtsov (2003) `f(x) = x³ [ln(1 + 1/x) − 1/(1 + x)]`.
#[inline]
pub fn hk_f(x: f64) -> f64 {
    x.powi(3) * ((1.0 + 1.0 / x).ln() - 1.0 / (1.0 + x))
}

/// Solve `hk_f(x) = target` for `x ∈ [1e-4, 1e4]`.
pub fn hk_f_inverse(target: f64) -> Result<f64, NemoError> {
    let mut tol = SimpleConvergency {
        eps: 1e-14,
        max_iter: 500,
    };
    Ok(find_root_brent(
        HK_X_MIN,
        HK_X_MAX,
        |x: f64| hk_f(x) - target,
        &mut tol,
    )?)
}

/// Converts masses between definitions for one concentration–mass relation and cosmology.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassConverter {
    pub relation: ConcMassRelation,
    pub cosmo: Cosmology,
}

impl MassConverter {
    pub fn new(relation: ConcMassRelation, cosmo: Cosmology) -> Self {
        MassConverter { relation, cosmo }
    }

    /// Convert a mass given in the relation's native definition to `target`.
    pub fn from_native(
        &self,
        m_native: MSun,
        z: Redshift,
        target: MassDefinition,
    ) -> Result<MSun, NemoError> {
        let native = self.relation.native_definition();
        if target == native {
            return Ok(m_native);
        }
        let c = self.relation.concentration(m_native, z, &self.cosmo);
        let r_native = native.radius(m_native, z, &self.cosmo);
        let rs = r_native / c;

        let ratio = target.threshold_density(z, &self.cosmo)
            / native.threshold_density(z, &self.cosmo);
        let x = hk_f_inverse(ratio * hk_f(1.0 / c))?;
        Ok(target.mass(rs / x, z, &self.cosmo))
    }

    /// Convert a mass given in `source` to the relation's native definition.
    pub fn to_native(
        &self,
        m: MSun,
        z: Redshift,
        source: MassDefinition,
    ) -> Result<MSun, NemoError> {
        let native = self.relation.native_definition();
        if source == native {
            return Ok(m);
        }
        let mut scale = 3.0;
        for _ in 0..MAX_SIZE_MATCH_ITER {
            let test = self.from_native(scale * m, z, source)?;
            let ratio = m / test;
            scale *= ratio;
            if (1.0 - ratio).abs() < CONVERSION_TOLERANCE {
                return Ok(scale * m);
            }
        }
        Err(NemoError::ConversionNonConvergence {
            from: source.to_string(),
            to: native.to_string(),
            iterations: MAX_SIZE_MATCH_ITER,
        })
    }

    /// Convert `m` from `from` to `to` at redshift `z`.
    pub fn convert(
        &self,
        m: MSun,
        z: Redshift,
        from: MassDefinition,
        to: MassDefinition,
    ) -> Result<MSun, NemoError> {
        if from == to {
            return Ok(m);
        }
        let m_native = self.to_native(m, z, from)?;
        self.from_native(m_native, z, to)
    }

    /// Convert a mass with asymmetric errors, keeping the fractional errors unchanged.
    ///
    /// Return
    /// ----------
    /// * `(mass, err_plus, err_minus)` in the units of the input.
    pub fn convert_with_errors(
        &self,
        m: MSun,
        err_plus: MSun,
        err_minus: MSun,
        z: Redshift,
        from: MassDefinition,
        to: MassDefinition,
    ) -> Result<(MSun, MSun, MSun), NemoError> {
        let converted = self.convert(m, z, from, to)?;
        Ok((
            converted,
            err_plus / m * converted,
            err_minus / m * converted,
        ))
    }
}

#[cfg(test)]
mod mass_definition_test {
    use super::*;
    use approx::assert_relative_eq;

    fn b13() -> MassConverter {
        MassConverter::new(ConcMassRelation::Bhattacharya13, Cosmology::default())
    }

    #[test]
    fn test_labels() {
        assert_eq!(MassDefinition::M500C.label(), "M500");
        assert_eq!(MassDefinition::M200M.label(), "M200m");
        assert_eq!(MassDefinition::M200C.label(), "M200c");
        assert_eq!(MassDefinition::new(2500.0, RhoType::Critical).label(), "M2500c");
    }

    #[test]
    fn test_parse() {
        assert_eq!("matter".parse::<RhoType>().unwrap(), RhoType::Matter);
        assert!("vacuum".parse::<RhoType>().is_err());
        assert_eq!(
            "D08".parse::<ConcMassRelation>().unwrap(),
            ConcMassRelation::Duffy08
        );
        assert_eq!(
            "NFW97".parse::<ConcMassRelation>().unwrap_err(),
            NemoError::UnknownConcMassRelation("NFW97".into())
        );
    }

    #[test]
    fn test_hk_inverse() {
        for x in [0.01, 0.2, 1.0, 5.0] {
            assert_relative_eq!(hk_f_inverse(hk_f(x)).unwrap(), x, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_radius_mass_consistency() {
        let c = Cosmology::default();
        let def = MassDefinition::M500C;
        let r = def.radius(3e14, 0.4, &c);
        assert_relative_eq!(def.mass(r, 0.4, &c), 3e14, max_relative = 1e-12);
        // R500c of a 3e14 MSun cluster at z = 0.4 is about 0.9 Mpc
        assert!(r > 0.8 && r < 1.0, "R500c = {r}");
    }

    #[test]
    fn test_m200m_exceeds_m500c() {
        let conv = b13();
        let m500 = conv
            .from_native(5e14, 0.3, MassDefinition::M500C)
            .unwrap();
        assert!(m500 < 5e14);
        // typical M500c / M200m ratio for cluster concentrations
        let ratio = m500 / 5e14;
        assert!(ratio > 0.45 && ratio < 0.75, "ratio = {ratio}");
    }

    #[test]
    fn test_round_trip() {
        let conv = b13();
        let m200m = conv
            .convert(4e14, 0.5, MassDefinition::M500C, MassDefinition::M200M)
            .unwrap();
        let back = conv
            .convert(m200m, 0.5, MassDefinition::M200M, MassDefinition::M500C)
            .unwrap();
        assert_relative_eq!(back, 4e14, max_relative = 1e-5);

        let d08 = MassConverter::new(ConcMassRelation::Duffy08, Cosmology::default());
        let m200m = d08
            .convert(4e14, 0.5, MassDefinition::M500C, MassDefinition::M200M)
            .unwrap();
        let back = d08
            .convert(m200m, 0.5, MassDefinition::M200M, MassDefinition::M500C)
            .unwrap();
        assert_relative_eq!(back, 4e14, max_relative = 1e-5);
    }

    #[test]
    fn test_fractional_errors_preserved() {
        let conv = b13();
        let (m, ep, em) = conv
            .convert_with_errors(
                3.0,
                0.6,
                0.3,
                0.2,
                MassDefinition::M500C,
                MassDefinition::M500C,
            )
            .unwrap();
        assert_eq!((m, ep, em), (3.0, 0.6, 0.3));

        let (m, ep, em) = conv
            .convert_with_errors(
                3e14,
                6e13,
                3e13,
                0.2,
                MassDefinition::M500C,
                MassDefinition::M200M,
            )
            .unwrap();
        assert_relative_eq!(ep / m, 0.2, max_relative = 1e-12);
        assert_relative_eq!(em / m, 0.1, max_relative = 1e-12);
    }
}
