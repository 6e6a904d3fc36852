//! # Constants and type definitions for nemo-mass
//!
//! This module centralizes the **physical constants**, **conversion factors**, **column names**
//! and **common type definitions** used throughout the crate.
//!
//! ## Overview
//!
//! - Physical constants used by the relativistic SZ correction and halo densities
//! - Unit conversions (degrees ↔ radians ↔ arcminutes, signal scaling)
//! - Core type aliases used across the crate
//! - Canonical catalog column names shared by every stage of the mass driver
//!
//! These definitions are used by all main modules, including the cross-matcher, the mass
//! estimator and the partition/gather coordinator.

use std::collections::HashMap;

use ahash::RandomState;

// -------------------------------------------------------------------------------------------------
// Physical constants and unit conversions
// -------------------------------------------------------------------------------------------------

/// Gravitational constant in MSun⁻¹ km² s⁻² Mpc
pub const G_MSUN_KM2_S2_MPC: f64 = 4.301e-9;

/// Speed of light in km/s
pub const C_KM_S: f64 = 2.99792458e5;

/// Planck constant (J s), as used by the Itoh et al. (1998) formulae
pub const H_PLANCK: f64 = 6.63e-34;

/// Boltzmann constant (J/K)
pub const K_BOLTZMANN: f64 = 1.38e-23;

/// Electron mass (kg)
pub const M_ELECTRON: f64 = 9.11e-31;

/// Elementary charge (C)
pub const E_CHARGE: f64 = 1.6e-19;

/// Speed of light in m/s, rounded as in the relativistic correction formulae
pub const C_M_S: f64 = 3e8;

/// CMB temperature (K)
pub const T_CMB: f64 = 2.726;

/// Degrees → arcminutes
pub const ARCMIN_PER_DEG: f64 = 60.0;

/// Scale of the `fixed_y_c` / `fixed_err_y_c` columns (values are stored in units of 1e-4)
pub const Y_C_UNIT: f64 = 1e-4;

/// Scale of every mass column written by the driver (values are stored in units of 1e14 MSun)
pub const MASS_UNIT_MSUN: f64 = 1e14;

/// Probability enclosed by the reported mass interval (1σ for a Gaussian)
pub const ONE_SIGMA_PROBABILITY: f64 = 0.6827;

/// Maximum iterations for size-matching loops (mass-definition inversion)
pub const MAX_SIZE_MATCH_ITER: usize = 20;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Angle in degrees
pub type Degree = f64;
/// Angle in arcminutes
pub type ArcMin = f64;
/// Mass in solar masses
pub type MSun = f64;
/// Cosmological redshift
pub type Redshift = f64;
/// Processing tile identifier (always upper case once loaded)
pub type TileName = String;

/// Hash map using the crate-wide fast hasher.
pub type FastHashMap<K, V> = HashMap<K, V, RandomState>;

// -------------------------------------------------------------------------------------------------
// Catalog column names
// -------------------------------------------------------------------------------------------------

pub const COL_RA: &str = "RADeg";
pub const COL_DEC: &str = "decDeg";
pub const COL_NAME: &str = "name";
pub const COL_TILE: &str = "tileName";
pub const COL_REDSHIFT: &str = "redshift";
pub const COL_REDSHIFT_ERR: &str = "redshiftErr";
pub const COL_Y_C: &str = "fixed_y_c";
pub const COL_ERR_Y_C: &str = "fixed_err_y_c";
pub const COL_SNR: &str = "fixed_SNR";
pub const COL_SORT_INDEX: &str = "sortIndex";
pub const COL_Q: &str = "Q";

/// Redshift column candidates, searched in order (first match wins).
pub const REDSHIFT_CANDIDATES: [&str; 6] = ["z", "Z", "REDSHIFT", "Redshift", "z_cl", "Photz"];

/// Redshift uncertainty column candidates, searched in order.
pub const REDSHIFT_ERR_CANDIDATES: [&str; 2] = ["zErr", "dz"];

/// Prefix of ground-truth columns in mock catalogs.
pub const TRUE_PREFIX: &str = "true_";

/// Converts an angle in degrees to arcminutes.
#[inline]
pub fn deg_to_arcmin(deg: Degree) -> ArcMin {
    deg * ARCMIN_PER_DEG
}

/// Converts an angle in arcminutes to degrees.
#[inline]
pub fn arcmin_to_deg(arcmin: ArcMin) -> Degree {
    arcmin / ARCMIN_PER_DEG
}
