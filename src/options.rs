//! # Run configuration
//!
//! This module defines the nemo `.yml` configuration ([`NemoConfig`]), the mass-estimation
//! options it carries ([`MassOptions`]) and the output directory layout derived from it
//! ([`RunDirs`]).
//!
//! ## Mass options
//!
//! [`MassOptions`] groups three things:
//!
//! - the y0–M scaling relation (`tenToA0`, `B0`, `Mpivot`, `sigma_int`, `Ez_gamma`,
//!   `onePlusRedshift_power`), the relativistic flag and the optional external recalibration
//!   (`rescaleFactor`, `rescaleFactorErr`),
//! - the cosmology (`H0`, `Om0`, `Ob0`, `sigma8`, `ns`) and the primary mass definition
//!   (`delta`, `rhoType`),
//! - extra mass definitions to report (`otherMassEstimates`) and an optional tabulated mass
//!   function (`massFunctionTable`).
//!
//! Defaults are the Arnaud et al. (2010) relation as used in Hasselfield et al. (2013).
//!
//! ## Example
//!
//! ```rust,no_run
//! use nemo_mass::options::MassOptions;
//!
//! let opts = MassOptions::builder()
//!     .ten_to_a0(4.95e-5)
//!     .b0(0.08)
//!     .sigma_int(0.2)
//!     .rescale_factor(0.68, 0.11)
//!     .build()
//!     .unwrap();
//! assert!(opts.relativistic_correction);
//! ```
//!
//! ## Config layout
//!
//! ```yaml
//! photFilter: Arnaud_M2e14_z0p4
//! thresholdSigma: 4.0
//! mapFilters:
//!   - label: Arnaud_M2e14_z0p4
//!     params: {}
//! tileDefinitions:
//!   - tileName: 1_0_0
//!     RADecSection: [0.0, 10.0, -5.0, 5.0]
//! massOptions:
//!   tenToA0: 4.95e-5
//!   B0: 0.08
//!   Mpivot: 3.0e+14
//!   otherMassEstimates:
//!     - {delta: 200, rhoType: matter, concMassRelation: B13}
//! ```
use std::collections::HashSet;
use std::fmt;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use log::info;
use serde::Deserialize;

use crate::cosmology::Cosmology;
use crate::mass_definition::{ConcMassRelation, MassDefinition, RhoType};
use crate::nemo_errors::NemoError;

/// An additional mass definition to report for every cluster.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtherMassEstimate {
    pub delta: f64,
    pub rho_type: RhoType,
    #[serde(default)]
    pub conc_mass_relation: ConcMassRelation,
}

impl OtherMassEstimate {
    pub fn definition(&self) -> MassDefinition {
        MassDefinition::new(self.delta, self.rho_type)
    }
}

/// Scaling relation, cosmology and output options for mass estimation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MassOptions {
    // --- Scaling relation ---
    #[serde(rename = "tenToA0")]
    pub ten_to_a0: f64,
    #[serde(rename = "B0")]
    pub b0: f64,
    /// Pivot mass (MSun).
    #[serde(rename = "Mpivot")]
    pub m_pivot: f64,
    /// Intrinsic log-normal scatter of the relation.
    pub sigma_int: f64,
    #[serde(rename = "Ez_gamma")]
    pub ez_gamma: f64,
    #[serde(rename = "onePlusRedshift_power")]
    pub one_plus_redshift_power: f64,
    #[serde(rename = "relativisticCorrection")]
    pub relativistic_correction: bool,
    /// External recalibration: `MCal = MUncorr / rescaleFactor`.
    #[serde(rename = "rescaleFactor")]
    pub rescale_factor: Option<f64>,
    #[serde(rename = "rescaleFactorErr")]
    pub rescale_factor_err: Option<f64>,

    // --- Cosmology ---
    #[serde(rename = "H0")]
    pub h0: f64,
    #[serde(rename = "Om0")]
    pub om0: f64,
    #[serde(rename = "Ob0")]
    pub ob0: f64,
    pub sigma8: f64,
    pub ns: f64,

    // --- Mass definitions ---
    #[serde(rename = "rhoType")]
    pub rho_type: RhoType,
    pub delta: f64,
    /// Relation used when the primary definition is not 500c.
    #[serde(rename = "concMassRelation")]
    pub conc_mass_relation: ConcMassRelation,
    #[serde(rename = "otherMassEstimates")]
    pub other_mass_estimates: Vec<OtherMassEstimate>,

    /// `z,log10M,dndlog10M` table; the built-in model is used when absent.
    #[serde(rename = "massFunctionTable")]
    pub mass_function_table: Option<Utf8PathBuf>,
}

impl Default for MassOptions {
    fn default() -> Self {
        MassOptions {
            ten_to_a0: 4.95e-5,
            b0: 0.08,
            m_pivot: 3e14,
            sigma_int: 0.2,
            ez_gamma: 2.0,
            one_plus_redshift_power: 0.0,
            relativistic_correction: true,
            rescale_factor: None,
            rescale_factor_err: None,

            h0: 70.0,
            om0: 0.3,
            ob0: 0.05,
            sigma8: 0.8,
            ns: 0.95,

            rho_type: RhoType::Critical,
            delta: 500.0,
            conc_mass_relation: ConcMassRelation::Bhattacharya13,
            other_mass_estimates: Vec::new(),

            mass_function_table: None,
        }
    }
}

impl MassOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fluent builder starting from the defaults.
    pub fn builder() -> MassOptionsBuilder {
        MassOptionsBuilder::new()
    }

    pub fn cosmology(&self) -> Cosmology {
        Cosmology::new(self.h0, self.om0, self.ob0, self.sigma8, self.ns)
    }

    /// Definition of the primary `M…` columns.
    pub fn primary_definition(&self) -> MassDefinition {
        MassDefinition::new(self.delta, self.rho_type)
    }

    /// `(rescaleFactor, rescaleFactorErr)` when recalibration is configured.
    pub fn rescale(&self) -> Option<(f64, f64)> {
        self.rescale_factor
            .map(|f| (f, self.rescale_factor_err.unwrap_or(0.0)))
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), NemoError> {
        let bad = |msg: String| Err(NemoError::InvalidMassOption(msg));
        if !(self.ten_to_a0 > 0.0) {
            return bad(format!("tenToA0 must be > 0 (got {})", self.ten_to_a0));
        }
        if !(self.m_pivot > 0.0) {
            return bad(format!("Mpivot must be > 0 (got {})", self.m_pivot));
        }
        if !(self.sigma_int >= 0.0) {
            return bad(format!("sigma_int must be >= 0 (got {})", self.sigma_int));
        }
        if !(self.h0 > 0.0) {
            return bad(format!("H0 must be > 0 (got {})", self.h0));
        }
        if !(self.om0 > 0.0 && self.om0 <= 1.0) {
            return bad(format!("Om0 must be in (0, 1] (got {})", self.om0));
        }
        if !(self.delta > 0.0) {
            return bad(format!("delta must be > 0 (got {})", self.delta));
        }
        if let Some(f) = self.rescale_factor {
            if !(f > 0.0) {
                return bad(format!("rescaleFactor must be > 0 (got {f})"));
            }
        }
        if let Some(e) = self.rescale_factor_err {
            if self.rescale_factor.is_none() {
                return bad("rescaleFactorErr given without rescaleFactor".into());
            }
            if !(e >= 0.0) {
                return bad(format!("rescaleFactorErr must be >= 0 (got {e})"));
            }
        }
        if let Some(o) = self.other_mass_estimates.iter().find(|o| !(o.delta > 0.0)) {
            return bad(format!("otherMassEstimates delta must be > 0 (got {})", o.delta));
        }
        Ok(())
    }
}

impl fmt::Display for MassOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            writeln!(f, "MassOptions")?;
            writeln!(f, "  tenToA0               = {:e}", self.ten_to_a0)?;
            writeln!(f, "  B0                    = {}", self.b0)?;
            writeln!(f, "  Mpivot                = {:e}", self.m_pivot)?;
            writeln!(f, "  sigma_int             = {}", self.sigma_int)?;
            writeln!(f, "  Ez_gamma              = {}", self.ez_gamma)?;
            writeln!(f, "  onePlusRedshift_power = {}", self.one_plus_redshift_power)?;
            writeln!(f, "  relativistic          = {}", self.relativistic_correction)?;
            if let Some((r, e)) = self.rescale() {
                writeln!(f, "  rescaleFactor         = {r} ± {e}")?;
            }
            writeln!(f, "  cosmology             = {}", self.cosmology())?;
            write!(f, "  definition            = {}", self.primary_definition())
        } else {
            write!(
                f,
                "A0={:e} B0={} Mpivot={:e} σint={} ({}, {})",
                self.ten_to_a0,
                self.b0,
                self.m_pivot,
                self.sigma_int,
                self.primary_definition(),
                self.cosmology()
            )
        }
    }
}

/// Builder for [`MassOptions`], validated on [`MassOptionsBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct MassOptionsBuilder {
    opts: MassOptions,
}

impl MassOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ten_to_a0(mut self, v: f64) -> Self {
        self.opts.ten_to_a0 = v;
        self
    }
    pub fn b0(mut self, v: f64) -> Self {
        self.opts.b0 = v;
        self
    }
    pub fn m_pivot(mut self, v: f64) -> Self {
        self.opts.m_pivot = v;
        self
    }
    pub fn sigma_int(mut self, v: f64) -> Self {
        self.opts.sigma_int = v;
        self
    }
    pub fn ez_gamma(mut self, v: f64) -> Self {
        self.opts.ez_gamma = v;
        self
    }
    pub fn one_plus_redshift_power(mut self, v: f64) -> Self {
        self.opts.one_plus_redshift_power = v;
        self
    }
    pub fn relativistic_correction(mut self, v: bool) -> Self {
        self.opts.relativistic_correction = v;
        self
    }
    pub fn rescale_factor(mut self, factor: f64, err: f64) -> Self {
        self.opts.rescale_factor = Some(factor);
        self.opts.rescale_factor_err = Some(err);
        self
    }
    pub fn cosmology(mut self, c: Cosmology) -> Self {
        self.opts.h0 = c.h0;
        self.opts.om0 = c.om0;
        self.opts.ob0 = c.ob0;
        self.opts.sigma8 = c.sigma8;
        self.opts.ns = c.ns;
        self
    }
    pub fn definition(mut self, def: MassDefinition) -> Self {
        self.opts.delta = def.delta;
        self.opts.rho_type = def.rho;
        self
    }
    pub fn conc_mass_relation(mut self, v: ConcMassRelation) -> Self {
        self.opts.conc_mass_relation = v;
        self
    }
    pub fn other_mass_estimate(mut self, v: OtherMassEstimate) -> Self {
        self.opts.other_mass_estimates.push(v);
        self
    }
    pub fn mass_function_table(mut self, path: Utf8PathBuf) -> Self {
        self.opts.mass_function_table = Some(path);
        self
    }

    pub fn build(self) -> Result<MassOptions, NemoError> {
        self.opts.validate()?;
        Ok(self.opts)
    }
}

/// A map filter entry; only the label matters here.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MapFilter {
    pub label: String,
    #[serde(default)]
    pub params: serde_yaml::Value,
}

/// A processing tile and its sky rectangle `[RAMin, RAMax, decMin, decMax]` (degrees).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TileDefinition {
    #[serde(rename = "tileName")]
    pub tile_name: String,
    #[serde(rename = "RADecSection")]
    pub ra_dec_section: [f64; 4],
}

impl TileDefinition {
    /// Whether (RA, Dec) lies inside this tile's rectangle (edges included).
    pub fn contains(&self, ra: f64, dec: f64) -> bool {
        let [ra_min, ra_max, dec_min, dec_max] = self.ra_dec_section;
        (ra_min..=ra_max).contains(&ra) && (dec_min..=dec_max).contains(&dec)
    }
}

fn default_threshold_sigma() -> f64 {
    4.0
}

/// Parsed nemo `.yml` configuration (the subset used by the mass driver).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NemoConfig {
    /// Reference filter used for fixed-scale photometry.
    pub phot_filter: Option<String>,
    #[serde(default)]
    pub map_filters: Vec<MapFilter>,
    #[serde(default = "default_threshold_sigma")]
    pub threshold_sigma: f64,
    #[serde(default)]
    pub tile_definitions: Vec<TileDefinition>,
    pub output_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub mass_options: MassOptions,
}

impl NemoConfig {
    /// Parse YAML text: tile names are upper-cased, duplicates rejected, mass options validated.
    pub fn from_yaml_str(text: &str) -> Result<Self, NemoError> {
        let mut config: NemoConfig = serde_yaml::from_str(text)?;
        let mut seen = HashSet::new();
        for tile in config.tile_definitions.iter_mut() {
            tile.tile_name = tile.tile_name.to_uppercase();
            if !seen.insert(tile.tile_name.clone()) {
                return Err(NemoError::DuplicateTileName(tile.tile_name.clone()));
            }
        }
        config.mass_options.validate()?;
        Ok(config)
    }

    pub fn load(path: &Utf8Path) -> Result<Self, NemoError> {
        info!(">>> Running .yml config file: {path}");
        let text = fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Tile containing (RA, Dec): the first matching definition.
    pub fn tile_at(&self, ra: f64, dec: f64) -> Option<&TileDefinition> {
        self.tile_definitions.iter().find(|t| t.contains(ra, dec))
    }
}

/// Output directories derived from the config file location.
#[derive(Debug, Clone, PartialEq)]
pub struct RunDirs {
    pub root_out_dir: Utf8PathBuf,
    pub sel_fn_dir: Utf8PathBuf,
    pub filtered_maps_dir: Utf8PathBuf,
    pub diagnostics_dir: Utf8PathBuf,
}

impl RunDirs {
    /// `outputDir` when set, otherwise the config path with its `.yml` suffix removed.
    pub fn new(config_path: &Utf8Path, config: &NemoConfig) -> Result<Self, NemoError> {
        let root_out_dir = match &config.output_dir {
            Some(dir) => dir.clone(),
            None => {
                let stem = config_path
                    .as_str()
                    .strip_suffix(".yml")
                    .ok_or_else(|| {
                        NemoError::InvalidConfigPath(format!(
                            "{config_path}: file must have .yml extension"
                        ))
                    })?;
                Utf8PathBuf::from(stem)
            }
        };
        Ok(RunDirs {
            sel_fn_dir: root_out_dir.join("selFn"),
            filtered_maps_dir: root_out_dir.join("filteredMaps"),
            diagnostics_dir: root_out_dir.join("diagnostics"),
            root_out_dir,
        })
    }

    /// Base name of the run (last component of the output directory).
    pub fn base_name(&self) -> &str {
        self.root_out_dir.file_name().unwrap_or("nemo")
    }

    /// `{rootOutDir}/{base}_optimalCatalog.csv`
    pub fn default_catalog(&self) -> Utf8PathBuf {
        self.root_out_dir
            .join(format!("{}_optimalCatalog.csv", self.base_name()))
    }

    /// Output path: the catalog path with `.csv` → `_mass.csv` when a catalog was given,
    /// otherwise `{rootOutDir}/{base}_mass.csv`.
    pub fn default_output(&self, catalog: Option<&Utf8Path>) -> Utf8PathBuf {
        match catalog {
            Some(cat) => {
                let s = cat.as_str();
                let stem = s
                    .strip_suffix(".csv")
                    .or_else(|| cat.extension().and_then(|e| s.strip_suffix(&format!(".{e}")[..])))
                    .unwrap_or(s);
                Utf8PathBuf::from(format!("{stem}_mass.csv"))
            }
            None => self
                .root_out_dir
                .join(format!("{}_mass.csv", self.base_name())),
        }
    }
}

#[cfg(test)]
mod options_test {
    use super::*;

    const CONFIG: &str = r#"
photFilter: Arnaud_M2e14_z0p4
thresholdSigma: 5.0
unfilteredMaps:
  - mapFileName: "maps/f150.fits"
mapFilters:
  - label: Arnaud_M2e14_z0p4
    class: ArnaudModelMatchedFilter
    params:
      M500MSun: 2.0e+14
tileDefinitions:
  - tileName: 1_0_0
    RADecSection: [0.0, 10.0, -5.0, 5.0]
  - tileName: tile2
    RADecSection: [10.0, 20.0, -5.0, 5.0]
massOptions:
  tenToA0: 4.95e-5
  B0: 0.08
  Mpivot: 3.0e+14
  sigma_int: 0.2
  rescaleFactor: 0.68
  rescaleFactorErr: 0.11
  H0: 70.0
  Om0: 0.3
  otherMassEstimates:
    - {delta: 200, rhoType: matter, concMassRelation: B13}
    - {delta: 200, rhoType: critical}
"#;

    #[test]
    fn test_parse_config() {
        let cfg = NemoConfig::from_yaml_str(CONFIG).unwrap();
        assert_eq!(cfg.phot_filter.as_deref(), Some("Arnaud_M2e14_z0p4"));
        assert_eq!(cfg.threshold_sigma, 5.0);
        assert_eq!(cfg.tile_definitions[1].tile_name, "TILE2");
        let mo = &cfg.mass_options;
        assert_eq!(mo.rescale(), Some((0.68, 0.11)));
        assert_eq!(mo.ez_gamma, 2.0);
        assert_eq!(mo.primary_definition(), MassDefinition::M500C);
        assert_eq!(mo.other_mass_estimates.len(), 2);
        assert_eq!(mo.other_mass_estimates[0].definition(), MassDefinition::M200M);
        assert_eq!(
            mo.other_mass_estimates[1].conc_mass_relation,
            ConcMassRelation::Bhattacharya13
        );
        assert_eq!(cfg.tile_at(12.0, 0.0).unwrap().tile_name, "TILE2");
        assert!(cfg.tile_at(40.0, 0.0).is_none());
    }

    #[test]
    fn test_duplicate_tiles() {
        let text = "tileDefinitions:\n  - {tileName: a, RADecSection: [0, 1, 0, 1]}\n  - {tileName: A, RADecSection: [1, 2, 0, 1]}\n";
        assert_eq!(
            NemoConfig::from_yaml_str(text).unwrap_err(),
            NemoError::DuplicateTileName("A".into())
        );
    }

    #[test]
    fn test_invalid_options() {
        assert!(MassOptions::builder().ten_to_a0(-1.0).build().is_err());
        assert!(MassOptions::builder().sigma_int(f64::NAN).build().is_err());
        let err = NemoConfig::from_yaml_str("massOptions:\n  rhoType: vacuum\n").unwrap_err();
        assert!(matches!(err, NemoError::Yaml(_)));
        let ok = MassOptions::builder()
            .definition(MassDefinition::M200M)
            .build()
            .unwrap();
        assert_eq!(ok.primary_definition().label(), "M200m");
    }

    #[test]
    fn test_run_dirs() {
        let cfg = NemoConfig::from_yaml_str("photFilter: f\n").unwrap();
        let dirs = RunDirs::new(Utf8Path::new("runs/S18d.yml"), &cfg).unwrap();
        assert_eq!(dirs.root_out_dir, Utf8PathBuf::from("runs/S18d"));
        assert_eq!(dirs.sel_fn_dir, Utf8PathBuf::from("runs/S18d/selFn"));
        assert_eq!(
            dirs.default_catalog(),
            Utf8PathBuf::from("runs/S18d/S18d_optimalCatalog.csv")
        );
        assert_eq!(
            dirs.default_output(None),
            Utf8PathBuf::from("runs/S18d/S18d_mass.csv")
        );
        assert_eq!(
            dirs.default_output(Some(Utf8Path::new("cats/redmapper.csv"))),
            Utf8PathBuf::from("cats/redmapper_mass.csv")
        );
        assert_eq!(
            dirs.default_output(Some(Utf8Path::new("cats/mock.parquet"))),
            Utf8PathBuf::from("cats/mock_mass.csv")
        );
        assert!(matches!(
            RunDirs::new(Utf8Path::new("runs/S18d.yaml"), &cfg),
            Err(NemoError::InvalidConfigPath(_))
        ));
    }
}
