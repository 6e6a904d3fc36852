//! # Per-tile calibration tables
//!
//! Read-only models loaded once per run and shared by every worker:
//!
//! * **Q function** – filter mismatch `Q(θ500)` per tile, from `selFn/QFit.csv` (fit) or
//!   `selFn/QInjection.csv` (source injection), or a hybrid of both ([`QSource`]).
//! * **fRel weights** – per-tile observing-frequency weights for the relativistic correction,
//!   from the optional `selFn/fRelWeights.csv`; tiles without an entry use `{148 GHz: 1.0}`.
//!
//! Both are bundled in [`Calibration`], which is passed by reference to the mass stages.
//!
//! File formats
//! -----------------
//! ```text
//! tileName,theta500Arcmin,Q           tileName,obsFreqGHz,weight
//! 1_0_0,0.5,0.21                      1_0_0,98.0,0.35
//! 1_0_0,1.0,0.38                      1_0_0,150.0,0.65
//! ```
//! Tile names are upper-cased on load and on lookup.
use std::fmt;
use std::str::FromStr;

use camino::Utf8Path;
use itertools::Itertools;
use log::{debug, info};
use smallvec::{smallvec, SmallVec};

use crate::catalog::Catalog;
use crate::constants::{ArcMin, FastHashMap, TileName, COL_TILE};
use crate::interpolation::CubicSpline;
use crate::nemo_errors::NemoError;

pub const Q_FIT_FILE: &str = "QFit.csv";
pub const Q_INJECTION_FILE: &str = "QInjection.csv";
pub const FREL_WEIGHTS_FILE: &str = "fRelWeights.csv";

/// Frequency weights of one tile: `(obsFreqGHz, weight)` pairs.
pub type FreqWeights = SmallVec<[(f64, f64); 4]>;

/// Weights used when a tile has no entry: all signal at 148 GHz.
pub fn default_freq_weights() -> FreqWeights {
    smallvec![(148.0, 1.0)]
}

/// Where the Q function comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QSource {
    #[default]
    Fit,
    Injection,
    /// Injection values inside the injection table's θ range, fit values outside.
    Hybrid,
}

impl FromStr for QSource {
    type Err = NemoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fit" => Ok(QSource::Fit),
            "injection" => Ok(QSource::Injection),
            "hybrid" => Ok(QSource::Hybrid),
            other => Err(NemoError::InvalidQSource(other.to_string())),
        }
    }
}

impl fmt::Display for QSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QSource::Fit => "fit",
            QSource::Injection => "injection",
            QSource::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

/// Q(θ500) for a single tile.
#[derive(Debug, Clone, PartialEq)]
pub enum QFunction {
    Spline(CubicSpline),
    Hybrid {
        injection: CubicSpline,
        fit: CubicSpline,
    },
}

impl QFunction {
    /// Evaluate Q at `theta500` (arcmin); θ is clamped to the tabulated range.
    pub fn evaluate(&self, theta500: ArcMin) -> f64 {
        match self {
            QFunction::Spline(s) => s.evaluate_clamped(theta500),
            QFunction::Hybrid { injection, fit } => {
                let (lo, hi) = injection.domain();
                if (lo..=hi).contains(&theta500) {
                    injection.evaluate(theta500)
                } else {
                    fit.evaluate_clamped(theta500)
                }
            }
        }
    }
}

/// Per-tile Q functions.
#[derive(Debug, Clone, Default)]
pub struct QCalibration {
    tiles: FastHashMap<TileName, QFunction>,
}

impl QCalibration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the Q function of a tile.
    pub fn insert(&mut self, tile: &str, q: QFunction) {
        self.tiles.insert(tile.to_uppercase(), q);
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tile_names(&self) -> Vec<&str> {
        self.tiles.keys().map(String::as_str).sorted().collect()
    }

    /// Q function of `tile`. A table holding a single tile serves every tile.
    pub fn get(&self, tile: &str) -> Result<&QFunction, NemoError> {
        if let Some(q) = self.tiles.get(&tile.to_uppercase()) {
            return Ok(q);
        }
        if self.tiles.len() == 1 {
            if let Some(q) = self.tiles.values().next() {
                return Ok(q);
            }
        }
        Err(NemoError::MissingCalibration {
            what: "Q".into(),
            tile: tile.to_string(),
        })
    }

    /// Build splines from a `tileName,theta500Arcmin,Q` table.
    pub fn from_catalog(table: &Catalog, origin: &str) -> Result<Self, NemoError> {
        let splines = splines_by_tile(table, origin)?;
        let mut q = QCalibration::new();
        for (tile, spline) in splines {
            q.insert(&tile, QFunction::Spline(spline));
        }
        Ok(q)
    }

    /// Combine injection and fit tables: tiles present in both become [`QFunction::Hybrid`],
    /// tiles present in only one use that one.
    pub fn hybrid(injection: &Catalog, fit: &Catalog, origin: &str) -> Result<Self, NemoError> {
        let mut fit_splines = splines_by_tile(fit, origin)?;
        let mut q = QCalibration::new();
        for (tile, inj) in splines_by_tile(injection, origin)? {
            let entry = match fit_splines.remove(&tile) {
                Some(fit) => QFunction::Hybrid {
                    injection: inj,
                    fit,
                },
                None => QFunction::Spline(inj),
            };
            q.insert(&tile, entry);
        }
        for (tile, fit) in fit_splines {
            q.insert(&tile, QFunction::Spline(fit));
        }
        Ok(q)
    }

    /// Load the Q calibration for `source` from a `selFn/` directory.
    pub fn load(sel_fn_dir: &Utf8Path, source: QSource) -> Result<Self, NemoError> {
        let fit_path = sel_fn_dir.join(Q_FIT_FILE);
        let inj_path = sel_fn_dir.join(Q_INJECTION_FILE);
        let q = match source {
            QSource::Fit => Self::from_catalog(&Catalog::read(&fit_path)?, fit_path.as_str())?,
            QSource::Injection => {
                Self::from_catalog(&Catalog::read(&inj_path)?, inj_path.as_str())?
            }
            QSource::Hybrid => Self::hybrid(
                &Catalog::read(&inj_path)?,
                &Catalog::read(&fit_path)?,
                sel_fn_dir.as_str(),
            )?,
        };
        info!(
            "Loaded Q ({source}) for {} tile(s) from {sel_fn_dir}",
            q.len()
        );
        Ok(q)
    }
}

fn splines_by_tile(
    table: &Catalog,
    origin: &str,
) -> Result<FastHashMap<TileName, CubicSpline>, NemoError> {
    let tiles = table.texts(COL_TILE)?;
    let theta = table.floats("theta500Arcmin")?;
    let q = table.floats("Q")?;

    let mut grouped: FastHashMap<TileName, Vec<(f64, f64)>> = FastHashMap::default();
    for ((tile, t), v) in tiles.iter().zip(theta).zip(q) {
        grouped.entry(tile.to_uppercase()).or_default().push((t, v));
    }

    let mut out = FastHashMap::default();
    for (tile, mut points) in grouped {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (x, y): (Vec<f64>, Vec<f64>) = points.into_iter().unzip();
        let spline = CubicSpline::new(&x, &y).map_err(|e| NemoError::MalformedTable {
            path: origin.to_string(),
            reason: format!("tile {tile}: {e}"),
        })?;
        out.insert(tile, spline);
    }
    Ok(out)
}

/// Per-tile relativistic frequency weights.
#[derive(Debug, Clone, Default)]
pub struct FRelWeights {
    tiles: FastHashMap<TileName, FreqWeights>,
}

impl FRelWeights {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tile: &str, weights: FreqWeights) {
        self.tiles.insert(tile.to_uppercase(), weights);
    }

    /// Weights of `tile`, or the 148 GHz default.
    pub fn get(&self, tile: &str) -> FreqWeights {
        self.tiles
            .get(&tile.to_uppercase())
            .cloned()
            .unwrap_or_else(default_freq_weights)
    }

    pub fn from_catalog(table: &Catalog) -> Result<Self, NemoError> {
        let tiles = table.texts(COL_TILE)?;
        let freqs = table.floats("obsFreqGHz")?;
        let weights = table.floats("weight")?;
        let mut out = FRelWeights::new();
        for ((tile, f), w) in tiles.iter().zip(freqs).zip(weights) {
            out.tiles
                .entry(tile.to_uppercase())
                .or_default()
                .push((f, w));
        }
        Ok(out)
    }

    /// Load `selFn/fRelWeights.csv` when present; otherwise every tile uses the default.
    pub fn load(sel_fn_dir: &Utf8Path) -> Result<Self, NemoError> {
        let path = sel_fn_dir.join(FREL_WEIGHTS_FILE);
        if !path.exists() {
            debug!("No {path}: using 148 GHz relativistic weights for all tiles");
            return Ok(FRelWeights::new());
        }
        Self::from_catalog(&Catalog::read(&path)?)
    }
}

/// Immutable calibration bundle for one run.
#[derive(Debug, Clone, Default)]
pub struct Calibration {
    pub source: QSource,
    pub q: QCalibration,
    pub frel: FRelWeights,
}

impl Calibration {
    pub fn new(source: QSource, q: QCalibration, frel: FRelWeights) -> Self {
        Calibration { source, q, frel }
    }

    /// Load Q and fRel weights from `selFn/`.
    pub fn load(sel_fn_dir: &Utf8Path, source: QSource) -> Result<Self, NemoError> {
        Ok(Calibration {
            source,
            q: QCalibration::load(sel_fn_dir, source)?,
            frel: FRelWeights::load(sel_fn_dir)?,
        })
    }
}
