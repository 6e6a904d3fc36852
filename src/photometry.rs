//! # Forced photometry
//!
//! When a catalog carries positions and redshifts but no SZ signal columns, the signal is
//! measured at the fixed positions on the survey's reference-scale filtered maps, and the
//! redshifts are re-attached by cross-matching the measurements back to the input rows.
//!
//! Components
//! -----------------
//! * [`FilteredPhotometry`] – the extraction capability: measure `fixed_y_c`, `fixed_err_y_c`,
//!   `fixed_SNR` and `tileName` at requested positions.
//! * [`ExtractionRequest`] – which filters to use and the SNR threshold to apply.
//! * [`MapPhotometry`] – backend sampling the nearest pixel of per-tile filtered / RMS maps
//!   stored as header-less CSV grids under `filteredMaps/`.
//! * [`ForcedPhotometry`] – the adapter: redshift column detection, permissive single-filter
//!   extraction, cross-match re-attachment.
//!
//! Map layout
//! -----------------
//! `filteredMaps/{photFilter}#{tileName}_filteredMap.csv` holds y_c (dimensionless) and
//! `..._RMSMap.csv` its noise. Row `i` of an `ny × nx` grid sits at
//! `decMin + i·(decMax − decMin)/(ny − 1)`, column `j` at `RAMin + j·(RAMax − RAMin)/(nx − 1)`.
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info};

use crate::catalog::{Catalog, ColumnData};
use crate::constants::{
    FastHashMap, COL_DEC, COL_ERR_Y_C, COL_NAME, COL_RA, COL_REDSHIFT, COL_REDSHIFT_ERR, COL_SNR,
    COL_TILE, COL_Y_C, REDSHIFT_CANDIDATES, REDSHIFT_ERR_CANDIDATES, Y_C_UNIT,
};
use crate::crossmatch::cross_match;
use crate::nemo_errors::NemoError;
use crate::options::TileDefinition;

/// SNR threshold low enough that every measured position is kept.
pub const PERMISSIVE_THRESHOLD: f64 = -99.0;

/// What to extract: the filters to run and the minimum SNR to keep.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRequest {
    pub filters: Vec<String>,
    pub threshold_sigma: f64,
}

impl ExtractionRequest {
    /// A single reference filter with the SNR cut disabled.
    pub fn forced(phot_filter: &str) -> Self {
        ExtractionRequest {
            filters: vec![phot_filter.to_string()],
            threshold_sigma: PERMISSIVE_THRESHOLD,
        }
    }
}

/// Fixed-position signal extraction on filtered maps.
pub trait FilteredPhotometry: Send + Sync {
    /// Measure the signal at each `RADeg`/`decDeg` of `positions`.
    ///
    /// Return
    /// ----------
    /// * A catalog with `RADeg`, `decDeg`, `fixed_y_c`, `fixed_err_y_c`, `fixed_SNR` and
    ///   `tileName` (plus `name` when the positions carry one). Positions that cannot be
    ///   measured are absent.
    fn measure(&self, positions: &Catalog, request: &ExtractionRequest) -> Result<Catalog, NemoError>;
}

/// A filtered map and its noise map on the same pixel grid.
#[derive(Debug, Clone, PartialEq)]
struct TileMaps {
    signal: Vec<Vec<f64>>,
    rms: Vec<Vec<f64>>,
}

impl TileMaps {
    fn sample(&self, tile: &TileDefinition, ra: f64, dec: f64) -> Option<(f64, f64)> {
        let [ra_min, ra_max, dec_min, dec_max] = tile.ra_dec_section;
        let ny = self.signal.len();
        let nx = self.signal.first()?.len();
        let pixel = |v: f64, lo: f64, hi: f64, n: usize| -> usize {
            if n < 2 || hi <= lo {
                return 0;
            }
            (((v - lo) / (hi - lo)) * (n - 1) as f64)
                .round()
                .clamp(0.0, (n - 1) as f64) as usize
        };
        let i = pixel(dec, dec_min, dec_max, ny);
        let j = pixel(ra, ra_min, ra_max, nx);
        let value = *self.signal.get(i)?.get(j)?;
        let rms = *self.rms.get(i)?.get(j)?;
        Some((value, rms))
    }
}

fn read_grid(path: &Utf8Path) -> Result<Vec<Vec<f64>>, NemoError> {
    let malformed = |reason: String| NemoError::MalformedTable {
        path: path.to_string(),
        reason,
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut grid = Vec::new();
    for record in reader.records() {
        let row = record?
            .iter()
            .map(|s| {
                s.parse::<f64>()
                    .map_err(|_| malformed(format!("non-numeric pixel '{s}'")))
            })
            .collect::<Result<Vec<f64>, _>>()?;
        grid.push(row);
    }
    if grid.is_empty() {
        return Err(malformed("empty map".into()));
    }
    Ok(grid)
}

/// Nearest-pixel photometry on per-tile CSV maps.
#[derive(Debug)]
pub struct MapPhotometry {
    maps_dir: Utf8PathBuf,
    tiles: Vec<TileDefinition>,
    cache: Mutex<FastHashMap<(String, String), Arc<TileMaps>>>,
}

impl MapPhotometry {
    pub fn new(maps_dir: &Utf8Path, tiles: Vec<TileDefinition>) -> Self {
        MapPhotometry {
            maps_dir: maps_dir.to_path_buf(),
            tiles,
            cache: Mutex::new(FastHashMap::default()),
        }
    }

    /// Path of the filtered map of `filter` on `tile`.
    pub fn filtered_map_path(&self, filter: &str, tile: &str) -> Utf8PathBuf {
        self.maps_dir.join(format!("{filter}#{tile}_filteredMap.csv"))
    }

    /// Path of the RMS map of `filter` on `tile`.
    pub fn rms_map_path(&self, filter: &str, tile: &str) -> Utf8PathBuf {
        self.maps_dir.join(format!("{filter}#{tile}_RMSMap.csv"))
    }

    fn maps(&self, filter: &str, tile: &str) -> Result<Arc<TileMaps>, NemoError> {
        let key = (filter.to_string(), tile.to_string());
        if let Some(m) = self.lock_cache().get(&key) {
            return Ok(Arc::clone(m));
        }
        let signal = read_grid(&self.filtered_map_path(filter, tile))?;
        let rms = read_grid(&self.rms_map_path(filter, tile))?;
        if rms.len() != signal.len() || rms.first().map(Vec::len) != signal.first().map(Vec::len) {
            return Err(NemoError::MalformedTable {
                path: self.rms_map_path(filter, tile).to_string(),
                reason: "RMS map shape differs from the filtered map".into(),
            });
        }
        let maps = Arc::new(TileMaps { signal, rms });
        self.lock_cache().insert(key, Arc::clone(&maps));
        Ok(maps)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, FastHashMap<(String, String), Arc<TileMaps>>> {
        // a poisoned cache only ever holds fully inserted entries
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FilteredPhotometry for MapPhotometry {
    fn measure(&self, positions: &Catalog, request: &ExtractionRequest) -> Result<Catalog, NemoError> {
        let ra = positions.floats(COL_RA)?;
        let dec = positions.floats(COL_DEC)?;
        let names = positions.texts(COL_NAME).ok();

        let mut out_ra = Vec::new();
        let mut out_dec = Vec::new();
        let mut out_name = Vec::new();
        let mut y_c = Vec::new();
        let mut err_y_c = Vec::new();
        let mut snr = Vec::new();
        let mut tiles = Vec::new();

        for filter in &request.filters {
            for i in 0..ra.len() {
                let Some(tile) = self.tiles.iter().find(|t| t.contains(ra[i], dec[i])) else {
                    debug!("({}, {}) lies outside all tiles", ra[i], dec[i]);
                    continue;
                };
                let maps = self.maps(filter, &tile.tile_name)?;
                let Some((value, rms)) = maps.sample(tile, ra[i], dec[i]) else {
                    continue;
                };
                if !(rms > 0.0) {
                    continue;
                }
                let s = value / rms;
                if s < request.threshold_sigma {
                    continue;
                }
                out_ra.push(ra[i]);
                out_dec.push(dec[i]);
                if let Some(n) = &names {
                    out_name.push(n[i].clone());
                }
                y_c.push(value / Y_C_UNIT);
                err_y_c.push(rms / Y_C_UNIT);
                snr.push(s);
                tiles.push(tile.tile_name.clone());
            }
        }

        let mut table = Catalog::new();
        if names.is_some() {
            table.add_column(COL_NAME, ColumnData::Text(out_name))?;
        }
        table.add_column(COL_RA, ColumnData::Float(out_ra))?;
        table.add_column(COL_DEC, ColumnData::Float(out_dec))?;
        table.add_column(COL_Y_C, ColumnData::Float(y_c))?;
        table.add_column(COL_ERR_Y_C, ColumnData::Float(err_y_c))?;
        table.add_column(COL_SNR, ColumnData::Float(snr))?;
        table.add_column(COL_TILE, ColumnData::Text(tiles))?;
        Ok(table)
    }
}

/// Name of the redshift column: `requested` when given, otherwise the first candidate present.
pub fn find_redshift_column(table: &Catalog, requested: Option<&str>) -> Result<String, NemoError> {
    match requested {
        Some(name) if table.has_column(name) => Ok(name.to_string()),
        Some(name) => Err(NemoError::RedshiftColumnNotFound(name.to_string())),
        None => REDSHIFT_CANDIDATES
            .iter()
            .find(|c| table.has_column(c))
            .map(|c| c.to_string())
            .ok_or_else(|| NemoError::RedshiftColumnNotFound(REDSHIFT_CANDIDATES.join(", "))),
    }
}

/// Name of the redshift error column, if any.
pub fn find_redshift_err_column(table: &Catalog, requested: Option<&str>) -> Option<String> {
    match requested {
        Some(name) => table.has_column(name).then(|| name.to_string()),
        None => REDSHIFT_ERR_CANDIDATES
            .iter()
            .find(|c| table.has_column(c))
            .map(|c| c.to_string()),
    }
}

/// Adapter running reference-filter photometry for a redshift catalog.
pub struct ForcedPhotometry<'a> {
    backend: &'a dyn FilteredPhotometry,
    phot_filter: String,
    x_match_arcmin: f64,
    z_column: Option<String>,
    z_err_column: Option<String>,
}

impl<'a> ForcedPhotometry<'a> {
    pub fn new(backend: &'a dyn FilteredPhotometry, phot_filter: &str, x_match_arcmin: f64) -> Self {
        ForcedPhotometry {
            backend,
            phot_filter: phot_filter.to_string(),
            x_match_arcmin,
            z_column: None,
            z_err_column: None,
        }
    }

    /// Use explicit redshift / redshift error column names instead of auto-detection.
    pub fn with_columns(mut self, z_column: Option<String>, z_err_column: Option<String>) -> Self {
        self.z_column = z_column;
        self.z_err_column = z_err_column;
        self
    }

    /// Read the catalog at `path` and run [`ForcedPhotometry::run`] on it.
    pub fn run_path(&self, path: &Utf8Path) -> Result<Catalog, NemoError> {
        self.run(&Catalog::read(path)?)
    }

    /// Measure the signal at every position of `input` and re-attach its redshifts.
    ///
    /// Return
    /// ----------
    /// * The photometry table with `redshift` and `redshiftErr` (zero when the input has no
    ///   error column), or [`NemoError::RedshiftColumnNotFound`] / [`NemoError::NoMatch`].
    pub fn run(&self, input: &Catalog) -> Result<Catalog, NemoError> {
        let z_col = find_redshift_column(input, self.z_column.as_deref())?;
        let z = input.floats(&z_col)?;
        let z_err = match find_redshift_err_column(input, self.z_err_column.as_deref()) {
            Some(c) => input.floats(&c)?,
            None => vec![0.0; input.len()],
        };
        info!(
            ">>> Forced photometry with filter {} on {} positions (redshift column '{z_col}')",
            self.phot_filter,
            input.len()
        );

        let mut positions = Catalog::new();
        positions.add_column(COL_RA, ColumnData::Float(input.floats(COL_RA)?))?;
        positions.add_column(COL_DEC, ColumnData::Float(input.floats(COL_DEC)?))?;
        if let Some(names) = input.column(COL_NAME) {
            positions.add_column(COL_NAME, names.data.clone())?;
        }

        let request = ExtractionRequest::forced(&self.phot_filter);
        let phot = self.backend.measure(&positions, &request)?;
        let matched = cross_match(&phot, input, self.x_match_arcmin)?;

        let mut table = matched.a;
        table.add_column(
            COL_REDSHIFT,
            ColumnData::Float(matched.b_indices.iter().map(|&j| z[j]).collect()),
        )?;
        table.add_column(
            COL_REDSHIFT_ERR,
            ColumnData::Float(matched.b_indices.iter().map(|&j| z_err[j]).collect()),
        )?;
        info!(
            "Forced photometry measured {} / {} positions",
            table.len(),
            input.len()
        );
        Ok(table)
    }
}

#[cfg(test)]
mod photometry_test {
    use super::*;
    use crate::catalog::csv_io::parse_csv;

    struct Constant;

    impl FilteredPhotometry for Constant {
        fn measure(&self, positions: &Catalog, request: &ExtractionRequest) -> Result<Catalog, NemoError> {
            assert_eq!(request.filters.len(), 1);
            assert_eq!(request.threshold_sigma, PERMISSIVE_THRESHOLD);
            let n = positions.len();
            let mut t = positions.clone();
            t.add_column(COL_Y_C, ColumnData::Float(vec![2.0; n]))?;
            t.add_column(COL_ERR_Y_C, ColumnData::Float(vec![0.5; n]))?;
            t.add_column(COL_SNR, ColumnData::Float(vec![4.0; n]))?;
            t.add_column(COL_TILE, ColumnData::Text(vec!["T1".into(); n]))?;
            Ok(t)
        }
    }

    #[test]
    fn test_redshift_detection() {
        let cat = parse_csv("RADeg,decDeg,z_cl,Photz\n1,2,0.3,0.4\n", "t").unwrap();
        assert_eq!(find_redshift_column(&cat, None).unwrap(), "z_cl");
        assert_eq!(find_redshift_column(&cat, Some("Photz")).unwrap(), "Photz");
        assert_eq!(
            find_redshift_column(&cat, Some("zspec")).unwrap_err(),
            NemoError::RedshiftColumnNotFound("zspec".into())
        );
        let bare = parse_csv("RADeg,decDeg\n1,2\n", "t").unwrap();
        assert!(matches!(
            find_redshift_column(&bare, None),
            Err(NemoError::RedshiftColumnNotFound(_))
        ));
        assert_eq!(find_redshift_err_column(&cat, None), None);
    }

    #[test]
    fn test_adapter_reattaches_redshift() {
        let input = parse_csv(
            "name,RADeg,decDeg,Z,dz\nA,10.0,-5.0,0.3,0.02\nB,20.0,-6.0,0.7,0.05\n",
            "t",
        )
        .unwrap();
        let adapter = ForcedPhotometry::new(&Constant, "Arnaud_M2e14_z0p4", 2.5);
        let out = adapter.run(&input).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out.floats(COL_REDSHIFT).unwrap(), vec![0.3, 0.7]);
        assert_eq!(out.floats(COL_REDSHIFT_ERR).unwrap(), vec![0.02, 0.05]);
        assert_eq!(out.floats(COL_Y_C).unwrap(), vec![2.0, 2.0]);
        assert_eq!(out.texts(COL_NAME).unwrap(), vec!["A", "B"]);
    }

    #[test]
    fn test_adapter_missing_error_column_defaults_to_zero() {
        let input = parse_csv("RADeg,decDeg,redshift\n10.0,-5.0,0.3\n", "t").unwrap();
        let adapter = ForcedPhotometry::new(&Constant, "f", 2.5)
            .with_columns(Some("redshift".into()), None);
        let out = adapter.run(&input).unwrap();
        assert_eq!(out.floats(COL_REDSHIFT_ERR).unwrap(), vec![0.0]);
    }

    #[test]
    fn test_nearest_pixel() {
        let tile = TileDefinition {
            tile_name: "T1".into(),
            ra_dec_section: [0.0, 2.0, 0.0, 1.0],
        };
        let maps = TileMaps {
            signal: vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]],
            rms: vec![vec![1.0; 3], vec![2.0; 3]],
        };
        assert_eq!(maps.sample(&tile, 0.1, 0.1), Some((1.0, 1.0)));
        assert_eq!(maps.sample(&tile, 1.9, 0.9), Some((6.0, 2.0)));
        assert_eq!(maps.sample(&tile, 1.2, 0.2), Some((2.0, 1.0)));
    }
}
