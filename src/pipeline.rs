//! # Mass driver
//!
//! Turns a detection (or mock) catalog into a mass catalog:
//!
//! 1. Load the config, derive the run directories and the input / output paths.
//! 2. Load the calibration bundle (Q for the chosen [`QSource`], fRel weights) and the mass
//!    function used for debiasing.
//! 3. Repair the catalog with forced photometry when it has no SZ signal columns (or when asked),
//!    otherwise attach redshifts (from a redshift catalog by cross-match, or by renaming a
//!    redshift-like column of the input).
//! 4. Compute the mass columns block by block on a [`WorkerPool`] and restore the input order.
//! 5. Write the catalog with `NEMOVER` / `QSOURCE` metadata and, for mocks, report the
//!    recovered-versus-true diagnostics.
//!
//! Row validity
//! -----------------
//! A row with `fixed_y_c <= 0` or a redshift that is not finite and positive (missing values,
//! `-1` / `-99` sentinels) is skipped; its mass columns stay at zero.
//!
//! Mass columns
//! -----------------
//! The posterior is always computed for M500c. For a primary label `L` (`M500`, or e.g.
//! `M200m`) the catalog receives `L`, `LUncorr`, `Q`, `LCal` (with a rescale factor), and the
//! same set for every `otherMassEstimates` target, each mass with `_errPlus` / `_errMinus`.
//! Masses are in units of 1e14 MSun.
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info, warn};

use crate::calibration::{Calibration, QSource};
use crate::catalog::{Catalog, ColumnData};
use crate::constants::{
    COL_ERR_Y_C, COL_Q, COL_REDSHIFT, COL_REDSHIFT_ERR, COL_TILE, COL_Y_C, MASS_UNIT_MSUN,
    Y_C_UNIT,
};
use crate::crossmatch::cross_match;
use crate::diagnostics::{is_mock, mock_recovery, MockDiagnostics};
use crate::mass_definition::{MassConverter, MassDefinition};
use crate::mass_estimator::{MassEstimate, MassEstimator, SignalInput};
use crate::mass_function::{MassFunction, TabulatedMassFunction, Tinker08MassFunction};
use crate::nemo_errors::NemoError;
use crate::options::{MassOptions, NemoConfig, RunDirs};
use crate::parallel::{ErrorMode, Role, WorkerPool};
use crate::photometry::{find_redshift_column, find_redshift_err_column, ForcedPhotometry, MapPhotometry};

/// Metadata key holding the software version.
pub const NEMOVER_KEY: &str = "NEMOVER";
/// Metadata key holding the Q-function source.
pub const QSOURCE_KEY: &str = "QSOURCE";

/// Whether a row enters the mass computation.
#[inline]
pub fn is_valid_row(y_c: f64, z: f64) -> bool {
    y_c > 0.0 && z.is_finite() && z > 0.0
}

/// Mass function used for debiasing: the configured table, otherwise Tinker et al. (2008).
pub fn load_mass_function(opts: &MassOptions) -> Result<Box<dyn MassFunction>, NemoError> {
    match &opts.mass_function_table {
        Some(path) => {
            info!("Using tabulated mass function {path}");
            Ok(Box::new(TabulatedMassFunction::load(path)?))
        }
        None => {
            debug!("Using the Tinker et al. (2008) mass function for {}", opts.cosmology());
            Ok(Box::new(Tinker08MassFunction::new(opts.cosmology())?))
        }
    }
}

/// Give the catalog `redshift` and `redshiftErr` columns.
///
/// Arguments
/// -----------------
/// * `catalog` – input rows.
/// * `redshift_catalog` – when given, `catalog` is cross-matched against it and unmatched rows
///   are dropped.
/// * `x_match_arcmin` – cross-match radius.
/// * `z_column`, `z_err_column` – explicit redshift column names in the redshift source.
///
/// Return
/// ----------
/// * The catalog with redshifts; a missing error column gives zero errors.
pub fn attach_redshifts(
    catalog: Catalog,
    redshift_catalog: Option<&Catalog>,
    x_match_arcmin: f64,
    z_column: Option<&str>,
    z_err_column: Option<&str>,
) -> Result<Catalog, NemoError> {
    match redshift_catalog {
        Some(z_tab) => {
            let z_col = find_redshift_column(z_tab, z_column)?;
            let z_err_col = find_redshift_err_column(z_tab, z_err_column);
            let matched = cross_match(&catalog, z_tab, x_match_arcmin)?;
            info!(
                "Matched {} / {} objects to redshift catalog",
                matched.a.len(),
                catalog.len()
            );
            let mut out = matched.a;
            out.add_column(COL_REDSHIFT, ColumnData::Float(matched.b.floats(&z_col)?))?;
            let z_err = match z_err_col {
                Some(c) => matched.b.floats(&c)?,
                None => vec![0.0; out.len()],
            };
            out.add_column(COL_REDSHIFT_ERR, ColumnData::Float(z_err))?;
            Ok(out)
        }
        None => {
            let mut out = catalog;
            if !out.has_column(COL_REDSHIFT) || z_column.is_some() {
                let z_col = find_redshift_column(&out, z_column)?;
                debug!("Using column '{z_col}' as redshift");
                out.add_column(COL_REDSHIFT, ColumnData::Float(out.floats(&z_col)?))?;
            }
            if !out.has_column(COL_REDSHIFT_ERR) || z_err_column.is_some() {
                let z_err = match find_redshift_err_column(&out, z_err_column) {
                    Some(c) => out.floats(&c)?,
                    None => vec![0.0; out.len()],
                };
                out.add_column(COL_REDSHIFT_ERR, ColumnData::Float(z_err))?;
            }
            Ok(out)
        }
    }
}

/// Append `name`, `name_errPlus`, `name_errMinus`.
fn push_mass_labels(labels: &mut Vec<String>, name: &str) {
    labels.push(name.to_string());
    labels.push(format!("{name}_errPlus"));
    labels.push(format!("{name}_errMinus"));
}

fn push_mass(values: &mut Vec<f64>, m: &MassEstimate) {
    values.extend([m.mass, m.err_plus, m.err_minus]);
}

/// Per-block mass computation for one run.
pub struct MassDriver<'a> {
    opts: &'a MassOptions,
    calibration: &'a Calibration,
    estimator: MassEstimator<'a>,
    converter: MassConverter,
}

impl<'a> MassDriver<'a> {
    pub fn new(
        opts: &'a MassOptions,
        calibration: &'a Calibration,
        mass_function: &'a dyn MassFunction,
    ) -> Self {
        MassDriver {
            opts,
            calibration,
            estimator: MassEstimator::new(opts, mass_function),
            converter: MassConverter::new(opts.conc_mass_relation, opts.cosmology()),
        }
    }

    /// Output mass columns, in the order they are written.
    pub fn output_labels(&self) -> Vec<String> {
        let mut labels = Vec::new();
        let primary = self.opts.primary_definition().label();
        push_mass_labels(&mut labels, &primary);
        push_mass_labels(&mut labels, &format!("{primary}Uncorr"));
        labels.push(COL_Q.to_string());
        if self.opts.rescale().is_some() {
            push_mass_labels(&mut labels, &format!("{primary}Cal"));
        }
        for other in &self.opts.other_mass_estimates {
            let t = other.definition().label();
            push_mass_labels(&mut labels, &t);
            push_mass_labels(&mut labels, &format!("{t}Uncorr"));
            if self.opts.rescale().is_some() {
                push_mass_labels(&mut labels, &format!("{t}Cal"));
            }
        }
        labels
    }

    fn convert(
        &self,
        m: &MassEstimate,
        z: f64,
        converter: &MassConverter,
        to: MassDefinition,
    ) -> Result<MassEstimate, NemoError> {
        if to == MassDefinition::M500C || m.mass <= 0.0 {
            return Ok(*m);
        }
        let (mass, ep, em) = converter.convert_with_errors(
            m.mass * MASS_UNIT_MSUN,
            m.err_plus * MASS_UNIT_MSUN,
            m.err_minus * MASS_UNIT_MSUN,
            z,
            MassDefinition::M500C,
            to,
        )?;
        Ok(MassEstimate::new(
            mass / MASS_UNIT_MSUN,
            ep / MASS_UNIT_MSUN,
            em / MASS_UNIT_MSUN,
        ))
    }

    /// Mass column values of one valid row, in [`MassDriver::output_labels`] order.
    pub fn row_values(&self, signal: &SignalInput, tile: &str) -> Result<Vec<f64>, NemoError> {
        let q_fn = self.calibration.q.get(tile)?;
        let weights = self.calibration.frel.get(tile);
        let result = self.estimator.estimate(signal, q_fn, &weights, true)?;
        let best = result.best();
        let rescale = self.opts.rescale();

        let mut values = Vec::new();
        let mut emit = |converter: &MassConverter, to: MassDefinition, with_q: bool| {
            let m = self.convert(&best, signal.z, converter, to)?;
            let uncorr = self.convert(&result.uncorr, signal.z, converter, to)?;
            push_mass(&mut values, &m);
            push_mass(&mut values, &uncorr);
            if with_q {
                values.push(result.q);
            }
            if let Some((factor, err)) = rescale {
                push_mass(&mut values, &uncorr.recalibrated(factor, err));
            }
            Ok::<(), NemoError>(())
        };

        emit(&self.converter, self.opts.primary_definition(), true)?;
        for other in &self.opts.other_mass_estimates {
            let converter = MassConverter::new(other.conc_mass_relation, self.opts.cosmology());
            emit(&converter, other.definition(), false)?;
        }
        Ok(values)
    }

    /// Add the mass columns to a block of rows.
    pub fn compute_block(&self, role: Role, mut block: Catalog) -> Result<Catalog, NemoError> {
        let y_c = block.floats(COL_Y_C)?;
        let err_y_c = block.floats(COL_ERR_Y_C)?;
        let z = block.floats(COL_REDSHIFT)?;
        let z_err = if block.has_column(COL_REDSHIFT_ERR) {
            block.floats(COL_REDSHIFT_ERR)?
        } else {
            vec![0.0; block.len()]
        };
        let tiles = if block.has_column(COL_TILE) {
            block.texts(COL_TILE)?
        } else {
            vec![String::new(); block.len()]
        };

        let labels = self.output_labels();
        let mut columns = vec![vec![0.0; block.len()]; labels.len()];
        let mut tally = RowTally::default();
        let mut progress = RowProgress::new(block.len() as u64, role.is_coordinator());

        for i in 0..block.len() {
            let valid = is_valid_row(y_c[i], z[i]);
            if valid {
                let signal = SignalInput {
                    y0: y_c[i] * Y_C_UNIT,
                    y0_err: err_y_c[i] * Y_C_UNIT,
                    z: z[i],
                    z_err: if z_err[i].is_finite() { z_err[i] } else { 0.0 },
                };
                let values = self.row_values(&signal, &tiles[i])?;
                debug!("Row {i}: y0 = {:e}, z = {} -> {:?}", signal.y0, signal.z, values.first());
                for (col, v) in columns.iter_mut().zip(values) {
                    col[i] = v;
                }
            }
            tally.record(valid);
            progress.update(&tally);
        }
        progress.finish();

        if tally.skipped > 0 {
            warn!("{role}: {tally} (fixed_y_c <= 0 or no usable redshift)");
        } else {
            debug!("{role}: {tally}");
        }
        for (label, col) in labels.iter().zip(columns) {
            block.add_column(label, ColumnData::Float(col))?;
        }
        Ok(block)
    }

    /// Compute the mass columns of `catalog` on `pool` and restore the input order.
    pub fn run(&self, catalog: &Catalog, pool: &WorkerPool) -> Result<Catalog, NemoError> {
        info!(
            ">>> Calculating masses for {} objects on {} worker(s)",
            catalog.len(),
            pool.n_workers()
        );
        let mut out = pool.run(catalog, |role, block| self.compute_block(role, block))?;
        out.set_metadata(NEMOVER_KEY, env!("CARGO_PKG_VERSION"));
        out.set_metadata(QSOURCE_KEY, &self.calibration.source.to_string());
        Ok(out)
    }
}

/// Rows of a block sent through the estimator versus skipped by [`is_valid_row`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowTally {
    pub computed: usize,
    pub skipped: usize,
}

impl RowTally {
    pub fn record(&mut self, valid: bool) {
        if valid {
            self.computed += 1;
        } else {
            self.skipped += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.computed + self.skipped
    }
}

impl fmt::Display for RowTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} rows computed, {} skipped",
            self.computed,
            self.total(),
            self.skipped
        )
    }
}

/// Progress of the coordinator's block; rate and ETA come from indicatif.
#[cfg(feature = "progress")]
struct RowProgress(Option<indicatif::ProgressBar>);

#[cfg(feature = "progress")]
impl RowProgress {
    fn new(total: u64, enabled: bool) -> Self {
        use indicatif::{ProgressBar, ProgressStyle};
        RowProgress(enabled.then(|| {
            let pb = ProgressBar::new(total);
            pb.set_style(
                ProgressStyle::with_template(
                    "{bar:40.cyan/blue} {pos}/{len} | {per_sec} | ETA {eta} | {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            pb
        }))
    }

    fn update(&mut self, tally: &RowTally) {
        if let Some(pb) = &self.0 {
            pb.set_position(tally.total() as u64);
            pb.set_message(format!("{} skipped", tally.skipped));
        }
    }

    fn finish(self) {
        if let Some(pb) = self.0 {
            pb.finish_and_clear();
        }
    }
}

#[cfg(not(feature = "progress"))]
struct RowProgress;

#[cfg(not(feature = "progress"))]
impl RowProgress {
    fn new(_total: u64, _enabled: bool) -> Self {
        RowProgress
    }

    fn update(&mut self, _tally: &RowTally) {}

    fn finish(self) {}
}

/// Parallel execution settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelSettings {
    pub n_workers: usize,
    pub mode: ErrorMode,
}

impl ParallelSettings {
    /// Check the command-line combination and build the settings.
    ///
    /// Return
    /// ----------
    /// * `None` for a serial run, or [`NemoError::InvalidCliCombination`] for parallel mode with a
    ///   single worker or relaxed errors without parallel mode.
    pub fn from_flags(
        mpi: bool,
        strict_errors: bool,
        workers: Option<usize>,
    ) -> Result<Option<Self>, NemoError> {
        if !mpi {
            if !strict_errors {
                return Err(NemoError::InvalidCliCombination(
                    "--no-strict-errors can only be used with --mpi".into(),
                ));
            }
            return Ok(None);
        }
        let n_workers = workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        if n_workers < 2 {
            return Err(NemoError::InvalidCliCombination(
                "parallel mode needs more than one worker; run without --mpi instead".into(),
            ));
        }
        Ok(Some(ParallelSettings {
            n_workers,
            mode: if strict_errors {
                ErrorMode::Strict
            } else {
                ErrorMode::Relaxed
            },
        }))
    }

    pub fn pool(&self) -> Result<WorkerPool, NemoError> {
        WorkerPool::new(self.n_workers, self.mode)
    }
}

/// Everything a mass run needs from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub config_path: Utf8PathBuf,
    pub catalog: Option<Utf8PathBuf>,
    pub output: Option<Utf8PathBuf>,
    pub q_source: QSource,
    pub x_match_arcmin: f64,
    pub z_column: Option<String>,
    pub z_err_column: Option<String>,
    pub forced_photometry: bool,
    pub redshift_catalog: Option<Utf8PathBuf>,
    pub parallel: Option<ParallelSettings>,
}

impl RunSettings {
    /// Serial run with default options for `config_path`.
    pub fn new(config_path: &Utf8Path) -> Self {
        RunSettings {
            config_path: config_path.to_path_buf(),
            catalog: None,
            output: None,
            q_source: QSource::default(),
            x_match_arcmin: 2.5,
            z_column: None,
            z_err_column: None,
            forced_photometry: false,
            redshift_catalog: None,
            parallel: None,
        }
    }
}

/// Outcome of [`run`].
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub output: Utf8PathBuf,
    pub catalog: Catalog,
    pub diagnostics: Option<MockDiagnostics>,
}

fn has_signal_columns(catalog: &Catalog) -> bool {
    catalog.has_column(COL_Y_C) && catalog.has_column(COL_ERR_Y_C)
}

/// Run the mass driver end to end.
pub fn run(settings: &RunSettings) -> Result<RunSummary, NemoError> {
    let config = NemoConfig::load(&settings.config_path)?;
    let dirs = RunDirs::new(&settings.config_path, &config)?;
    let catalog_path = settings
        .catalog
        .clone()
        .unwrap_or_else(|| dirs.default_catalog());
    let output = settings
        .output
        .clone()
        .unwrap_or_else(|| dirs.default_output(settings.catalog.as_deref()));

    let opts = &config.mass_options;
    info!("Mass options: {opts}");
    let calibration = Calibration::load(&dirs.sel_fn_dir, settings.q_source)?;
    let mass_function = load_mass_function(opts)?;

    info!(">>> Reading catalog {catalog_path}");
    let input = Catalog::read(&catalog_path)?;

    let table = if settings.forced_photometry || !has_signal_columns(&input) {
        let phot_filter = config.phot_filter.as_deref().ok_or_else(|| {
            NemoError::InvalidCliCombination(
                "forced photometry needs photFilter in the config file".into(),
            )
        })?;
        let backend = MapPhotometry::new(&dirs.filtered_maps_dir, config.tile_definitions.clone());
        ForcedPhotometry::new(&backend, phot_filter, settings.x_match_arcmin)
            .with_columns(settings.z_column.clone(), settings.z_err_column.clone())
            .run(&input)?
    } else {
        let z_tab = settings
            .redshift_catalog
            .as_deref()
            .map(Catalog::read)
            .transpose()?;
        attach_redshifts(
            input,
            z_tab.as_ref(),
            settings.x_match_arcmin,
            settings.z_column.as_deref(),
            settings.z_err_column.as_deref(),
        )?
    };

    let pool = match &settings.parallel {
        Some(p) => p.pool()?,
        None => WorkerPool::serial(),
    };
    let driver = MassDriver::new(opts, &calibration, mass_function.as_ref());
    let catalog = driver.run(&table, &pool)?;

    catalog.write(&output)?;
    info!("Wrote {output}");

    let diagnostics = if is_mock(&catalog) {
        let d = mock_recovery(&catalog)?;
        info!("Mock recovery:\n{d}");
        Some(d)
    } else {
        None
    };

    Ok(RunSummary {
        output,
        catalog,
        diagnostics,
    })
}
