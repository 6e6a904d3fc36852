use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use log::error;

use nemo_mass::calibration::QSource;
use nemo_mass::nemo_errors::NemoError;
use nemo_mass::pipeline::{self, ParallelSettings, RunSettings};

/// Calculate SZ cluster masses for a nemo catalog.
#[derive(Parser, Debug)]
#[command(name = "nemo-mass", version, about)]
struct Cli {
    /// nemo .yml config file
    config: Utf8PathBuf,

    /// Catalog to process (default: the optimal catalog of the config's output directory)
    #[arg(long)]
    catalog: Option<Utf8PathBuf>,

    /// Output catalog (default: derived from the catalog or config path)
    #[arg(long)]
    output: Option<Utf8PathBuf>,

    /// Source of the Q function: fit, injection or hybrid
    #[arg(long = "Q-source", default_value = "fit")]
    q_source: String,

    /// Cross-match radius in arcmin when attaching redshifts
    #[arg(long = "x-match-arcmin", default_value_t = 2.5)]
    x_match_arcmin: f64,

    /// Redshift column name (default: auto-detected)
    #[arg(long = "z-column")]
    z_column: Option<String>,

    /// Redshift error column name (default: auto-detected, zero if absent)
    #[arg(long = "z-error-column")]
    z_error_column: Option<String>,

    /// Measure the SZ signal at the catalog positions (automatic when signal columns are absent)
    #[arg(long = "forced-photometry")]
    forced_photometry: bool,

    /// Catalog providing redshifts, cross-matched against the input
    #[arg(long = "redshift-catalog")]
    redshift_catalog: Option<Utf8PathBuf>,

    /// Run in parallel over several workers
    #[arg(long)]
    mpi: bool,

    /// Report worker failures instead of aborting (parallel mode only)
    #[arg(long = "no-strict-errors")]
    no_strict_errors: bool,

    /// Number of workers in parallel mode (default: available cores)
    #[arg(long)]
    workers: Option<usize>,
}

impl Cli {
    fn settings(&self) -> Result<RunSettings, NemoError> {
        let q_source: QSource = self.q_source.parse()?;
        let parallel = ParallelSettings::from_flags(self.mpi, !self.no_strict_errors, self.workers)?;
        Ok(RunSettings {
            config_path: self.config.clone(),
            catalog: self.catalog.clone(),
            output: self.output.clone(),
            q_source,
            x_match_arcmin: self.x_match_arcmin,
            z_column: self.z_column.clone(),
            z_err_column: self.z_error_column.clone(),
            forced_photometry: self.forced_photometry,
            redshift_catalog: self.redshift_catalog.clone(),
            parallel,
        })
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = cli.settings().and_then(|settings| pipeline::run(&settings));
    match result {
        Ok(summary) => {
            if let Some(d) = summary.diagnostics {
                println!("{d}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{} error: {err}", err.kind());
            ExitCode::FAILURE
        }
    }
}
