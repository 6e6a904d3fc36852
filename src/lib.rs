pub mod calibration;
pub mod catalog;
pub mod constants;
pub mod cosmology;
pub mod crossmatch;
pub mod diagnostics;
pub mod interpolation;
pub mod mass_definition;
pub mod mass_estimator;
pub mod mass_function;
pub mod nemo_errors;
pub mod options;
pub mod parallel;
pub mod photometry;
pub mod pipeline;
pub mod relativistic;

pub use catalog::Catalog;
pub use nemo_errors::NemoError;
pub use options::{MassOptions, NemoConfig};
pub use pipeline::{run, RunSettings, RunSummary};
