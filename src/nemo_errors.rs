use std::fmt;

use thiserror::Error;

/// Broad class of a [`NemoError`], used by the driver to decide how a failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad CLI combination or invalid option; raised before any I/O.
    Configuration,
    /// Missing column, missing calibration, zero cross-matches, malformed input.
    Data,
    /// Numerical failure (non-convergence, posterior outside the mass grid).
    Computation,
    /// Failure raised inside a parallel worker.
    Worker,
    /// Underlying I/O or decoding failure.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration error",
            ErrorKind::Data => "data error",
            ErrorKind::Computation => "computation error",
            ErrorKind::Worker => "worker error",
            ErrorKind::Io => "I/O error",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum NemoError {
    // --- Configuration ---
    #[error("Invalid Q source '{0}' (expected one of: fit, injection, hybrid)")]
    InvalidQSource(String),

    #[error("Invalid mass option: {0}")]
    InvalidMassOption(String),

    #[error("Invalid command line: {0}")]
    InvalidCliCombination(String),

    #[error("Invalid config file path: {0}")]
    InvalidConfigPath(String),

    #[error("Duplicate tileName '{0}' in tileDefinitions - fix in config file")]
    DuplicateTileName(String),

    #[error("Unknown concentration-mass relation: {0}")]
    UnknownConcMassRelation(String),

    #[error("Unknown reference density type: {0}")]
    UnknownRhoType(String),

    // --- Data ---
    #[error("Column '{column}' not found in {context}")]
    MissingColumn { column: String, context: String },

    #[error("No redshift column found (tried: {0})")]
    RedshiftColumnNotFound(String),

    #[error("No objects cross-matched within {radius_arcmin} arcmin")]
    NoMatch { radius_arcmin: f64 },

    #[error("No {what} calibration available for tile '{tile}'")]
    MissingCalibration { what: String, tile: String },

    #[error("Malformed table {path}: {reason}")]
    MalformedTable { path: String, reason: String },

    #[error("Column '{column}' has {found} rows, expected {expected}")]
    ColumnLengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("Column '{0}' is not numeric")]
    NotNumericColumn(String),

    // --- Computation ---
    #[error("Mass conversion {from} -> {to} did not converge after {iterations} iterations")]
    ConversionNonConvergence {
        from: String,
        to: String,
        iterations: usize,
    },

    #[error("Mass posterior extends outside the mass grid (y0 = {y0:e}, z = {z})")]
    PosteriorOutOfRange { y0: f64, z: f64 },

    #[error("Mass posterior is degenerate (y0 = {y0:e}, z = {z})")]
    DegeneratePosterior { y0: f64, z: f64 },

    #[error("Root finding error: {0}")]
    RootFinding(#[from] roots::SearchError),

    // --- Workers ---
    #[error("Worker {rank} failed: {source}")]
    Worker {
        rank: usize,
        #[source]
        source: Box<NemoError>,
    },

    #[error("Unable to build the worker pool: {0}")]
    WorkerPool(String),

    // --- I/O ---
    #[error("Unable to perform file operation: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("YAML config error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(String),
}

impl NemoError {
    /// Shorthand for a [`NemoError::MissingColumn`].
    pub fn missing_column(column: &str, context: &str) -> Self {
        NemoError::MissingColumn {
            column: column.to_string(),
            context: context.to_string(),
        }
    }

    /// Taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        use NemoError::*;
        match self {
            InvalidQSource(_)
            | InvalidMassOption(_)
            | InvalidCliCombination(_)
            | InvalidConfigPath(_)
            | DuplicateTileName(_)
            | UnknownConcMassRelation(_)
            | UnknownRhoType(_) => ErrorKind::Configuration,

            MissingColumn { .. }
            | RedshiftColumnNotFound(_)
            | NoMatch { .. }
            | MissingCalibration { .. }
            | MalformedTable { .. }
            | ColumnLengthMismatch { .. }
            | NotNumericColumn(_) => ErrorKind::Data,

            ConversionNonConvergence { .. }
            | PosteriorOutOfRange { .. }
            | DegeneratePosterior { .. }
            | RootFinding(_) => ErrorKind::Computation,

            Worker { .. } | WorkerPool(_) => ErrorKind::Worker,

            Io(_) | Csv(_) | Yaml(_) | Parquet(_) | Arrow(_) => ErrorKind::Io,
        }
    }
}

impl PartialEq for NemoError {
    fn eq(&self, other: &Self) -> bool {
        use NemoError::*;
        match (self, other) {
            (InvalidQSource(a), InvalidQSource(b)) => a == b,
            (InvalidMassOption(a), InvalidMassOption(b)) => a == b,
            (InvalidCliCombination(a), InvalidCliCombination(b)) => a == b,
            (InvalidConfigPath(a), InvalidConfigPath(b)) => a == b,
            (DuplicateTileName(a), DuplicateTileName(b)) => a == b,
            (UnknownConcMassRelation(a), UnknownConcMassRelation(b)) => a == b,
            (UnknownRhoType(a), UnknownRhoType(b)) => a == b,
            (
                MissingColumn {
                    column: a,
                    context: ca,
                },
                MissingColumn {
                    column: b,
                    context: cb,
                },
            ) => a == b && ca == cb,
            (RedshiftColumnNotFound(a), RedshiftColumnNotFound(b)) => a == b,
            (NoMatch { radius_arcmin: a }, NoMatch { radius_arcmin: b }) => a == b,
            (
                MissingCalibration { what: a, tile: ta },
                MissingCalibration { what: b, tile: tb },
            ) => a == b && ta == tb,
            (MalformedTable { path: a, .. }, MalformedTable { path: b, .. }) => a == b,
            (
                ColumnLengthMismatch {
                    column: a,
                    expected: ea,
                    found: fa,
                },
                ColumnLengthMismatch {
                    column: b,
                    expected: eb,
                    found: fb,
                },
            ) => a == b && ea == eb && fa == fb,
            (NotNumericColumn(a), NotNumericColumn(b)) => a == b,
            (
                ConversionNonConvergence {
                    from: fa, to: ta, ..
                },
                ConversionNonConvergence {
                    from: fb, to: tb, ..
                },
            ) => fa == fb && ta == tb,
            (PosteriorOutOfRange { .. }, PosteriorOutOfRange { .. }) => true,
            (DegeneratePosterior { .. }, DegeneratePosterior { .. }) => true,
            (RootFinding(a), RootFinding(b)) => a == b,
            (Worker { rank: a, source: sa }, Worker { rank: b, source: sb }) => {
                a == b && sa == sb
            }
            (WorkerPool(a), WorkerPool(b)) => a == b,

            // Foreign errors are not comparable: equal if same variant
            (Io(_), Io(_)) => true,
            (Csv(_), Csv(_)) => true,
            (Yaml(_), Yaml(_)) => true,
            (Parquet(_), Parquet(_)) => true,
            (Arrow(a), Arrow(b)) => a == b,

            _ => false,
        }
    }
}
