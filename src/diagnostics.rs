//! # Mock-recovery diagnostics
//!
//! For mock catalogs (those carrying `true_M500`), compares the recovered masses with the truth
//! above a set of `fixed_SNR` thresholds. For each threshold the count of rows above it and the
//! mean, median, standard deviation and standard error of `recovered / true` are reported,
//! separately for the debiased (`M500`) and uncorrected (`M500Uncorr`) estimates.
//!
//! Observational only: nothing here feeds back into the catalog.
use std::fmt;

use comfy_table::{presets::UTF8_FULL, Cell, CellAlignment, ContentArrangement, Row, Table};
use itertools::Itertools;

use crate::catalog::Catalog;
use crate::constants::{COL_SNR, TRUE_PREFIX};
use crate::nemo_errors::NemoError;

pub const SNR_THRESHOLDS: [f64; 4] = [4.0, 5.0, 7.0, 10.0];

const RECOVERED: &str = "M500";
const RECOVERED_UNCORR: &str = "M500Uncorr";

/// Whether the catalog is a mock truth table.
pub fn is_mock(catalog: &Catalog) -> bool {
    catalog.has_column(&format!("{TRUE_PREFIX}{RECOVERED}"))
}

/// Summary statistics of a set of mass ratios.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatioStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub stderr: f64,
}

impl RatioStats {
    /// Population statistics of `ratios`; all NaN when empty.
    pub fn from_ratios(ratios: &[f64]) -> Self {
        let n = ratios.len();
        if n == 0 {
            return RatioStats {
                count: 0,
                mean: f64::NAN,
                median: f64::NAN,
                std: f64::NAN,
                stderr: f64::NAN,
            };
        }
        let mean = ratios.iter().sum::<f64>() / n as f64;
        let var = ratios.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n as f64;
        let sorted: Vec<f64> = ratios.iter().copied().sorted_by(f64::total_cmp).collect();
        let median = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
        };
        let std = var.sqrt();
        RatioStats {
            count: n,
            mean,
            median,
            std,
            stderr: std / (n as f64).sqrt(),
        }
    }
}

/// Statistics above one SNR threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdStats {
    pub threshold: f64,
    /// Rows with `fixed_SNR` above the threshold.
    pub count: usize,
    pub debiased: RatioStats,
    pub uncorr: RatioStats,
}

/// Recovered-versus-true statistics at every threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct MockDiagnostics {
    pub rows: Vec<ThresholdStats>,
}

/// Recovered/true ratios of kept rows; rows left at zero mass are not recoveries.
fn ratios(recovered: &[f64], truth: &[f64], keep: &[bool]) -> Vec<f64> {
    recovered
        .iter()
        .zip(truth)
        .zip(keep)
        .filter(|((r, _), k)| **k && **r > 0.0)
        .map(|((r, t), _)| r / t)
        .filter(|q| q.is_finite())
        .collect()
}

/// Compute [`MockDiagnostics`] for a mass catalog at [`SNR_THRESHOLDS`].
pub fn mock_recovery(catalog: &Catalog) -> Result<MockDiagnostics, NemoError> {
    mock_recovery_at(catalog, &SNR_THRESHOLDS)
}

/// Compute [`MockDiagnostics`] at the given thresholds.
pub fn mock_recovery_at(catalog: &Catalog, thresholds: &[f64]) -> Result<MockDiagnostics, NemoError> {
    let truth = catalog.floats(&format!("{TRUE_PREFIX}{RECOVERED}"))?;
    let m500 = catalog.floats(RECOVERED)?;
    let m500_uncorr = catalog.floats(RECOVERED_UNCORR)?;
    let snr = catalog.floats(COL_SNR)?;

    let rows = thresholds
        .iter()
        .map(|&threshold| {
            let keep: Vec<bool> = snr.iter().map(|&s| s > threshold).collect();
            ThresholdStats {
                threshold,
                count: keep.iter().filter(|&&k| k).count(),
                debiased: RatioStats::from_ratios(&ratios(&m500, &truth, &keep)),
                uncorr: RatioStats::from_ratios(&ratios(&m500_uncorr, &truth, &keep)),
            }
        })
        .collect();
    Ok(MockDiagnostics { rows })
}

impl fmt::Display for MockDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        table.set_header(vec![
            Cell::new("SNR >"),
            Cell::new("N"),
            Cell::new("Estimate"),
            Cell::new("mean"),
            Cell::new("median"),
            Cell::new("std"),
            Cell::new("stderr"),
        ]);

        let num = |v: f64| Cell::new(format!("{v:.3}")).set_alignment(CellAlignment::Right);
        for r in &self.rows {
            for (label, s) in [
                ("M500 / true_M500", &r.debiased),
                ("M500Uncorr / true_M500", &r.uncorr),
            ] {
                table.add_row(Row::from(vec![
                    Cell::new(format!("{:.1}", r.threshold)).set_alignment(CellAlignment::Right),
                    Cell::new(r.count).set_alignment(CellAlignment::Right),
                    Cell::new(label),
                    num(s.mean),
                    num(s.median),
                    num(s.std),
                    num(s.stderr),
                ]));
            }
        }
        write!(f, "{table}")
    }
}
