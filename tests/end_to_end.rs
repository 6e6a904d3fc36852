mod common;

use nemo_mass::calibration::QSource;
use nemo_mass::catalog::Catalog;
use nemo_mass::nemo_errors::{ErrorKind, NemoError};
use nemo_mass::parallel::ErrorMode;
use nemo_mass::pipeline::{self, ParallelSettings, RunSettings, NEMOVER_KEY, QSOURCE_KEY};

use crate::common::RunDir;

const THREE_ROWS: &str = "name,RADeg,decDeg,tileName,fixed_y_c,fixed_err_y_c,fixed_SNR,redshift,redshiftErr\n\
                          A,1.0,0.0,T1,10.0,1.0,10.0,0.3,0.0\n\
                          B,2.0,0.0,T1,-1.0,1.0,-1.0,0.5,0.0\n\
                          C,3.0,0.0,T1,8.0,1.0,8.0,nan,0.0\n";

#[test]
fn test_three_row_catalog() {
    common::init_logger();
    let run = RunDir::new("");
    let cat_path = run.catalog("clusters.csv", THREE_ROWS);

    let mut settings = RunSettings::new(&run.config);
    settings.catalog = Some(cat_path.clone());
    let summary = pipeline::run(&settings).unwrap();

    assert_eq!(summary.output, run.base.join("clusters_mass.csv"));
    assert!(summary.diagnostics.is_none());

    let out = Catalog::read(&summary.output).unwrap();
    assert_eq!(out.texts("name").unwrap(), vec!["A", "B", "C"]);
    assert!(!out.has_column("sortIndex"));

    let m500 = out.floats("M500").unwrap();
    let uncorr = out.floats("M500Uncorr").unwrap();
    let q = out.floats("Q").unwrap();
    assert!(m500[0] > 0.0);
    // the mass function falls with mass, so debiasing lowers the estimate
    assert!(m500[0] < uncorr[0]);
    assert!(q[0] > 0.6 && q[0] <= 1.0);
    for col in ["M500", "M500_errPlus", "M500_errMinus", "M500Uncorr", "Q"] {
        let v = out.floats(col).unwrap();
        assert_eq!(v[1], 0.0, "{col}");
        assert_eq!(v[2], 0.0, "{col}");
    }
    assert!(out.floats("M500_errPlus").unwrap()[0] > 0.0);
    assert!(out.floats("M500_errMinus").unwrap()[0] > 0.0);

    assert_eq!(out.get_metadata(NEMOVER_KEY), Some(env!("CARGO_PKG_VERSION")));
    assert_eq!(out.get_metadata(QSOURCE_KEY), Some("fit"));
}

#[test]
fn test_worker_count_does_not_change_output() {
    let run = RunDir::new("");
    let mut rows = String::from(
        "name,RADeg,decDeg,tileName,fixed_y_c,fixed_err_y_c,redshift\n",
    );
    for i in 0..7 {
        rows.push_str(&format!(
            "c{i},{},0.5,T1,{},0.8,{}\n",
            1.0 + i as f64,
            3.0 + i as f64,
            0.2 + 0.1 * i as f64
        ));
    }
    let cat_path = run.catalog("grid.csv", &rows);

    let mut serial = RunSettings::new(&run.config);
    serial.catalog = Some(cat_path.clone());
    serial.output = Some(run.base.join("serial.csv"));
    let a = pipeline::run(&serial).unwrap().catalog;

    let mut parallel = serial.clone();
    parallel.output = Some(run.base.join("parallel.csv"));
    parallel.parallel = Some(ParallelSettings {
        n_workers: 3,
        mode: ErrorMode::Strict,
    });
    let b = pipeline::run(&parallel).unwrap().catalog;

    assert_eq!(a.texts("name").unwrap(), b.texts("name").unwrap());
    assert_eq!(a.floats("M500").unwrap(), b.floats("M500").unwrap());
    assert_eq!(a.floats("M500Uncorr_errPlus").unwrap(), b.floats("M500Uncorr_errPlus").unwrap());
}

#[test]
fn test_recalibrated_and_other_definitions() {
    let run = RunDir::new(
        "massOptions:\n  rescaleFactor: 0.7\n  rescaleFactorErr: 0.07\n  otherMassEstimates:\n    - delta: 200\n      rhoType: matter\n",
    );
    let cat_path = run.catalog("clusters.csv", THREE_ROWS);
    let mut settings = RunSettings::new(&run.config);
    settings.catalog = Some(cat_path);
    let out = pipeline::run(&settings).unwrap().catalog;

    let uncorr = out.floats("M500Uncorr").unwrap()[0];
    let cal = out.floats("M500Cal").unwrap()[0];
    assert!((cal - uncorr / 0.7).abs() < 1e-9 * cal);

    let m200m = out.floats("M200m").unwrap()[0];
    let m500 = out.floats("M500").unwrap()[0];
    assert!(m200m > m500);
    // fractional errors survive the conversion
    let frac500 = out.floats("M500_errPlus").unwrap()[0] / m500;
    let frac200 = out.floats("M200m_errPlus").unwrap()[0] / m200m;
    assert!((frac500 - frac200).abs() < 1e-9);
    assert_eq!(out.floats("M200mUncorr").unwrap()[1], 0.0);
}

#[test]
fn test_missing_signal_and_redshift() {
    let run = RunDir::new("");
    // no redshift-like column anywhere
    let cat_path = run.catalog(
        "noz.csv",
        "RADeg,decDeg,tileName,fixed_y_c,fixed_err_y_c\n1.0,0.0,T1,5.0,1.0\n",
    );
    let mut settings = RunSettings::new(&run.config);
    settings.catalog = Some(cat_path);
    let err = pipeline::run(&settings).unwrap_err();
    assert!(matches!(err, NemoError::RedshiftColumnNotFound(_)));
    assert_eq!(err.kind(), ErrorKind::Data);
}

#[test]
fn test_invalid_q_source_is_a_configuration_error() {
    let err = "spline".parse::<QSource>().unwrap_err();
    assert_eq!(err, NemoError::InvalidQSource("spline".into()));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_missing_q_table() {
    let run = RunDir::new("");
    let cat_path = run.catalog("clusters.csv", THREE_ROWS);
    let mut settings = RunSettings::new(&run.config);
    settings.catalog = Some(cat_path);
    settings.q_source = QSource::Injection;
    let err = pipeline::run(&settings).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}
