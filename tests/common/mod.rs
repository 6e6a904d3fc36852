#![allow(dead_code)]

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

pub const PHOT_FILTER: &str = "Arnaud_M2e14_z0p4";

pub const Q_FIT: &str = "tileName,theta500Arcmin,Q\n\
                         T1,0.5,0.6\n\
                         T1,2.0,0.75\n\
                         T1,5.0,0.9\n\
                         T1,20.0,1.0\n";

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn write(path: &Utf8Path, text: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, text).unwrap();
}

/// A temporary nemo run: `{tmp}/survey.yml` and its output directory `{tmp}/survey/`.
pub struct RunDir {
    _tmp: TempDir,
    pub base: Utf8PathBuf,
    pub config: Utf8PathBuf,
    pub root: Utf8PathBuf,
}

impl RunDir {
    pub fn new(mass_options_yaml: &str) -> Self {
        let tmp = TempDir::new().unwrap();
        let base = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        let config = base.join("survey.yml");
        let root = base.join("survey");
        let yaml = format!(
            "photFilter: {PHOT_FILTER}\n\
             thresholdSigma: 4.0\n\
             mapFilters:\n  - label: {PHOT_FILTER}\n\
             tileDefinitions:\n\
             \x20 - tileName: t1\n    RADecSection: [0.0, 10.0, -5.0, 5.0]\n\
             \x20 - tileName: t2\n    RADecSection: [10.0, 20.0, -5.0, 5.0]\n\
             {mass_options_yaml}"
        );
        write(&config, &yaml);
        write(&root.join("selFn").join("QFit.csv"), Q_FIT);
        RunDir {
            _tmp: tmp,
            base,
            config,
            root,
        }
    }

    /// Write a catalog CSV under the temporary directory and return its path.
    pub fn catalog(&self, file: &str, text: &str) -> Utf8PathBuf {
        let path = self.base.join(file);
        write(&path, text);
        path
    }

    /// Write a constant-valued filtered map and RMS map for a tile.
    pub fn constant_maps(&self, tile: &str, value: f64, rms: f64, shape: (usize, usize)) {
        let grid = |v: f64| {
            (0..shape.0)
                .map(|_| vec![format!("{v:e}"); shape.1].join(","))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let dir = self.root.join("filteredMaps");
        write(
            &dir.join(format!("{PHOT_FILTER}#{tile}_filteredMap.csv")),
            &grid(value),
        );
        write(&dir.join(format!("{PHOT_FILTER}#{tile}_RMSMap.csv")), &grid(rms));
    }
}
