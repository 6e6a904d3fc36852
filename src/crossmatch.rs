//! # Sky-position cross-matching
//!
//! Nearest-neighbour matching of two catalogs by `RADeg`/`decDeg` within a maximum radius.
//!
//! Positions are converted once to unit vectors ([`nalgebra::Vector3`]); the separation of two
//! directions is `atan2(|a × b|, a · b)`, which stays accurate for both tiny and large angles.
//!
//! Matching rules
//! -----------------
//! * For each row of A the nearest row of B is found in a kd-tree over the B unit vectors
//!   (rows of A in parallel).
//! * Exact ties keep the first index of B.
//! * Pairs with separation strictly greater than the radius are dropped from both outputs.
//! * Rows with non-finite coordinates never match.
//! * Zero matched rows is a [`NemoError::NoMatch`].
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use log::debug;
use nalgebra::Vector3;
use rayon::prelude::*;

use crate::catalog::Catalog;
use crate::constants::{arcmin_to_deg, ArcMin, Degree, COL_DEC, COL_RA};
use crate::nemo_errors::NemoError;

/// Unit vector pointing at (RA, Dec) in degrees.
#[inline]
pub fn unit_vector(ra: Degree, dec: Degree) -> Vector3<f64> {
    let (sin_ra, cos_ra) = ra.to_radians().sin_cos();
    let (sin_dec, cos_dec) = dec.to_radians().sin_cos();
    Vector3::new(cos_dec * cos_ra, cos_dec * sin_ra, sin_dec)
}

/// Angle between two unit vectors, in degrees.
#[inline]
pub fn separation_deg(a: &Vector3<f64>, b: &Vector3<f64>) -> Degree {
    a.cross(b).norm().atan2(a.dot(b)).to_degrees()
}

/// Angular separation between two sky positions (all angles in degrees).
pub fn angular_separation_deg(ra1: Degree, dec1: Degree, ra2: Degree, dec2: Degree) -> Degree {
    separation_deg(&unit_vector(ra1, dec1), &unit_vector(ra2, dec2))
}

/// Squared chord length between two unit vectors separated by `angle_deg`.
#[inline]
pub fn chord_squared(angle_deg: Degree) -> f64 {
    let half = 0.5 * angle_deg.to_radians();
    4.0 * half.sin().powi(2)
}

/// Angle in degrees subtended by a chord of squared length `chord2` on the unit sphere.
#[inline]
pub fn chord_to_deg(chord2: f64) -> Degree {
    (2.0 * (0.5 * chord2.max(0.0).sqrt()).min(1.0).asin()).to_degrees()
}

type SkyTree = ImmutableKdTree<f64, u64, 3, 32>;

/// For every position of A, the index of the nearest position of B and its separation.
///
/// B is indexed once in a kd-tree over unit vectors; each A row queries it in parallel.
/// Candidates tied with the nearest chord are re-ranked on the exact separation so the first
/// index of B wins.
///
/// `None` when the A position (or every B position) is not finite.
pub fn nearest_neighbours(
    a_ra: &[f64],
    a_dec: &[f64],
    b_ra: &[f64],
    b_dec: &[f64],
) -> Vec<Option<(usize, Degree)>> {
    let (b_rows, b_points): (Vec<usize>, Vec<[f64; 3]>) = b_ra
        .iter()
        .zip(b_dec)
        .enumerate()
        .filter(|(_, (ra, dec))| ra.is_finite() && dec.is_finite())
        .map(|(j, (&ra, &dec))| {
            let v = unit_vector(ra, dec);
            (j, [v.x, v.y, v.z])
        })
        .unzip();
    if b_points.is_empty() {
        return vec![None; a_ra.len()];
    }
    let tree: SkyTree = ImmutableKdTree::new_from_slice(&b_points);

    a_ra.par_iter()
        .zip(a_dec.par_iter())
        .map(|(&ra, &dec)| {
            if !(ra.is_finite() && dec.is_finite()) {
                return None;
            }
            let va = unit_vector(ra, dec);
            let query = [va.x, va.y, va.z];
            let nearest = tree.nearest_one::<SquaredEuclidean>(&query);
            let (chord2, item) = (nearest.distance, nearest.item as usize);
            let reach = chord2 * (1.0 + 1e-9) + 1e-18;
            tree.within_unsorted::<SquaredEuclidean>(&query, reach)
                .into_iter()
                .map(|nn| {
                    let k = nn.item as usize;
                    let p = b_points[k];
                    (b_rows[k], separation_deg(&va, &Vector3::new(p[0], p[1], p[2])))
                })
                .min_by(|(ja, sa), (jb, sb)| sa.total_cmp(sb).then(ja.cmp(jb)))
                .or(Some((b_rows[item], chord_to_deg(chord2))))
        })
        .collect()
}

/// Matched subsets of two catalogs.
///
/// `a.len() == b.len() == separations_deg.len()`, and row `i` of `a` and `b` is the same object.
#[derive(Debug, Clone)]
pub struct CrossMatch {
    pub a: Catalog,
    pub b: Catalog,
    pub separations_deg: Vec<Degree>,
    /// Row of the original A catalog for each matched pair.
    pub a_indices: Vec<usize>,
    /// Row of the original B catalog for each matched pair.
    pub b_indices: Vec<usize>,
}

/// Cross-match catalog `a` against catalog `b` within `radius_arcmin`.
///
/// Arguments
/// -----------------
/// * `a`, `b` – catalogs with `RADeg` / `decDeg` columns.
/// * `radius_arcmin` – maximum accepted separation (inclusive).
///
/// Return
/// ----------
/// * A [`CrossMatch`] in the row order of `a`, [`NemoError::MissingColumn`] if a coordinate
///   column is absent, or [`NemoError::NoMatch`] when no pair lies within the radius.
pub fn cross_match(a: &Catalog, b: &Catalog, radius_arcmin: ArcMin) -> Result<CrossMatch, NemoError> {
    let radius_deg = arcmin_to_deg(radius_arcmin);
    let a_ra = a.floats(COL_RA)?;
    let a_dec = a.floats(COL_DEC)?;
    let b_ra = b.floats(COL_RA)?;
    let b_dec = b.floats(COL_DEC)?;

    let mut a_indices = Vec::new();
    let mut b_indices = Vec::new();
    let mut separations_deg = Vec::new();
    for (i, nn) in nearest_neighbours(&a_ra, &a_dec, &b_ra, &b_dec)
        .into_iter()
        .enumerate()
    {
        if let Some((j, sep)) = nn {
            if sep <= radius_deg {
                a_indices.push(i);
                b_indices.push(j);
                separations_deg.push(sep);
            }
        }
    }

    if a_indices.is_empty() {
        return Err(NemoError::NoMatch { radius_arcmin });
    }
    debug!(
        "Cross-matched {} / {} rows within {radius_arcmin} arcmin",
        a_indices.len(),
        a.len()
    );

    Ok(CrossMatch {
        a: a.take(&a_indices),
        b: b.take(&b_indices),
        separations_deg,
        a_indices,
        b_indices,
    })
}

#[cfg(test)]
mod crossmatch_test {
    use super::*;
    use crate::catalog::ColumnData;
    use approx::assert_relative_eq;

    fn catalog(ra: Vec<f64>, dec: Vec<f64>) -> Catalog {
        let mut cat = Catalog::new();
        cat.add_column(COL_RA, ColumnData::Float(ra)).unwrap();
        cat.add_column(COL_DEC, ColumnData::Float(dec)).unwrap();
        cat
    }

    #[test]
    fn test_angular_separation() {
        assert_relative_eq!(angular_separation_deg(0.0, 0.0, 1.0, 0.0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(angular_separation_deg(0.0, 89.0, 180.0, 89.0), 2.0, epsilon = 1e-10);
        assert_relative_eq!(angular_separation_deg(359.9, 0.0, 0.1, 0.0), 0.2, epsilon = 1e-10);
        assert_eq!(angular_separation_deg(12.0, -3.0, 12.0, -3.0), 0.0);
    }

    #[test]
    fn test_match_drops_far_pairs() {
        let a = catalog(vec![10.0, 20.0, 30.0], vec![0.0, 0.0, 0.0]);
        // 1 arcmin off, 10 arcmin off, exact
        let b = catalog(
            vec![30.0, 10.0 + 1.0 / 60.0, 20.0 + 10.0 / 60.0],
            vec![0.0, 0.0, 0.0],
        );
        let m = cross_match(&a, &b, 2.5).unwrap();
        assert_eq!(m.a_indices, vec![0, 2]);
        assert_eq!(m.b_indices, vec![1, 0]);
        assert_eq!(m.a.len(), 2);
        assert_eq!(m.b.len(), 2);
        assert_relative_eq!(m.separations_deg[0], 1.0 / 60.0, epsilon = 1e-9);
    }

    #[test]
    fn test_tie_keeps_first_index() {
        let a = catalog(vec![0.0], vec![0.0]);
        let b = catalog(vec![0.01, 0.01, -0.01], vec![0.0, 0.0, 0.0]);
        let m = cross_match(&a, &b, 2.5).unwrap();
        assert_eq!(m.b_indices, vec![0]);
    }

    #[test]
    fn test_chord_angle_conversion() {
        for angle in [1e-4, 0.5, 30.0, 179.0] {
            assert_relative_eq!(chord_to_deg(chord_squared(angle)), angle, max_relative = 1e-9);
        }
        let va = unit_vector(10.0, 20.0);
        let vb = unit_vector(10.3, 19.8);
        assert_relative_eq!(
            chord_to_deg((va - vb).norm_squared()),
            separation_deg(&va, &vb),
            max_relative = 1e-9
        );
    }

    #[test]
    fn test_tree_matches_exhaustive_search() {
        // dense field with many near neighbours, plus a non-finite B row
        let n = 400;
        let b_ra: Vec<f64> = (0..n)
            .map(|k| 40.0 + 0.013 * (k as f64 * 0.7).sin() + 0.001 * k as f64)
            .collect();
        let mut b_dec: Vec<f64> = (0..n)
            .map(|k| -2.0 + 0.002 * (k as f64 * 1.3).cos() * k as f64 / 40.0)
            .collect();
        b_dec[5] = f64::NAN;
        let a_ra: Vec<f64> = (0..50).map(|k| 40.0 + 0.008 * k as f64).collect();
        let a_dec: Vec<f64> = (0..50).map(|k| -2.0 + 0.0005 * k as f64).collect();

        let found = nearest_neighbours(&a_ra, &a_dec, &b_ra, &b_dec);
        for (i, nn) in found.iter().enumerate() {
            let (j, sep) = nn.unwrap();
            let best = (0..n)
                .filter(|&m| b_dec[m].is_finite())
                .map(|m| angular_separation_deg(a_ra[i], a_dec[i], b_ra[m], b_dec[m]))
                .fold(f64::INFINITY, f64::min);
            assert_relative_eq!(sep, best, max_relative = 1e-9);
            assert_ne!(j, 5);
        }
    }

    #[test]
    fn test_no_finite_b_rows() {
        let found = nearest_neighbours(&[1.0], &[1.0], &[f64::NAN], &[0.0]);
        assert_eq!(found, vec![None]);
    }

    #[test]
    fn test_no_match() {
        let a = catalog(vec![0.0, f64::NAN], vec![0.0, 0.0]);
        let b = catalog(vec![1.0], vec![1.0]);
        assert_eq!(
            cross_match(&a, &b, 2.5).unwrap_err(),
            NemoError::NoMatch { radius_arcmin: 2.5 }
        );
    }
}
