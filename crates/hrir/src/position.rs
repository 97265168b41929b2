//! Nearest-position lookup over a dataset.

use crate::Dataset;

/// Index of the measurement closest to the requested position.
///
/// Distance is the L1 sum `|Δazimuth| + |Δelevation| + |Δradius|` with no per-axis normalization
/// and no angular wrap-around: a 359° measurement is 358 away from a 1° target, not 2.  Callers
/// wanting wrap-aware behavior should normalize the target before the call.
///
/// Ties are broken toward the lowest index: the scan replaces its candidate only on strict
/// improvement, so the first measurement reaching the minimum distance wins.
///
/// Datasets are never empty by construction, so this always returns a valid index.
pub fn nearest(dataset: &Dataset, azimuth: f32, elevation: f32, radius: f32) -> usize {
    let mut best = 0;
    let mut best_distance = f32::INFINITY;

    for (i, m) in dataset.measurements().iter().enumerate() {
        let distance = (m.azimuth() - azimuth).abs()
            + (m.elevation() - elevation).abs()
            + (m.radius() - radius).abs();
        if distance < best_distance {
            best = i;
            best_distance = distance;
        }
    }

    best
}
