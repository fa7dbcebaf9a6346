//! Charge-state determination over the averaged spectrum.
//!
//! Candidate peaks are visited from the most intense undetermined centroid
//! downward. Each gets two independent lines of evidence, a Fourier analysis
//! of the local profile window and a Patterson pairwise-distance analysis of
//! the nearby centroids, combined multiplicatively into one charge
//! histogram. A clear winner is then back-propagated onto the isotopic
//! cluster around the seed peak; peaks that never produce a clear winner
//! simply keep charge zero.

pub mod fourier;
pub mod histogram;
pub mod patterson;

use mzpeaks::Tolerance;
use tracing::{debug, trace};

use crate::centroid::AveragedCentroid;

use fourier::fourier_charge_histogram;
use patterson::patterson_charge_histogram;

/// Nominal mass spacing between adjacent isotopic peaks of a singly charged
/// species.
pub const ISOTOPE_SPACING: f64 = 1.002;

/// Window of interest below a seed peak: `min(1.2, mz / 1200)` mass units.
const WINDOW_BELOW_LIMIT: f64 = 1.2;
const WINDOW_BELOW_SCALE: f64 = 1200.0;
/// Window of interest above a seed peak.
const WINDOW_ABOVE: f64 = 2.1;

/// Isotope matching tolerance per unit step, scaled by `1/charge`.
const CLUSTER_TOLERANCE: f64 = 0.006;
/// An isotope candidate must carry at least this fraction of the cluster's
/// reference intensity.
const CLUSTER_INTENSITY_FLOOR: f32 = 0.04;
/// Consecutive empty steps before the cluster walk stops.
const CLUSTER_MISS_LIMIT: usize = 2;

/// An accepted charge call and the mass-sorted centroid indices of the
/// isotopic cluster that supports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeResult {
    pub charge: i32,
    pub isotopes: Vec<usize>,
}

impl ChargeResult {
    /// Clusters need at least two members below charge 3 and three at or
    /// above it to be believable.
    fn is_supported(&self) -> bool {
        let required = if self.charge < 3 { 2 } else { 3 };
        self.isotopes.len() >= required
    }
}

/// Determine charge states in place for up to `max_determinations` seed
/// peaks, returning the number of clusters assigned.
///
/// `centroids` must be sorted by mass. A centroid's charge is written at
/// most once; anything assigned as part of an earlier cluster is skipped
/// both as a seed and as evidence for later seeds.
pub fn analyze_charges(
    centroids: &mut [AveragedCentroid],
    profile_masses: &[f64],
    profile_intensities: &[f64],
    max_determinations: usize,
) -> usize {
    if max_determinations == 0 || centroids.is_empty() {
        return 0;
    }

    // Intensity-descending projection over the mass-sorted list
    let mut order: Vec<usize> = (0..centroids.len()).collect();
    order.sort_unstable_by(|a, b| {
        centroids[*b]
            .intensity
            .partial_cmp(&centroids[*a].intensity)
            .unwrap()
    });

    let mut evaluated = 0usize;
    let mut assigned = 0usize;
    for seed in order {
        if evaluated >= max_determinations {
            break;
        }
        if !centroids[seed].is_undetermined() {
            continue;
        }
        evaluated += 1;

        let charge = evaluate_seed(centroids, profile_masses, profile_intensities, seed);
        if charge <= 0 {
            trace!(mz = centroids[seed].mz, "No clear charge for peak");
            continue;
        }
        match identify_cluster(centroids, seed, charge) {
            Some(result) => {
                debug!(
                    mz = centroids[seed].mz,
                    charge = result.charge,
                    isotopes = result.isotopes.len(),
                    "Assigned isotopic cluster"
                );
                for i in result.isotopes.iter() {
                    centroids[*i].charge = result.charge;
                }
                assigned += 1;
            }
            None => {
                trace!(
                    mz = centroids[seed].mz,
                    charge, "Discarding charge call without cluster support"
                );
            }
        }
    }
    assigned
}

/// Combine the Fourier and Patterson evidence for one seed peak and evaluate
/// the result.
fn evaluate_seed(
    centroids: &[AveragedCentroid],
    profile_masses: &[f64],
    profile_intensities: &[f64],
    seed: usize,
) -> i32 {
    let mz = centroids[seed].mz;
    let low = mz - WINDOW_BELOW_LIMIT.min(mz / WINDOW_BELOW_SCALE);
    let high = mz + WINDOW_ABOVE;

    let p0 = profile_masses.partition_point(|m| *m < low);
    let p1 = profile_masses.partition_point(|m| *m < high);
    let spacing = if p1 > p0 + 1 {
        profile_masses[p0 + 1] - profile_masses[p0]
    } else {
        // Window at the array boundary, no measurable spacing
        1.0
    };

    let mut fourier = fourier_charge_histogram(&profile_intensities[p0..p1], spacing);
    fourier.normalize();
    fourier.floor_low_charges();

    let c0 = centroids.partition_point(|c| c.mz < low);
    let c1 = centroids.partition_point(|c| c.mz < high);
    let mut patterson = patterson_charge_histogram(centroids, c0..c1, spacing);
    patterson.normalize();
    patterson.floor_low_charges();

    let mut combined = fourier;
    combined.combine(&patterson);
    combined.smooth();
    combined.normalize();
    combined.evaluate()
}

/// Walk outward from the seed collecting isotopic neighbors spaced by
/// `1/charge`, then check the cluster is large enough to trust.
fn identify_cluster(
    centroids: &[AveragedCentroid],
    seed: usize,
    charge: i32,
) -> Option<ChargeResult> {
    let mut isotopes = vec![seed];
    walk_cluster(centroids, seed, charge, 1, &mut isotopes);
    walk_cluster(centroids, seed, charge, -1, &mut isotopes);
    isotopes.sort_unstable();

    let result = ChargeResult { charge, isotopes };
    result.is_supported().then_some(result)
}

/// One direction of the cluster walk. The tolerance band expands by one
/// `CLUSTER_TOLERANCE / charge` per step; the walk ends after
/// [`CLUSTER_MISS_LIMIT`] consecutive empty steps, or backtracks when the
/// intensity trend turns upward again, which marks the edge of a different
/// cluster.
fn walk_cluster(
    centroids: &[AveragedCentroid],
    seed: usize,
    charge: i32,
    direction: i64,
    isotopes: &mut Vec<usize>,
) {
    let z = charge as f64;
    let spacing = 1.0 / z;
    let tolerance_unit = CLUSTER_TOLERANCE / z;

    let seed_mz = centroids[seed].mz;
    let lowest = centroids[0].mz;
    let highest = centroids[centroids.len() - 1].mz;

    let mut reference = centroids[seed].intensity;
    let mut previous = centroids[seed].intensity;
    let mut decreasing = false;
    let mut misses = 0usize;

    for step in 1..=centroids.len() {
        let target = seed_mz + direction as f64 * step as f64 * spacing;
        let tolerance = tolerance_unit * step as f64;
        if target - tolerance > highest || target + tolerance < lowest {
            break;
        }

        match best_in_band(centroids, target, tolerance, isotopes) {
            Some(index) => {
                let intensity = centroids[index].intensity;
                if intensity <= reference * CLUSTER_INTENSITY_FLOOR {
                    misses += 1;
                    if misses >= CLUSTER_MISS_LIMIT {
                        break;
                    }
                } else if decreasing && intensity > previous {
                    break;
                } else {
                    if intensity < previous {
                        decreasing = true;
                    }
                    isotopes.push(index);
                    reference = reference.max(intensity);
                    previous = intensity;
                    misses = 0;
                }
            }
            None => {
                misses += 1;
                if misses >= CLUSTER_MISS_LIMIT {
                    break;
                }
            }
        }
    }
}

/// The most intense undetermined centroid within the tolerance band around
/// `target` that is not already part of the cluster.
fn best_in_band(
    centroids: &[AveragedCentroid],
    target: f64,
    tolerance: f64,
    taken: &[usize],
) -> Option<usize> {
    let band = Tolerance::Da(tolerance);
    let start = centroids.partition_point(|c| c.mz < target - tolerance);
    let mut best: Option<usize> = None;
    for (offset, candidate) in centroids[start..].iter().enumerate() {
        if candidate.mz > target + tolerance {
            break;
        }
        let index = start + offset;
        if !candidate.is_undetermined()
            || taken.contains(&index)
            || !band.test(candidate.mz, target)
        {
            continue;
        }
        if best
            .map(|b| candidate.intensity > centroids[b].intensity)
            .unwrap_or(true)
        {
            best = Some(index);
        }
    }
    best
}
