//! Charge evidence from pairwise centroid mass distances, after Patterson.
//!
//! Every sufficiently intense pair of undetermined centroids in the window
//! votes for the charge implied by its mass distance. Pairs separated by a
//! more intense intervening peak are penalized, since that peak is evidence
//! the two belong to different clusters.

use std::ops::Range;

use crate::centroid::AveragedCentroid;

use super::histogram::ChargeHistogram;
use super::ISOTOPE_SPACING;

/// The pair scan is O(n²); the intensity threshold is chosen so at most this
/// many centroids participate.
const MAX_CANDIDATES: usize = 200;

/// No charge beyond this is resolvable regardless of profile spacing.
const MAX_RESOLVABLE_CHARGE: f64 = 50.5;

/// Floor on the intervening-peak penalty denominator, as a fraction of the
/// stronger pair member.
const INTERVENING_FLOOR: f32 = 0.05;

/// Harmonic correction: half- and quarter-charge artifacts are only boosted
/// at or above this charge. Whether this floor is instrument-specific is not
/// settled; it is a tuning constant here.
pub const HARMONIC_CHARGE_FLOOR: f64 = 10.0;
/// Boost applied per satisfied harmonic condition, and when both hold.
pub const HARMONIC_BOOST: f64 = 5.0;
pub const HARMONIC_BOOST_BOTH: f64 = 25.0;
/// A harmonic bin supports the fundamental when it carries this fraction
/// band of the fundamental's energy.
const HARMONIC_FRACTION_LOW: f64 = 0.15;
const HARMONIC_FRACTION_HIGH: f64 = 0.60;

/// Build a charge histogram from pairwise mass distances between the
/// centroids in `window` (indices into the mass-sorted list).
pub fn patterson_charge_histogram(
    centroids: &[AveragedCentroid],
    window: Range<usize>,
    profile_spacing: f64,
) -> ChargeHistogram {
    let mut histogram = ChargeHistogram::new();

    let candidates = select_candidates(centroids, window.clone());
    if candidates.len() < 2 {
        return ChargeHistogram::uniform();
    }

    let max_charge = if profile_spacing > 0.0 {
        (ISOTOPE_SPACING / (2.0 * profile_spacing)).min(MAX_RESOLVABLE_CHARGE)
    } else {
        MAX_RESOLVABLE_CHARGE
    };

    for (a, i) in candidates.iter().enumerate() {
        let left = &centroids[*i];
        for j in candidates.iter().skip(a + 1) {
            let right = &centroids[*j];
            let distance = right.mz - left.mz;
            if distance <= 0.0 {
                continue;
            }
            let charge = ISOTOPE_SPACING / distance;
            if charge > max_charge {
                continue;
            }

            let stronger = left.intensity.max(right.intensity);
            let between = max_intensity_between(centroids, *i, *j)
                .max(stronger * INTERVENING_FLOOR);
            let score = (left.intensity as f64 * right.intensity as f64) / between as f64;
            histogram.accumulate(charge, score);
        }
    }

    correct_harmonics(&mut histogram);
    histogram
}

/// The undetermined centroids in the window, thresholded so at most
/// [`MAX_CANDIDATES`] take part in the pair scan.
fn select_candidates(centroids: &[AveragedCentroid], window: Range<usize>) -> Vec<usize> {
    let mut candidates: Vec<usize> = window
        .filter(|i| centroids[*i].is_undetermined() && centroids[*i].intensity > 0.0)
        .collect();
    if candidates.len() > MAX_CANDIDATES {
        let mut intensities: Vec<f32> =
            candidates.iter().map(|i| centroids[*i].intensity).collect();
        intensities.sort_unstable_by(|a, b| b.partial_cmp(a).unwrap());
        let threshold = intensities[MAX_CANDIDATES - 1];
        candidates.retain(|i| centroids[*i].intensity >= threshold);
    }
    candidates
}

/// The most intense centroid strictly between two mass-sorted indices
fn max_intensity_between(centroids: &[AveragedCentroid], i: usize, j: usize) -> f32 {
    centroids[i + 1..j]
        .iter()
        .map(|c| c.intensity)
        .fold(0.0f32, f32::max)
}

/// Boost fundamentals whose half- and quarter-charge bins look like harmonic
/// aliasing artifacts. At high charge the Patterson signal leaks energy into
/// `charge/2` and `charge/4`; when those bins carry a characteristic
/// fraction of the fundamental's energy, the fundamental is amplified.
fn correct_harmonics(histogram: &mut ChargeHistogram) {
    let snapshot = *histogram.bins();
    let bins = histogram.bins_mut();
    for (bin, value) in snapshot.iter().enumerate() {
        if *value <= 0.0 || ChargeHistogram::charge_of(bin) < HARMONIC_CHARGE_FLOOR {
            continue;
        }
        let half_supported = harmonic_supports(&snapshot, bin, 2, *value);
        let quarter_supported = harmonic_supports(&snapshot, bin, 4, *value);
        let boost = match (half_supported, quarter_supported) {
            (true, true) => HARMONIC_BOOST_BOTH,
            (true, false) | (false, true) => HARMONIC_BOOST,
            (false, false) => continue,
        };
        bins[bin] = value * boost;
    }
}

fn harmonic_supports(bins: &[f64], bin: usize, divisor: usize, fundamental: f64) -> bool {
    let harmonic = bins[bin / divisor];
    harmonic >= fundamental * HARMONIC_FRACTION_LOW
        && harmonic <= fundamental * HARMONIC_FRACTION_HIGH
}

#[cfg(test)]
mod test {
    use super::*;

    fn cluster(start: f64, spacing: f64, intensities: &[f32]) -> Vec<AveragedCentroid> {
        intensities
            .iter()
            .enumerate()
            .map(|(i, intensity)| {
                AveragedCentroid::new(start + i as f64 * spacing, *intensity, 1000.0)
            })
            .collect()
    }

    #[test]
    fn test_isotope_spacing_votes_for_charge() {
        // Peaks 0.5 apart vote for charge 2
        let centroids = cluster(1000.0, 0.5, &[100.0, 80.0, 50.0, 20.0]);
        let mut h = patterson_charge_histogram(&centroids, 0..4, 0.01);
        h.normalize();
        let (winner, _) = h.max_bin();
        let charge = ChargeHistogram::charge_of(winner);
        assert!((charge - 2.0).abs() <= 0.2, "got charge {charge}");
    }

    #[test]
    fn test_determined_centroids_are_excluded() {
        let mut centroids = cluster(1000.0, 0.5, &[100.0, 80.0, 50.0]);
        for c in centroids.iter_mut() {
            c.charge = 3;
        }
        let h = patterson_charge_histogram(&centroids, 0..3, 0.01);
        // All determined: no pairs, neutral histogram
        assert!(h.bins().iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_intervening_peak_penalizes_pair() {
        // Two pairs with the same end intensities and distance, one with a
        // strong unrelated peak between its members.
        let clean = cluster(1000.0, 0.25, &[100.0, 0.0, 100.0]);
        let blocked = cluster(1000.0, 0.25, &[100.0, 500.0, 100.0]);

        let clean_score = {
            let kept: Vec<_> = clean.into_iter().filter(|c| c.intensity > 0.0).collect();
            let h = patterson_charge_histogram(&kept, 0..kept.len(), 0.01);
            h.max_bin().1
        };
        let blocked_score = {
            let h = patterson_charge_histogram(&blocked, 0..3, 0.01);
            // Look at the bin for the outer pair's distance (0.5 -> charge 2)
            h.bins()[ChargeHistogram::bin_for(2.004).unwrap()]
        };
        assert!(clean_score > blocked_score * 10.0);
    }

    #[test]
    fn test_unresolvable_charge_is_rejected() {
        // 0.01 apart implies charge ~100, beyond any resolvable maximum
        let centroids = cluster(1000.0, 0.01, &[100.0, 100.0]);
        let h = patterson_charge_histogram(&centroids, 0..2, 0.0001);
        assert!(h.bins().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_harmonic_boost_amplifies_fundamental() {
        let mut h = ChargeHistogram::new();
        let bin_20 = ChargeHistogram::bin_for(20.0).unwrap();
        h.bins_mut()[bin_20] = 10.0;
        h.bins_mut()[bin_20 / 2] = 3.0; // 30% of the fundamental
        h.bins_mut()[bin_20 / 4] = 2.0; // 20% of the fundamental
        correct_harmonics(&mut h);
        assert!((h.bins()[bin_20] - 250.0).abs() < 1e-9);

        let mut h = ChargeHistogram::new();
        h.bins_mut()[bin_20] = 10.0;
        h.bins_mut()[bin_20 / 2] = 3.0;
        correct_harmonics(&mut h);
        assert!((h.bins()[bin_20] - 50.0).abs() < 1e-9);
    }
}
