//! Run-length compression of long zero stretches in the merged profile.
//!
//! Resampled profiles are mostly empty, so long runs of zero-intensity
//! points dominate the memory footprint of the output scan. Runs are
//! collapsed with a few points of context kept on each side, enough for any
//! downstream smoothing window up to 15 points to behave as if the run were
//! still there.

use tracing::debug;

/// Zero runs at most this long are kept whole.
const MAX_PRESERVED_RUN: usize = 8;

/// Points kept on each side of a collapsed run.
const RUN_CONTEXT_POINTS: usize = 4;

/// Marks the start of a collapsed run interior; the paired mass value holds
/// the interior length instead of a mass.
const SENTINEL_INTENSITY: f64 = -1.0;

/// Collapse zero runs longer than [`MAX_PRESERVED_RUN`] points in place.
///
/// The first and last [`RUN_CONTEXT_POINTS`] points of each such run are
/// preserved; the interior is dropped. Both arrays shrink together and stay
/// parallel.
pub fn compress_profile(masses: &mut Vec<f64>, intensities: &mut Vec<f64>) {
    debug_assert_eq!(masses.len(), intensities.len());
    let before = masses.len();
    mark_zero_runs(masses, intensities);
    compact(masses, intensities);
    if masses.len() < before {
        debug!(
            removed = before - masses.len(),
            remaining = masses.len(),
            "Compressed zero runs out of merged profile"
        );
    }
}

/// First pass: replace each long run's interior with a single sentinel whose
/// mass slot records how many points the compaction pass must skip.
fn mark_zero_runs(masses: &mut [f64], intensities: &mut [f64]) {
    let n = intensities.len();
    let mut i = 0;
    while i < n {
        if intensities[i] != 0.0 {
            i += 1;
            continue;
        }
        let start = i;
        while i < n && intensities[i] == 0.0 {
            i += 1;
        }
        let run = i - start;
        if run > MAX_PRESERVED_RUN {
            let interior = run - 2 * RUN_CONTEXT_POINTS;
            let sentinel = start + RUN_CONTEXT_POINTS;
            intensities[sentinel] = SENTINEL_INTENSITY;
            masses[sentinel] = interior as f64;
        }
    }
}

/// Second pass: rebuild the dense arrays, consuming sentinels by skipping
/// over the interiors they describe.
fn compact(masses: &mut Vec<f64>, intensities: &mut Vec<f64>) {
    let n = intensities.len();
    let mut write = 0;
    let mut read = 0;
    while read < n {
        if intensities[read] == SENTINEL_INTENSITY {
            read += masses[read] as usize;
            continue;
        }
        masses[write] = masses[read];
        intensities[write] = intensities[read];
        write += 1;
        read += 1;
    }
    masses.truncate(write);
    intensities.truncate(write);
}

#[cfg(test)]
mod test {
    use super::*;

    fn profile_with_run(leading: usize, run: usize, trailing: usize) -> (Vec<f64>, Vec<f64>) {
        let n = leading + run + trailing;
        let masses: Vec<f64> = (0..n).map(|i| 100.0 + i as f64 * 0.1).collect();
        let mut intensities = vec![0.0; n];
        for v in intensities[..leading].iter_mut() {
            *v = 10.0;
        }
        for v in intensities[leading + run..].iter_mut() {
            *v = 10.0;
        }
        (masses, intensities)
    }

    #[test]
    fn test_long_run_is_collapsed_with_context() {
        let (mut masses, mut intensities) = profile_with_run(3, 20, 3);
        let original_masses = masses.clone();
        compress_profile(&mut masses, &mut intensities);

        // 20-point run keeps 4 + 4 points
        assert_eq!(masses.len(), 3 + 8 + 3);
        assert_eq!(intensities.len(), masses.len());
        assert!(intensities.iter().all(|v| *v >= 0.0));

        // Context points keep their original masses
        assert_eq!(&masses[..7], &original_masses[..7]);
        assert_eq!(&masses[7..], &original_masses[19..]);
        assert!(masses.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_short_run_is_untouched() {
        let (mut masses, mut intensities) = profile_with_run(3, 5, 3);
        let snapshot = (masses.clone(), intensities.clone());
        compress_profile(&mut masses, &mut intensities);
        assert_eq!((masses, intensities), snapshot);
    }

    #[test]
    fn test_threshold_run_lengths() {
        // Exactly 8 zeros stay; 9 zeros lose exactly one point
        let (mut masses, mut intensities) = profile_with_run(2, 8, 2);
        compress_profile(&mut masses, &mut intensities);
        assert_eq!(masses.len(), 12);

        let (mut masses, mut intensities) = profile_with_run(2, 9, 2);
        compress_profile(&mut masses, &mut intensities);
        assert_eq!(masses.len(), 12);
    }

    #[test]
    fn test_trailing_run_is_collapsed() {
        let (mut masses, mut intensities) = profile_with_run(4, 30, 0);
        compress_profile(&mut masses, &mut intensities);
        assert_eq!(masses.len(), 4 + 8);
        assert!(intensities[4..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_empty_profile() {
        let mut masses: Vec<f64> = Vec::new();
        let mut intensities: Vec<f64> = Vec::new();
        compress_profile(&mut masses, &mut intensities);
        assert!(masses.is_empty());
    }
}
