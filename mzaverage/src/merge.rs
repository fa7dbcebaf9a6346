//! Accumulation of resampled contributions into the shared profile.
//!
//! Resampling fans out across scans, but the merge is strictly sequential:
//! contribution indices collide across scans, and the merge is cheap next to
//! the resampling, so a single writer is the simpler and safe choice.

use mzpeaks::coordinate::SimpleInterval;
use tracing::debug;

use crate::axis::{ProfileAccumulator, ResampledAxis};
use crate::model::{ScanStatistics, SegmentedScan};
use crate::resample::ContributionBatch;

/// Fraction of the anchor scan's span by which a candidate's segment bounds
/// may deviate and still merge.
const RANGE_TOLERANCE: f64 = 0.1;

/// How contributions combine in the accumulator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Sum of contributions pre-divided by the scan count
    #[default]
    Average,
    /// Plain sum, no normalization by count
    Add,
    /// Value-limited subtraction, clamped at zero
    Subtract,
}

/// The single-writer accumulator stage.
#[derive(Debug, Default)]
pub struct SpectrumMerger {
    accumulator: ProfileAccumulator,
    merged: u32,
}

impl SpectrumMerger {
    pub fn new(len: usize) -> Self {
        Self {
            accumulator: ProfileAccumulator::new(len),
            merged: 0,
        }
    }

    pub fn apply_batch(&mut self, batch: &ContributionBatch, mode: MergeMode) {
        match mode {
            MergeMode::Average | MergeMode::Add => {
                for (i, v) in batch.iter() {
                    self.accumulator.add(i, v);
                }
            }
            MergeMode::Subtract => {
                for (i, v) in batch.iter() {
                    self.accumulator.subtract(i, v);
                }
            }
        }
    }

    /// Fold one scan's whole batch list in, counting it as merged
    pub fn apply_scan(&mut self, batches: &[ContributionBatch], mode: MergeMode) {
        for batch in batches {
            self.apply_batch(batch, mode);
        }
        self.merged += 1;
    }

    /// The number of scans folded in so far
    pub fn scans_merged(&self) -> u32 {
        self.merged
    }

    /// Correct the normalization when fewer scans merged than were requested.
    ///
    /// Contributions were divided by the requested count at resample time; a
    /// rescale by `requested / merged` afterwards makes the profile an
    /// unbiased mean over the scans that actually merged.
    pub fn rescale_for_requested(&mut self, requested: usize) {
        if self.merged > 0 && self.merged as usize != requested {
            debug!(
                requested,
                merged = self.merged,
                "Rescaling accumulator for partially merged average"
            );
            self.accumulator
                .scale(requested as f64 / self.merged as f64);
        }
    }

    pub fn finish(self) -> ProfileAccumulator {
        self.accumulator
    }
}

/// Whether `candidate` may join an average anchored on `anchor`: its segment
/// range must match the anchor's within [`RANGE_TOLERANCE`] of the anchor's
/// span on both ends, unless merging is forced.
pub fn can_merge_scan(
    anchor: &ScanStatistics,
    candidate: &ScanStatistics,
    always_merge_segments: bool,
) -> bool {
    if always_merge_segments {
        return true;
    }
    let anchor_range = SimpleInterval::new(anchor.low_mass, anchor.high_mass);
    let span = anchor_range.end - anchor_range.start;
    if span <= 0.0 {
        return false;
    }
    let tolerance = span * RANGE_TOLERANCE;
    (candidate.low_mass - anchor_range.start).abs() <= tolerance
        && (candidate.high_mass - anchor_range.end).abs() <= tolerance
}

/// Decide which scans merge, and in what order.
///
/// Uniform profile scans cover a fixed mass range by construction and merge
/// unconditionally, last to first. Everything else anchors on the scan with
/// the highest TIC and walks outward from it, alternating sides, skipping
/// candidates whose ranges disagree with the anchor.
pub fn merge_order(statistics: &[ScanStatistics], always_merge_segments: bool) -> Vec<usize> {
    if statistics.is_empty() {
        return Vec::new();
    }
    if statistics
        .iter()
        .all(|s| s.packet_type.is_uniform_profile())
    {
        return (0..statistics.len()).rev().collect();
    }

    let anchor = statistics
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.tic.partial_cmp(&b.tic).unwrap())
        .map(|(i, _)| i)
        .unwrap();

    let mut order = Vec::with_capacity(statistics.len());
    order.push(anchor);
    let mut distance = 1usize;
    loop {
        let below = anchor.checked_sub(distance);
        let above = if anchor + distance < statistics.len() {
            Some(anchor + distance)
        } else {
            None
        };
        if below.is_none() && above.is_none() {
            break;
        }
        for candidate in [below, above].into_iter().flatten() {
            if can_merge_scan(
                &statistics[anchor],
                &statistics[candidate],
                always_merge_segments,
            ) {
                order.push(candidate);
            } else {
                debug!(
                    anchor = statistics[anchor].scan_number,
                    skipped = statistics[candidate].scan_number,
                    "Skipping scan with incompatible segment range"
                );
            }
        }
        distance += 1;
    }
    order
}

/// Interpolate a scan directly onto the axis, one value per axis point.
///
/// This is the two-scan path: no batching, no zero-run skipping. Axis points
/// outside the scan's range evaluate to zero.
pub fn interpolate_onto(axis: &ResampledAxis, scan: &SegmentedScan) -> Vec<f64> {
    let mut out = vec![0.0; axis.len()];
    if scan.len() < 2 {
        return out;
    }
    let positions = &scan.positions;
    let intensities = &scan.intensities;

    let mut j = 0usize;
    for (i, out_v) in out.iter_mut().enumerate() {
        let mass = axis.mass_at(i);
        if mass < positions[0] || mass > positions[positions.len() - 1] {
            continue;
        }
        while j + 2 < positions.len() && positions[j + 1] <= mass {
            j += 1;
        }
        let m0 = positions[j];
        let m1 = positions[j + 1];
        let width = m1 - m0;
        if width <= 0.0 {
            *out_v = intensities[j];
            continue;
        }
        let t = ((mass - m0) / width).clamp(0.0, 1.0);
        *out_v = intensities[j] + (intensities[j + 1] - intensities[j]) * t;
    }
    out
}

/// The direct two-scan merge used by Add and Subtract (and the two-scan
/// average), bypassing the batched resampler.
pub fn merge_pair(
    axis: &ResampledAxis,
    a: &SegmentedScan,
    b: &SegmentedScan,
    mode: MergeMode,
) -> ProfileAccumulator {
    let ya = interpolate_onto(axis, a);
    let yb = interpolate_onto(axis, b);
    let mut accumulator = ProfileAccumulator::new(axis.len());
    match mode {
        MergeMode::Average => {
            for (i, (va, vb)) in ya.iter().zip(yb.iter()).enumerate() {
                accumulator.add(i, 0.5 * (va + vb));
            }
        }
        MergeMode::Add => {
            for (i, (va, vb)) in ya.iter().zip(yb.iter()).enumerate() {
                accumulator.add(i, va + vb);
            }
        }
        MergeMode::Subtract => {
            for (i, (va, vb)) in ya.iter().zip(yb.iter()).enumerate() {
                accumulator.add(i, *va);
                accumulator.subtract(i, *vb);
            }
        }
    }
    accumulator
}
