//! Resampling of one source scan onto the shared mass axis.
//!
//! Each scan is interpolated independently, reading only its own arrays and
//! the immutable axis, so this stage is the pipeline's embarrassingly
//! parallel one. Contributions are emitted as bounded-size batches so peak
//! memory stays flat no matter how many scans run at once; every batch is
//! independently mergeable.

use crate::axis::ResampledAxis;
use crate::model::SegmentedScan;

/// Contributions are flushed to a finished batch once they reach this size.
pub const CONTRIBUTION_BATCH_SIZE: usize = 5000;

/// A run of this many consecutive zero intensities marks a truly empty
/// stretch, to be skipped wholesale rather than point by point.
const EMPTY_RUN: usize = 4;

/// A bounded batch of (axis index, intensity contribution) pairs produced by
/// resampling part of one scan.
#[derive(Debug, Default, Clone)]
pub struct ContributionBatch {
    pub indices: Vec<u32>,
    pub values: Vec<f64>,
}

impl ContributionBatch {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            indices: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    #[inline]
    fn push(&mut self, index: usize, value: f64) {
        self.indices.push(index as u32);
        self.values.push(value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.indices
            .iter()
            .zip(self.values.iter())
            .map(|(i, v)| (*i as usize, *v))
    }
}

/// Map one scan's (position, intensity) samples onto `axis` by linear
/// interpolation between consecutive samples.
///
/// Every contribution is divided by `normalization` up front (the number of
/// scans being averaged) so the downstream merge is a pure sum. Runs of two
/// consecutive zero samples carry no signal and are not interpolated; runs of
/// [`EMPTY_RUN`] or more are skipped directly to the next non-zero boundary.
///
/// An empty or single-point scan yields no batches, which the merge step
/// treats as a scan contributing nothing.
pub fn resample_scan(
    scan: &SegmentedScan,
    axis: &ResampledAxis,
    normalization: f64,
) -> Vec<ContributionBatch> {
    let n = scan.len();
    if n < 2 || axis.is_empty() {
        return Vec::new();
    }
    let inv = if normalization > 0.0 {
        1.0 / normalization
    } else {
        1.0
    };

    let positions = &scan.positions;
    let intensities = &scan.intensities;

    let mut batches = Vec::new();
    let mut batch = ContributionBatch::with_capacity(CONTRIBUTION_BATCH_SIZE);

    let mut j = 0usize;
    while j + 1 < n {
        let y0 = intensities[j];
        let y1 = intensities[j + 1];

        if y0 == 0.0 && y1 == 0.0 {
            if j + EMPTY_RUN <= n
                && intensities[j..j + EMPTY_RUN].iter().all(|y| *y == 0.0)
            {
                // Truly empty stretch, seek the next non-zero boundary
                let mut k = j + EMPTY_RUN;
                while k < n && intensities[k] == 0.0 {
                    k += 1;
                }
                if k >= n {
                    break;
                }
                j = k - 1;
            } else {
                j += 1;
            }
            continue;
        }

        let m0 = positions[j];
        let m1 = positions[j + 1];
        if m1 <= m0 {
            // Degenerate spacing, nothing to interpolate over
            j += 1;
            continue;
        }

        let mut i = axis.lower_bound(m0);
        let scale = (y1 - y0) / (m1 - m0);
        while i < axis.len() {
            let mass = axis.mass_at(i);
            if mass >= m1 {
                break;
            }
            let value = (y0 + (mass - m0) * scale) * inv;
            if value != 0.0 {
                batch.push(i, value);
                if batch.len() >= CONTRIBUTION_BATCH_SIZE {
                    batches.push(std::mem::take(&mut batch));
                    batch = ContributionBatch::with_capacity(CONTRIBUTION_BATCH_SIZE);
                }
            }
            i += 1;
        }
        j += 1;
    }

    // The interval walk excludes each interval's upper bound, so the final
    // source point lands here.
    let last_y = intensities[n - 1];
    if last_y != 0.0 {
        let i = axis.lower_bound(positions[n - 1]);
        if i < axis.len() {
            batch.push(i, last_y * inv);
        }
    }

    if !batch.is_empty() {
        batches.push(batch);
    }
    batches
}
