//! The shared resampling axis and its intensity accumulator.
//!
//! All scans in one averaging operation are interpolated onto a single
//! monotonically increasing mass axis. The axis is generated once, from the
//! frequency calibration when one is available, and is immutable afterwards;
//! resampling tasks only ever read it.

use tracing::debug;

use crate::model::{MassCalibration, RawScan};
use crate::source::AveragingError;

/// Masses are generated from the calibration polynomial this many at a time,
/// so the tail can overshoot the true high mass by up to `GENERATION_BATCH - 1`
/// points before the trim pass removes them.
const GENERATION_BATCH: usize = 4;

/// A fixed, strictly increasing mass axis shared across one averaging call.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ResampledAxis {
    masses: Vec<f64>,
}

impl ResampledAxis {
    /// Build an axis covering the union of all the scans' mass ranges.
    ///
    /// When any scan carries a frequency calibration the axis follows the
    /// calibration polynomial, stepped by the finest `delta_frequency`
    /// observed so that no scan loses information. Otherwise the axis is
    /// uniform at the smallest observed point spacing.
    pub fn from_scans(scans: &[RawScan]) -> Result<Self, AveragingError> {
        if scans.is_empty() {
            return Err(AveragingError::EmptyScanList);
        }

        let mut lowest = f64::INFINITY;
        let mut highest = f64::NEG_INFINITY;
        for scan in scans {
            let lo = scan
                .segments
                .lowest_position()
                .unwrap_or(scan.statistics.low_mass);
            let hi = scan
                .segments
                .highest_position()
                .unwrap_or(scan.statistics.high_mass);
            lowest = lowest.min(lo);
            highest = highest.max(hi);
        }
        if !lowest.is_finite() || !highest.is_finite() || highest <= lowest {
            return Err(AveragingError::EmptyAxis);
        }

        let calibration = Self::finest_calibration(scans);
        let masses = match calibration {
            Some(cal) if cal.delta_frequency > 0.0 && cal.base_frequency > 0.0 => {
                Self::generate_calibrated(&cal, lowest, highest)
            }
            _ => {
                debug!("No usable frequency calibration, generating a uniform axis");
                let spacing = scans
                    .iter()
                    .filter_map(|s| s.segments.min_spacing())
                    .min_by(|a, b| a.partial_cmp(b).unwrap())
                    .unwrap_or(1.0);
                Self::generate_uniform(spacing, lowest, highest)
            }
        };

        if masses.len() < 2 {
            return Err(AveragingError::EmptyAxis);
        }
        Ok(Self { masses })
    }

    /// The calibration with the smallest frequency step among the scans that
    /// carry one.
    fn finest_calibration(scans: &[RawScan]) -> Option<MassCalibration> {
        scans
            .iter()
            .filter_map(|s| s.calibration)
            .filter(|c| c.delta_frequency > 0.0)
            .min_by(|a, b| a.delta_frequency.partial_cmp(&b.delta_frequency).unwrap())
    }

    fn generate_calibrated(cal: &MassCalibration, lowest: f64, highest: f64) -> Vec<f64> {
        let mut frequency = cal.base_frequency;

        // The base frequency corresponds to the low-mass end of the range.
        // If it starts inside the requested range, walk it back up.
        let mut guard = 0usize;
        while cal.mass_at(frequency) > lowest && guard < 1_000_000 {
            frequency += cal.delta_frequency;
            guard += 1;
        }

        let mut masses: Vec<f64> = Vec::new();
        'gen: loop {
            for _ in 0..GENERATION_BATCH {
                if frequency <= cal.delta_frequency {
                    break 'gen;
                }
                let mass = cal.mass_at(frequency);
                frequency -= cal.delta_frequency;
                if mass < lowest {
                    continue;
                }
                if masses.last().map(|last| mass <= *last).unwrap_or(false) {
                    // Degenerate calibration step, drop the point rather
                    // than break monotonicity
                    continue;
                }
                masses.push(mass);
            }
            if masses.last().map(|last| *last > highest).unwrap_or(false) {
                break;
            }
        }

        let before = masses.len();
        while masses.last().map(|last| *last > highest).unwrap_or(false) {
            masses.pop();
        }
        if before != masses.len() {
            debug!(trimmed = before - masses.len(), "Trimmed axis overshoot");
        }
        masses
    }

    fn generate_uniform(spacing: f64, lowest: f64, highest: f64) -> Vec<f64> {
        let n = ((highest - lowest) / spacing).round() as usize + 1;
        (0..n).map(|i| lowest + i as f64 * spacing).collect()
    }

    pub fn len(&self) -> usize {
        self.masses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masses.is_empty()
    }

    pub fn masses(&self) -> &[f64] {
        &self.masses
    }

    #[inline]
    pub fn mass_at(&self, index: usize) -> f64 {
        self.masses[index]
    }

    pub fn first(&self) -> f64 {
        self.masses[0]
    }

    pub fn last(&self) -> f64 {
        *self.masses.last().unwrap()
    }

    /// The index of the first axis point at or above `mass`
    #[inline]
    pub fn lower_bound(&self, mass: f64) -> usize {
        self.masses.partition_point(|m| *m < mass)
    }

    /// Local spacing around point `index`, falling back to `1.0` when the
    /// axis is too short to measure it at the boundaries.
    pub fn spacing_at(&self, index: usize) -> f64 {
        if self.masses.len() < 2 {
            return 1.0;
        }
        if index + 1 < self.masses.len() {
            self.masses[index + 1] - self.masses[index]
        } else {
            self.masses[index] - self.masses[index - 1]
        }
    }

    /// The median point spacing over the whole axis
    pub fn typical_spacing(&self) -> f64 {
        if self.masses.len() < 2 {
            return 1.0;
        }
        let mid = self.masses.len() / 2;
        self.spacing_at(mid)
    }
}

/// The intensity accumulator aligned 1:1 with a [`ResampledAxis`].
#[derive(Debug, Default, Clone)]
pub struct ProfileAccumulator {
    intensities: Vec<f64>,
}

impl ProfileAccumulator {
    pub fn new(len: usize) -> Self {
        Self {
            intensities: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.intensities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intensities.is_empty()
    }

    #[inline]
    pub fn add(&mut self, index: usize, value: f64) {
        self.intensities[index] += value;
    }

    /// Value-limited subtraction, clamping the result at zero
    #[inline]
    pub fn subtract(&mut self, index: usize, value: f64) {
        let v = self.intensities[index] - value;
        self.intensities[index] = if v > 0.0 { v } else { 0.0 };
    }

    pub fn scale(&mut self, factor: f64) {
        self.intensities.iter_mut().for_each(|v| *v *= factor);
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.intensities
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.intensities
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{ScanStatistics, SegmentedScan};

    fn scan_with_calibration(cal: MassCalibration, lo: f64, hi: f64) -> RawScan {
        let mut scan = RawScan::new(
            ScanStatistics::default(),
            SegmentedScan::new(vec![lo, hi], vec![1.0, 1.0]),
        );
        scan.calibration = Some(cal);
        scan
    }

    #[test]
    fn test_calibrated_axis_is_strictly_increasing() {
        // mass = c1/f over f in [5e5, 2e6] spans 100..400
        let cal = MassCalibration::new([2.0e8, 0.0, 0.0], 2.0e6, 250.0);
        let scan = scan_with_calibration(cal, 150.0, 300.0);
        let axis = ResampledAxis::from_scans(&[scan]).unwrap();
        assert!(axis.len() > 100);
        for w in axis.masses().windows(2) {
            assert!(w[1] > w[0]);
        }
        assert!(axis.first() >= 150.0);
        // Overshoot past the high mass is trimmed back below it
        assert!(axis.last() <= 300.0);
        // And the axis still reaches the high mass within a few points
        assert!(300.0 - axis.last() < 4.0 * axis.spacing_at(axis.len() - 1));
    }

    #[test]
    fn test_finest_delta_wins() {
        let coarse = MassCalibration::new([2.0e8, 0.0, 0.0], 2.0e6, 500.0);
        let fine = MassCalibration::new([2.0e8, 0.0, 0.0], 2.0e6, 125.0);
        let a = scan_with_calibration(coarse, 150.0, 300.0);
        let b = scan_with_calibration(fine, 150.0, 300.0);

        let axis_coarse = ResampledAxis::from_scans(&[a.clone()]).unwrap();
        let axis_both = ResampledAxis::from_scans(&[a, b]).unwrap();
        assert!(axis_both.len() > 2 * axis_coarse.len());
    }

    #[test]
    fn test_uniform_fallback_covers_range() {
        let scan = RawScan::new(
            ScanStatistics::default(),
            SegmentedScan::new(vec![100.0, 100.1, 100.2, 100.3], vec![0.0, 1.0, 2.0, 1.0]),
        );
        let axis = ResampledAxis::from_scans(&[scan]).unwrap();
        assert_eq!(axis.len(), 4);
        assert!((axis.first() - 100.0).abs() < 1e-9);
        assert!((axis.last() - 100.3).abs() < 1e-9);
    }

    #[test]
    fn test_empty_input_is_an_error() {
        assert_eq!(
            ResampledAxis::from_scans(&[]).unwrap_err(),
            AveragingError::EmptyScanList
        );
        let scan = RawScan::default();
        assert_eq!(
            ResampledAxis::from_scans(&[scan]).unwrap_err(),
            AveragingError::EmptyAxis
        );
    }

    #[test]
    fn test_accumulator_subtract_clamps() {
        let mut acc = ProfileAccumulator::new(3);
        acc.add(1, 5.0);
        acc.subtract(1, 7.0);
        acc.subtract(2, 1.0);
        assert_eq!(acc.as_slice(), &[0.0, 0.0, 0.0]);
    }
}
