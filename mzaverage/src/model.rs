//! The raw-scan data model consumed by the averaging pipeline.
//!
//! These types mirror what the file-access layer decodes out of a raw file:
//! a profile stored as one or more contiguous mass segments, an instrument
//! centroid stream, per-scan summary statistics, and the packed noise table
//! some packet formats carry. None of the binary decoding lives here.

use crate::centroid::AveragedCentroid;
use crate::noise::NoiseTable;

/// Per-point profile flags, as decoded from the packet stream.
pub mod flags {
    pub const NONE: u8 = 0;
    /// The detector saturated at this point.
    pub const SATURATED: u8 = 1;
    /// The point belongs to an internal reference (lock mass) peak.
    pub const REFERENCE: u8 = 2;
    /// The point was flagged as an exception by the instrument.
    pub const EXCEPTION: u8 = 4;
}

/// The packet family a scan was stored as. Only the distinction between
/// profile, data-dependent, and centroid-only packets matters to the
/// averaging logic; the byte layouts themselves are decoded elsewhere.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PacketType {
    /// Full-range profile data from a survey scan
    Profile,
    /// Profile data from a data-dependent scan whose mass range varies
    DataDependentProfile,
    /// Centroid-only data, no profile points
    Centroid,
    #[default]
    Unknown,
}

impl PacketType {
    /// Whether every scan of this type covers the same, non-data-dependent
    /// mass range and can be merged unconditionally.
    pub fn is_uniform_profile(&self) -> bool {
        matches!(self, Self::Profile)
    }
}

/// Summary statistics for one scan, as recorded in the scan index.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanStatistics {
    pub scan_number: usize,
    /// Total ion current, the sum of all intensities in the scan
    pub tic: f64,
    pub base_peak_mass: f64,
    pub base_peak_intensity: f64,
    pub packet_type: PacketType,
    pub packet_count: u32,
    pub low_mass: f64,
    pub high_mass: f64,
}

/// Profile data as parallel position/intensity/flag arrays covering one or
/// more contiguous mass segments.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SegmentedScan {
    pub positions: Vec<f64>,
    pub intensities: Vec<f64>,
    pub flags: Vec<u8>,
    /// (low, high) mass bounds of each segment
    pub ranges: Vec<(f64, f64)>,
}

impl SegmentedScan {
    pub fn new(positions: Vec<f64>, intensities: Vec<f64>) -> Self {
        let n = positions.len();
        let range = match (positions.first(), positions.last()) {
            (Some(lo), Some(hi)) => vec![(*lo, *hi)],
            _ => Vec::new(),
        };
        Self {
            positions,
            intensities,
            flags: vec![flags::NONE; n],
            ranges: range,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn lowest_position(&self) -> Option<f64> {
        self.positions.first().copied()
    }

    pub fn highest_position(&self) -> Option<f64> {
        self.positions.last().copied()
    }

    pub fn tic(&self) -> f64 {
        self.intensities.iter().sum()
    }

    /// The smallest spacing between consecutive profile points, used when a
    /// scan carries no frequency calibration and the axis must be built
    /// directly from the observed sampling.
    pub fn min_spacing(&self) -> Option<f64> {
        self.positions
            .windows(2)
            .map(|w| w[1] - w[0])
            .filter(|d| *d > 0.0)
            .min_by(|a, b| a.partial_cmp(b).unwrap())
    }
}

/// The instrument's own centroid arrays for one scan.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CentroidStream {
    pub masses: Vec<f64>,
    pub intensities: Vec<f32>,
    pub resolutions: Vec<f32>,
    pub charges: Vec<i32>,
    pub baselines: Vec<f32>,
    pub noises: Vec<f32>,
    /// Calibration coefficients recorded alongside the centroids
    pub coefficients: Vec<f64>,
}

impl CentroidStream {
    pub fn len(&self) -> usize {
        self.masses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masses.is_empty()
    }
}

/// One packed entry of a per-scan noise table, mass sorted.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NoisePoint {
    pub mass: f32,
    pub noise: f32,
    pub baseline: f32,
}

impl NoisePoint {
    pub fn new(mass: f32, noise: f32, baseline: f32) -> Self {
        Self {
            mass,
            noise,
            baseline,
        }
    }
}

/// Frequency-domain mass calibration for FT packets.
///
/// The profile mass axis is generated by stepping the acquisition frequency
/// down from `base_frequency` in units of `delta_frequency` and converting
/// each frequency to a mass through the calibration polynomial.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MassCalibration {
    pub coefficients: [f64; 3],
    pub base_frequency: f64,
    pub delta_frequency: f64,
}

impl MassCalibration {
    pub fn new(coefficients: [f64; 3], base_frequency: f64, delta_frequency: f64) -> Self {
        Self {
            coefficients,
            base_frequency,
            delta_frequency,
        }
    }

    /// Convert a frequency to a mass. The three-term model is used whenever
    /// the first coefficient is set, otherwise the two-term model.
    pub fn mass_at(&self, frequency: f64) -> f64 {
        let [c1, c2, c3] = self.coefficients;
        let f2 = frequency * frequency;
        if c1 != 0.0 {
            c1 / frequency + c2 / f2 + c3 / (f2 * f2)
        } else {
            c2 / f2 + c3 / (f2 * f2)
        }
    }
}

/// Everything the averager needs for one input scan.
#[derive(Debug, Default, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawScan {
    pub statistics: ScanStatistics,
    pub segments: SegmentedScan,
    pub centroids: Option<CentroidStream>,
    pub noise_table: Option<Vec<NoisePoint>>,
    pub calibration: Option<MassCalibration>,
}

impl RawScan {
    pub fn new(statistics: ScanStatistics, segments: SegmentedScan) -> Self {
        Self {
            statistics,
            segments,
            centroids: None,
            noise_table: None,
            calibration: None,
        }
    }
}

/// The product of one averaging, addition, or subtraction operation.
///
/// Owns a snapshot of the merged profile (possibly compressed), the centroid
/// list derived from it, a noise table parallel to the centroids, and
/// statistics recomputed from the merged data.
#[derive(Debug, Default, Clone)]
pub struct MergedScan {
    pub profile_positions: Vec<f64>,
    pub profile_intensities: Vec<f64>,
    pub centroids: Vec<AveragedCentroid>,
    pub noise: NoiseTable,
    pub statistics: ScanStatistics,
    /// The number of scans that actually merged, which may be fewer than
    /// were requested
    pub scans_combined: u32,
}

impl MergedScan {
    /// Repackage the centroid list and noise table in the same parallel-array
    /// layout the file layer uses.
    pub fn centroid_stream(&self) -> CentroidStream {
        let mut stream = CentroidStream::default();
        for (peak, (noise, baseline)) in self
            .centroids
            .iter()
            .zip(self.noise.noises.iter().zip(self.noise.baselines.iter()))
        {
            stream.masses.push(peak.mz);
            stream.intensities.push(peak.intensity);
            stream.resolutions.push(peak.resolution);
            stream.charges.push(peak.charge);
            stream.noises.push(*noise);
            stream.baselines.push(*baseline);
        }
        stream
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_segmented_scan_bounds() {
        let scan = SegmentedScan::new(vec![100.0, 100.1, 100.2], vec![0.0, 50.0, 0.0]);
        assert_eq!(scan.len(), 3);
        assert_eq!(scan.lowest_position(), Some(100.0));
        assert_eq!(scan.highest_position(), Some(100.2));
        assert_eq!(scan.ranges, vec![(100.0, 100.2)]);
        assert!((scan.tic() - 50.0).abs() < 1e-9);
        assert!((scan.min_spacing().unwrap() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_empty_scan() {
        let scan = SegmentedScan::default();
        assert!(scan.is_empty());
        assert!(scan.lowest_position().is_none());
        assert!(scan.min_spacing().is_none());
    }

    #[test]
    fn test_calibration_models() {
        let three = MassCalibration::new([2.0e8, 1.0e10, 0.0], 1.0e6, 100.0);
        let m = three.mass_at(1.0e6);
        assert!((m - (2.0e8 / 1.0e6 + 1.0e10 / 1.0e12)).abs() < 1e-9);

        let two = MassCalibration::new([0.0, 1.0e14, 0.0], 1.0e6, 100.0);
        let m = two.mass_at(1.0e6);
        assert!((m - 100.0).abs() < 1e-9);
    }
}
