//! The averaging orchestrator: average N scans, add two, or subtract a
//! background from a foreground.
//!
//! The pipeline is resample (parallel fan-out per scan) into merge (a single
//! sequential writer), then centroiding, noise estimation, charge analysis,
//! and profile compression over the merged result. Averaging pre-divides
//! each contribution by the requested scan count, so a partial merge only
//! needs one rescale at the end.

use rayon::prelude::*;
use tracing::debug;

use crate::axis::{ProfileAccumulator, ResampledAxis};
use crate::centroid::{centroid_profile, AveragedCentroid};
use crate::charge::analyze_charges;
use crate::compress::compress_profile;
use crate::merge::{merge_order, merge_pair, MergeMode, SpectrumMerger};
use crate::model::{MergedScan, RawScan, ScanStatistics};
use crate::noise::estimate_noise;
use crate::resample::{resample_scan, ContributionBatch};
use crate::source::{fetch_scans, fetch_scans_serial, AveragingError, ScanSource};

/// Below this many scans, parallel retrieval costs more than it saves.
const SERIAL_FETCH_LIMIT: usize = 4;

/// Tuning knobs for one averaging operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AveragingOptions {
    /// How many seed peaks the charge analysis may evaluate; zero disables
    /// charge determination entirely.
    pub max_charge_determinations: usize,
    /// Prefer the packed per-scan noise tables over centroid-stream noise
    /// curves when any scan carries one.
    pub use_noise_table_when_available: bool,
    /// Fan resampling (and scan retrieval) out over the worker pool.
    pub merge_in_parallel: bool,
    /// Scans per resampling task; raising this amortizes scheduling overhead
    /// when the scans are small and cheap.
    pub merge_task_batching: usize,
    /// Merge every scan regardless of segment-range agreement.
    pub always_merge_segments: bool,
}

impl Default for AveragingOptions {
    fn default() -> Self {
        Self {
            max_charge_determinations: 100,
            use_noise_table_when_available: true,
            merge_in_parallel: true,
            merge_task_batching: 1,
            always_merge_segments: false,
        }
    }
}

/// Runs averaging operations against one scan source.
#[derive(Debug, Default)]
pub struct SpectrumAverager<S> {
    source: S,
    options: AveragingOptions,
}

impl<S: ScanSource + Sync> SpectrumAverager<S> {
    pub fn new(source: S) -> Self {
        Self::with_options(source, AveragingOptions::default())
    }

    pub fn with_options(source: S, options: AveragingOptions) -> Self {
        Self { source, options }
    }

    pub fn options(&self) -> &AveragingOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut AveragingOptions {
        &mut self.options
    }

    /// Average the listed scans into one merged scan.
    ///
    /// Scans whose segment ranges disagree with the anchor are skipped; the
    /// result is rescaled so it remains an unbiased mean over the scans that
    /// actually merged.
    pub fn average_scans(&self, scan_numbers: &[usize]) -> Result<MergedScan, AveragingError> {
        let scans = self.fetch(scan_numbers)?;
        let axis = ResampledAxis::from_scans(&scans)?;

        let statistics: Vec<ScanStatistics> =
            scans.iter().map(|s| s.statistics.clone()).collect();
        let order = merge_order(&statistics, self.options.always_merge_segments);
        debug!(
            requested = scan_numbers.len(),
            merging = order.len(),
            axis_points = axis.len(),
            "Averaging scans"
        );

        let normalization = scan_numbers.len() as f64;
        let resampled = self.resample_ordered(&scans, &order, &axis, normalization);

        let mut merger = SpectrumMerger::new(axis.len());
        for batches in resampled.iter() {
            merger.apply_scan(batches, MergeMode::Average);
        }
        merger.rescale_for_requested(scan_numbers.len());
        let merged = merger.scans_merged();
        let accumulator = merger.finish();

        // Only the scans that merged inform the noise estimate
        let mut kept = vec![false; scans.len()];
        for i in order.iter() {
            kept[*i] = true;
        }
        let merged_scans: Vec<RawScan> = scans
            .into_iter()
            .zip(kept)
            .filter_map(|(scan, keep)| keep.then_some(scan))
            .collect();

        Ok(self.assemble(&axis, accumulator, &merged_scans, merged))
    }

    /// Sum two scans point by point.
    pub fn add_scans(&self, a: usize, b: usize) -> Result<MergedScan, AveragingError> {
        self.combine_pair(a, b, MergeMode::Add)
    }

    /// Subtract a background scan from a foreground scan, clamping at zero.
    pub fn subtract_scans(
        &self,
        foreground: usize,
        background: usize,
    ) -> Result<MergedScan, AveragingError> {
        self.combine_pair(foreground, background, MergeMode::Subtract)
    }

    fn combine_pair(
        &self,
        a: usize,
        b: usize,
        mode: MergeMode,
    ) -> Result<MergedScan, AveragingError> {
        let scans = fetch_scans_serial(&self.source, &[a, b])?;
        let axis = ResampledAxis::from_scans(&scans)?;
        debug!(a, b, ?mode, axis_points = axis.len(), "Combining scan pair");
        let accumulator = merge_pair(&axis, &scans[0].segments, &scans[1].segments, mode);

        // After subtraction the background's noise is gone from the signal,
        // so only the foreground's curves describe what remains.
        let noise_scans = match mode {
            MergeMode::Subtract => &scans[..1],
            _ => &scans[..],
        };
        Ok(self.assemble(&axis, accumulator, noise_scans, 2))
    }

    fn fetch(&self, scan_numbers: &[usize]) -> Result<Vec<RawScan>, AveragingError> {
        if self.options.merge_in_parallel && scan_numbers.len() >= SERIAL_FETCH_LIMIT {
            fetch_scans(&self.source, scan_numbers)
        } else {
            fetch_scans_serial(&self.source, scan_numbers)
        }
    }

    /// Resample the ordered scans, fanning out over the worker pool in groups
    /// of `merge_task_batching` when parallel merging is enabled.
    fn resample_ordered(
        &self,
        scans: &[RawScan],
        order: &[usize],
        axis: &ResampledAxis,
        normalization: f64,
    ) -> Vec<Vec<ContributionBatch>> {
        let ordered: Vec<&RawScan> = order.iter().map(|i| &scans[*i]).collect();
        if self.options.merge_in_parallel {
            let batching = self.options.merge_task_batching.max(1);
            ordered
                .par_chunks(batching)
                .flat_map_iter(|chunk| {
                    chunk
                        .iter()
                        .map(|scan| resample_scan(&scan.segments, axis, normalization))
                        .collect::<Vec<_>>()
                })
                .collect()
        } else {
            ordered
                .iter()
                .map(|scan| resample_scan(&scan.segments, axis, normalization))
                .collect()
        }
    }

    /// Run the post-merge stages and package the output scan.
    fn assemble(
        &self,
        axis: &ResampledAxis,
        accumulator: ProfileAccumulator,
        scans: &[RawScan],
        scans_combined: u32,
    ) -> MergedScan {
        let mut positions = axis.masses().to_vec();
        let mut intensities = accumulator.into_inner();

        let charge_enabled = self.options.max_charge_determinations > 0;
        if !charge_enabled {
            // No charge work needs the full profile, compress immediately
            compress_profile(&mut positions, &mut intensities);
        }

        let mut centroids = centroid_profile(&positions, &intensities);
        let noise = estimate_noise(
            scans,
            &centroids,
            self.options.use_noise_table_when_available,
        );
        if charge_enabled {
            analyze_charges(
                &mut centroids,
                &positions,
                &intensities,
                self.options.max_charge_determinations,
            );
            compress_profile(&mut positions, &mut intensities);
        }

        let statistics = recompute_statistics(&positions, &intensities, &centroids, scans);
        MergedScan {
            profile_positions: positions,
            profile_intensities: intensities,
            centroids,
            noise,
            statistics,
            scans_combined,
        }
    }
}

/// Summary statistics recomputed from the merged data. The base peak comes
/// from the fitted centroid list when there is one, otherwise from the raw
/// profile points.
fn recompute_statistics(
    positions: &[f64],
    intensities: &[f64],
    centroids: &[AveragedCentroid],
    scans: &[RawScan],
) -> ScanStatistics {
    let mut statistics = scans
        .first()
        .map(|s| s.statistics.clone())
        .unwrap_or_default();
    statistics.tic = intensities.iter().sum();
    let mut base_peak = (statistics.base_peak_mass, 0.0f64);
    for peak in centroids.iter() {
        if peak.intensity as f64 > base_peak.1 {
            base_peak = (peak.mz, peak.intensity as f64);
        }
    }
    if centroids.is_empty() {
        for (mass, intensity) in positions.iter().zip(intensities.iter()) {
            if *intensity > base_peak.1 {
                base_peak = (*mass, *intensity);
            }
        }
    }
    statistics.base_peak_mass = base_peak.0;
    statistics.base_peak_intensity = base_peak.1;
    if let (Some(low), Some(high)) = (positions.first(), positions.last()) {
        statistics.low_mass = *low;
        statistics.high_mass = *high;
    }
    statistics.packet_count = positions.len() as u32;
    statistics
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{PacketType, SegmentedScan};
    use crate::source::MemoryScanSource;

    fn scan(number: usize, positions: Vec<f64>, intensities: Vec<f64>) -> RawScan {
        let segments = SegmentedScan::new(positions, intensities);
        let statistics = ScanStatistics {
            scan_number: number,
            tic: segments.tic(),
            packet_type: PacketType::DataDependentProfile,
            low_mass: segments.lowest_position().unwrap_or_default(),
            high_mass: segments.highest_position().unwrap_or_default(),
            ..Default::default()
        };
        RawScan::new(statistics, segments)
    }

    fn single_peak(number: usize, scale: f64) -> RawScan {
        scan(
            number,
            vec![100.0, 100.1, 100.2, 100.3, 100.4],
            vec![0.0, 50.0 * scale, 100.0 * scale, 50.0 * scale, 0.0],
        )
    }

    #[test_log::test]
    fn test_average_of_identical_scans_conserves_signal() {
        let scans: Vec<RawScan> = (1..=4).map(|i| single_peak(i, 1.0)).collect();
        let averager = SpectrumAverager::new(MemoryScanSource::new(scans));
        let merged = averager.average_scans(&[1, 2, 3, 4]).unwrap();

        assert_eq!(merged.scans_combined, 4);
        let expected = [0.0, 50.0, 100.0, 50.0, 0.0];
        assert_eq!(merged.profile_intensities.len(), expected.len());
        for (got, want) in merged.profile_intensities.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-9, "got {got}, want {want}");
        }
        assert!((merged.statistics.base_peak_mass - 100.2).abs() < 1e-9);
        assert!((merged.statistics.base_peak_intensity - 100.0).abs() < 1e-9);
        assert!((merged.statistics.tic - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_two_scan_average_produces_expected_centroid() {
        let scans = vec![single_peak(1, 1.0), single_peak(2, 1.2)];
        let averager = SpectrumAverager::new(MemoryScanSource::new(scans));
        let merged = averager.average_scans(&[1, 2]).unwrap();

        assert_eq!(merged.centroids.len(), 1);
        let peak = &merged.centroids[0];
        assert!((peak.mz - 100.2).abs() < 0.01);
        assert!(peak.intensity >= 100.0 && peak.intensity <= 120.0);
        assert!(peak.resolution > 0.0);
        assert_eq!(merged.noise.len(), merged.centroids.len());
    }

    #[test]
    fn test_subtract_scan_from_itself_floors_at_zero() {
        let scans = vec![single_peak(1, 1.0)];
        let averager = SpectrumAverager::new(MemoryScanSource::new(scans));
        let merged = averager.subtract_scans(1, 1).unwrap();

        for v in merged.profile_intensities.iter() {
            assert!(*v >= 0.0);
            assert!(v.abs() < 1e-9);
        }
        assert!(merged.centroids.is_empty());
    }

    #[test]
    fn test_add_scans_sums_intensities() {
        let scans = vec![single_peak(1, 1.0), single_peak(2, 1.0)];
        let averager = SpectrumAverager::new(MemoryScanSource::new(scans));
        let merged = averager.add_scans(1, 2).unwrap();
        let peak = merged
            .profile_intensities
            .iter()
            .fold(0.0f64, |a, b| a.max(*b));
        assert!((peak - 200.0).abs() < 1e-9);
    }

    #[test_log::test]
    fn test_incompatible_scan_is_skipped_and_rescaled() {
        let mut far = scan(
            3,
            vec![500.0, 500.1, 500.2],
            vec![0.0, 10.0, 0.0],
        );
        far.statistics.tic = 10.0;
        let scans = vec![single_peak(1, 1.0), single_peak(2, 1.0), far];
        let averager = SpectrumAverager::new(MemoryScanSource::new(scans));
        let merged = averager.average_scans(&[1, 2, 3]).unwrap();

        assert_eq!(merged.scans_combined, 2);
        // Rescaled by 3/2, the mean over the two merged scans is unbiased
        let peak = merged
            .profile_intensities
            .iter()
            .fold(0.0f64, |a, b| a.max(*b));
        assert!((peak - 100.0).abs() < 1e-6, "peak was {peak}");
    }

    #[test_log::test]
    fn test_charge_disabled_path_compresses_early() {
        let n = 80;
        let positions: Vec<f64> = (0..n).map(|i| 100.0 + i as f64 * 0.1).collect();
        let mut intensities = vec![0.0; n];
        intensities[2] = 50.0;
        intensities[3] = 100.0;
        intensities[4] = 50.0;
        intensities[76] = 40.0;
        intensities[77] = 80.0;
        intensities[78] = 40.0;
        let scans = vec![scan(1, positions, intensities)];

        let options = AveragingOptions {
            max_charge_determinations: 0,
            ..Default::default()
        };
        let averager = SpectrumAverager::with_options(MemoryScanSource::new(scans), options);
        let merged = averager.average_scans(&[1]).unwrap();

        // The long interior zero run is collapsed
        assert!(merged.profile_positions.len() < n);
        assert_eq!(merged.centroids.len(), 2);
        assert!(merged.centroids.iter().all(|c| c.charge == 0));
    }

    #[test]
    fn test_missing_scan_propagates() {
        let averager = SpectrumAverager::new(MemoryScanSource::new(vec![single_peak(1, 1.0)]));
        assert_eq!(
            averager.average_scans(&[1, 9]).unwrap_err(),
            AveragingError::ScanNotFound(9)
        );
        assert_eq!(
            averager.average_scans(&[]).unwrap_err(),
            AveragingError::EmptyScanList
        );
    }
}
