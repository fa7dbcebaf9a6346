//! The seam between the averaging pipeline and whatever produces scans.
//!
//! The file-access layer, an in-memory scan list, and the threaded scan cache
//! all answer the same four questions, so they are abstracted behind one
//! narrow capability trait. An adapter is picked once at call entry; nothing
//! downstream inspects the concrete source type.

use rayon::prelude::*;
use thiserror::Error;

use crate::model::{
    CentroidStream, MassCalibration, NoisePoint, RawScan, ScanStatistics, SegmentedScan,
};

/// An error raised while assembling or averaging scans
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AveragingError {
    #[error("No scans were provided to average")]
    EmptyScanList,
    #[error("Scan {0} was not found in the source")]
    ScanNotFound(usize),
    #[error("Could not construct a resampling axis from the provided scans")]
    EmptyAxis,
}

/// A provider of per-scan raw data, keyed by scan number.
pub trait ScanSource {
    fn scan_statistics(&self, scan_number: usize) -> Result<ScanStatistics, AveragingError>;

    fn segmented_scan(&self, scan_number: usize) -> Result<SegmentedScan, AveragingError>;

    /// The instrument's own centroid arrays, if the packet format stored any.
    /// `include_reference_and_exception_peaks` controls whether lock mass and
    /// exception peaks are part of the returned stream.
    fn centroid_stream(
        &self,
        scan_number: usize,
        include_reference_and_exception_peaks: bool,
    ) -> Option<CentroidStream>;

    /// The packed per-scan noise table, if the packet format stored one
    fn noise_table(&self, scan_number: usize) -> Option<Vec<NoisePoint>>;

    /// The frequency calibration recorded for the scan, if any
    fn calibration(&self, scan_number: usize) -> Option<MassCalibration>;

    /// Assemble everything the averager needs for one scan
    fn raw_scan(&self, scan_number: usize) -> Result<RawScan, AveragingError> {
        let statistics = self.scan_statistics(scan_number)?;
        let segments = self.segmented_scan(scan_number)?;
        let mut scan = RawScan::new(statistics, segments);
        scan.centroids = self.centroid_stream(scan_number, true);
        scan.noise_table = self.noise_table(scan_number);
        scan.calibration = self.calibration(scan_number);
        Ok(scan)
    }
}

/// A [`ScanSource`] over a list of scans already in memory, used directly by
/// the two-scan operations and by tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryScanSource {
    scans: Vec<RawScan>,
}

impl MemoryScanSource {
    pub fn new(scans: Vec<RawScan>) -> Self {
        Self { scans }
    }

    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }

    fn find(&self, scan_number: usize) -> Result<&RawScan, AveragingError> {
        self.scans
            .iter()
            .find(|s| s.statistics.scan_number == scan_number)
            .ok_or(AveragingError::ScanNotFound(scan_number))
    }
}

impl From<Vec<RawScan>> for MemoryScanSource {
    fn from(scans: Vec<RawScan>) -> Self {
        Self::new(scans)
    }
}

impl ScanSource for MemoryScanSource {
    fn scan_statistics(&self, scan_number: usize) -> Result<ScanStatistics, AveragingError> {
        Ok(self.find(scan_number)?.statistics.clone())
    }

    fn segmented_scan(&self, scan_number: usize) -> Result<SegmentedScan, AveragingError> {
        Ok(self.find(scan_number)?.segments.clone())
    }

    fn centroid_stream(
        &self,
        scan_number: usize,
        _include_reference_and_exception_peaks: bool,
    ) -> Option<CentroidStream> {
        self.find(scan_number).ok()?.centroids.clone()
    }

    fn noise_table(&self, scan_number: usize) -> Option<Vec<NoisePoint>> {
        self.find(scan_number).ok()?.noise_table.clone()
    }

    fn calibration(&self, scan_number: usize) -> Option<MassCalibration> {
        self.find(scan_number).ok()?.calibration
    }
}

/// Retrieve a list of scans, fanning the requests out over the worker pool in
/// partitions large enough to amortize per-partition overhead. Results come
/// back in request order.
pub fn fetch_scans<S: ScanSource + Sync>(
    source: &S,
    scan_numbers: &[usize],
) -> Result<Vec<RawScan>, AveragingError> {
    if scan_numbers.is_empty() {
        return Err(AveragingError::EmptyScanList);
    }
    let partition_size = (scan_numbers.len() / 10).max(10);
    let partitions: Vec<Vec<RawScan>> = scan_numbers
        .par_chunks(partition_size)
        .map(|chunk| {
            chunk
                .iter()
                .map(|i| source.raw_scan(*i))
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(partitions.into_iter().flatten().collect())
}

/// As [`fetch_scans`], but without touching the worker pool. Used for small
/// scan counts where scheduling costs more than the reads.
pub fn fetch_scans_serial<S: ScanSource>(
    source: &S,
    scan_numbers: &[usize],
) -> Result<Vec<RawScan>, AveragingError> {
    if scan_numbers.is_empty() {
        return Err(AveragingError::EmptyScanList);
    }
    scan_numbers.iter().map(|i| source.raw_scan(*i)).collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn make_source(n: usize) -> MemoryScanSource {
        let scans = (1..=n)
            .map(|i| {
                let positions = vec![100.0, 100.1, 100.2];
                let intensities = vec![0.0, i as f64, 0.0];
                let mut stats = ScanStatistics {
                    scan_number: i,
                    ..Default::default()
                };
                stats.tic = i as f64;
                RawScan::new(stats, SegmentedScan::new(positions, intensities))
            })
            .collect();
        MemoryScanSource::new(scans)
    }

    #[test]
    fn test_missing_scan() {
        let source = make_source(3);
        assert_eq!(
            source.scan_statistics(7).unwrap_err(),
            AveragingError::ScanNotFound(7)
        );
    }

    #[test]
    fn test_fetch_preserves_order() {
        let source = make_source(40);
        let numbers: Vec<usize> = (1..=40).rev().collect();
        let scans = fetch_scans(&source, &numbers).unwrap();
        assert_eq!(scans.len(), 40);
        for (req, scan) in numbers.iter().zip(scans.iter()) {
            assert_eq!(scan.statistics.scan_number, *req);
        }
    }

    #[test]
    fn test_fetch_empty_request() {
        let source = make_source(2);
        assert_eq!(
            fetch_scans(&source, &[]).unwrap_err(),
            AveragingError::EmptyScanList
        );
        assert_eq!(
            fetch_scans_serial(&source, &[]).unwrap_err(),
            AveragingError::EmptyScanList
        );
    }
}
