//! Spectral averaging and background subtraction for FT profile data:
//! resample scans onto a shared calibrated mass axis, merge, centroid,
//! re-estimate noise, determine charge states, and compress the result.

pub mod average;
pub mod axis;
pub mod centroid;
pub mod charge;
pub mod compress;
pub mod merge;
pub mod model;
pub mod noise;
pub mod resample;
pub mod source;

pub use average::{AveragingOptions, SpectrumAverager};
pub use model::MergedScan;
pub use source::{AveragingError, MemoryScanSource, ScanSource};
