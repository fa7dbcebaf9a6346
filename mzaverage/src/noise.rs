//! Noise and baseline estimation for the merged spectrum.
//!
//! Each source scan carries its own piecewise-linear noise and baseline
//! curves, either alongside its centroid stream or as a packed noise table.
//! Both are evaluated at the output centroid masses and averaged; the noise
//! excess over baseline then shrinks by `1/sqrt(N)`, since averaging N scans
//! reduces stochastic noise but not the baseline under it.

use itertools::multizip;
use tracing::debug;

use crate::centroid::AveragedCentroid;
use crate::model::RawScan;

/// Noise and baseline arrays parallel to the output centroid list.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NoiseTable {
    pub masses: Vec<f64>,
    pub noises: Vec<f32>,
    pub baselines: Vec<f32>,
}

impl NoiseTable {
    pub fn len(&self) -> usize {
        self.masses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masses.is_empty()
    }
}

/// One source scan's noise curves in a common shape, whichever packet
/// format they came from.
struct NoiseCurve {
    masses: Vec<f64>,
    noises: Vec<f32>,
    baselines: Vec<f32>,
}

impl NoiseCurve {
    /// Piecewise-linear evaluation at `query`, extrapolating flat beyond
    /// either end.
    fn evaluate(&self, query: f64) -> (f32, f32) {
        let n = self.masses.len();
        if n == 0 {
            return (0.0, 0.0);
        }
        if query <= self.masses[0] {
            return (self.noises[0], self.baselines[0]);
        }
        if query >= self.masses[n - 1] {
            return (self.noises[n - 1], self.baselines[n - 1]);
        }
        let hi = self.masses.partition_point(|m| *m < query);
        let lo = hi - 1;
        let span = self.masses[hi] - self.masses[lo];
        if span <= 0.0 {
            return (self.noises[lo], self.baselines[lo]);
        }
        let t = ((query - self.masses[lo]) / span) as f32;
        let noise = self.noises[lo] + (self.noises[hi] - self.noises[lo]) * t;
        let baseline = self.baselines[lo] + (self.baselines[hi] - self.baselines[lo]) * t;
        (noise, baseline)
    }
}

/// Collect each scan's noise curves, preferring the packed per-scan noise
/// tables when the caller enabled them and any scan has one.
fn collect_curves(scans: &[RawScan], use_noise_table: bool) -> Vec<NoiseCurve> {
    if use_noise_table {
        let packed: Vec<NoiseCurve> = scans
            .iter()
            .filter_map(|s| s.noise_table.as_ref())
            .filter(|t| !t.is_empty())
            .map(|table| NoiseCurve {
                masses: table.iter().map(|p| p.mass as f64).collect(),
                noises: table.iter().map(|p| p.noise).collect(),
                baselines: table.iter().map(|p| p.baseline).collect(),
            })
            .collect();
        if !packed.is_empty() {
            debug!(tables = packed.len(), "Using packed per-scan noise tables");
            return packed;
        }
    }
    scans
        .iter()
        .filter_map(|s| s.centroids.as_ref())
        .filter(|c| !c.is_empty() && c.noises.len() == c.masses.len())
        .map(|stream| NoiseCurve {
            masses: stream.masses.clone(),
            noises: stream.noises.clone(),
            baselines: stream.baselines.clone(),
        })
        .collect()
}

/// Build the noise table for the averaged spectrum, aligned with `centroids`.
///
/// When no scan carries any noise information, the table is emitted with
/// zeroed noise and baseline so it stays parallel to the centroid list.
pub fn estimate_noise(
    scans: &[RawScan],
    centroids: &[AveragedCentroid],
    use_noise_table: bool,
) -> NoiseTable {
    let masses: Vec<f64> = centroids.iter().map(|c| c.mz).collect();
    let curves = collect_curves(scans, use_noise_table);
    if curves.is_empty() {
        let n = masses.len();
        return NoiseTable {
            masses,
            noises: vec![0.0; n],
            baselines: vec![0.0; n],
        };
    }

    let count = curves.len() as f32;
    let reduction = count.sqrt();

    let mut noises = Vec::with_capacity(masses.len());
    let mut baselines = Vec::with_capacity(masses.len());
    for mass in masses.iter() {
        let (sum_noise, sum_baseline) = curves.iter().fold((0.0f32, 0.0f32), |acc, curve| {
            let (noise, baseline) = curve.evaluate(*mass);
            (acc.0 + noise, acc.1 + baseline)
        });
        let avg_noise = sum_noise / count;
        let avg_baseline = sum_baseline / count;
        noises.push((avg_noise - avg_baseline) / reduction + avg_baseline);
        baselines.push(avg_baseline);
    }

    NoiseTable {
        masses,
        noises,
        baselines,
    }
}

/// A low-overhead view over the table rows, used when repackaging output.
pub fn iter_rows(table: &NoiseTable) -> impl Iterator<Item = (f64, f32, f32)> + '_ {
    multizip((
        table.masses.iter().copied(),
        table.noises.iter().copied(),
        table.baselines.iter().copied(),
    ))
}
