//! Charge evidence from the Fourier spectrum of the local profile window.
//!
//! Isotopic peaks of a charge-`z` species repeat every `~1.002/z` mass
//! units, so the magnitude spectrum of the profile window has a peak at the
//! matching spatial frequency. The magnitude spectrum is remapped from
//! "cycles per mass unit" onto the charge histogram.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use super::histogram::{ChargeHistogram, CHARGE_BINS, CHARGE_RESOLUTION};
use super::ISOTOPE_SPACING;

/// FFT length bounds: windows are zero-padded to the next power of two
/// within `[2^4, 2^14]` samples.
const MIN_FFT_SIZE: usize = 1 << 4;
const MAX_FFT_SIZE: usize = 1 << 14;

/// Build a charge histogram from the intensity window around a peak.
///
/// `spacing` is the profile point spacing inside the window. A window too
/// small to transform contributes the neutral all-ones histogram.
pub fn fourier_charge_histogram(intensities: &[f64], spacing: f64) -> ChargeHistogram {
    if intensities.len() < 3 || spacing <= 0.0 {
        return ChargeHistogram::uniform();
    }

    let fft_size = intensities
        .len()
        .next_power_of_two()
        .clamp(MIN_FFT_SIZE, MAX_FFT_SIZE);

    let mut buffer: Vec<Complex<f64>> = intensities
        .iter()
        .take(fft_size)
        .map(|y| Complex::new(*y, 0.0))
        .collect();
    buffer.resize(fft_size, Complex::new(0.0, 0.0));

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_size);
    fft.process(&mut buffer);

    // Real input: only the first half of the spectrum is informative
    let magnitudes: Vec<f64> = buffer[..fft_size / 2].iter().map(|c| c.norm()).collect();

    remap_magnitudes(&magnitudes, fft_size as f64 * spacing)
}

/// Remap FFT magnitudes onto charge bins.
///
/// FFT index `k` corresponds to a repeat period of `window_span / k` mass
/// units, hence a charge of `ISOTOPE_SPACING * k / window_span`. When one
/// FFT index step covers more than one charge bin the magnitude is sampled
/// by direct interpolation; when many indices fall inside one bin they are
/// averaged instead.
fn remap_magnitudes(magnitudes: &[f64], window_span: f64) -> ChargeHistogram {
    let mut histogram = ChargeHistogram::new();
    if magnitudes.len() < 2 || window_span <= 0.0 {
        return ChargeHistogram::uniform();
    }

    // Charge units spanned by one FFT index step
    let charge_per_index = ISOTOPE_SPACING / window_span;
    // FFT index distance between adjacent charge bins
    let indices_per_bin = CHARGE_RESOLUTION / charge_per_index;

    let bins = histogram.bins_mut();
    for (bin, slot) in bins.iter_mut().enumerate().skip(1).take(CHARGE_BINS - 1) {
        let center = bin as f64 * indices_per_bin;
        if center >= (magnitudes.len() - 1) as f64 {
            break;
        }
        *slot = if charge_per_index > CHARGE_RESOLUTION {
            // Coarse spectrum: one index covers several bins, interpolate
            let lo = center.floor() as usize;
            let t = center - lo as f64;
            magnitudes[lo] * (1.0 - t) + magnitudes[lo + 1] * t
        } else {
            // Fine spectrum: several indices per bin, average the window
            let start = ((center - indices_per_bin * 0.5).ceil().max(0.0)) as usize;
            let end = (((center + indices_per_bin * 0.5).floor()) as usize)
                .min(magnitudes.len() - 1);
            if end < start {
                let lo = center.floor() as usize;
                let t = center - lo as f64;
                magnitudes[lo] * (1.0 - t) + magnitudes[lo + 1] * t
            } else {
                let span = &magnitudes[start..=end];
                span.iter().sum::<f64>() / span.len() as f64
            }
        };
    }
    histogram
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_degenerate_window_is_neutral() {
        let h = fourier_charge_histogram(&[1.0, 2.0], 0.01);
        assert!(h.bins().iter().all(|v| *v == 1.0));
        let h = fourier_charge_histogram(&[1.0, 2.0, 3.0], 0.0);
        assert!(h.bins().iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_periodic_signal_peaks_at_matching_charge() {
        // A cosine train with period 0.5 mass units sampled at 0.05 spacing:
        // the isotopic spacing of a doubly charged species.
        let spacing = 0.05;
        let period = 0.5;
        let n = 64;
        let intensities: Vec<f64> = (0..n)
            .map(|i| {
                let x = i as f64 * spacing;
                1.0 + (2.0 * std::f64::consts::PI * x / period).cos()
            })
            .collect();
        let mut h = fourier_charge_histogram(&intensities, spacing);
        h.normalize();
        h.floor_low_charges();

        let (winner, value) = h.max_bin();
        assert!(value > 0.0);
        let charge = ChargeHistogram::charge_of(winner);
        assert!(
            (charge - 2.0).abs() <= 0.4,
            "winning charge {charge} too far from 2"
        );
    }
}
