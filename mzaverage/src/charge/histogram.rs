//! The charge-probability histogram shared by both detection methods.

/// Number of histogram bins; covers charges up to `254 * 0.2 = 50.8`.
pub const CHARGE_BINS: usize = 255;

/// Measured charge resolution: charge units per bin.
pub const CHARGE_RESOLUTION: f64 = 0.2;

/// Bins per integer charge unit.
pub const BINS_PER_CHARGE: f64 = 5.0;

/// Charges below `0.8` are never resolvable, so the first `0.8 / 0.2` bins
/// are floored before combining evidence.
const MASS_RESOLUTION_FLOOR_BINS: usize = 4;

/// How cleanly the winning bin must stand above its best competitor.
const SEPARATION_FACTOR: f64 = 2.0;
const HIGH_CHARGE_SEPARATION_FACTOR: f64 = 2.5;
const HIGH_CHARGE_THRESHOLD: f64 = 4.5;

/// The winning bin's charge must round to an integer within this distance.
const INTEGER_ROUNDING_LIMIT: f64 = 0.35;

/// A competing peak only counts if it sits at least this many bins away.
const COMPETITOR_MIN_DISTANCE: usize = 3;

/// Accumulated charge evidence at 0.2-charge resolution.
///
/// Each detection method fills its own per-call histogram; the two are then
/// combined multiplicatively, smoothed, and evaluated for a clear winner.
#[derive(Debug, Clone)]
pub struct ChargeHistogram {
    bins: [f64; CHARGE_BINS],
}

impl Default for ChargeHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl ChargeHistogram {
    pub fn new() -> Self {
        Self {
            bins: [0.0; CHARGE_BINS],
        }
    }

    /// The neutral element under multiplicative combination: a method that
    /// produced no evidence contributes this and leaves the other method's
    /// histogram unchanged.
    pub fn uniform() -> Self {
        Self {
            bins: [1.0; CHARGE_BINS],
        }
    }

    #[inline]
    pub fn bin_for(charge: f64) -> Option<usize> {
        let bin = (charge * BINS_PER_CHARGE).round();
        if bin >= 0.0 && (bin as usize) < CHARGE_BINS {
            Some(bin as usize)
        } else {
            None
        }
    }

    #[inline]
    pub fn charge_of(bin: usize) -> f64 {
        bin as f64 * CHARGE_RESOLUTION
    }

    /// Add `score` of evidence for `charge`; out-of-range charges are dropped
    pub fn accumulate(&mut self, charge: f64, score: f64) {
        if let Some(bin) = Self::bin_for(charge) {
            self.bins[bin] += score;
        }
    }

    pub fn bins(&self) -> &[f64; CHARGE_BINS] {
        &self.bins
    }

    pub fn bins_mut(&mut self) -> &mut [f64; CHARGE_BINS] {
        &mut self.bins
    }

    pub fn max_bin(&self) -> (usize, f64) {
        let mut best = (0usize, 0.0f64);
        for (i, v) in self.bins.iter().enumerate() {
            if *v > best.1 {
                best = (i, *v);
            }
        }
        best
    }

    /// Scale so the maximum bin is `1.0`; a histogram with no signal is left
    /// untouched.
    pub fn normalize(&mut self) {
        let (_, max) = self.max_bin();
        if max > 0.0 {
            self.bins.iter_mut().for_each(|v| *v /= max);
        }
    }

    /// Zero out the bins below the mass-resolution floor
    pub fn floor_low_charges(&mut self) {
        self.bins[..MASS_RESOLUTION_FLOOR_BINS]
            .iter_mut()
            .for_each(|v| *v = 0.0);
    }

    /// Multiply another method's evidence into this histogram
    pub fn combine(&mut self, other: &Self) {
        self.bins
            .iter_mut()
            .zip(other.bins.iter())
            .for_each(|(a, b)| *a *= b);
    }

    /// Three-point moving average, leaving the end bins in place
    pub fn smooth(&mut self) {
        let source = self.bins;
        for i in 1..CHARGE_BINS - 1 {
            self.bins[i] = (source[i - 1] + source[i] + source[i + 1]) / 3.0;
        }
    }

    /// Decide whether the histogram names one clear integral charge.
    ///
    /// The global maximum must round to an integer within
    /// [`INTEGER_ROUNDING_LIMIT`] and stand a separation factor above the
    /// best competing bin at least [`COMPETITOR_MIN_DISTANCE`] bins away.
    /// Returns zero when no charge can be called.
    pub fn evaluate(&self) -> i32 {
        let (winner, value) = self.max_bin();
        if value <= 0.0 {
            return 0;
        }
        let charge = Self::charge_of(winner);
        let rounded = charge.round();
        if rounded < 1.0 || (charge - rounded).abs() > INTEGER_ROUNDING_LIMIT {
            return 0;
        }

        let mut competitor = 0.0f64;
        for (i, v) in self.bins.iter().enumerate() {
            if i.abs_diff(winner) >= COMPETITOR_MIN_DISTANCE && *v > competitor {
                competitor = *v;
            }
        }
        let factor = if charge > HIGH_CHARGE_THRESHOLD {
            HIGH_CHARGE_SEPARATION_FACTOR
        } else {
            SEPARATION_FACTOR
        };
        if competitor > 0.0 && value < factor * competitor {
            return 0;
        }
        rounded as i32
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_dominant_bin_is_called() {
        let mut map = ChargeHistogram::new();
        map.accumulate(3.0, 10.0);
        map.accumulate(1.4, 1.0);
        assert_eq!(map.evaluate(), 3);
    }

    #[test]
    fn test_flat_histogram_is_not_called() {
        let map = ChargeHistogram::uniform();
        assert_eq!(map.evaluate(), 0);
        let empty = ChargeHistogram::new();
        assert_eq!(empty.evaluate(), 0);
    }

    #[test]
    fn test_non_integral_winner_is_rejected() {
        let mut map = ChargeHistogram::new();
        // Bin 12 is charge 2.4, which is 0.4 away from the nearest integer
        map.bins_mut()[12] = 10.0;
        assert_eq!(map.evaluate(), 0);
    }

    #[test]
    fn test_close_competitor_blocks_the_call() {
        let mut map = ChargeHistogram::new();
        map.accumulate(2.0, 10.0);
        map.accumulate(4.0, 8.0);
        assert_eq!(map.evaluate(), 0);

        let mut map = ChargeHistogram::new();
        map.accumulate(2.0, 10.0);
        map.accumulate(4.0, 2.0);
        assert_eq!(map.evaluate(), 2);
    }

    #[test]
    fn test_adjacent_bins_are_not_competitors() {
        let mut map = ChargeHistogram::new();
        map.bins_mut()[10] = 10.0;
        map.bins_mut()[11] = 9.0;
        map.bins_mut()[12] = 8.0;
        assert_eq!(map.evaluate(), 2);
    }

    #[test]
    fn test_high_charge_needs_wider_separation() {
        let mut map = ChargeHistogram::new();
        map.accumulate(10.0, 10.0);
        map.accumulate(5.0, 4.5);
        // 10.0 / 4.5 < 2.5, too close for a high charge call
        assert_eq!(map.evaluate(), 0);
    }

    #[test]
    fn test_combine_and_floor() {
        let mut a = ChargeHistogram::new();
        a.accumulate(0.4, 5.0);
        a.accumulate(2.0, 5.0);
        let mut b = ChargeHistogram::uniform();
        b.floor_low_charges();
        a.normalize();
        a.floor_low_charges();
        a.combine(&b);
        assert_eq!(a.bins()[2], 0.0);
        assert_eq!(a.bins()[10], 1.0);
        assert_eq!(a.evaluate(), 2);
    }
}
