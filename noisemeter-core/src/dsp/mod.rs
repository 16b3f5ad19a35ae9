//! Signal processing for the level pipeline: FIR low-pass, level detection
//! and conversion to decibels.

pub mod detector;
pub mod fir;

pub use detector::{mean_magnitude, LevelDetector, MovingAverage, PeakHold};
pub use fir::FirFilter;

/// `20·log10(level / reference)` rounded to the nearest dB.
///
/// A zero level has no logarithm and reads as 0.
pub fn to_decibels(level: u32, reference: f64) -> i16 {
    if level == 0 {
        return 0;
    }
    let db = 20.0 * (level as f64 / reference).log10();
    db.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{acoustic_reference_level, MIC_ACOUSTIC_OVERLOAD_DB};

    #[test]
    fn zero_level_reads_zero() {
        assert_eq!(to_decibels(0, 6.29), 0);
    }

    #[test]
    fn decibels_relative_to_reference() {
        assert_eq!(to_decibels(100, 1.0), 40);
        assert_eq!(to_decibels(10, 10.0), 0);
        assert_eq!(to_decibels(1, 10.0), -20);
    }

    #[test]
    fn half_scale_reads_six_db_below_overload() {
        let reference = acoustic_reference_level(24, MIC_ACOUSTIC_OVERLOAD_DB);
        // 122.5 - 6.02
        assert_eq!(to_decibels(1 << 22, reference), 116);
        assert_eq!(to_decibels(1000, reference), 44);
    }
}
