//! Build-time configuration records.
//!
//! [`PdmConfig`] describes the sampling chain of the PDM-PCM peripheral
//! (clocking, decimation, word length). [`NoiseConfig`] is the record the
//! board composition layer hands to the noise-level pipeline.

use serde::{Deserialize, Serialize};

use crate::error::{NoiseError, Result};

/// Master clock feeding the PDM-PCM block (HF1), in Hz.
pub const DEFAULT_MASTER_CLOCK_HZ: u32 = 49_142_900;

/// Number of FIR taps. The kernel is symmetric around tap 4.
pub const FIR_TAP_NUM: usize = 9;

/// Low-pass kernel, Q31 (`1 << 31` == 1.0), unity DC gain.
///
/// Hamming-windowed sinc, cutoff 12.5 kHz at 32 ksps: within 1 dB up to
/// 9 kHz, -13 dB at Nyquist.
pub const DEFAULT_FIR_TAPS: [i32; FIR_TAP_NUM] = [
    -5_245_243,
    43_261_248,
    -181_482_054,
    376_188_715,
    1_682_038_316,
    376_188_715,
    -181_482_054,
    43_261_248,
    -5_245_243,
];

/// Rated acoustic overload point of the MP34DT05 microphone, dB SPL.
pub const MIC_ACOUSTIC_OVERLOAD_DB: f64 = 122.5;

/// Linear sample magnitude that corresponds to 0 dB SPL.
///
/// Full scale (`2^(bits-1)`) is reached at the acoustic overload point.
pub fn acoustic_reference_level(data_bits: u8, aop_db: f64) -> f64 {
    let full_scale = (1u64 << (data_bits.saturating_sub(1))) as f64;
    full_scale / 10f64.powf(aop_db / 20.0)
}

/// Which PDM clock edge carries the microphone channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelSelect {
    Left,
    Right,
    Stereo,
}

/// PDM-PCM peripheral configuration (fixed at build time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct PdmConfig {
    /// Clock into the PDM block (Hz).
    pub master_clock_hz: u32,
    /// Total divider from master clock to PDM bit clock.
    /// Default 24 → 2048 kHz.
    pub clock_divider: u32,
    /// PDM oversampling ratio, 32..=254. Default 64 → 32 ksps.
    pub oversample: u32,
    /// PCM word length: 16, 18, 20 or 24 bits.
    pub data_bits: u8,
    pub channel: ChannelSelect,
    /// Built-in high-pass filter gain; 0 disables the filter.
    pub high_pass_gain: u8,
    /// NVIC priority of the DMA completion interrupt.
    pub irq_priority: u8,
}

impl Default for PdmConfig {
    fn default() -> Self {
        Self {
            master_clock_hz: DEFAULT_MASTER_CLOCK_HZ,
            clock_divider: 24,
            oversample: 64,
            data_bits: 24,
            channel: ChannelSelect::Right,
            high_pass_gain: 8,
            irq_priority: 2,
        }
    }
}

impl PdmConfig {
    pub fn validate(&self) -> Result<()> {
        if !(32..=254).contains(&self.oversample) {
            return Err(NoiseError::Config(format!(
                "oversample {} outside 32..=254",
                self.oversample
            )));
        }
        if !matches!(self.data_bits, 16 | 18 | 20 | 24) {
            return Err(NoiseError::Config(format!(
                "unsupported word length {} bits",
                self.data_bits
            )));
        }
        if self.clock_divider == 0 || self.master_clock_hz == 0 {
            return Err(NoiseError::Config("clock divider and master clock must be non-zero".into()));
        }
        if self.sample_rate() == 0 {
            return Err(NoiseError::Config(format!(
                "clock divider {} leaves no output samples",
                self.clock_divider
            )));
        }
        if self.high_pass_gain > 15 {
            return Err(NoiseError::Config(format!(
                "high-pass gain {} outside 0..=15",
                self.high_pass_gain
            )));
        }
        Ok(())
    }

    /// Output sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.master_clock_hz / self.clock_divider / self.oversample
    }

    /// Rate programmed into the sinc decimator (half the oversample ratio).
    pub fn sinc_decimation_rate(&self) -> u32 {
        self.oversample / 2
    }

    pub fn high_pass_enabled(&self) -> bool {
        self.high_pass_gain != 0
    }
}

/// Configuration record of the noise-level pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct NoiseConfig {
    /// Samples per capture buffer. 512 at 32 ksps wakes the worker every 16 ms.
    pub buffer_size: usize,
    /// Number of buffers in the pool (and capacity of the ready queue).
    pub pool_depth: usize,
    /// PDM oversampling ratio the samples were decimated with.
    pub decimation_rate: u32,
    /// Q31 FIR coefficients, symmetric, [`FIR_TAP_NUM`] long.
    pub fir_taps: Vec<i32>,
    pub fading_numerator: u32,
    pub fading_denominator: u32,
    /// Window of the per-buffer mean magnitude moving average.
    pub average_over_buffers: usize,
    /// Linear level that maps to 0 dB.
    pub reference_level: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            buffer_size: 512,
            pool_depth: 4,
            decimation_rate: 64,
            fir_taps: DEFAULT_FIR_TAPS.to_vec(),
            fading_numerator: 125,
            fading_denominator: 128,
            average_over_buffers: 8,
            reference_level: acoustic_reference_level(24, MIC_ACOUSTIC_OVERLOAD_DB),
        }
    }
}

impl NoiseConfig {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(NoiseError::Config("buffer_size must be non-zero".into()));
        }
        if self.pool_depth < 2 {
            return Err(NoiseError::Config(format!(
                "pool_depth {} too shallow (need at least 2)",
                self.pool_depth
            )));
        }
        self.fir_kernel()?;
        if self.fading_denominator == 0 || self.fading_numerator >= self.fading_denominator {
            return Err(NoiseError::Config(format!(
                "fading ratio {}/{} is not a proper fraction",
                self.fading_numerator, self.fading_denominator
            )));
        }
        if self.average_over_buffers == 0 {
            return Err(NoiseError::Config("average_over_buffers must be non-zero".into()));
        }
        if !(self.reference_level.is_finite() && self.reference_level > 0.0) {
            return Err(NoiseError::Config(format!(
                "reference level {} must be positive",
                self.reference_level
            )));
        }
        Ok(())
    }

    /// The FIR taps as a fixed-size symmetric kernel.
    pub fn fir_kernel(&self) -> Result<[i32; FIR_TAP_NUM]> {
        let taps: [i32; FIR_TAP_NUM] = self.fir_taps.as_slice().try_into().map_err(|_| {
            NoiseError::Config(format!(
                "expected {FIR_TAP_NUM} FIR taps, got {}",
                self.fir_taps.len()
            ))
        })?;
        if (0..FIR_TAP_NUM / 2).any(|i| taps[i] != taps[FIR_TAP_NUM - 1 - i]) {
            return Err(NoiseError::Config("FIR taps must be symmetric".into()));
        }
        Ok(taps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pdm_runs_at_32k() {
        let cfg = PdmConfig::default();
        cfg.validate().unwrap();
        // 49 142 900 / 24 / 64
        assert_eq!(cfg.sample_rate(), 31_994);
        assert_eq!(cfg.sinc_decimation_rate(), 32);
    }

    #[test]
    fn rejects_bad_oversample_and_word_length() {
        let cfg = PdmConfig {
            oversample: 16,
            ..PdmConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(NoiseError::Config(_))));

        let cfg = PdmConfig {
            data_bits: 12,
            ..PdmConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(NoiseError::Config(_))));
    }

    #[test]
    fn rejects_dividers_that_stop_the_clock() {
        for clock_divider in [0, u32::MAX] {
            let cfg = PdmConfig {
                clock_divider,
                ..PdmConfig::default()
            };
            assert!(matches!(cfg.validate(), Err(NoiseError::Config(_))));
        }
    }

    #[test]
    fn default_taps_have_unity_dc_gain() {
        let sum: i64 = DEFAULT_FIR_TAPS.iter().map(|&t| t as i64).sum();
        assert_eq!(sum, 1i64 << 31);
        NoiseConfig::default().validate().unwrap();
    }

    #[test]
    fn asymmetric_taps_rejected() {
        let mut cfg = NoiseConfig::default();
        cfg.fir_taps[0] += 1;
        assert!(cfg.validate().is_err());

        cfg.fir_taps = vec![0; 5];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn fading_must_be_proper_fraction() {
        let cfg = NoiseConfig {
            fading_numerator: 128,
            fading_denominator: 128,
            ..NoiseConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn reference_level_matches_overload_point() {
        let reference = acoustic_reference_level(24, MIC_ACOUSTIC_OVERLOAD_DB);
        let full_scale_db = 20.0 * (8_388_608.0 / reference).log10();
        approx::assert_abs_diff_eq!(full_scale_db, MIC_ACOUSTIC_OVERLOAD_DB, epsilon = 1e-9);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: NoiseConfig = serde_json::from_str(r#"{ "poolDepth": 6 }"#).unwrap();
        assert_eq!(cfg.pool_depth, 6);
        assert_eq!(cfg.buffer_size, 512);
        assert_eq!(cfg.fir_taps, DEFAULT_FIR_TAPS.to_vec());
    }
}
