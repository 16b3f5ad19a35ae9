//! Fixed-point symmetric FIR low-pass.
//!
//! Coefficients are Q31 fractions. The kernel is linear-phase
//! (`h[k] == h[N-1-k]`), so each output pairs the two samples sharing a
//! coefficient before multiplying:
//!
//! ```text
//! y[n] = h0·(x[n] + x[n-8]) + h1·(x[n-1] + x[n-7]) + … + h4·x[n-4]
//! ```
//!
//! five multiplies instead of nine. Products accumulate in `i64`, which is
//! exact for 24-bit PCM input.

use crate::config::FIR_TAP_NUM;

/// Fractional bits of the coefficient format.
pub const FIR_FRACTION_BITS: u32 = 31;

const CENTER: usize = FIR_TAP_NUM / 2;
const ROUNDING: i64 = 1 << (FIR_FRACTION_BITS - 1);

/// Streaming FIR filter with a circular tap history.
#[derive(Debug, Clone)]
pub struct FirFilter {
    taps: [i32; FIR_TAP_NUM],
    history: [i32; FIR_TAP_NUM],
    /// Slot that receives the next sample.
    pos: usize,
}

impl FirFilter {
    pub fn new(taps: [i32; FIR_TAP_NUM]) -> Self {
        Self {
            taps,
            history: [0; FIR_TAP_NUM],
            pos: 0,
        }
    }

    /// `x[n - delay]`, valid once the current sample has been stored.
    #[inline]
    fn delayed(&self, delay: usize) -> i64 {
        self.history[(self.pos + FIR_TAP_NUM - delay) % FIR_TAP_NUM] as i64
    }

    /// Filter one sample.
    pub fn process(&mut self, sample: i32) -> i32 {
        self.history[self.pos] = sample;

        let mut acc = self.taps[CENTER] as i64 * self.delayed(CENTER);
        for k in 0..CENTER {
            let pair = self.delayed(k) + self.delayed(FIR_TAP_NUM - 1 - k);
            acc += self.taps[k] as i64 * pair;
        }

        self.pos = (self.pos + 1) % FIR_TAP_NUM;
        // Kernel gain on a worst-case pattern exceeds one; saturate.
        ((acc + ROUNDING) >> FIR_FRACTION_BITS).clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }

    /// Filter a whole buffer in place, carrying history across calls.
    pub fn process_buffer(&mut self, samples: &mut [i32]) {
        for sample in samples.iter_mut() {
            *sample = self.process(*sample);
        }
    }

    pub fn reset(&mut self) {
        self.history = [0; FIR_TAP_NUM];
        self.pos = 0;
    }

    pub fn taps(&self) -> &[i32; FIR_TAP_NUM] {
        &self.taps
    }

    /// Group delay in samples.
    pub fn group_delay_samples(&self) -> usize {
        CENTER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_FIR_TAPS;

    /// Direct-form floating-point convolution over the same kernel.
    fn reference(input: &[f64]) -> Vec<f64> {
        let h: Vec<f64> = DEFAULT_FIR_TAPS
            .iter()
            .map(|&t| t as f64 / (1u64 << FIR_FRACTION_BITS) as f64)
            .collect();
        (0..input.len())
            .map(|n| {
                (0..FIR_TAP_NUM)
                    .filter(|&k| k <= n)
                    .map(|k| h[k] * input[n - k])
                    .sum()
            })
            .collect()
    }

    #[test]
    fn impulse_response_matches_float_kernel() {
        let amplitude = 1 << 20;
        let mut input = vec![0i32; 16];
        input[0] = amplitude;
        let expected = reference(&input.iter().map(|&s| s as f64).collect::<Vec<_>>());

        let mut fir = FirFilter::new(DEFAULT_FIR_TAPS);
        let mut output = input.clone();
        fir.process_buffer(&mut output);

        for (n, (&got, want)) in output.iter().zip(expected).enumerate() {
            assert!(
                (got as f64 - want).abs() < 1.0,
                "sample {n}: fixed={got} float={want}"
            );
        }
        // Linear phase: the response is symmetric around the group delay.
        for k in 0..CENTER {
            assert_eq!(output[k], output[FIR_TAP_NUM - 1 - k]);
        }
        assert_eq!(fir.group_delay_samples(), 4);
    }

    #[test]
    fn dc_passes_at_unity_gain_after_settling() {
        let mut fir = FirFilter::new(DEFAULT_FIR_TAPS);
        let mut buf = vec![1000i32; 64];
        fir.process_buffer(&mut buf);
        assert!(buf[FIR_TAP_NUM - 1..].iter().all(|&s| s == 1000));
    }

    #[test]
    fn random_input_stays_within_one_lsb_of_float() {
        // Deterministic LCG noise, 24-bit range.
        let mut state = 0x1234_5678u32;
        let input: Vec<i32> = (0..256)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                ((state >> 8) as i32) - (1 << 23)
            })
            .collect();
        let expected = reference(&input.iter().map(|&s| s as f64).collect::<Vec<_>>());

        let mut fir = FirFilter::new(DEFAULT_FIR_TAPS);
        let mut output = input.clone();
        fir.process_buffer(&mut output);
        for (&got, want) in output.iter().zip(expected) {
            assert!((got as f64 - want).abs() < 1.0);
        }
    }

    #[test]
    fn attenuates_near_nyquist() {
        let mut fir = FirFilter::new(DEFAULT_FIR_TAPS);
        // Alternating ±10000 is a tone at fs/2.
        let mut buf: Vec<i32> = (0..64)
            .map(|i| if i % 2 == 0 { 10_000 } else { -10_000 })
            .collect();
        fir.process_buffer(&mut buf);
        let peak = buf[16..].iter().map(|s| s.abs()).max().unwrap();
        // -13 dB at Nyquist → about 0.22 of the input.
        assert!(peak < 2_500, "peak={peak}");
        assert!(peak > 1_500, "peak={peak}");
    }

    #[test]
    fn full_scale_input_saturates_instead_of_wrapping() {
        // Each sample carries the sign of the tap it meets at n = 8.
        let mut input: Vec<i32> = DEFAULT_FIR_TAPS
            .iter()
            .map(|&t| if t >= 0 { i32::MAX } else { -i32::MAX })
            .collect();
        let mut fir = FirFilter::new(DEFAULT_FIR_TAPS);
        fir.process_buffer(&mut input);
        assert_eq!(input[FIR_TAP_NUM - 1], i32::MAX);

        let mut negated: Vec<i32> = DEFAULT_FIR_TAPS
            .iter()
            .map(|&t| if t >= 0 { i32::MIN } else { i32::MAX })
            .collect();
        fir.reset();
        fir.process_buffer(&mut negated);
        assert_eq!(negated[FIR_TAP_NUM - 1], i32::MIN);
    }

    #[test]
    fn history_carries_across_buffers() {
        let mut split = FirFilter::new(DEFAULT_FIR_TAPS);
        let mut whole = FirFilter::new(DEFAULT_FIR_TAPS);
        let input: Vec<i32> = (0..32).map(|i| (i * 997 % 4001) - 2000).collect();

        let mut a = input.clone();
        whole.process_buffer(&mut a);

        let mut b = input.clone();
        let (head, tail) = b.split_at_mut(13);
        split.process_buffer(head);
        split.process_buffer(tail);
        assert_eq!(a, b);

        split.reset();
        let mut c = input;
        split.process_buffer(&mut c);
        assert_eq!(a, c);
    }
}
