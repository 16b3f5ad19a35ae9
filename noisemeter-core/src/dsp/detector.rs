//! Per-buffer level detection.
//!
//! ## Algorithm
//!
//! 1. Mean absolute magnitude of the filtered buffer.
//! 2. Moving average over the last `N` buffer magnitudes. The window starts
//!    full of zeros, so the first `N - 1` outputs ramp up from silence.
//! 3. Peak hold with exponential release: the held level jumps up to a
//!    louder average immediately and decays by `num/den` per buffer.

use ringbuf::traits::{Observer, Producer, RingBuffer};
use ringbuf::HeapRb;

/// Mean of `|s|` over the buffer. An empty buffer reads as silence.
pub fn mean_magnitude(samples: &[i32]) -> u32 {
    if samples.is_empty() {
        return 0;
    }
    let sum: u64 = samples.iter().map(|s| s.unsigned_abs() as u64).sum();
    (sum / samples.len() as u64) as u32
}

/// Running mean over a fixed window of buffer magnitudes.
pub struct MovingAverage {
    window: HeapRb<u32>,
    sum: u64,
    len: usize,
}

impl MovingAverage {
    /// # Panics
    /// If `len` is zero. Configuration validation rejects that earlier.
    pub fn new(len: usize) -> Self {
        assert!(len > 0, "moving average window must not be empty");
        let mut window = HeapRb::new(len);
        for _ in 0..len {
            let _ = window.try_push(0);
        }
        Self { window, sum: 0, len }
    }

    /// Push one magnitude and return the updated average.
    pub fn push(&mut self, value: u32) -> u32 {
        debug_assert!(self.window.is_full());
        let oldest = self.window.push_overwrite(value).unwrap_or(0);
        self.sum = self.sum - oldest as u64 + value as u64;
        (self.sum / self.len as u64) as u32
    }

    pub fn average(&self) -> u32 {
        (self.sum / self.len as u64) as u32
    }

    /// Number of magnitudes the average spans.
    pub fn window_len(&self) -> usize {
        self.len
    }

    /// Every value in the window is zero.
    pub fn is_silent(&self) -> bool {
        self.sum == 0
    }
}

/// Peak detector with fractional release per update.
#[derive(Debug, Clone)]
pub struct PeakHold {
    level: u32,
    num: u32,
    den: u32,
}

impl PeakHold {
    /// Release factor `num/den` must be below one for the level to decay.
    pub fn new(num: u32, den: u32) -> Self {
        Self { level: 0, num, den }
    }

    /// `level = max(input, round(level · num / den))`
    pub fn update(&mut self, input: u32) -> u32 {
        let num = self.num as u64;
        let den = self.den as u64;
        let decayed = ((self.level as u64 * num + den / 2) / den) as u32;
        self.level = input.max(decayed);
        self.level
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn reset(&mut self) {
        self.level = 0;
    }
}

/// Magnitude, moving average and peak hold chained for one buffer at a time.
pub struct LevelDetector {
    average: MovingAverage,
    peak: PeakHold,
}

impl LevelDetector {
    pub fn new(average_over: usize, fading_num: u32, fading_den: u32) -> Self {
        Self {
            average: MovingAverage::new(average_over),
            peak: PeakHold::new(fading_num, fading_den),
        }
    }

    /// Feed one filtered buffer; returns the held level.
    pub fn process(&mut self, samples: &[i32]) -> u32 {
        let magnitude = mean_magnitude(samples);
        let average = self.average.push(magnitude);
        self.peak.update(average)
    }

    pub fn level(&self) -> u32 {
        self.peak.level()
    }
}
