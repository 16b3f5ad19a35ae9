//! Board settings (JSON file in the app data directory).
//!
//! Missing keys fall back to defaults. `NOISEMETER_SETTINGS` overrides the
//! file location.

use std::fs;
use std::path::{Path, PathBuf};

use noisemeter_core::{NoiseConfig, PdmConfig, PdmPins};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const SETTINGS_PATH_ENV: &str = "NOISEMETER_SETTINGS";

/// Simulated microphone input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct SignalSettings {
    pub amplitude: f64,
    pub frequency_hz: f64,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            amplitude: 20_000.0,
            frequency_hz: 1_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct BoardSettings {
    pub pins: PdmPins,
    pub pdm: PdmConfig,
    pub noise: NoiseConfig,
    pub signal: SignalSettings,
    pub run_seconds: u64,
    pub poll_interval_ms: u64,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            pins: PdmPins::default(),
            pdm: PdmConfig::default(),
            noise: NoiseConfig::default(),
            signal: SignalSettings::default(),
            run_seconds: 5,
            poll_interval_ms: 500,
        }
    }
}

impl BoardSettings {
    pub fn normalize(&mut self) {
        if let Err(e) = self.pins.validate() {
            warn!("settings: {e}; using default pins");
            self.pins = PdmPins::default();
        }
        if let Err(e) = self.pdm.validate() {
            warn!("settings: {e}; using default PDM configuration");
            self.pdm = PdmConfig::default();
        }
        if let Err(e) = self.noise.validate() {
            warn!("settings: {e}; using default noise configuration");
            self.noise = NoiseConfig::default();
        }
        self.signal.amplitude = self.signal.amplitude.abs().min(((1 << 23) - 1) as f64);
        let nyquist = self.pdm.sample_rate() as f64 / 2.0;
        if !(self.signal.frequency_hz > 0.0 && self.signal.frequency_hz < nyquist) {
            self.signal.frequency_hz = SignalSettings::default().frequency_hz;
        }
        self.run_seconds = self.run_seconds.clamp(1, 3600);
        self.poll_interval_ms = self.poll_interval_ms.clamp(10, 60_000);
    }

    /// Time for the peripheral to fill one buffer. Call on normalized
    /// settings.
    pub fn buffer_period_us(&self) -> u64 {
        self.noise.buffer_size as u64 * 1_000_000 / self.pdm.sample_rate() as u64
    }
}

pub fn default_settings_path() -> PathBuf {
    if let Some(path) = std::env::var_os(SETTINGS_PATH_ENV) {
        return PathBuf::from(path);
    }
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("noisemeter")
        .join("settings.json")
}

pub fn load_settings(path: &Path) -> BoardSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<BoardSettings>(&raw).unwrap_or_else(|e| {
            warn!("ignoring unreadable settings {}: {e}", path.display());
            BoardSettings::default()
        }),
        Err(_) => BoardSettings::default(),
    };
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &BoardSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use noisemeter_core::PinName;

    #[test]
    fn partial_file_keeps_defaults() {
        let raw = r#"{ "runSeconds": 2, "noise": { "poolDepth": 6 }, "pins": { "data": "P12_5", "clk": "P12_4" } }"#;
        let settings: BoardSettings = serde_json::from_str(raw).unwrap();
        assert_eq!(settings.run_seconds, 2);
        assert_eq!(settings.noise.pool_depth, 6);
        assert_eq!(settings.noise.buffer_size, 512);
        assert_eq!(settings.pins, PdmPins::new(PinName::P12_5, PinName::P12_4));
        assert_eq!(settings.pdm, PdmConfig::default());
    }

    #[test]
    fn normalize_clamps_out_of_range_values() {
        let mut settings = BoardSettings {
            run_seconds: 0,
            poll_interval_ms: 1,
            signal: SignalSettings {
                amplitude: -1e9,
                frequency_hz: 40_000.0,
            },
            ..BoardSettings::default()
        };
        settings.normalize();
        assert_eq!(settings.run_seconds, 1);
        assert_eq!(settings.poll_interval_ms, 10);
        assert_eq!(settings.signal.amplitude, 8_388_607.0);
        assert_eq!(settings.signal.frequency_hz, 1_000.0);
    }

    #[test]
    fn buffer_period_at_default_rate() {
        let settings = BoardSettings::default();
        let rate = PdmConfig::default().sample_rate() as u64;
        assert_eq!(rate, 31_994);
        assert_eq!(
            settings.buffer_period_us(),
            settings.noise.buffer_size as u64 * 1_000_000 / rate
        );
        // 512 samples at 31 994 Hz.
        assert_eq!(settings.buffer_period_us(), 16_003);
    }

    #[test]
    fn zero_clock_divider_falls_back_to_default_pdm() {
        let path = std::env::temp_dir().join(format!(
            "noisemeter-zero-divider-{}.json",
            std::process::id()
        ));
        fs::write(&path, r#"{ "pdm": { "clockDivider": 0 }, "runSeconds": 7 }"#).unwrap();
        let settings = load_settings(&path);
        let _ = fs::remove_file(&path);

        assert_eq!(settings.pdm, PdmConfig::default());
        assert_eq!(settings.run_seconds, 7);
        assert_eq!(settings.buffer_period_us(), 16_003);
    }

    #[test]
    fn invalid_noise_and_pins_fall_back_to_defaults() {
        let mut settings = BoardSettings {
            pins: PdmPins::new(PinName::P12_4, PinName::P12_4),
            noise: NoiseConfig {
                buffer_size: 0,
                ..NoiseConfig::default()
            },
            ..BoardSettings::default()
        };
        settings.normalize();
        assert_eq!(settings.pins, PdmPins::default());
        assert_eq!(settings.noise, NoiseConfig::default());
    }

    #[test]
    fn missing_file_loads_defaults() {
        let path = std::env::temp_dir().join("noisemeter-missing-settings.json");
        let _ = fs::remove_file(&path);
        assert_eq!(load_settings(&path), BoardSettings::default());
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let path = std::env::temp_dir()
            .join(format!("noisemeter-settings-{}", std::process::id()))
            .join("settings.json");
        let mut settings = BoardSettings::default();
        settings.run_seconds = 42;
        settings.pins = PdmPins::new(PinName::P12_5, PinName::P12_4);
        save_settings(&path, &settings).unwrap();
        let loaded = load_settings(&path);
        assert_eq!(loaded.run_seconds, 42);
        assert_eq!(loaded.pins, settings.pins);
        assert_eq!(loaded.noise.fir_taps, settings.noise.fir_taps);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
