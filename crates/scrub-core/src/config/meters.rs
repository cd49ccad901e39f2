//! Level meter and frequency analyzer settings

use serde::{Deserialize, Serialize};

/// Metering configuration for the player hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Compute per-channel peak and RMS levels while mixing
    /// Default: true
    pub level_metering: bool,

    /// Feed the mixed output to the frequency analyzer
    /// Default: true
    pub frequency_analysis: bool,

    /// Length of the rolling RMS window in milliseconds
    /// Default: 50 ms
    pub rms_window_ms: f32,

    /// How long a displayed peak stays put before falling
    /// Default: 500 ms
    pub peak_hold_ms: u32,

    /// Fall rate of a displayed peak once the hold time has passed
    /// Default: 20 dB/s
    pub peak_fall_db_per_sec: f32,

    /// Number of octave-spaced analyzer bands
    /// Default: 10 (31 Hz to 16 kHz)
    pub analyzer_bands: usize,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            level_metering: true,
            frequency_analysis: true,
            rms_window_ms: 50.0,
            peak_hold_ms: 500,
            peak_fall_db_per_sec: 20.0,
            analyzer_bands: 10,
        }
    }
}

impl MeterConfig {
    /// RMS window length in frames at `sample_rate` (at least one frame)
    pub fn rms_window_frames(&self, sample_rate: u32) -> usize {
        ((self.rms_window_ms.max(0.0) as f64 * sample_rate as f64 / 1000.0).round() as usize).max(1)
    }
}
