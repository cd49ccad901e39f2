//! Audio backend configuration
//!
//! Which backends to try and in what order, device selection and the
//! requested output format.

use serde::{Deserialize, Serialize};

use crate::types::DEFAULT_SAMPLE_RATE;

/// Largest period any backend hands to the hub in one call (frames)
pub const MAX_BUFFER_SIZE: usize = 8192;

/// Period used when the config leaves it to us (frames)
///
/// 512 frames @ 44.1kHz is about 11.6ms.
pub const DEFAULT_BUFFER_SIZE: u32 = 512;

/// Period tried first in low-latency mode (frames)
pub const LOW_LATENCY_BUFFER_SIZE: u32 = 256;

/// Audio backend implementations, tried in the configured order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Native JACK client (Linux, `jack-backend` feature)
    Jack,
    /// Cross-platform output through cpal
    Cpal,
    /// No device; a paced thread drives the mixer into a discard buffer
    Null,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendKind::Jack => "JACK",
            BackendKind::Cpal => "cpal",
            BackendKind::Null => "null",
        };
        f.write_str(name)
    }
}

/// Preferred period size for audio streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BufferSize {
    /// Let the system choose
    #[default]
    Default,
    /// Request a specific period in frames (clamped to 64..=MAX_BUFFER_SIZE)
    Fixed(u32),
    /// Smallest period known to be stable on most systems
    LowLatency,
}

impl BufferSize {
    /// Period to request in frames
    pub fn as_frames(&self) -> u32 {
        match self {
            BufferSize::Default => DEFAULT_BUFFER_SIZE,
            BufferSize::Fixed(frames) => (*frames).clamp(64, MAX_BUFFER_SIZE as u32),
            BufferSize::LowLatency => LOW_LATENCY_BUFFER_SIZE,
        }
    }

    /// Latency of one period in milliseconds
    pub fn latency_ms(&self, sample_rate: u32) -> f32 {
        (self.as_frames() as f32 / sample_rate.max(1) as f32) * 1000.0
    }
}

/// Audio device identifier
///
/// Includes both the device name and the host backend (JACK, ALSA, etc.)
/// so devices from different hosts can be told apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    /// Device name as reported by the system
    pub name: String,
    /// Audio host identifier (e.g., "JACK", "ALSA", "CoreAudio");
    /// `None` searches every host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Some(host.to_string()),
        }
    }

    /// Display label including the host if known
    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

/// Configuration for the audio backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Backends to try, in order; the null backend is always the last resort
    pub backends: Vec<BackendKind>,

    /// Output device for cpal (None = host default)
    pub device: Option<DeviceId>,

    /// Requested output sample rate in Hz
    pub sample_rate: u32,

    /// Requested output channel count
    pub channels: u16,

    /// Requested period size
    pub buffer_size: BufferSize,

    /// Periods of output buffering; the null backend catches up on at
    /// most this many periods after a stall
    pub buffer_count: u32,

    /// Name of the JACK client
    pub jack_client_name: String,

    /// Connect JACK output ports to the first playback ports on startup
    pub jack_connect_ports: bool,

    /// Device can't play and record at once; output is paused while
    /// recording
    pub half_duplex: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            backends: vec![BackendKind::Jack, BackendKind::Cpal, BackendKind::Null],
            device: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 2,
            buffer_size: BufferSize::default(),
            buffer_count: 2,
            jack_client_name: "scrub".to_string(),
            jack_connect_ports: true,
            half_duplex: false,
        }
    }
}

impl AudioConfig {
    /// Config that only ever uses the null backend
    pub fn null() -> Self {
        Self {
            backends: vec![BackendKind::Null],
            ..Default::default()
        }
    }

    /// Set the output device
    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    /// Set a fixed period in frames
    pub fn with_buffer_frames(mut self, frames: u32) -> Self {
        self.buffer_size = BufferSize::Fixed(frames);
        self
    }

    /// Set the requested sample rate
    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backend_order() {
        let config = AudioConfig::default();
        assert_eq!(
            config.backends,
            vec![BackendKind::Jack, BackendKind::Cpal, BackendKind::Null]
        );
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.channels, 2);
    }

    #[test]
    fn test_buffer_size_frames() {
        assert_eq!(BufferSize::Default.as_frames(), DEFAULT_BUFFER_SIZE);
        assert_eq!(BufferSize::Fixed(16).as_frames(), 64);
        assert_eq!(BufferSize::Fixed(1 << 20).as_frames(), MAX_BUFFER_SIZE as u32);
        assert_eq!(BufferSize::LowLatency.as_frames(), 256);
        assert!((BufferSize::Fixed(441).latency_ms(44100) - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "backends: [cpal, null]\nbuffer_size: !Fixed 128\n";
        let config: AudioConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.backends, vec![BackendKind::Cpal, BackendKind::Null]);
        assert_eq!(config.buffer_size, BufferSize::Fixed(128));
        assert_eq!(config.jack_client_name, "scrub");
    }

    #[test]
    fn test_device_label() {
        assert_eq!(DeviceId::new("hw:0").display_label(), "hw:0");
        assert_eq!(DeviceId::with_host("hw:0", "ALSA").display_label(), "[ALSA] hw:0");
    }
}
