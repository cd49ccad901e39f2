//! Common types for Scrub
//!
//! Sample representation, transport enums and the constants shared by the
//! prebuffer threads and the mixer.

use serde::{Deserialize, Serialize};

/// Audio sample type (32-bit float, nominal range -1.0..=1.0)
pub type Sample = f32;

/// Sample frame index into a sound
pub type FramePosition = u64;

/// Frames per prebuffered chunk
///
/// One position record is queued for every chunk, so this is also the
/// granularity of the coarse play position reported to the UI.
pub const FRAMES_PER_CHUNK: usize = 1024;

/// Maximum channel count of a sound or an output device
pub const MAX_CHANNELS: usize = 16;

/// Seek speed above which the prebuffer thread skips ahead on its own
pub const FAST_SKIP_THRESHOLD: f64 = 5.0;

/// Smallest allowed seek speed magnitude
pub const MIN_SEEK_SPEED: f64 = 0.001;

/// Largest allowed seek speed magnitude
pub const MAX_SEEK_SPEED: f64 = 100.0;

/// Default sample rate when neither the config nor the device specify one
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Boundary policy applied when the prebuffer cursor reaches the end of the
/// region being played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopType {
    /// Stop producing at the end of the region
    #[default]
    None,
    /// Wrap back to the start of the selection
    Normal,
    /// Pad the chunk with silence and play the gap signal before repeating
    GapBeforeRepeat,
    /// Play only the edges of the selection, jumping over the middle
    SkipMost,
}

impl LoopType {
    /// Whether this policy ever wraps back to the selection start
    pub fn is_looping(self) -> bool {
        !matches!(self, LoopType::None)
    }

    /// Parse the short names used on the command line
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" | "off" => Some(LoopType::None),
            "normal" | "loop" => Some(LoopType::Normal),
            "gap" | "gap-before-repeat" => Some(LoopType::GapBeforeRepeat),
            "skip" | "skip-most" => Some(LoopType::SkipMost),
            _ => None,
        }
    }
}

/// Transport state of a playback channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl PlayState {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            PlayState::Stopped => 0,
            PlayState::Playing => 1,
            PlayState::Paused => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => PlayState::Playing,
            2 => PlayState::Paused,
            _ => PlayState::Stopped,
        }
    }
}

/// Negotiated format of an output device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    /// Frames per second
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: usize,
    /// Frames per hardware period
    pub period_frames: usize,
}

impl OutputFormat {
    pub fn new(sample_rate: u32, channels: usize, period_frames: usize) -> Self {
        Self {
            sample_rate,
            channels,
            period_frames,
        }
    }

    /// Period latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.period_frames as f32 / self.sample_rate as f32) * 1000.0
    }
}

/// Add `value` onto `target`, saturating at full scale
#[inline]
pub fn clipped_add(target: &mut Sample, value: Sample) {
    *target = (*target + value).clamp(-1.0, 1.0);
}

/// Convert an internal sample to 16-bit PCM
#[inline]
pub fn sample_to_i16(sample: Sample) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Convert an internal sample to unsigned 16-bit PCM
#[inline]
pub fn sample_to_u16(sample: Sample) -> u16 {
    ((sample.clamp(-1.0, 1.0) + 1.0) * 0.5 * u16::MAX as f32) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clipped_add_saturates() {
        let mut s = 0.75;
        clipped_add(&mut s, 0.5);
        assert_eq!(s, 1.0);

        let mut s = -0.75;
        clipped_add(&mut s, -0.5);
        assert_eq!(s, -1.0);

        let mut s = 0.25;
        clipped_add(&mut s, 0.25);
        assert_eq!(s, 0.5);
    }

    #[test]
    fn test_i16_conversion() {
        assert_eq!(sample_to_i16(1.0), i16::MAX);
        assert_eq!(sample_to_i16(0.0), 0);
        assert_eq!(sample_to_i16(2.0), i16::MAX);
        assert_eq!(sample_to_i16(-1.0), -i16::MAX);
    }

    #[test]
    fn test_u16_conversion_midpoint() {
        let mid = sample_to_u16(0.0);
        assert!((mid as i32 - 32767).abs() <= 1);
        assert_eq!(sample_to_u16(-1.0), 0);
    }

    #[test]
    fn test_loop_type_names() {
        assert_eq!(LoopType::from_name("gap"), Some(LoopType::GapBeforeRepeat));
        assert_eq!(LoopType::from_name("skip"), Some(LoopType::SkipMost));
        assert_eq!(LoopType::from_name("bogus"), None);
        assert!(!LoopType::None.is_looping());
        assert!(LoopType::Normal.is_looping());
    }

    #[test]
    fn test_play_state_roundtrip() {
        for state in [PlayState::Stopped, PlayState::Playing, PlayState::Paused] {
            assert_eq!(PlayState::from_u8(state.to_u8()), state);
        }
    }
}
