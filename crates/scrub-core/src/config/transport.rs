//! Playback transport settings

use serde::{Deserialize, Serialize};

use crate::types::FRAMES_PER_CHUNK;

/// Transport configuration applied to every playback channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Audio kept at each edge of the selection in skip-most loop mode;
    /// everything between the two margins is jumped over
    /// Default: 2.0 seconds
    pub skip_margin_seconds: f64,

    /// Length of the gap signal played at loop and skip discontinuities
    /// Default: 0.15 seconds
    pub loop_gap_seconds: f64,

    /// Chunks of audio each channel keeps queued ahead of the mixer
    /// Default: 4 (about 93 ms at 44.1 kHz)
    pub prebuffer_chunks: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            skip_margin_seconds: 2.0,
            loop_gap_seconds: 0.15,
            prebuffer_chunks: 4,
        }
    }
}

impl TransportConfig {
    /// Queue depth in chunks, never less than two
    pub fn queue_chunks(&self) -> usize {
        self.prebuffer_chunks.max(2)
    }

    /// Skip margin in frames at `sample_rate`
    pub fn skip_margin_frames(&self, sample_rate: u32) -> u64 {
        (self.skip_margin_seconds.max(0.0) * sample_rate as f64).round() as u64
    }

    /// Prebuffered audio in seconds at `sample_rate`
    pub fn prebuffer_seconds(&self, sample_rate: u32) -> f64 {
        (self.queue_chunks() * FRAMES_PER_CHUNK) as f64 / sample_rate.max(1) as f64
    }
}
