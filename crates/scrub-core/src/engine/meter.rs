//! Output level metering
//!
//! [`LevelMeters`] lives inside the hub and is fed from the mixing call: it
//! tracks, per output channel, the absolute peak and the largest rolling-
//! window RMS seen since the last read. Reading a value arms a reset flag
//! that the next mix consumes, so every sample is counted in exactly one
//! reading.
//!
//! [`PeakHold`] is the display-side ballistics for a peak meter.

use std::time::{Duration, Instant};

use crate::config::MeterConfig;
use crate::types::{Sample, MAX_CHANNELS};

/// Peak and RMS accumulators for every output channel
pub(crate) struct LevelMeters {
    channels: usize,
    peak: [f32; MAX_CHANNELS],
    rms: [f32; MAX_CHANNELS],
    peak_reset: [bool; MAX_CHANNELS],
    rms_reset: [bool; MAX_CHANNELS],
    /// Squared samples of the last `window_frames` frames, interleaved
    window: Vec<f32>,
    window_frames: usize,
    window_pos: usize,
    window_filled: usize,
    sum_sq: [f64; MAX_CHANNELS],
}

impl LevelMeters {
    pub(crate) fn new() -> Self {
        Self {
            channels: 0,
            peak: [0.0; MAX_CHANNELS],
            rms: [0.0; MAX_CHANNELS],
            peak_reset: [false; MAX_CHANNELS],
            rms_reset: [false; MAX_CHANNELS],
            window: Vec::new(),
            window_frames: 1,
            window_pos: 0,
            window_filled: 0,
            sum_sq: [0.0; MAX_CHANNELS],
        }
    }

    /// Size the RMS window for an output format; call off the audio thread
    pub(crate) fn configure(&mut self, config: &MeterConfig, channels: usize, sample_rate: u32) {
        self.channels = channels.min(MAX_CHANNELS);
        self.window_frames = config.rms_window_frames(sample_rate);
        self.window = vec![0.0; self.window_frames * self.channels];
        self.clear();
    }

    pub(crate) fn clear(&mut self) {
        self.peak = [0.0; MAX_CHANNELS];
        self.rms = [0.0; MAX_CHANNELS];
        self.peak_reset = [false; MAX_CHANNELS];
        self.rms_reset = [false; MAX_CHANNELS];
        self.window.iter_mut().for_each(|v| *v = 0.0);
        self.window_pos = 0;
        self.window_filled = 0;
        self.sum_sq = [0.0; MAX_CHANNELS];
    }

    /// Accumulate one mixed period of `frames` interleaved frames
    pub(crate) fn process(&mut self, buffer: &[Sample], channels: usize, frames: usize) {
        let channels = channels.min(self.channels);
        if channels == 0 || self.window.is_empty() {
            return;
        }

        for ch in 0..channels {
            if self.peak_reset[ch] {
                self.peak[ch] = 0.0;
                self.peak_reset[ch] = false;
            }
            if self.rms_reset[ch] {
                self.rms[ch] = 0.0;
                self.rms_reset[ch] = false;
            }
        }

        let stride = self.channels;
        for frame in buffer.chunks_exact(channels).take(frames) {
            let base = self.window_pos * stride;
            for (ch, &s) in frame.iter().enumerate() {
                let abs = s.abs();
                if abs > self.peak[ch] {
                    self.peak[ch] = abs;
                }
                let sq = s * s;
                self.sum_sq[ch] += sq as f64 - self.window[base + ch] as f64;
                self.window[base + ch] = sq;
            }
            self.window_pos = (self.window_pos + 1) % self.window_frames;
            self.window_filled = (self.window_filled + 1).min(self.window_frames);
        }

        if self.window_filled > 0 {
            for ch in 0..channels {
                let rms = (self.sum_sq[ch].max(0.0) / self.window_filled as f64).sqrt() as f32;
                if rms > self.rms[ch] {
                    self.rms[ch] = rms;
                }
            }
        }
    }

    /// Peak since the last read, then arm the reset
    pub(crate) fn take_peak(&mut self, channel: usize) -> f32 {
        if channel >= self.channels {
            return 0.0;
        }
        self.peak_reset[channel] = true;
        self.peak[channel]
    }

    /// Largest windowed RMS since the last read, then arm the reset
    pub(crate) fn take_rms(&mut self, channel: usize) -> f32 {
        if channel >= self.channels {
            return 0.0;
        }
        self.rms_reset[channel] = true;
        self.rms[channel]
    }
}

/// Hold-then-fall ballistics for a displayed peak level
#[derive(Debug, Clone)]
pub struct PeakHold {
    hold: Duration,
    fall_db_per_sec: f32,
    level: f32,
    held_since: Option<Instant>,
    last_update: Option<Instant>,
}

/// Levels below this are shown as silence
const FLOOR_DB: f32 = -96.0;

impl PeakHold {
    pub fn new(config: &MeterConfig) -> Self {
        Self {
            hold: Duration::from_millis(config.peak_hold_ms as u64),
            fall_db_per_sec: config.peak_fall_db_per_sec.max(0.0),
            level: 0.0,
            held_since: None,
            last_update: None,
        }
    }

    /// Feed a fresh peak reading taken at `now`; returns the level to show
    pub fn update(&mut self, peak: f32, now: Instant) -> f32 {
        let last = self.last_update.replace(now);

        if peak >= self.level {
            self.level = peak;
            self.held_since = Some(now);
            return self.level;
        }

        let held_since = *self.held_since.get_or_insert(now);
        if now.duration_since(held_since) < self.hold {
            return self.level;
        }

        // Fall only for the part of the interval past the hold time
        let fall_from = last.map_or(now, |l| l.max(held_since + self.hold));
        let dt = now.saturating_duration_since(fall_from).as_secs_f32();
        let db = to_db(self.level) - self.fall_db_per_sec * dt;
        self.level = if db <= FLOOR_DB { 0.0 } else { from_db(db) }.max(peak);
        self.level
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn reset(&mut self) {
        self.level = 0.0;
        self.held_since = None;
        self.last_update = None;
    }
}

/// Linear amplitude to dBFS
pub fn to_db(level: f32) -> f32 {
    if level <= 0.0 {
        FLOOR_DB
    } else {
        (20.0 * level.log10()).max(FLOOR_DB)
    }
}

fn from_db(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}
