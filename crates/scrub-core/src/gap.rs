//! Gap signal spliced in at loop and skip discontinuities
//!
//! A short raised-cosine-windowed tone. Hearing it tells the user that the
//! playback cursor just jumped (loop wrap in gap mode, or the middle of the
//! selection being skipped) instead of the audio running on continuously.

use std::f64::consts::PI;

use crate::types::Sample;

/// Fundamental of the gap tone in Hz
const GAP_FUNDAMENTAL_HZ: f64 = 440.0;

/// Number of harmonics summed into the tone (each at amplitude 1/h)
const GAP_HARMONICS: usize = 4;

/// Peak amplitude of the finished signal
const GAP_PEAK: f64 = 0.25;

/// Pre-rendered, interleaved gap signal
#[derive(Debug, Clone, Default)]
pub struct GapSignal {
    samples: Vec<Sample>,
    channels: usize,
    sample_rate: u32,
}

impl GapSignal {
    /// Render `seconds` of gap signal for `channels` channels at `sample_rate`
    ///
    /// The result holds exactly `round(seconds * sample_rate)` frames and the
    /// window brings both ends to zero.
    pub fn generate(seconds: f64, channels: usize, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let frames = (seconds.max(0.0) * sample_rate as f64).round() as usize;

        let mut mono: Vec<f64> = (0..frames)
            .map(|n| {
                let t = n as f64 / sample_rate as f64;
                let tone: f64 = (1..=GAP_HARMONICS)
                    .map(|h| (2.0 * PI * GAP_FUNDAMENTAL_HZ * h as f64 * t).sin() / h as f64)
                    .sum();
                tone * hann(n, frames)
            })
            .collect();

        let peak = mono.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        if peak > 0.0 {
            let gain = GAP_PEAK / peak;
            mono.iter_mut().for_each(|v| *v *= gain);
        }

        let mut samples = Vec::with_capacity(frames * channels);
        for v in mono {
            samples.extend(std::iter::repeat(v as Sample).take(channels));
        }

        log::debug!(
            "Generated gap signal: {} frames x {} channels at {} Hz",
            frames,
            channels,
            sample_rate
        );

        Self {
            samples,
            channels,
            sample_rate,
        }
    }

    /// Whether this buffer was rendered for the given layout
    pub fn matches(&self, channels: usize, sample_rate: u32) -> bool {
        self.channels == channels && self.sample_rate == sample_rate
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Interleaved samples
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// One interleaved frame
    #[inline]
    pub fn frame(&self, index: usize) -> &[Sample] {
        &self.samples[index * self.channels..(index + 1) * self.channels]
    }
}

/// Raised-cosine (Hann) window value for sample `n` of `len`
fn hann(n: usize, len: usize) -> f64 {
    if len < 2 {
        return 0.0;
    }
    0.5 * (1.0 - (2.0 * PI * n as f64 / (len - 1) as f64).cos())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_is_exact() {
        let gap = GapSignal::generate(0.15, 2, 44100);
        assert_eq!(gap.frames(), 6615);
        assert_eq!(gap.samples().len(), 6615 * 2);

        let gap = GapSignal::generate(0.01, 1, 48000);
        assert_eq!(gap.frames(), 480);
    }

    #[test]
    fn test_window_ends_at_zero() {
        let gap = GapSignal::generate(0.1, 1, 44100);
        let s = gap.samples();
        assert!(s[0].abs() < 1e-6);
        assert!(s[s.len() - 1].abs() < 1e-6);
    }

    #[test]
    fn test_peak_is_normalised() {
        let gap = GapSignal::generate(0.2, 1, 44100);
        let peak = gap.samples().iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!((peak - GAP_PEAK as f32).abs() < 1e-4);
    }

    #[test]
    fn test_channels_carry_same_signal() {
        let gap = GapSignal::generate(0.05, 3, 22050);
        for i in 0..gap.frames() {
            let f = gap.frame(i);
            assert_eq!(f[0], f[1]);
            assert_eq!(f[1], f[2]);
        }
    }

    #[test]
    fn test_matches_layout() {
        let gap = GapSignal::generate(0.05, 2, 44100);
        assert!(gap.matches(2, 44100));
        assert!(!gap.matches(1, 44100));
        assert!(!gap.matches(2, 48000));
    }

    #[test]
    fn test_zero_length() {
        let gap = GapSignal::generate(0.0, 2, 44100);
        assert!(gap.is_empty());
        assert_eq!(gap.frames(), 0);
    }
}
