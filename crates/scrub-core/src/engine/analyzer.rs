//! Banded frequency analysis of the mixed output
//!
//! The mixing call pushes a mono downmix into a lock-free ring buffer and
//! does nothing else; all FFT work happens on whichever thread asks for
//! [`FrequencyAnalyzer::analyze`] (the UI), so the audio thread never pays
//! for it.
//!
//! ```text
//! mix (RT) ──push mono──► rtrb ring ──drain──► window ─► Hann ─► FFT ─► bands
//! ```

use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};

use crate::types::Sample;

/// FFT length in samples
pub const ANALYZER_WINDOW: usize = 2048;

/// Centre of the lowest analyzer band in Hz
const LOWEST_BAND_HZ: f32 = 31.25;

/// Ring capacity in samples (about a second and a half at 44.1 kHz)
const ANALYSIS_RING_CAPACITY: usize = ANALYZER_WINDOW * 32;

/// Create the producer/consumer pair carrying the mono mix
pub(crate) fn analysis_channel() -> (rtrb::Producer<Sample>, rtrb::Consumer<Sample>) {
    rtrb::RingBuffer::new(ANALYSIS_RING_CAPACITY)
}

/// Push a period's mono downmix, dropping what doesn't fit
pub(crate) fn push_mono(
    producer: &mut rtrb::Producer<Sample>,
    buffer: &[Sample],
    channels: usize,
    frames: usize,
) {
    if channels == 0 {
        return;
    }
    let room = producer.slots().min(frames);
    let scale = 1.0 / channels as Sample;
    for frame in buffer.chunks_exact(channels).take(room) {
        let mono: Sample = frame.iter().sum::<Sample>() * scale;
        if producer.push(mono).is_err() {
            break;
        }
    }
}

/// Octave-band spectrum analyzer
pub struct FrequencyAnalyzer {
    consumer: rtrb::Consumer<Sample>,
    history: Vec<f32>,
    window: Vec<f32>,
    window_gain: f32,
    fft: Arc<dyn RealToComplex<f32>>,
    frame_buf: Vec<f32>,
    spectrum: Vec<realfft::num_complex::Complex<f32>>,
    scratch: Vec<realfft::num_complex::Complex<f32>>,
    /// Bin range per band, `start..end`
    band_bins: Vec<(usize, usize)>,
    band_centers: Vec<f32>,
    previous: Vec<f32>,
}

impl FrequencyAnalyzer {
    pub(crate) fn new(consumer: rtrb::Consumer<Sample>, sample_rate: u32, bands: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(ANALYZER_WINDOW);

        let window: Vec<f32> = (0..ANALYZER_WINDOW)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / ANALYZER_WINDOW as f32;
                0.5 * (1.0 - phase.cos())
            })
            .collect();
        let window_gain = window.iter().sum::<f32>();

        let band_centers = band_centers(bands);
        let band_bins = band_bins(&band_centers, sample_rate, ANALYZER_WINDOW);

        Self {
            consumer,
            history: vec![0.0; ANALYZER_WINDOW],
            window,
            window_gain,
            frame_buf: fft.make_input_vec(),
            spectrum: fft.make_output_vec(),
            scratch: fft.make_scratch_vec(),
            fft,
            previous: vec![0.0; band_centers.len()],
            band_bins,
            band_centers,
        }
    }

    pub fn band_frequencies(&self) -> &[f32] {
        &self.band_centers
    }

    /// Pull whatever the mixer produced since the last call
    fn drain(&mut self) {
        let available = self.consumer.slots();
        if available == 0 {
            return;
        }
        let Ok(chunk) = self.consumer.read_chunk(available) else {
            return;
        };
        let (first, second) = chunk.as_slices();
        for part in [first, second] {
            append_tail(&mut self.history, part);
        }
        chunk.commit_all();
    }

    /// Band levels (0.0..=1.0) averaged with the previous analysis frame
    pub fn analyze(&mut self) -> Vec<f32> {
        self.drain();

        for ((dst, &s), &w) in self
            .frame_buf
            .iter_mut()
            .zip(self.history.iter())
            .zip(self.window.iter())
        {
            *dst = s * w;
        }

        if let Err(e) =
            self.fft
                .process_with_scratch(&mut self.frame_buf, &mut self.spectrum, &mut self.scratch)
        {
            log::warn!("Frequency analysis FFT failed: {:?}", e);
            return self.previous.clone();
        }

        // Full-scale sine peaks at 1.0 after this normalisation
        let norm = 2.0 / self.window_gain;
        let mut levels = Vec::with_capacity(self.band_bins.len());
        for (band, &(start, end)) in self.band_bins.iter().enumerate() {
            let energy: f32 = self.spectrum[start..end]
                .iter()
                .map(|c| {
                    let m = c.norm() * norm;
                    m * m
                })
                .sum();
            let current = energy.sqrt().min(1.0);
            levels.push((current + self.previous[band]) * 0.5);
            self.previous[band] = current;
        }
        levels
    }
}

/// Keep the newest `history.len()` samples of `history ++ new`
fn append_tail(history: &mut [f32], new: &[f32]) {
    let len = history.len();
    if new.len() >= len {
        history.copy_from_slice(&new[new.len() - len..]);
    } else if !new.is_empty() {
        history.rotate_left(new.len());
        history[len - new.len()..].copy_from_slice(new);
    }
}

/// Octave-spaced centres starting at [`LOWEST_BAND_HZ`]
fn band_centers(bands: usize) -> Vec<f32> {
    (0..bands.max(1))
        .map(|k| LOWEST_BAND_HZ * 2f32.powi(k as i32))
        .collect()
}

/// FFT bin range covering each band (half an octave either side of centre)
fn band_bins(centers: &[f32], sample_rate: u32, fft_len: usize) -> Vec<(usize, usize)> {
    let bins = fft_len / 2 + 1;
    let hz_per_bin = sample_rate.max(1) as f32 / fft_len as f32;
    centers
        .iter()
        .map(|&c| {
            let lo = ((c / std::f32::consts::SQRT_2) / hz_per_bin).round() as usize;
            let hi = ((c * std::f32::consts::SQRT_2) / hz_per_bin).round() as usize;
            let lo = lo.clamp(1, bins);
            let hi = hi.max(lo + 1).min(bins);
            (lo.min(hi), hi)
        })
        .collect()
}
