//! Per-chunk sample-rate / seek-speed conversion
//!
//! A [`Stretcher`] maps a window of source frames onto a fixed number of
//! output frames. The strategy is picked once in the constructor from the
//! shape of the window:
//!
//! | Strategy      | Chosen when                                            |
//! |---------------|--------------------------------------------------------|
//! | `Copy`        | integer offset, `src_len == out_len`                   |
//! | `StridedCopy` | integer offset, integer `src_len` a multiple of output |
//! | `Scale`       | `src_len <= 1` (nothing to interpolate between)        |
//! | `Linear`      | everything else                                        |
//!
//! The mixer creates a new stretcher for every block it pulls from a queue.
//! To keep interpolation continuous across blocks it prepends the trailing
//! source frames of the previous block and seeds the next stretcher's
//! offset from [`Stretcher::current_source_position`].

use crate::types::Sample;

/// Conversion strategy chosen at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Identity passthrough
    Copy,
    /// Take every `step`th frame
    StridedCopy { step: usize },
    /// Degenerate window of at most one frame: nearest-frame lookup
    Scale,
    /// Linear interpolation between neighbouring frames
    Linear,
}

/// Cursor over one channel of an interleaved source window
///
/// `next_sample` takes `&mut self`, so a stretcher can't be driven from two
/// places at once.
pub struct Stretcher<'a> {
    source: &'a [Sample],
    stride: usize,
    channel: usize,
    frames: usize,
    offset: f64,
    src_len: f64,
    out_len: usize,
    strategy: Strategy,
    cursor: usize,
}

impl<'a> Stretcher<'a> {
    /// Create a stretcher over channel `channel` of `source`, which holds
    /// frames of `stride` interleaved samples
    ///
    /// The window starts at fractional frame `offset` and spans `src_len`
    /// frames; it is mapped onto `out_len` output samples.
    pub fn new(
        source: &'a [Sample],
        stride: usize,
        channel: usize,
        offset: f64,
        src_len: f64,
        out_len: usize,
    ) -> Self {
        let stride = stride.max(1);
        let strategy = Self::choose(offset, src_len, out_len);
        Self {
            source,
            stride,
            channel: channel.min(stride - 1),
            frames: source.len() / stride,
            offset,
            src_len,
            out_len,
            strategy,
            cursor: 0,
        }
    }

    /// Stretcher over a non-interleaved buffer
    pub fn mono(source: &'a [Sample], offset: f64, src_len: f64, out_len: usize) -> Self {
        Self::new(source, 1, 0, offset, src_len, out_len)
    }

    fn choose(offset: f64, src_len: f64, out_len: usize) -> Strategy {
        if src_len <= 1.0 || out_len == 0 {
            return Strategy::Scale;
        }
        let integral = offset.fract() == 0.0 && src_len.fract() == 0.0 && offset >= 0.0;
        if integral {
            let src = src_len as usize;
            if src == out_len {
                return Strategy::Copy;
            }
            if src > out_len && src % out_len == 0 {
                return Strategy::StridedCopy {
                    step: src / out_len,
                };
            }
        }
        Strategy::Linear
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Frame value, clamped to the window edges of the source buffer
    #[inline]
    fn frame(&self, index: isize) -> Sample {
        if self.frames == 0 {
            return 0.0;
        }
        let index = index.clamp(0, self.frames as isize - 1) as usize;
        self.source[index * self.stride + self.channel]
    }

    /// Produce the next output sample and advance by one
    pub fn next_sample(&mut self) -> Sample {
        let i = self.cursor;
        self.cursor += 1;

        match self.strategy {
            Strategy::Copy => self.frame(self.offset as isize + i as isize),
            Strategy::StridedCopy { step } => {
                self.frame(self.offset as isize + (i * step) as isize)
            }
            Strategy::Scale => {
                let pos = self.position_at(i);
                self.frame(pos.round() as isize)
            }
            Strategy::Linear => {
                let pos = self.position_at(i);
                let base = pos.floor();
                let frac = (pos - base) as Sample;
                let base = base as isize;
                let a = self.frame(base);
                let b = self.frame(base + 1);
                a * (1.0 - frac) + b * frac
            }
        }
    }

    #[inline]
    fn position_at(&self, i: usize) -> f64 {
        if self.out_len == 0 {
            return self.offset;
        }
        i as f64 / self.out_len as f64 * self.src_len + self.offset
    }

    /// Fractional source frame the next output sample would be taken from
    pub fn current_source_position(&self) -> f64 {
        self.position_at(self.cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<Sample> {
        (0..n).map(|i| i as Sample).collect()
    }

    #[test]
    fn test_equal_lengths_copy_source() {
        let src = ramp(100);
        let mut s = Stretcher::mono(&src, 0.0, 100.0, 100);
        assert_eq!(s.strategy(), Strategy::Copy);
        let out: Vec<Sample> = (0..100).map(|_| s.next_sample()).collect();
        assert_eq!(out, src);
        assert_eq!(s.current_source_position(), 100.0);
    }

    #[test]
    fn test_exact_multiple_uses_strided_copy() {
        let src = ramp(64);
        let mut s = Stretcher::mono(&src, 0.0, 64.0, 16);
        assert_eq!(s.strategy(), Strategy::StridedCopy { step: 4 });
        let out: Vec<Sample> = (0..16).map(|_| s.next_sample()).collect();
        let expected: Vec<Sample> = (0..16).map(|i| (i * 4) as Sample).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_tiny_window_uses_scale() {
        let src = vec![0.5, 0.9];
        let mut s = Stretcher::mono(&src, 0.0, 1.0, 8);
        assert_eq!(s.strategy(), Strategy::Scale);
        // Positions 0.0..0.875 all round to frame 0 or 1
        let first = s.next_sample();
        assert_eq!(first, 0.5);
        for _ in 1..8 {
            let v = s.next_sample();
            assert!(v == 0.5 || v == 0.9);
        }
    }

    #[test]
    fn test_linear_interpolates_midpoints() {
        let src = ramp(4);
        // Half speed: 3 source frames onto 6 outputs
        let mut s = Stretcher::mono(&src, 0.0, 3.0, 6);
        assert_eq!(s.strategy(), Strategy::Linear);
        let out: Vec<Sample> = (0..6).map(|_| s.next_sample()).collect();
        assert_eq!(out, vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5]);
    }

    #[test]
    fn test_fractional_offset_forces_linear() {
        let src = ramp(10);
        let mut s = Stretcher::mono(&src, 0.25, 4.0, 4);
        assert_eq!(s.strategy(), Strategy::Linear);
        assert!((s.next_sample() - 0.25).abs() < 1e-6);
        assert!((s.next_sample() - 1.25).abs() < 1e-6);
    }

    #[test]
    fn test_reads_past_end_clamp() {
        let src = ramp(3);
        let mut s = Stretcher::mono(&src, 0.0, 6.0, 6);
        let out: Vec<Sample> = (0..6).map(|_| s.next_sample()).collect();
        assert_eq!(out, vec![0.0, 1.0, 2.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_empty_source_yields_silence() {
        let mut s = Stretcher::mono(&[], 0.0, 4.0, 4);
        assert_eq!(s.next_sample(), 0.0);
    }

    #[test]
    fn test_interleaved_channel_selection() {
        // Two channels: left = 0,1,2,3 ; right = 10,11,12,13
        let src = vec![0.0, 10.0, 1.0, 11.0, 2.0, 12.0, 3.0, 13.0];
        let mut right = Stretcher::new(&src, 2, 1, 0.0, 4.0, 4);
        let out: Vec<Sample> = (0..4).map(|_| right.next_sample()).collect();
        assert_eq!(out, vec![10.0, 11.0, 12.0, 13.0]);
    }

    #[test]
    fn test_source_position_seeds_next_block() {
        let src = ramp(32);
        // 1.5x speed over two consecutive blocks of 8 outputs
        let mut a = Stretcher::mono(&src, 0.0, 12.0, 8);
        let first: Vec<Sample> = (0..8).map(|_| a.next_sample()).collect();
        let resume = a.current_source_position();
        assert!((resume - 12.0).abs() < 1e-9);

        let mut b = Stretcher::mono(&src, resume, 12.0, 8);
        let second: Vec<Sample> = (0..8).map(|_| b.next_sample()).collect();

        let joined: Vec<Sample> = first.into_iter().chain(second).collect();
        for pair in joined.windows(2) {
            assert!((pair[1] - pair[0] - 1.5).abs() < 1e-5);
        }
    }
}
