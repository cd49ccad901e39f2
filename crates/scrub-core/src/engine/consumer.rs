//! Audio-thread side of a playback channel
//!
//! `mix` runs inside the device period. It never blocks: the consumer state
//! is taken with `try_lock` (a flush in progress means this channel is
//! silent for the period) and the queues are only ever `try_read`, so a
//! queue held by the prebuffer thread cuts the period short instead of
//! waiting.
//!
//! Samples are pulled in blocks bounded by what the period still needs,
//! what is left of the current chunk and what is queued. Each block is
//! converted to the device rate and seek speed with one [`Stretcher`] per
//! sound channel. The work buffer keeps the last two frames of the previous
//! block in front of the new ones so interpolation runs on across blocks
//! and chunk boundaries.

use std::sync::atomic::Ordering;
use std::sync::TryLockError;

use super::channel::{ChannelShared, ChunkRecord};
use super::hub::MixSource;
use super::route::{default_masks, RouteMask};
use crate::gap::GapSignal;
use crate::queue::BoundedQueue;
use crate::stretch::Stretcher;
use crate::types::{
    clipped_add, FramePosition, PlayState, Sample, FAST_SKIP_THRESHOLD, FRAMES_PER_CHUNK,
    MAX_CHANNELS,
};

/// Frames of the previous block kept in front of the work buffer
const HISTORY_FRAMES: usize = 2;

/// Most new frames pulled from the queue per block
const WORK_FRAMES: usize = 2048;

/// Mixer state of one channel, guarded by the channel's reader lock
pub(crate) struct ConsumerState {
    channels: usize,
    chunk_position: FramePosition,
    chunk_reverse: bool,
    chunk_consumed: usize,
    chunk_remaining: usize,
    /// Fractional read position in `work` for the next output frame
    phase: f64,
    /// `HISTORY_FRAMES + WORK_FRAMES` interleaved frames
    work: Vec<Sample>,
    gap: GapSignal,
    gap_frame: usize,
    gap_active: bool,
    /// Explicit routing; `None` follows the device layout
    route_masks: Option<[RouteMask; MAX_CHANNELS]>,
}

impl ConsumerState {
    pub(crate) fn new(channels: usize) -> Self {
        Self {
            channels,
            chunk_position: 0,
            chunk_reverse: false,
            chunk_consumed: 0,
            chunk_remaining: 0,
            phase: HISTORY_FRAMES as f64,
            work: vec![0.0; (HISTORY_FRAMES + WORK_FRAMES) * channels],
            gap: GapSignal::default(),
            gap_frame: 0,
            gap_active: false,
            route_masks: None,
        }
    }

    /// Forget the current chunk and interpolation history
    pub(crate) fn reset(&mut self) {
        self.chunk_position = 0;
        self.chunk_reverse = false;
        self.chunk_consumed = 0;
        self.chunk_remaining = 0;
        self.phase = HISTORY_FRAMES as f64;
        self.work[..HISTORY_FRAMES * self.channels].fill(0.0);
        self.gap_active = false;
        self.gap_frame = 0;
    }

    /// Render the gap signal for `sample_rate` unless it already matches
    pub(crate) fn prepare_gap(&mut self, seconds: f64, sample_rate: u32) {
        let frames = (seconds.max(0.0) * sample_rate as f64).round() as usize;
        if !self.gap.matches(self.channels, sample_rate) || self.gap.frames() != frames {
            self.gap = GapSignal::generate(seconds, self.channels, sample_rate);
        }
    }

    pub(crate) fn set_route_masks(&mut self, masks: Option<[RouteMask; MAX_CHANNELS]>) {
        self.route_masks = masks;
    }

    /// Store position of the next unheard frame of the current chunk
    pub(crate) fn current_position(&self) -> Option<FramePosition> {
        if self.chunk_remaining == 0 {
            return None;
        }
        let consumed = self.chunk_consumed as FramePosition;
        Some(if self.chunk_reverse {
            self.chunk_position.saturating_sub(consumed)
        } else {
            self.chunk_position + consumed
        })
    }

    fn begin_chunk(&mut self, record: ChunkRecord) {
        self.chunk_position = record.position;
        self.chunk_reverse = record.reverse;
        self.chunk_consumed = 0;
        self.chunk_remaining = FRAMES_PER_CHUNK;
    }

    /// Mix up to `want` gap frames into `out`; returns frames written
    fn mix_gap(
        &mut self,
        out: &mut [Sample],
        device_channels: usize,
        want: usize,
        masks: &[RouteMask; MAX_CHANNELS],
        muted: &[bool; MAX_CHANNELS],
    ) -> usize {
        let n = want.min(self.gap.frames().saturating_sub(self.gap_frame));
        for i in 0..n {
            let src = self.gap.frame(self.gap_frame + i);
            let dst = &mut out[i * device_channels..(i + 1) * device_channels];
            for (ch, &v) in src.iter().enumerate() {
                if !muted[ch] {
                    route_into(dst, masks[ch], v);
                }
            }
        }
        self.gap_frame += n;
        if self.gap_frame >= self.gap.frames() {
            self.gap_active = false;
        }
        n
    }

    /// Pull one block from `queue` and mix it into `out`
    ///
    /// Returns output frames written, or `None` when nothing could be
    /// pulled or produced (underrun).
    fn mix_block(
        &mut self,
        queue: &BoundedQueue<Sample>,
        out: &mut [Sample],
        device_channels: usize,
        want: usize,
        ratio: f64,
        masks: &[RouteMask; MAX_CHANNELS],
        muted: &[bool; MAX_CHANNELS],
    ) -> Option<usize> {
        let sc = self.channels;
        let pos = self.phase;

        // Frames needed so that every one of `want` outputs has both of
        // its interpolation neighbours
        let desired = ((pos + want as f64 * ratio).ceil() as i64 - 1).max(0) as usize;
        let queued = queue.try_size().unwrap_or(0) / sc;
        let mut k = desired
            .min(self.chunk_remaining)
            .min(queued)
            .min(WORK_FRAMES);

        if k > 0 {
            let dst = &mut self.work[HISTORY_FRAMES * sc..(HISTORY_FRAMES + k) * sc];
            match queue.try_read(dst) {
                Ok(Some(n)) => k = n / sc,
                Ok(None) | Err(_) => return None,
            }
        }

        let last = (HISTORY_FRAMES - 1 + k) as f64;
        let n = if pos >= last {
            0
        } else {
            (((last - pos) / ratio).ceil() as usize).min(want)
        };

        if n > 0 {
            let source = &self.work[..(HISTORY_FRAMES + k) * sc];
            for ch in 0..sc {
                if muted[ch] || masks[ch] == 0 {
                    continue;
                }
                let mut stretcher = Stretcher::new(source, sc, ch, pos, n as f64 * ratio, n);
                for frame in out.chunks_exact_mut(device_channels).take(n) {
                    route_into(frame, masks[ch], stretcher.next_sample());
                }
            }
        }

        self.phase = pos + n as f64 * ratio - k as f64;
        self.work.copy_within(k * sc..(k + HISTORY_FRAMES) * sc, 0);
        self.chunk_remaining -= k;
        self.chunk_consumed += k;

        if n == 0 && k == 0 {
            None
        } else {
            Some(n)
        }
    }
}

/// Add `value` to every device channel set in `mask`
#[inline]
fn route_into(frame: &mut [Sample], mut mask: RouteMask, value: Sample) {
    while mask != 0 {
        let dst = mask.trailing_zeros() as usize;
        mask &= mask - 1;
        if let Some(slot) = frame.get_mut(dst) {
            clipped_add(slot, value);
        }
    }
}

impl ChannelShared {
    /// Mix queued audio onto `buffer` (`frames` frames of `device_channels`)
    pub(crate) fn mix(
        &self,
        buffer: &mut [Sample],
        device_channels: usize,
        frames: usize,
        device_rate: u32,
    ) {
        if device_channels == 0 || self.atomics.play_state() != PlayState::Playing {
            return;
        }
        let mut state = match self.reader.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };

        let speed = self.atomics.speed();
        let rate_ratio = self.sample_rate as f64 / device_rate.max(1) as f64;
        // Above the threshold the prebuffer thread already skipped ahead
        let ratio = if speed.abs() > FAST_SKIP_THRESHOLD {
            rate_ratio
        } else {
            rate_ratio * speed.abs()
        };

        let masks = state
            .route_masks
            .unwrap_or_else(|| default_masks(self.channels, device_channels));
        let mut muted = [false; MAX_CHANNELS];
        for (ch, m) in muted.iter_mut().enumerate().take(self.channels) {
            *m = self.atomics.is_muted(ch);
        }

        let frames = frames.min(buffer.len() / device_channels);
        let mut done = 0;
        while done < frames {
            let out = &mut buffer[done * device_channels..frames * device_channels];

            if state.gap_active {
                done += state.mix_gap(out, device_channels, frames - done, &masks, &muted);
                continue;
            }

            if state.chunk_remaining == 0 {
                // Read before checking the queue: the prebuffer thread clears
                // this only after its last chunk is queued
                let finished = !self.atomics.prebuffering.load(Ordering::Acquire);
                let mut record = [ChunkRecord::default()];
                match self.positions.try_read(&mut record) {
                    // Contended; try again next period
                    Ok(None) => break,
                    Ok(Some(1)) => {
                        let record = record[0];
                        state.begin_chunk(record);
                        self.atomics
                            .play_position
                            .store(record.position, Ordering::Relaxed);
                        if record.gap_before
                            && !state.gap.is_empty()
                            && state.gap.matches(self.channels, device_rate)
                        {
                            state.gap_active = true;
                            state.gap_frame = 0;
                        }
                        continue;
                    }
                    _ => {
                        if finished {
                            self.atomics.set_state(PlayState::Stopped);
                            state.reset();
                        }
                        break;
                    }
                }
            }

            match state.mix_block(
                &self.samples,
                out,
                device_channels,
                frames - done,
                ratio,
                &masks,
                &muted,
            ) {
                Some(n) => done += n,
                None => break,
            }
        }
    }
}

impl MixSource for ChannelShared {
    fn id(&self) -> usize {
        self.id
    }

    fn mix_onto_buffer(
        &self,
        buffer: &mut [Sample],
        device_channels: usize,
        frames: usize,
        device_rate: u32,
    ) {
        self.mix(buffer, device_channels, frames, device_rate);
    }

    fn stop(&self) {
        ChannelShared::stop(self);
    }

    fn note_panic(&self) -> bool {
        !self.panicked.swap(true, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with(frames: &[Sample]) -> BoundedQueue<Sample> {
        let q = BoundedQueue::new(frames.len() + 1).unwrap();
        q.write(frames).unwrap();
        q
    }

    fn mono_state() -> ConsumerState {
        let mut s = ConsumerState::new(1);
        s.begin_chunk(ChunkRecord {
            position: 100,
            gap_before: false,
            reverse: false,
        });
        s
    }

    #[test]
    fn test_unity_ratio_copies_in_order() {
        let data: Vec<Sample> = (1..=64).map(|i| i as Sample / 100.0).collect();
        let q = queue_with(&data);
        let mut state = mono_state();
        let masks = default_masks(1, 1);
        let muted = [false; MAX_CHANNELS];

        let mut out = vec![0.0; 16];
        assert_eq!(
            state.mix_block(&q, &mut out, 1, 16, 1.0, &masks, &muted),
            Some(16)
        );
        assert_eq!(out, data[..16].to_vec());

        // The next block continues seamlessly
        let mut out = vec![0.0; 16];
        state.mix_block(&q, &mut out, 1, 16, 1.0, &masks, &muted);
        assert_eq!(out, data[16..32].to_vec());
    }

    #[test]
    fn test_half_speed_interpolates() {
        let data: Vec<Sample> = (0..64).map(|i| i as Sample / 64.0).collect();
        let q = queue_with(&data);
        let mut state = mono_state();
        let masks = default_masks(1, 1);
        let muted = [false; MAX_CHANNELS];

        let mut out = vec![0.0; 8];
        state.mix_block(&q, &mut out, 1, 8, 0.5, &masks, &muted);
        for (i, v) in out.iter().enumerate() {
            assert!((v - i as Sample * 0.5 / 64.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_muted_channel_still_drains() {
        let data = vec![0.5; 32];
        let q = queue_with(&data);
        let mut state = mono_state();
        let masks = default_masks(1, 2);
        let mut muted = [false; MAX_CHANNELS];
        muted[0] = true;

        let mut out = vec![0.0; 16];
        state.mix_block(&q, &mut out, 2, 8, 1.0, &masks, &muted);
        assert!(out.iter().all(|&v| v == 0.0));
        assert_eq!(q.size(), 32 - 9);
    }

    #[test]
    fn test_underrun_returns_none() {
        let q = BoundedQueue::<Sample>::new(8).unwrap();
        let mut state = mono_state();
        let masks = default_masks(1, 1);
        let muted = [false; MAX_CHANNELS];
        let mut out = vec![0.0; 4];
        assert_eq!(state.mix_block(&q, &mut out, 1, 4, 1.0, &masks, &muted), None);
    }

    #[test]
    fn test_current_position_tracks_consumption() {
        let data = vec![0.1; 40];
        let q = queue_with(&data);
        let mut state = mono_state();
        assert_eq!(state.current_position(), Some(100));

        let masks = default_masks(1, 1);
        let muted = [false; MAX_CHANNELS];
        let mut out = vec![0.0; 10];
        state.mix_block(&q, &mut out, 1, 10, 1.0, &masks, &muted);
        assert_eq!(state.current_position(), Some(111));

        state.reset();
        assert_eq!(state.current_position(), None);
    }

    #[test]
    fn test_route_into_mask() {
        let mut frame = [0.0; 4];
        route_into(&mut frame, 0b1010, 0.25);
        assert_eq!(frame, [0.0, 0.25, 0.0, 0.25]);
        // Bits past the frame are ignored
        route_into(&mut frame, 0b1_0000, 0.25);
        assert_eq!(frame, [0.0, 0.25, 0.0, 0.25]);
    }

    #[test]
    fn test_gap_regenerated_only_on_change() {
        let mut state = ConsumerState::new(2);
        state.prepare_gap(0.01, 44100);
        assert_eq!(state.gap.frames(), 441);
        assert!(state.gap.matches(2, 44100));
        state.prepare_gap(0.01, 48000);
        assert_eq!(state.gap.frames(), 480);
    }
}
