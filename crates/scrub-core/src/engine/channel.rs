//! Playback channel - transport control for one open sound
//!
//! [`PlaybackChannel`] is the owning handle used by the control side. The
//! state the audio thread and the prebuffer thread also need lives in
//! [`ChannelShared`], which the hub keeps in its registry.
//!
//! # Lock order
//!
//! `reader` (consumer state) before `transport`. The audio thread only
//! ever `try_lock`s `reader`, and the prebuffer thread never takes it.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender};

use super::consumer::ConsumerState;
use super::error::{EngineError, EngineResult};
use super::hub::{MixSource, PlayerHub};
use super::producer::{Producer, ProducerCommand};
use super::route::OutputRoute;
use crate::config::TransportConfig;
use crate::queue::BoundedQueue;
use crate::store::SampleStore;
use crate::types::{
    FramePosition, LoopType, PlayState, Sample, FAST_SKIP_THRESHOLD, FRAMES_PER_CHUNK,
    MAX_CHANNELS, MAX_SEEK_SPEED, MIN_SEEK_SPEED,
};

/// Chunks queued synchronously by `play` and `set_position` before they return
const PRIME_CHUNKS: usize = 2;

/// Position metadata queued ahead of every chunk of samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ChunkRecord {
    /// Store frame of the chunk's first sample
    pub position: FramePosition,
    /// Play the gap signal before this chunk
    pub gap_before: bool,
    /// Chunk frames run backwards through the store
    pub reverse: bool,
}

/// Lock-free channel state shared with the audio and prebuffer threads
pub(crate) struct ChannelAtomics {
    /// Coarse play position, updated once per consumed chunk
    pub play_position: AtomicU64,
    /// Where the prebuffer thread will read next
    pub prebuffer_position: AtomicU64,
    /// 0=Stopped, 1=Playing, 2=Paused
    pub state: AtomicU8,
    /// More chunks are coming; cleared by the prebuffer thread at the end
    /// of a non-looping region
    pub prebuffering: AtomicBool,
    /// Seek speed as `f64` bits
    speed_bits: AtomicU64,
    pub muted: [AtomicBool; MAX_CHANNELS],
}

impl ChannelAtomics {
    fn new() -> Self {
        Self {
            play_position: AtomicU64::new(0),
            prebuffer_position: AtomicU64::new(0),
            state: AtomicU8::new(PlayState::Stopped.to_u8()),
            prebuffering: AtomicBool::new(false),
            speed_bits: AtomicU64::new(1.0f64.to_bits()),
            muted: std::array::from_fn(|_| AtomicBool::new(false)),
        }
    }

    #[inline]
    pub fn play_state(&self) -> PlayState {
        PlayState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_state(&self, state: PlayState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    #[inline]
    pub fn speed(&self) -> f64 {
        f64::from_bits(self.speed_bits.load(Ordering::Relaxed))
    }

    fn swap_speed(&self, speed: f64) -> f64 {
        f64::from_bits(self.speed_bits.swap(speed.to_bits(), Ordering::Relaxed))
    }

    #[inline]
    pub fn is_muted(&self, channel: usize) -> bool {
        self.muted
            .get(channel)
            .is_some_and(|m| m.load(Ordering::Relaxed))
    }
}

/// Selection and loop policy, read by the prebuffer thread once per chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transport {
    pub start: FramePosition,
    pub stop: FramePosition,
    pub loop_type: LoopType,
    pub selection_only: bool,
}

impl Transport {
    /// Inclusive frame range playback is confined to in a sound of `len`
    pub fn region(&self, len: FramePosition) -> (FramePosition, FramePosition) {
        let last = len.saturating_sub(1);
        if self.selection_only || self.loop_type.is_looping() {
            (self.start.min(last), self.stop.min(last))
        } else {
            (0, last)
        }
    }
}

/// Channel state reachable from the hub and the prebuffer thread
pub(crate) struct ChannelShared {
    pub id: usize,
    pub store: Arc<dyn SampleStore>,
    /// Channel count of the sound
    pub channels: usize,
    /// Sample rate of the sound
    pub sample_rate: u32,
    /// Interleaved sample frames
    pub samples: BoundedQueue<Sample>,
    /// One record per chunk in `samples`
    pub positions: BoundedQueue<ChunkRecord>,
    pub atomics: ChannelAtomics,
    pub transport: Mutex<Transport>,
    /// Mixer state; held by the audio thread while mixing and by control
    /// operations while they flush
    pub reader: Mutex<ConsumerState>,
    pub commands: Sender<ProducerCommand>,
    /// A mix of this channel panicked (logged once)
    pub panicked: AtomicBool,
}

impl ChannelShared {
    pub fn lock_reader(&self) -> MutexGuard<'_, ConsumerState> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_transport(&self) -> MutexGuard<'_, Transport> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn transport(&self) -> Transport {
        *self.lock_transport()
    }

    /// Stop playback and drop all queued audio without waiting for the
    /// prebuffer thread
    pub fn stop(&self) {
        let mut state = self.lock_reader();
        self.atomics.set_state(PlayState::Stopped);
        self.atomics.prebuffering.store(false, Ordering::Release);
        let _ = self.commands.send(ProducerCommand::Stop);
        self.samples.clear();
        self.positions.clear();
        state.reset();
    }

    /// Oldest position whose audio is still queued or playing
    fn estimate_position(&self, state: &ConsumerState) -> FramePosition {
        let len = self.store.len();
        let position = state.current_position().unwrap_or_else(|| {
            let mut head = [ChunkRecord::default()];
            match self.positions.peek(&mut head, false) {
                Ok(1) => head[0].position,
                _ => self.atomics.play_position.load(Ordering::Relaxed),
            }
        });
        position.min(len)
    }
}

/// Transport for one open sound
///
/// Creating a channel registers it with the hub and starts its prebuffer
/// thread; dropping it unregisters it and joins the thread.
pub struct PlaybackChannel {
    shared: Arc<ChannelShared>,
    hub: Arc<PlayerHub>,
    acks: Receiver<()>,
    route: Mutex<Option<OutputRoute>>,
    config: TransportConfig,
    thread: Option<JoinHandle<()>>,
}

impl PlaybackChannel {
    pub fn new(
        hub: &Arc<PlayerHub>,
        store: Arc<dyn SampleStore>,
        config: &TransportConfig,
    ) -> EngineResult<Self> {
        let channels = store.channel_count();
        let sample_rate = store.sample_rate();
        if channels == 0 || channels > MAX_CHANNELS || sample_rate == 0 {
            return Err(EngineError::UnsupportedSound {
                channels,
                sample_rate,
            });
        }

        let chunks = config.queue_chunks();
        let samples = BoundedQueue::new(FRAMES_PER_CHUNK * channels * chunks + 1)?;
        let positions = BoundedQueue::new(chunks + 1)?;

        let (command_tx, command_rx) = crossbeam::channel::unbounded();
        let (ack_tx, ack_rx) = crossbeam::channel::bounded(1);

        let mut consumer = ConsumerState::new(channels);
        if let Some(format) = hub.format() {
            consumer.prepare_gap(config.loop_gap_seconds, format.sample_rate);
        }

        let len = store.len();
        let id = hub.next_channel_id();
        let shared = Arc::new(ChannelShared {
            id,
            store,
            channels,
            sample_rate,
            samples,
            positions,
            atomics: ChannelAtomics::new(),
            transport: Mutex::new(Transport {
                start: 0,
                stop: len.saturating_sub(1),
                loop_type: LoopType::None,
                selection_only: false,
            }),
            reader: Mutex::new(consumer),
            commands: command_tx,
            panicked: AtomicBool::new(false),
        });

        let producer = Producer::new(Arc::clone(&shared), command_rx, ack_tx, config);
        let handle = thread::Builder::new()
            .name(format!("prebuffer-{}", id))
            .spawn(move || producer.run())?;

        let source: Arc<dyn MixSource> = shared.clone();
        hub.register(source);
        log::info!(
            "Playback channel {} opened: {} channels, {} Hz, {} frames, {:.0} ms prebuffer",
            id,
            channels,
            sample_rate,
            len,
            config.prebuffer_seconds(sample_rate) * 1000.0
        );

        Ok(Self {
            shared,
            hub: Arc::clone(hub),
            acks: ack_rx,
            route: Mutex::new(None),
            config: config.clone(),
            thread: Some(handle),
        })
    }

    pub fn id(&self) -> usize {
        self.shared.id
    }

    pub fn channel_count(&self) -> usize {
        self.shared.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }

    pub fn store(&self) -> &Arc<dyn SampleStore> {
        &self.shared.store
    }

    fn check_position(&self, position: FramePosition) -> EngineResult<FramePosition> {
        let len = self.shared.store.len();
        if position > len {
            return Err(EngineError::PositionOutOfRange { position, len });
        }
        Ok(position)
    }

    /// Restart the prebuffer thread at `position`, with the mixer locked out
    fn flush_locked(
        &self,
        state: &mut ConsumerState,
        position: FramePosition,
        prime_chunks: usize,
    ) -> EngineResult<()> {
        self.shared.atomics.prebuffering.store(true, Ordering::Release);
        // Park the prebuffer thread first; the clear releases it if it is
        // blocked on a full queue, and nothing it primes after the restart
        // can be wiped by our clear
        let parked = self.shared.commands.send(ProducerCommand::Stop);
        self.shared.samples.clear();
        self.shared.positions.clear();
        let sent = parked.and_then(|_| {
            self.shared.commands.send(ProducerCommand::Flush {
                position,
                prime_chunks,
            })
        });
        let acked = sent.is_ok() && self.acks.recv().is_ok();

        state.reset();
        self.shared
            .atomics
            .play_position
            .store(position, Ordering::Relaxed);

        if !acked {
            self.shared.samples.clear();
            self.shared.positions.clear();
            self.shared.atomics.set_state(PlayState::Stopped);
            self.shared
                .atomics
                .prebuffering
                .store(false, Ordering::Release);
            log::error!("Playback channel {}: prebuffer thread is gone", self.id());
            return Err(EngineError::ProducerGone);
        }
        Ok(())
    }

    /// Flush everything queued and resume from the oldest position whose
    /// audio hadn't been heard yet
    fn unprebuffer(&self) -> EngineResult<()> {
        let mut state = self.shared.lock_reader();
        let position = self.shared.estimate_position(&state);
        log::debug!("Playback channel {}: flushing at {}", self.id(), position);
        self.flush_locked(&mut state, position, 0)
    }

    /// Start playing from `position`
    ///
    /// Both queues are cleared and primed with up to two chunks before this
    /// returns. With `selection_only` (or any looping `loop_type`) playback
    /// is confined to the selection.
    pub fn play(
        &self,
        position: FramePosition,
        loop_type: LoopType,
        selection_only: bool,
    ) -> EngineResult<()> {
        self.check_position(position)?;
        {
            let mut transport = self.shared.lock_transport();
            transport.loop_type = loop_type;
            transport.selection_only = selection_only;
        }

        let mut state = self.shared.lock_reader();
        if let Some(format) = self.hub.format() {
            state.prepare_gap(self.config.loop_gap_seconds, format.sample_rate);
        }
        self.shared.atomics.set_state(PlayState::Playing);
        self.flush_locked(&mut state, position, PRIME_CHUNKS)?;

        log::debug!(
            "Playback channel {}: play from {} ({:?}, selection only: {})",
            self.id(),
            position,
            loop_type,
            selection_only
        );
        Ok(())
    }

    /// Toggle between playing and paused; no effect when stopped
    pub fn pause(&self) {
        let atomics = &self.shared.atomics;
        let current = atomics.play_state();
        let toggled = match current {
            PlayState::Playing => PlayState::Paused,
            PlayState::Paused => PlayState::Playing,
            PlayState::Stopped => return,
        };
        // Loses to a concurrent stop or end-of-sound
        let _ = atomics.state.compare_exchange(
            current.to_u8(),
            toggled.to_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Stop and drop all queued audio
    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn play_state(&self) -> PlayState {
        self.shared.atomics.play_state()
    }

    /// Playing or paused
    pub fn is_playing(&self) -> bool {
        self.play_state() != PlayState::Stopped
    }

    pub fn is_paused(&self) -> bool {
        self.play_state() == PlayState::Paused
    }

    /// More audio is still being produced (false once a non-looping play
    /// has queued its last chunk)
    pub fn is_prebuffering(&self) -> bool {
        self.shared.atomics.prebuffering.load(Ordering::Acquire)
    }

    /// Chunk-accurate play position
    pub fn position(&self) -> FramePosition {
        self.shared.atomics.play_position.load(Ordering::Relaxed)
    }

    /// Where the prebuffer thread will read next
    pub fn prebuffer_position(&self) -> FramePosition {
        self.shared.atomics.prebuffer_position.load(Ordering::Relaxed)
    }

    /// Move the play position; flushes queued audio while playing
    pub fn set_position(&self, position: FramePosition) -> EngineResult<()> {
        self.check_position(position)?;
        if self.is_playing() {
            let mut state = self.shared.lock_reader();
            self.flush_locked(&mut state, position, PRIME_CHUNKS)
        } else {
            self.shared
                .atomics
                .play_position
                .store(position, Ordering::Relaxed);
            Ok(())
        }
    }

    pub fn start_position(&self) -> FramePosition {
        self.shared.transport().start
    }

    pub fn stop_position(&self) -> FramePosition {
        self.shared.transport().stop
    }

    pub fn selection(&self) -> (FramePosition, FramePosition) {
        let t = self.shared.transport();
        (t.start, t.stop)
    }

    pub fn loop_type(&self) -> LoopType {
        self.shared.transport().loop_type
    }

    pub fn is_selection_only(&self) -> bool {
        self.shared.transport().selection_only
    }

    /// Move the selection start; drags the stop along if it would cross it
    pub fn set_start_position(&self, position: FramePosition) -> EngineResult<()> {
        self.check_position(position)?;
        let (old, new) = {
            let mut t = self.shared.lock_transport();
            let old = *t;
            t.start = position;
            t.stop = t.stop.max(position);
            (old, *t)
        };
        self.selection_changed(old, new)
    }

    /// Move the selection stop; drags the start along if it would cross it
    pub fn set_stop_position(&self, position: FramePosition) -> EngineResult<()> {
        self.check_position(position)?;
        let (old, new) = {
            let mut t = self.shared.lock_transport();
            let old = *t;
            t.stop = position;
            t.start = t.start.min(position);
            (old, *t)
        };
        self.selection_changed(old, new)
    }

    /// Set both selection edges (given in either order)
    pub fn set_selection(&self, start: FramePosition, stop: FramePosition) -> EngineResult<()> {
        self.check_position(start)?;
        self.check_position(stop)?;
        let (old, new) = {
            let mut t = self.shared.lock_transport();
            let old = *t;
            t.start = start.min(stop);
            t.stop = start.max(stop);
            (old, *t)
        };
        self.selection_changed(old, new)
    }

    /// Flush if a moved edge lands inside the audio already queued
    fn selection_changed(&self, old: Transport, new: Transport) -> EngineResult<()> {
        if !self.is_playing() || !(new.selection_only || new.loop_type.is_looping()) {
            return Ok(());
        }

        let play = self.position();
        let prebuffered = self.prebuffer_position();
        let (lo, hi) = if self.seek_speed() < 0.0 {
            (prebuffered, play)
        } else {
            (play, prebuffered)
        };

        // The queued window wrapped around the loop; can't tell cheaply
        let wrapped = lo > hi;
        let moved = [
            (old.start != new.start).then_some(new.start),
            (old.stop != new.stop).then_some(new.stop),
        ];
        let intersects = moved
            .iter()
            .flatten()
            .any(|&edge| edge >= lo && edge <= hi);

        if wrapped || intersects {
            self.unprebuffer()
        } else {
            Ok(())
        }
    }

    pub fn seek_speed(&self) -> f64 {
        self.shared.atomics.speed()
    }

    /// Set the signed seek speed
    ///
    /// The magnitude is clamped to `MIN_SEEK_SPEED..=MAX_SEEK_SPEED`; zero
    /// keeps the current direction at the minimum speed. Reversing
    /// direction or crossing the fast-skip threshold flushes queued audio.
    pub fn set_seek_speed(&self, speed: f64) -> EngineResult<()> {
        if speed.is_nan() {
            return Err(EngineError::InvalidSpeed(speed));
        }
        let current = self.seek_speed();
        let sign = if speed == 0.0 {
            current.signum()
        } else {
            speed.signum()
        };
        let speed = sign * speed.abs().clamp(MIN_SEEK_SPEED, MAX_SEEK_SPEED);

        let old = self.shared.atomics.swap_speed(speed);
        let flips = (old < 0.0) != (speed < 0.0);
        let crosses = (old.abs() > FAST_SKIP_THRESHOLD) != (speed.abs() > FAST_SKIP_THRESHOLD);

        if self.is_playing() && (flips || crosses) {
            self.unprebuffer()?;
        }
        Ok(())
    }

    /// Drop queued audio after the sound was edited underneath it
    pub fn invalidate_prebuffered(&self) -> EngineResult<()> {
        if self.is_playing() {
            self.unprebuffer()
        } else {
            Ok(())
        }
    }

    fn check_channel(&self, channel: usize) -> EngineResult<()> {
        if channel >= self.shared.channels {
            return Err(EngineError::InvalidChannel {
                channel,
                count: self.shared.channels,
            });
        }
        Ok(())
    }

    /// Silence one sound channel; its audio keeps draining at the normal rate
    pub fn set_mute(&self, channel: usize, muted: bool) -> EngineResult<()> {
        self.check_channel(channel)?;
        self.shared.atomics.muted[channel].store(muted, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_muted(&self, channel: usize) -> EngineResult<bool> {
        self.check_channel(channel)?;
        Ok(self.shared.atomics.is_muted(channel))
    }

    /// Current routing (the default one unless set explicitly)
    pub fn output_route(&self) -> OutputRoute {
        let route = self.route.lock().unwrap_or_else(PoisonError::into_inner);
        route.clone().unwrap_or_else(|| {
            let device_channels = self.hub.format().map_or(2, |f| f.channels);
            OutputRoute::default_for(self.shared.channels, &[device_channels])
        })
    }

    /// Replace the routing; the mixer uses the first device table
    pub fn set_output_route(&self, route: OutputRoute) -> EngineResult<()> {
        let masks = route.primary().map(|m| m.masks()).unwrap_or_default();
        let mut state = self.shared.lock_reader();
        state.set_route_masks(Some(masks));
        *self.route.lock().unwrap_or_else(PoisonError::into_inner) = Some(route);
        Ok(())
    }

    /// Go back to default routing
    pub fn reset_output_route(&self) {
        let mut state = self.shared.lock_reader();
        state.set_route_masks(None);
        *self.route.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Jump to the first cue after the play position
    pub fn seek_to_next_cue(&self) -> EngineResult<Option<FramePosition>> {
        match self.shared.store.next_cue_after(self.position()) {
            Some(cue) => self.set_position(cue).map(|_| Some(cue)),
            None => Ok(None),
        }
    }

    /// Jump to the last cue before the play position
    pub fn seek_to_previous_cue(&self) -> EngineResult<Option<FramePosition>> {
        match self.shared.store.previous_cue_before(self.position()) {
            Some(cue) => self.set_position(cue).map(|_| Some(cue)),
            None => Ok(None),
        }
    }

    /// Frames waiting in the sample queue (a snapshot)
    pub fn queued_frames(&self) -> usize {
        self.shared.samples.size() / self.shared.channels
    }

    /// Chunk records waiting in the position queue (a snapshot)
    pub fn queued_chunks(&self) -> usize {
        self.shared.positions.size()
    }
}

impl Drop for PlaybackChannel {
    fn drop(&mut self) {
        let id = self.shared.id;
        self.hub.unregister(id);

        let _ = self.shared.commands.send(ProducerCommand::Shutdown);
        // Releases a prebuffer thread blocked on a full queue
        self.shared.samples.close_read();
        self.shared.positions.close_read();

        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("Prebuffer thread {} panicked", id);
            }
        }
        log::info!("Playback channel {} closed", id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use crate::config::MeterConfig;
    use crate::store::MemoryStore;
    use crate::types::OutputFormat;

    const PERIOD: usize = 256;

    fn mono_channel(frames: usize) -> (Arc<PlayerHub>, PlaybackChannel) {
        let hub = PlayerHub::new(&MeterConfig::default());
        hub.initialize(OutputFormat::new(44100, 1, PERIOD)).unwrap();
        let store: Arc<dyn SampleStore> =
            Arc::new(MemoryStore::from_channels(vec![vec![0.1; frames]], 44100).unwrap());
        let channel = PlaybackChannel::new(&hub, store, &TransportConfig::default()).unwrap();
        (hub, channel)
    }

    fn queued_records(channel: &PlaybackChannel) -> Vec<ChunkRecord> {
        let mut records = vec![ChunkRecord::default(); channel.queued_chunks()];
        let n = channel.shared.positions.peek(&mut records, false).unwrap();
        records.truncate(n);
        records
    }

    #[test]
    fn test_direction_flip_empties_queues_and_refills_reversed() {
        let (hub, channel) = mono_channel(200_000);
        channel.play(100_000, LoopType::None, false).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while channel.queued_chunks() < TransportConfig::default().queue_chunks() {
            assert!(Instant::now() < deadline, "queue never filled");
            thread::sleep(Duration::from_millis(1));
        }
        assert!(queued_records(&channel).iter().all(|r| !r.reverse));

        channel.set_seek_speed(-1.0).unwrap();
        assert_eq!(channel.queued_chunks(), 0);
        assert_eq!(channel.queued_frames(), 0);

        // Nothing is refilled until the mixer asks for audio
        thread::sleep(Duration::from_millis(20));
        assert_eq!(channel.queued_chunks(), 0);
        assert!(channel.is_prebuffering());

        let mut buffer = vec![0.0; PERIOD];
        while channel.queued_chunks() < 2 {
            assert!(Instant::now() < deadline, "queue never refilled");
            hub.mix_sound_player_channels(1, &mut buffer, PERIOD);
            thread::sleep(Duration::from_millis(1));
        }

        let records = queued_records(&channel);
        assert!(records.iter().all(|r| r.reverse));
        assert!(records[0].position <= 100_000);
        assert!(records.windows(2).all(|w| w[1].position < w[0].position));
    }

    #[test]
    fn test_selection_edit_outside_queued_window_keeps_queue() {
        let (_hub, channel) = mono_channel(200_000);
        channel.set_selection(0, 150_000).unwrap();
        channel.play(10_000, LoopType::Normal, true).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while channel.queued_chunks() < TransportConfig::default().queue_chunks() {
            assert!(Instant::now() < deadline, "queue never filled");
            thread::sleep(Duration::from_millis(1));
        }
        let before = queued_records(&channel);

        // Far past everything queued
        channel.set_stop_position(120_000).unwrap();
        assert_eq!(queued_records(&channel), before);

        // Inside the queued window
        channel.set_start_position(10_500).unwrap();
        assert_eq!(channel.queued_chunks(), 0);
    }
}
