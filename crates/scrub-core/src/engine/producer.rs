//! Prebuffer thread: copies the sound into a channel's queues ahead of the mixer
//!
//! The thread is driven by [`ProducerCommand`]s. While active it loops over
//! [`Producer::prebuffer_chunk`], blocking on the queue write whenever the
//! mixer hasn't caught up; while inactive it sleeps on the command channel.
//!
//! A flush from the control side is `Stop`, a clear of both queues (which
//! aborts a blocked write with [`QueueError::Cleared`]), then `Flush`. The
//! thread parks on `Stop`, so whatever it queued in between is discarded,
//! then restarts at the requested position and acknowledges once the
//! requested number of chunks is queued. A flush that primes nothing
//! leaves both queues empty and holds off refilling until the mixer next
//! asks for a chunk.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender, TryRecvError};

use super::channel::{ChannelShared, ChunkRecord};
use crate::config::TransportConfig;
use crate::queue::{QueueError, QueueResult};
use crate::types::{FramePosition, LoopType, PlayState, Sample, FAST_SKIP_THRESHOLD, FRAMES_PER_CHUNK};

/// Commands from the control side to a prebuffer thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ProducerCommand {
    /// Drop everything queued, restart at `position` and queue
    /// `prime_chunks` chunks before acknowledging
    Flush {
        position: FramePosition,
        prime_chunks: usize,
    },
    /// Drop everything queued and go idle
    Stop,
    /// Exit the thread
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkOutcome {
    Produced,
    /// End of the region reached with no loop; nothing more to produce
    Finished,
}

pub(crate) struct Producer {
    shared: Arc<ChannelShared>,
    commands: Receiver<ProducerCommand>,
    acks: Sender<()>,
    /// Next frame to read; signed so reverse playback can step below zero
    cursor: i64,
    active: bool,
    /// Flag the next chunk record so the mixer plays the gap signal first
    gap_pending: bool,
    /// Don't refill until the mixer reads from the position queue
    await_reader: bool,
    chunk: Vec<Sample>,
    skip_margin: i64,
}

impl Producer {
    pub(crate) fn new(
        shared: Arc<ChannelShared>,
        commands: Receiver<ProducerCommand>,
        acks: Sender<()>,
        config: &TransportConfig,
    ) -> Self {
        let chunk = vec![0.0; FRAMES_PER_CHUNK * shared.channels];
        let skip_margin = config.skip_margin_frames(shared.sample_rate) as i64;
        Self {
            shared,
            commands,
            acks,
            cursor: 0,
            active: false,
            gap_pending: false,
            await_reader: false,
            chunk,
            skip_margin,
        }
    }

    /// Thread body
    pub(crate) fn run(mut self) {
        let id = self.shared.id;
        log::debug!("Prebuffer thread {} started", id);

        loop {
            let command = if self.active {
                match self.commands.try_recv() {
                    Ok(command) => Some(command),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            } else {
                match self.commands.recv() {
                    Ok(command) => Some(command),
                    Err(_) => break,
                }
            };

            if let Some(command) = command {
                match command {
                    ProducerCommand::Flush {
                        position,
                        prime_chunks,
                    } => self.flush(position, prime_chunks),
                    ProducerCommand::Stop => {
                        self.active = false;
                        self.await_reader = false;
                        self.clear_queues();
                    }
                    ProducerCommand::Shutdown => break,
                }
                continue;
            }

            if self.shared.atomics.play_state() == PlayState::Stopped {
                self.active = false;
                continue;
            }

            let result = if self.await_reader {
                self.shared
                    .positions
                    .wait_for_reader()
                    .map(|_| self.await_reader = false)
            } else {
                self.prebuffer_chunk().map(|outcome| {
                    if outcome == ChunkOutcome::Finished {
                        self.active = false;
                    }
                })
            };

            match result {
                Ok(()) => {}
                // Whoever cleared the queue has a command waiting for us
                Err(QueueError::Cleared { .. }) => {}
                Err(e) if e.is_end_of_stream() => {
                    log::debug!("Prebuffer thread {}: queue closed", id);
                    break;
                }
                Err(e) => {
                    log::warn!("Prebuffer thread {}: {}", id, e);
                    break;
                }
            }
        }

        log::debug!("Prebuffer thread {} exiting", id);
    }

    fn clear_queues(&self) {
        self.shared.samples.clear();
        self.shared.positions.clear();
    }

    fn flush(&mut self, position: FramePosition, prime_chunks: usize) {
        self.clear_queues();
        self.cursor = position as i64;
        self.gap_pending = false;
        self.active = true;
        self.await_reader = prime_chunks == 0;

        let atomics = &self.shared.atomics;
        atomics.prebuffering.store(true, Ordering::Release);
        atomics.prebuffer_position.store(position, Ordering::Relaxed);

        for _ in 0..prime_chunks {
            match self.prebuffer_chunk() {
                Ok(ChunkOutcome::Produced) => {}
                Ok(ChunkOutcome::Finished) => {
                    self.active = false;
                    break;
                }
                Err(_) => break,
            }
        }

        // The controller may have given up waiting (it only does so when
        // dropping the channel)
        let _ = self.acks.send(());
    }

    fn finish(&mut self) -> QueueResult<ChunkOutcome> {
        self.shared
            .atomics
            .prebuffering
            .store(false, Ordering::Release);
        Ok(ChunkOutcome::Finished)
    }

    /// Copy one chunk from the store and queue it behind its position record
    fn prebuffer_chunk(&mut self) -> QueueResult<ChunkOutcome> {
        let shared = Arc::clone(&self.shared);
        let channels = shared.channels;
        let speed = shared.atomics.speed();
        let reverse = speed < 0.0;
        let transport = shared.transport();
        let loop_type = transport.loop_type;

        let reader = shared.store.read();
        let len = reader.len();
        if len == 0 {
            return self.finish();
        }

        let (lo, hi) = transport.region(len);
        let (lo, hi) = (lo as i64, hi as i64);
        let margin = self.skip_margin;
        let skipping = loop_type == LoopType::SkipMost && hi - lo > 2 * margin;
        let in_middle = |cursor: i64| skipping && cursor > lo + margin && cursor < hi - margin;
        let past_end = |cursor: i64| if reverse { cursor < lo } else { cursor > hi };
        let wrap_to = if reverse { hi } else { lo };
        let skip_to = if reverse { lo + margin } else { hi - margin };

        // Bring the cursor back into the region before recording its position
        if past_end(self.cursor) {
            match loop_type {
                LoopType::None => {
                    drop(reader);
                    return self.finish();
                }
                LoopType::GapBeforeRepeat => {
                    self.gap_pending = true;
                    self.cursor = wrap_to;
                }
                LoopType::Normal | LoopType::SkipMost => self.cursor = wrap_to,
            }
        }
        if in_middle(self.cursor) {
            self.cursor = skip_to;
            self.gap_pending = true;
        }

        let record = ChunkRecord {
            position: self.cursor as FramePosition,
            gap_before: std::mem::take(&mut self.gap_pending),
            reverse,
        };

        let step = if reverse { -1 } else { 1 };
        let mut filled = 0;
        let mut finished = false;
        while filled < FRAMES_PER_CHUNK {
            if past_end(self.cursor) {
                match loop_type {
                    LoopType::None => {
                        finished = true;
                        break;
                    }
                    // Rest of the chunk stays silent, the gap plays next
                    LoopType::GapBeforeRepeat => {
                        self.cursor = wrap_to;
                        self.gap_pending = true;
                        break;
                    }
                    LoopType::Normal | LoopType::SkipMost => self.cursor = wrap_to,
                }
            }
            if in_middle(self.cursor) {
                self.cursor = skip_to;
                self.gap_pending = true;
                break;
            }

            let frame = &mut self.chunk[filled * channels..(filled + 1) * channels];
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = reader.sample(ch, self.cursor as FramePosition);
            }
            self.cursor += step;
            filled += 1;
        }
        drop(reader);
        self.chunk[filled * channels..].fill(0.0);

        // At high speeds skip ahead here instead of making the mixer
        // decimate through every frame
        if speed.abs() > FAST_SKIP_THRESHOLD && !finished {
            let jump = (speed.abs().floor() as i64) * FRAMES_PER_CHUNK as i64;
            self.cursor += step * jump;
        }

        shared.positions.write(&[record])?;
        shared.samples.write(&self.chunk)?;
        shared
            .atomics
            .prebuffer_position
            .store(self.cursor.clamp(0, len as i64) as FramePosition, Ordering::Relaxed);

        if finished {
            return self.finish();
        }
        Ok(ChunkOutcome::Produced)
    }
}
