//! Null backend - drives the hub without a device
//!
//! A worker thread wakes once per period and mixes into a buffer that is
//! thrown away, so playback positions, meters and analysis behave as if a
//! device were playing. After a stall the worker catches up on at most
//! `buffer_count` periods, like a device draining its buffers.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{RecvTimeoutError, Sender};

use super::backend::{release_hub, requested_format, AudioBackend};
use super::config::{AudioConfig, BackendKind};
use super::error::AudioResult;
use crate::engine::PlayerHub;
use crate::types::{OutputFormat, Sample};

/// Period deadlines for the worker thread
struct Pacer {
    period: Duration,
    /// How far behind schedule the worker may fall and still catch up
    max_lag: Duration,
    deadline: Instant,
}

impl Pacer {
    fn new(period: Duration, buffer_count: u32, now: Instant) -> Self {
        Self {
            period,
            max_lag: period * buffer_count,
            deadline: now + period,
        }
    }

    /// Deadline of the period after the one just mixed
    fn next(&mut self, now: Instant) -> Instant {
        self.deadline += self.period;
        if self.deadline + self.max_lag < now {
            self.deadline = now + self.period;
        }
        self.deadline
    }
}

pub struct NullBackend {
    hub: Arc<PlayerHub>,
    requested: OutputFormat,
    buffer_count: u32,
    format: Option<OutputFormat>,
    /// Dropping the sender stops the worker
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl NullBackend {
    pub fn new(config: &AudioConfig, hub: Arc<PlayerHub>) -> Self {
        Self {
            hub,
            requested: requested_format(config),
            buffer_count: config.buffer_count,
            format: None,
            stop_tx: None,
            thread: None,
        }
    }
}

impl AudioBackend for NullBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Null
    }

    fn initialize(&mut self) -> AudioResult<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let format = self.requested;
        self.hub.initialize(format)?;

        let (stop_tx, stop_rx) = crossbeam::channel::bounded::<()>(1);
        let hub = Arc::clone(&self.hub);
        let period = Duration::from_secs_f64(format.period_frames as f64 / format.sample_rate as f64);
        let buffer_count = self.buffer_count;

        let spawned = thread::Builder::new()
            .name("null-audio".to_string())
            .spawn(move || {
                let mut buffer: Vec<Sample> = vec![0.0; format.period_frames * format.channels];
                let mut pacer = Pacer::new(period, buffer_count, Instant::now());
                let mut deadline = pacer.deadline;
                loop {
                    match stop_rx.recv_deadline(deadline) {
                        Err(RecvTimeoutError::Timeout) => {
                            hub.mix_sound_player_channels(format.channels, &mut buffer, format.period_frames);
                            deadline = pacer.next(Instant::now());
                        }
                        _ => break,
                    }
                }
                log::debug!("Null audio thread exiting");
            });

        match spawned {
            Ok(handle) => {
                self.stop_tx = Some(stop_tx);
                self.thread = Some(handle);
                self.format = Some(format);
                log::info!(
                    "Null audio backend running: {} channels, {}Hz, {} frames ({:.1}ms)",
                    format.channels,
                    format.sample_rate,
                    format.period_frames,
                    format.latency_ms()
                );
                Ok(())
            }
            Err(e) => {
                release_hub(&self.hub);
                Err(e.into())
            }
        }
    }

    fn deinitialize(&mut self) {
        self.stop_tx = None;
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("Null audio thread panicked");
            }
        }
        if self.format.take().is_some() {
            release_hub(&self.hub);
        }
    }

    fn is_initialized(&self) -> bool {
        self.format.is_some()
    }

    fn format(&self) -> Option<OutputFormat> {
        self.format
    }

    fn hub(&self) -> &Arc<PlayerHub> {
        &self.hub
    }
}

impl Drop for NullBackend {
    fn drop(&mut self) {
        self.deinitialize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeterConfig;

    #[test]
    fn test_pacer_catches_up_within_buffer_count() {
        let period = Duration::from_millis(10);
        let start = Instant::now();

        let mut buffered = Pacer::new(period, 2, start);
        // 35 ms in: 20 ms deadline is late but within two periods of slack
        assert_eq!(buffered.next(start + Duration::from_millis(35)), start + 2 * period);
        assert_eq!(buffered.next(start + Duration::from_millis(35)), start + 3 * period);

        // A long stall drops the backlog
        let late = start + Duration::from_millis(200);
        assert_eq!(buffered.next(late), late + period);

        let mut unbuffered = Pacer::new(period, 0, start);
        let now = start + Duration::from_millis(35);
        assert_eq!(unbuffered.next(now), now + period);
    }

    #[test]
    fn test_initialize_twice_is_harmless() {
        let hub = PlayerHub::new(&MeterConfig::default());
        let mut backend = NullBackend::new(&AudioConfig::null(), Arc::clone(&hub));
        backend.initialize().unwrap();
        backend.initialize().unwrap();
        assert_eq!(backend.format(), hub.format());
        backend.deinitialize();
        backend.deinitialize();
        assert!(!hub.is_initialized());
    }

    #[test]
    fn test_hub_already_taken() {
        let hub = PlayerHub::new(&MeterConfig::default());
        hub.initialize(OutputFormat::new(48000, 2, 256)).unwrap();
        let mut backend = NullBackend::new(&AudioConfig::null(), Arc::clone(&hub));
        assert!(backend.initialize().is_err());
        backend.deinitialize();
        // The hub belongs to whoever initialized it
        assert!(hub.is_initialized());
    }
}
