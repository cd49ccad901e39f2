//! Player hub - channel registry and the per-period mixing entry point
//!
//! Device adapters call [`PlayerHub::mix_sound_player_channels`] once per
//! period from their audio callback. Every registered channel is mixed on
//! top of a zeroed buffer, then the result feeds the level meters and the
//! frequency analyzer's ring.
//!
//! # Real-time safety
//!
//! The mixing call only `try_lock`s: a registry being changed, meters
//! being read or an analyzer being replaced costs that period its channels
//! or its metering, never a blocked callback. Each channel's mix runs
//! inside `catch_unwind` so one bad channel can't take the stream down.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use super::analyzer::{analysis_channel, push_mono, FrequencyAnalyzer};
use super::error::{EngineError, EngineResult};
use super::meter::LevelMeters;
use crate::config::MeterConfig;
use crate::types::{OutputFormat, Sample, MAX_CHANNELS};

/// Something the hub can mix into a device buffer
pub(crate) trait MixSource: Send + Sync {
    fn id(&self) -> usize;

    /// Add this source's audio onto `buffer` (`frames` interleaved frames
    /// of `channels` at `sample_rate`)
    fn mix_onto_buffer(&self, buffer: &mut [Sample], channels: usize, frames: usize, sample_rate: u32);

    fn stop(&self);

    /// Record that a mix panicked; true the first time
    fn note_panic(&self) -> bool;
}

/// Registry of playback channels and owner of the output meters
pub struct PlayerHub {
    config: MeterConfig,
    channels: Mutex<Vec<Arc<dyn MixSource>>>,
    next_id: AtomicUsize,
    initialized: AtomicBool,
    format: Mutex<Option<OutputFormat>>,
    /// Copy of the format's rate for the audio thread
    sample_rate: AtomicU32,
    meters: Mutex<LevelMeters>,
    analysis_tx: Mutex<Option<rtrb::Producer<Sample>>>,
    analyzer: Mutex<Option<FrequencyAnalyzer>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `try_lock` that treats poison as success
fn try_lock<T>(mutex: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    match mutex.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

impl PlayerHub {
    pub fn new(config: &MeterConfig) -> Arc<Self> {
        Arc::new(Self {
            config: config.clone(),
            channels: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            initialized: AtomicBool::new(false),
            format: Mutex::new(None),
            sample_rate: AtomicU32::new(0),
            meters: Mutex::new(LevelMeters::new()),
            analysis_tx: Mutex::new(None),
            analyzer: Mutex::new(None),
        })
    }

    /// Prepare meters and the analyzer for a device format
    ///
    /// Called by a device adapter before its stream starts.
    pub fn initialize(&self, format: OutputFormat) -> EngineResult<()> {
        if self.is_initialized() {
            return Err(EngineError::AlreadyInitialized);
        }
        if format.channels == 0 || format.channels > MAX_CHANNELS {
            return Err(EngineError::InvalidFormat(format!(
                "{} channels (supported: 1..={})",
                format.channels, MAX_CHANNELS
            )));
        }
        if format.sample_rate == 0 {
            return Err(EngineError::InvalidFormat("sample rate 0".into()));
        }

        {
            let mut meters = lock(&self.meters);
            if self.config.level_metering {
                meters.configure(&self.config, format.channels, format.sample_rate);
            } else {
                *meters = LevelMeters::new();
            }
        }

        if self.config.frequency_analysis {
            let (tx, rx) = analysis_channel();
            *lock(&self.analyzer) = Some(FrequencyAnalyzer::new(
                rx,
                format.sample_rate,
                self.config.analyzer_bands,
            ));
            *lock(&self.analysis_tx) = Some(tx);
        }

        *lock(&self.format) = Some(format);
        self.sample_rate.store(format.sample_rate, Ordering::Relaxed);
        self.initialized.store(true, Ordering::Release);

        log::info!(
            "Player hub initialized: {} channels, {} Hz, {} frames/period ({:.1} ms)",
            format.channels,
            format.sample_rate,
            format.period_frames,
            format.latency_ms()
        );
        Ok(())
    }

    /// Stop every channel and forget the device format
    pub fn deinitialize(&self) -> EngineResult<()> {
        if !self.initialized.swap(false, Ordering::AcqRel) {
            return Err(EngineError::NotInitialized);
        }
        self.stop_all();

        *lock(&self.analysis_tx) = None;
        *lock(&self.analyzer) = None;
        lock(&self.meters).clear();
        *lock(&self.format) = None;
        self.sample_rate.store(0, Ordering::Relaxed);

        log::info!("Player hub deinitialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn format(&self) -> Option<OutputFormat> {
        *lock(&self.format)
    }

    pub fn meter_config(&self) -> &MeterConfig {
        &self.config
    }

    pub(crate) fn next_channel_id(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register(&self, source: Arc<dyn MixSource>) {
        let mut channels = lock(&self.channels);
        log::debug!("Registering channel {} with hub", source.id());
        channels.push(source);
    }

    pub(crate) fn unregister(&self, id: usize) {
        let mut channels = lock(&self.channels);
        let before = channels.len();
        channels.retain(|c| c.id() != id);
        if channels.len() == before {
            log::warn!("Channel {} was not registered with the hub", id);
        }
    }

    /// Number of registered channels
    pub fn channel_count(&self) -> usize {
        lock(&self.channels).len()
    }

    /// Stop every registered channel
    pub fn stop_all(&self) {
        // Stopping takes each channel's reader lock; don't hold ours meanwhile
        let channels: Vec<_> = lock(&self.channels).clone();
        for channel in channels {
            channel.stop();
        }
    }

    /// Mix every registered channel into `buffer`
    ///
    /// `buffer` holds `frames` interleaved frames of `n_channels` and is
    /// overwritten. Called from the audio thread.
    pub fn mix_sound_player_channels(&self, n_channels: usize, buffer: &mut [Sample], frames: usize) {
        let frames = if n_channels == 0 {
            0
        } else {
            frames.min(buffer.len() / n_channels)
        };
        buffer.fill(0.0);
        if frames == 0 || !self.is_initialized() {
            return;
        }
        let sample_rate = self.sample_rate.load(Ordering::Relaxed);
        let out = &mut buffer[..frames * n_channels];

        if let Some(channels) = try_lock(&self.channels) {
            for channel in channels.iter() {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    channel.mix_onto_buffer(out, n_channels, frames, sample_rate)
                }));
                if result.is_err() && channel.note_panic() {
                    log::error!("Channel {} panicked while mixing", channel.id());
                }
            }
        }

        if self.config.level_metering {
            if let Some(mut meters) = try_lock(&self.meters) {
                meters.process(out, n_channels, frames);
            }
        }
        if let Some(mut tx) = try_lock(&self.analysis_tx) {
            if let Some(tx) = tx.as_mut() {
                push_mono(tx, out, n_channels, frames);
            }
        }
    }

    /// Peak of output channel `channel` since the last call
    pub fn peak_level(&self, channel: usize) -> f32 {
        lock(&self.meters).take_peak(channel)
    }

    /// Largest windowed RMS of output channel `channel` since the last call
    pub fn rms_level(&self, channel: usize) -> f32 {
        lock(&self.meters).take_rms(channel)
    }

    /// Current band levels; empty when analysis is off or the hub isn't
    /// initialized
    pub fn frequency_analysis(&self) -> Vec<f32> {
        lock(&self.analyzer)
            .as_mut()
            .map(FrequencyAnalyzer::analyze)
            .unwrap_or_default()
    }

    /// Centre frequency of each analyzer band in Hz
    pub fn band_frequencies(&self) -> Vec<f32> {
        lock(&self.analyzer)
            .as_ref()
            .map(|a| a.band_frequencies().to_vec())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Adds a constant to every sample
    struct ConstantSource {
        id: usize,
        value: Sample,
        stops: AtomicUsize,
    }

    impl MixSource for ConstantSource {
        fn id(&self) -> usize {
            self.id
        }
        fn mix_onto_buffer(&self, buffer: &mut [Sample], _: usize, _: usize, _: u32) {
            buffer.iter_mut().for_each(|s| *s += self.value);
        }
        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::Relaxed);
        }
        fn note_panic(&self) -> bool {
            false
        }
    }

    struct PanickingSource {
        panics: AtomicUsize,
    }

    impl MixSource for PanickingSource {
        fn id(&self) -> usize {
            99
        }
        fn mix_onto_buffer(&self, _: &mut [Sample], _: usize, _: usize, _: u32) {
            panic!("mix failure");
        }
        fn stop(&self) {}
        fn note_panic(&self) -> bool {
            self.panics.fetch_add(1, Ordering::Relaxed) == 0
        }
    }

    fn constant(id: usize, value: Sample) -> Arc<ConstantSource> {
        Arc::new(ConstantSource {
            id,
            value,
            stops: AtomicUsize::new(0),
        })
    }

    fn hub() -> Arc<PlayerHub> {
        let hub = PlayerHub::new(&MeterConfig::default());
        hub.initialize(OutputFormat::new(44100, 2, 256)).unwrap();
        hub
    }

    #[test]
    fn test_initialize_state_errors() {
        let hub = PlayerHub::new(&MeterConfig::default());
        assert!(matches!(hub.deinitialize(), Err(EngineError::NotInitialized)));
        assert!(matches!(
            hub.initialize(OutputFormat::new(44100, 0, 256)),
            Err(EngineError::InvalidFormat(_))
        ));
        hub.initialize(OutputFormat::new(48000, 2, 256)).unwrap();
        assert!(matches!(
            hub.initialize(OutputFormat::new(48000, 2, 256)),
            Err(EngineError::AlreadyInitialized)
        ));
        assert_eq!(hub.format().map(|f| f.sample_rate), Some(48000));
        hub.deinitialize().unwrap();
        assert!(hub.format().is_none());
    }

    #[test]
    fn test_uninitialized_hub_outputs_silence() {
        let hub = PlayerHub::new(&MeterConfig::default());
        hub.register(constant(1, 0.5));
        let mut buffer = vec![1.0; 16];
        hub.mix_sound_player_channels(2, &mut buffer, 8);
        assert!(buffer.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_sources_are_summed() {
        let hub = hub();
        hub.register(constant(1, 0.25));
        hub.register(constant(2, 0.125));
        let mut buffer = vec![0.0; 16];
        hub.mix_sound_player_channels(2, &mut buffer, 8);
        assert!(buffer.iter().all(|&s| s == 0.375));
        assert_eq!(hub.channel_count(), 2);

        hub.unregister(1);
        hub.mix_sound_player_channels(2, &mut buffer, 8);
        assert!(buffer.iter().all(|&s| s == 0.125));
    }

    #[test]
    fn test_panicking_source_is_isolated() {
        let hub = hub();
        let bad = Arc::new(PanickingSource {
            panics: AtomicUsize::new(0),
        });
        hub.register(bad.clone());
        hub.register(constant(2, 0.5));

        let mut buffer = vec![0.0; 8];
        hub.mix_sound_player_channels(2, &mut buffer, 4);
        hub.mix_sound_player_channels(2, &mut buffer, 4);
        assert!(buffer.iter().all(|&s| s == 0.5));
        assert_eq!(bad.panics.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_meters_track_mix() {
        let hub = hub();
        hub.register(constant(1, 0.5));
        let mut buffer = vec![0.0; 512];
        hub.mix_sound_player_channels(2, &mut buffer, 256);

        assert_eq!(hub.peak_level(0), 0.5);
        assert!((hub.rms_level(1) - 0.5).abs() < 1e-4);
        assert_eq!(hub.peak_level(5), 0.0);

        hub.unregister(1);
        hub.mix_sound_player_channels(2, &mut buffer, 256);
        assert_eq!(hub.peak_level(0), 0.0);
    }

    #[test]
    fn test_deinitialize_stops_channels() {
        let hub = hub();
        let source = constant(1, 0.1);
        hub.register(source.clone());
        hub.deinitialize().unwrap();
        assert_eq!(source.stops.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_analysis_bands_exposed() {
        let hub = hub();
        assert_eq!(hub.band_frequencies().len(), 10);
        assert_eq!(hub.frequency_analysis().len(), 10);

        let disabled = PlayerHub::new(&MeterConfig {
            frequency_analysis: false,
            ..MeterConfig::default()
        });
        disabled.initialize(OutputFormat::new(44100, 2, 256)).unwrap();
        assert!(disabled.frequency_analysis().is_empty());
    }
}
