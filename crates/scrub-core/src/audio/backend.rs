//! Device adapter contract and backend fallback
//!
//! A backend owns one output device. `initialize` negotiates a format,
//! hands it to [`PlayerHub::initialize`] and starts whatever drives the
//! period trigger (a device callback or a worker thread); the trigger calls
//! [`PlayerHub::mix_sound_player_channels`] with one period's buffer and
//! converts the result to the device's sample format.
//!
//! [`create_initialized_sound_player`] walks the configured backends in
//! order and falls back to [`NullBackend`] so the transport keeps moving
//! even without hardware.

use std::sync::Arc;

use super::config::{AudioConfig, BackendKind};
use super::cpal_backend::CpalBackend;
use super::error::{AudioError, AudioResult};
use super::null_backend::NullBackend;
use crate::engine::PlayerHub;
use crate::types::OutputFormat;

/// One output device driving a [`PlayerHub`]
pub trait AudioBackend {
    fn kind(&self) -> BackendKind;

    /// Open the device, initialize the hub and start the period trigger
    ///
    /// On failure everything already opened is released again.
    fn initialize(&mut self) -> AudioResult<()>;

    /// Stop the period trigger, close the device and deinitialize the hub
    ///
    /// Safe to call after a failed or partial `initialize`.
    fn deinitialize(&mut self);

    fn is_initialized(&self) -> bool;

    /// Format negotiated with the device, while initialized
    fn format(&self) -> Option<OutputFormat>;

    /// Recording is about to start; half-duplex devices release the output
    fn about_to_record(&mut self) {}

    /// Recording finished; output released by `about_to_record` resumes
    fn done_recording(&mut self) {}

    fn hub(&self) -> &Arc<PlayerHub>;
}

/// Release the hub if this backend initialized it
pub(crate) fn release_hub(hub: &PlayerHub) {
    if let Err(e) = hub.deinitialize() {
        log::debug!("Hub already released: {}", e);
    }
}

/// Construct (but don't initialize) a backend of `kind`
pub fn create_backend(
    kind: BackendKind,
    config: &AudioConfig,
    hub: Arc<PlayerHub>,
) -> AudioResult<Box<dyn AudioBackend>> {
    match kind {
        BackendKind::Null => Ok(Box::new(NullBackend::new(config, hub))),
        BackendKind::Cpal => Ok(Box::new(CpalBackend::new(config, hub))),
        #[cfg(all(target_os = "linux", feature = "jack-backend"))]
        BackendKind::Jack => Ok(Box::new(super::jack_backend::JackBackend::new(config, hub))),
        #[cfg(not(all(target_os = "linux", feature = "jack-backend")))]
        BackendKind::Jack => Err(AudioError::BackendUnavailable(kind)),
    }
}

/// First configured backend that initializes, else the null backend
///
/// Each failed attempt is logged as a warning. Falling all the way through
/// to the null backend means playback is silent but the transport, meters
/// and analysis keep running.
pub fn create_initialized_sound_player(
    config: &AudioConfig,
    hub: Arc<PlayerHub>,
) -> Box<dyn AudioBackend> {
    for &kind in config.backends.iter().filter(|k| **k != BackendKind::Null) {
        let mut backend = match create_backend(kind, config, Arc::clone(&hub)) {
            Ok(backend) => backend,
            Err(e) => {
                log::warn!("Skipping {} backend: {}", kind, e);
                continue;
            }
        };
        match backend.initialize() {
            Ok(()) => {
                log::info!("Audio output via {} backend", kind);
                return backend;
            }
            Err(e) => {
                log::warn!("{} backend failed to initialize: {}", kind, e);
                backend.deinitialize();
            }
        }
    }

    let mut backend = NullBackend::new(config, hub);
    match backend.initialize() {
        Ok(()) => log::warn!("No audio device available; playback disabled"),
        Err(e) => log::error!("Null audio backend failed to initialize: {}", e),
    }
    Box::new(backend)
}

/// Output format requested by the config, before device negotiation
pub(crate) fn requested_format(config: &AudioConfig) -> OutputFormat {
    OutputFormat::new(
        config.sample_rate,
        config.channels.max(1) as usize,
        config.buffer_size.as_frames() as usize,
    )
}

/// Check a negotiated format against what the hub can mix
pub(crate) fn check_format(format: &OutputFormat) -> AudioResult<()> {
    if format.channels == 0 || format.channels > crate::types::MAX_CHANNELS {
        return Err(AudioError::UnsupportedFormat(format!(
            "{} output channels",
            format.channels
        )));
    }
    Ok(())
}
