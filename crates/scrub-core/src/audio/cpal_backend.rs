//! CPAL audio backend
//!
//! Callback-driven output through cpal. The stream callback owns a
//! pre-allocated mix buffer and the hub handle; each callback mixes the
//! hub in slices of at most [`MAX_BUFFER_SIZE`] frames and converts them
//! to the device's native sample format.
//!
//! ```text
//! ┌──────────────────┐  mix_sound_player_channels  ┌─────────────────────┐
//! │    PlayerHub     │◄────────────────────────────│  CPAL Audio Thread  │
//! │ (channel mixing) │────── f32 mix buffer ──────►│  F32 / I16 / U16    │
//! └──────────────────┘                             └─────────────────────┘
//! ```

use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, SizedSample, Stream, StreamConfig};

use super::backend::{check_format, release_hub, AudioBackend};
use super::config::{AudioConfig, BackendKind, MAX_BUFFER_SIZE};
use super::device::{find_device_by_id, get_default_device};
use super::error::{AudioError, AudioResult};
use crate::engine::PlayerHub;
use crate::types::{sample_to_i16, sample_to_u16, OutputFormat, Sample, MAX_CHANNELS};

pub struct CpalBackend {
    hub: Arc<PlayerHub>,
    config: AudioConfig,
    stream: Option<Stream>,
    format: Option<OutputFormat>,
    /// Output paused for a half-duplex recording
    released: bool,
}

impl CpalBackend {
    pub fn new(config: &AudioConfig, hub: Arc<PlayerHub>) -> Self {
        Self {
            hub,
            config: config.clone(),
            stream: None,
            format: None,
            released: false,
        }
    }

    fn open(&mut self) -> AudioResult<()> {
        let device = match &self.config.device {
            Some(id) => find_device_by_id(id)?,
            None => get_default_device()?,
        };
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        log::info!("Using audio device: {}", device_name);

        let (supported, buffer_size) = get_output_config(&device, &self.config)?;
        let sample_format = supported.sample_format();
        let stream_config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: CpalBufferSize::Fixed(buffer_size),
        };
        let format = OutputFormat::new(
            stream_config.sample_rate.0,
            stream_config.channels as usize,
            buffer_size as usize,
        );
        check_format(&format)?;

        log::info!(
            "Audio config: {} channels, {}Hz, {:?}, {} frames (~{:.1}ms latency)",
            format.channels,
            format.sample_rate,
            sample_format,
            format.period_frames,
            format.latency_ms()
        );

        self.hub.initialize(format)?;
        self.format = Some(format);

        let hub = Arc::clone(&self.hub);
        let stream = match sample_format {
            SampleFormat::F32 => build_output_stream::<f32>(&device, &stream_config, hub, |s| s),
            SampleFormat::I16 => build_output_stream::<i16>(&device, &stream_config, hub, sample_to_i16),
            SampleFormat::U16 => build_output_stream::<u16>(&device, &stream_config, hub, sample_to_u16),
            other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
        }?;
        stream
            .play()
            .map_err(|e| AudioError::StreamStart(e.to_string()))?;

        self.stream = Some(stream);
        log::info!("Audio stream started");
        Ok(())
    }
}

impl AudioBackend for CpalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpal
    }

    fn initialize(&mut self) -> AudioResult<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let result = self.open();
        if result.is_err() {
            self.deinitialize();
        }
        result
    }

    fn deinitialize(&mut self) {
        // Dropping the stream stops the callback before the hub goes away
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::debug!("Failed to pause audio stream: {}", e);
            }
            drop(stream);
            log::info!("Audio stream stopped");
        }
        if self.format.take().is_some() {
            release_hub(&self.hub);
        }
        self.released = false;
    }

    fn is_initialized(&self) -> bool {
        self.stream.is_some()
    }

    fn format(&self) -> Option<OutputFormat> {
        self.stream.as_ref().and(self.format)
    }

    fn about_to_record(&mut self) {
        if !self.config.half_duplex || self.released {
            return;
        }
        if let Some(stream) = &self.stream {
            match stream.pause() {
                Ok(()) => {
                    self.released = true;
                    log::info!("Audio output paused for recording (half duplex)");
                }
                Err(e) => log::warn!("Failed to pause output for recording: {}", e),
            }
        }
    }

    fn done_recording(&mut self) {
        if !self.released {
            return;
        }
        if let Some(stream) = &self.stream {
            match stream.play() {
                Ok(()) => log::info!("Audio output resumed after recording"),
                Err(e) => log::error!("Failed to resume output after recording: {}", e),
            }
        }
        self.released = false;
    }

    fn hub(&self) -> &Arc<PlayerHub> {
        &self.hub
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        self.deinitialize();
    }
}

/// Pick the device config closest to the requested format
///
/// Returns (config, period_in_frames). Prefers f32 with at least the
/// requested channels at the requested rate; falls back to any usable
/// channel layout, then to the device's maximum rate.
fn get_output_config(
    device: &cpal::Device,
    config: &AudioConfig,
) -> AudioResult<(cpal::SupportedStreamConfig, u32)> {
    let supported_configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::Query(e.to_string()))?
        .filter(|c| (c.channels() as usize) <= MAX_CHANNELS)
        .filter(|c| matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16))
        .collect();

    if supported_configs.is_empty() {
        return Err(AudioError::NoUsableConfig(
            "no f32/i16/u16 configuration within the channel limit".to_string(),
        ));
    }

    let target_rate = config.sample_rate;
    let target_channels = config.channels.max(1);
    let rate_in_range =
        |c: &&cpal::SupportedStreamConfigRange| target_rate >= c.min_sample_rate().0 && target_rate <= c.max_sample_rate().0;

    let best_config = supported_configs
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| c.channels() == target_channels)
        .find(rate_in_range)
        .or_else(|| {
            supported_configs
                .iter()
                .filter(|c| c.channels() >= target_channels)
                .find(rate_in_range)
        })
        .or_else(|| supported_configs.iter().find(rate_in_range))
        .or_else(|| supported_configs.first())
        .ok_or_else(|| AudioError::NoUsableConfig(format!("{} Hz", target_rate)))?;

    let sample_rate = if rate_in_range(&best_config) {
        cpal::SampleRate(target_rate)
    } else {
        let fallback = best_config.max_sample_rate();
        log::warn!(
            "Audio device doesn't support {}Hz, falling back to {}Hz",
            target_rate,
            fallback.0
        );
        fallback
    };

    let buffer_size = config.buffer_size.as_frames();
    log::debug!(
        "Selected buffer size: {} frames for {:?} mode",
        buffer_size,
        config.buffer_size
    );

    Ok((best_config.clone().with_sample_rate(sample_rate), buffer_size))
}

/// Build an output stream that mixes the hub and converts with `convert`
fn build_output_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    hub: Arc<PlayerHub>,
    convert: fn(Sample) -> T,
) -> AudioResult<Stream>
where
    T: SizedSample + Send + 'static,
{
    let channels = config.channels as usize;
    let mut mix: Vec<Sample> = vec![0.0; MAX_BUFFER_SIZE * channels];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
                for block in data.chunks_mut(MAX_BUFFER_SIZE * channels) {
                    let frames = block.len() / channels;
                    let mixed = &mut mix[..frames * channels];
                    hub.mix_sound_player_channels(channels, mixed, frames);
                    for (out, &s) in block.iter_mut().zip(mixed.iter()) {
                        *out = convert(s);
                    }
                }
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamOpen(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::DeviceId;
    use crate::config::MeterConfig;

    #[test]
    fn test_uninitialized_backend() {
        let hub = PlayerHub::new(&MeterConfig::default());
        let mut backend = CpalBackend::new(&AudioConfig::default(), hub);
        assert_eq!(backend.kind(), BackendKind::Cpal);
        assert!(!backend.is_initialized());
        assert!(backend.format().is_none());
        // Recording hooks and teardown are no-ops without a stream
        backend.about_to_record();
        backend.done_recording();
        backend.deinitialize();
    }

    #[test]
    fn test_missing_device_releases_hub() {
        let hub = PlayerHub::new(&MeterConfig::default());
        let config = AudioConfig::default().with_device(DeviceId::new("no such device 7f3a"));
        let mut backend = CpalBackend::new(&config, Arc::clone(&hub));
        assert!(backend.initialize().is_err());
        assert!(!hub.is_initialized());
    }
}
