//! Native JACK audio backend for Linux
//!
//! Registers one output port per output channel and mixes the hub from the
//! JACK process callback. Works with PipeWire's JACK compatibility layer.
//!
//! ```text
//! ┌──────────────────┐  mix_sound_player_channels  ┌─────────────────────┐
//! │    PlayerHub     │◄────────────────────────────│   JACK RT Thread    │
//! │ (channel mixing) │──── interleaved mix ───────►│ de-interleave ports │
//! └──────────────────┘                             └─────────────────────┘
//! ```

use std::sync::Arc;

use jack::{AudioOut, Client, ClientOptions, Control, Port, PortFlags, ProcessScope};

use super::backend::{check_format, release_hub, AudioBackend};
use super::config::{AudioConfig, BackendKind, MAX_BUFFER_SIZE};
use super::error::{AudioError, AudioResult};
use crate::engine::PlayerHub;
use crate::types::{OutputFormat, Sample, MAX_CHANNELS};

/// JACK process handler
struct JackProcessor {
    ports: Vec<Port<AudioOut>>,
    hub: Arc<PlayerHub>,
    /// Interleaved mix, `MAX_BUFFER_SIZE` frames
    mix: Vec<Sample>,
}

impl jack::ProcessHandler for JackProcessor {
    fn process(&mut self, _client: &Client, ps: &ProcessScope) -> Control {
        let n_frames = ps.n_frames() as usize;
        let channels = self.ports.len();

        let mut done = 0;
        while done < n_frames {
            let frames = (n_frames - done).min(MAX_BUFFER_SIZE);
            let mixed = &mut self.mix[..frames * channels];
            self.hub.mix_sound_player_channels(channels, mixed, frames);

            for (ch, port) in self.ports.iter_mut().enumerate() {
                let out = &mut port.as_mut_slice(ps)[done..done + frames];
                for (i, sample) in out.iter_mut().enumerate() {
                    *sample = mixed[i * channels + ch];
                }
            }
            done += frames;
        }

        Control::Continue
    }
}

/// JACK notification handler
struct JackNotifications;

impl jack::NotificationHandler for JackNotifications {
    fn sample_rate(&mut self, _client: &Client, srate: jack::Frames) -> Control {
        log::info!("JACK sample rate changed to: {}", srate);
        Control::Continue
    }

    fn xrun(&mut self, _client: &Client) -> Control {
        log::warn!("JACK xrun detected");
        Control::Continue
    }
}

pub struct JackBackend {
    hub: Arc<PlayerHub>,
    config: AudioConfig,
    client: Option<jack::AsyncClient<JackNotifications, JackProcessor>>,
    format: Option<OutputFormat>,
}

impl JackBackend {
    pub fn new(config: &AudioConfig, hub: Arc<PlayerHub>) -> Self {
        Self {
            hub,
            config: config.clone(),
            client: None,
            format: None,
        }
    }

    fn open(&mut self) -> AudioResult<()> {
        let (client, _status) =
            Client::new(&self.config.jack_client_name, ClientOptions::NO_START_SERVER)
                .map_err(|e| AudioError::jack("client", e))?;
        let client_name = client.name().to_string();

        let channels = (self.config.channels as usize).clamp(1, MAX_CHANNELS);
        let format = OutputFormat::new(
            client.sample_rate() as u32,
            channels,
            client.buffer_size() as usize,
        );
        check_format(&format)?;

        log::info!(
            "JACK client '{}' created (sample rate: {}Hz, buffer: {} frames, latency: {:.1}ms)",
            client_name,
            format.sample_rate,
            format.period_frames,
            format.latency_ms()
        );

        let ports = (1..=channels)
            .map(|n| {
                client
                    .register_port(&format!("out_{}", n), AudioOut::default())
                    .map_err(|e| AudioError::jack("port registration", e))
            })
            .collect::<AudioResult<Vec<_>>>()?;

        self.hub.initialize(format)?;
        self.format = Some(format);

        let processor = JackProcessor {
            ports,
            hub: Arc::clone(&self.hub),
            mix: vec![0.0; MAX_BUFFER_SIZE * channels],
        };
        let async_client = client
            .activate_async(JackNotifications, processor)
            .map_err(|e| AudioError::jack("activation", e))?;
        log::info!("JACK client activated");

        if self.config.jack_connect_ports {
            connect_ports(async_client.as_client(), &client_name, channels);
        }

        self.client = Some(async_client);
        Ok(())
    }
}

impl AudioBackend for JackBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Jack
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
        if let Some(client) = self.client.take() {
            if let Err(e) = client.deactivate() {
                log::warn!("Failed to deactivate JACK client: {}", e);
            }
            log::info!("JACK client deactivated");
        }
        if self.format.take().is_some() {
            release_hub(&self.hub);
        }
    }

    fn is_initialized(&self) -> bool {
        self.client.is_some()
    }

    fn format(&self) -> Option<OutputFormat> {
        self.client.as_ref().and(self.format)
    }

    fn hub(&self) -> &Arc<PlayerHub> {
        &self.hub
    }
}

impl Drop for JackBackend {
    fn drop(&mut self) {
        self.deinitialize();
    }
}

/// Connect `out_N` to the Nth physical playback port
fn connect_ports(client: &Client, client_name: &str, channels: usize) {
    let targets = client.ports(
        None,
        Some("32 bit float mono audio"),
        PortFlags::IS_INPUT | PortFlags::IS_PHYSICAL,
    );
    if targets.is_empty() {
        log::warn!("No JACK playback ports found for connection");
        return;
    }

    for (n, target) in (1..=channels).zip(targets.iter()) {
        let ours = format!("{}:out_{}", client_name, n);
        match client.connect_ports_by_name(&ours, target) {
            Ok(()) => log::info!("Connected {} to {}", ours, target),
            Err(e) => log::warn!("Could not connect {} to {}: {}", ours, target, e),
        }
    }
}
