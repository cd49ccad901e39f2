//! Device adapters driving the [`PlayerHub`](crate::engine::PlayerHub)
//!
//! - **JACK** (Linux, `jack-backend` feature): one port per output channel
//! - **CPAL**: cross-platform callback output with F32/I16/U16 conversion
//! - **Null**: paced worker thread, no device
//!
//! Every backend implements [`AudioBackend`]. Use
//! [`create_initialized_sound_player`] to try the configured backends in
//! order:
//!
//! ```ignore
//! use scrub_core::audio::{create_initialized_sound_player, AudioConfig};
//! use scrub_core::engine::PlayerHub;
//!
//! let hub = PlayerHub::new(&config.meters);
//! let player = create_initialized_sound_player(&AudioConfig::default(), hub.clone());
//! println!("playing through {}", player.kind());
//! ```

mod backend;
mod config;
mod cpal_backend;
mod device;
mod error;
mod null_backend;

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
mod jack_backend;

pub use backend::{create_backend, create_initialized_sound_player, AudioBackend};
pub use config::{
    AudioConfig, BackendKind, BufferSize, DeviceId, DEFAULT_BUFFER_SIZE, LOW_LATENCY_BUFFER_SIZE,
    MAX_BUFFER_SIZE,
};
pub use cpal_backend::CpalBackend;
pub use device::{find_device_by_id, get_default_device, get_output_devices, AudioDevice};
pub use error::{AudioError, AudioResult};
#[cfg(all(target_os = "linux", feature = "jack-backend"))]
pub use jack_backend::JackBackend;
pub use null_backend::NullBackend;
