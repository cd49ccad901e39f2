//! Configuration shared by the engine and the player binary
//!
//! - Generic YAML config loading/saving
//! - Default config path
//! - Meter settings ([`MeterConfig`])
//! - Transport settings ([`TransportConfig`])
//!
//! Device settings live in [`crate::audio::AudioConfig`].
//!
//! # Usage
//!
//! ```ignore
//! use scrub_core::config::{load_config, save_config, default_config_path};
//!
//! let path = default_config_path("config.yaml");
//! let config: MyAppConfig = load_config(&path);
//! save_config(&config, &path)?;
//! ```

mod io;
mod meters;
mod paths;
mod transport;

pub use io::{load_config, save_config};
pub use meters::MeterConfig;
pub use paths::{default_config_dir, default_config_path};
pub use transport::TransportConfig;
