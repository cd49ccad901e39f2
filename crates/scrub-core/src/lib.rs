//! Scrub Core - Playback engine for the scrub audio editor
//!
//! The editor keeps its audio in a randomly editable store. This crate turns
//! that store into a continuous stream for the sound card:
//!
//! - [`queue`]: bounded blocking FIFO connecting prebuffer threads to the mixer
//! - [`stretch`]: per-chunk sample-rate / seek-speed conversion
//! - [`gap`]: synthetic tone spliced in at loop and skip discontinuities
//! - [`store`]: the sample store contract plus an in-memory implementation
//! - [`engine`]: playback channels, the mixing hub, meters and analysis
//! - [`audio`]: device adapters (JACK, CPAL, null) with ordered fallback
//! - [`config`]: YAML configuration

pub mod audio;
pub mod config;
pub mod engine;
pub mod gap;
pub mod queue;
pub mod store;
pub mod stretch;
pub mod types;

pub use types::*;
