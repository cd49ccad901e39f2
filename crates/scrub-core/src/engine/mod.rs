//! Playback engine - channels, mixing hub, meters
//!
//! - [`PlaybackChannel`]: one open sound's transport, with a prebuffer
//!   thread feeding two bounded queues
//! - [`PlayerHub`]: registry of channels, mixes them once per device period
//!   and derives level meters and a banded spectrum from the result
//! - [`OutputRoute`]: sound-channel to device-channel routing
//!
//! # Threads
//!
//! ```text
//!  control thread            prebuffer thread               audio thread
//!  ──────────────            ────────────────               ────────────
//!  play / set_position ─cmd─► read store chunk ─write─► [positions][samples]
//!        ▲                   (blocks when full)                  │
//!        └──────ack──────────┘                     try_lock + non-blocking read
//!                                                                ▼
//!                                               PlayerHub::mix_sound_player_channels
//! ```
//!
//! Control operations that invalidate queued audio take the channel's
//! reader lock, ask the prebuffer thread to restart at a new position and
//! wait for its acknowledgement. The audio thread only ever `try_lock`s
//! that lock and plays silence for the period if it is taken.

mod analyzer;
mod channel;
mod consumer;
mod error;
mod hub;
mod meter;
mod producer;
mod route;

pub use analyzer::{FrequencyAnalyzer, ANALYZER_WINDOW};
pub use channel::PlaybackChannel;
pub use error::{EngineError, EngineResult, RouteError};
pub use hub::PlayerHub;
pub use meter::{to_db, PeakHold};
pub use route::{OutputRoute, RouteMask, RouteMatrix};
