//! Sample store contract consumed by the playback engine
//!
//! The editor owns the actual audio data; the engine only needs a narrow
//! read view of it:
//!
//! - shape queries (`len`, `channel_count`, `sample_rate`)
//! - a reader that holds the store's shared "size" lock while a chunk is
//!   copied, so structural edits (insert/remove) can't resize the data
//!   underneath the prebuffer thread
//! - cue queries for transport navigation
//!
//! [`MemoryStore`] is a complete in-memory implementation.

mod memory;

pub use memory::{Cue, MemoryStore, ResizeGuard};

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{FramePosition, Sample};

/// Errors building or editing a store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read {path}: {source}")]
    Wav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("Unsupported channel count: {0}")]
    ChannelCount(usize),

    #[error("Channels have different lengths")]
    RaggedChannels,

    #[error("Invalid sample rate: {0}")]
    SampleRate(u32),

    #[error("Range {start}..{end} is outside the sound (length {len})")]
    RangeOutOfBounds {
        start: FramePosition,
        end: FramePosition,
        len: FramePosition,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Random-access view of the audio, valid while the size lock is held
pub trait AudioReader {
    /// Frames in the sound
    fn len(&self) -> FramePosition;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample at `index` of `channel`; out-of-range reads return silence
    fn sample(&self, channel: usize, index: FramePosition) -> Sample;
}

/// The editor's audio data as seen by a playback channel
pub trait SampleStore: Send + Sync {
    /// Frames in the sound
    fn len(&self) -> FramePosition;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn channel_count(&self) -> usize;

    fn sample_rate(&self) -> u32;

    /// Take the shared size lock and return a reader over the data
    ///
    /// The lock is released when the reader is dropped; hold it for one
    /// chunk copy at a time.
    fn read(&self) -> Box<dyn AudioReader + '_>;

    fn cue_count(&self) -> usize;

    /// Position of cue `index`
    fn cue_time(&self, index: usize) -> Option<FramePosition>;

    fn cue_name(&self, index: usize) -> Option<String>;

    /// Cue closest to `position` as `(index, time)`
    fn find_nearest_cue(&self, position: FramePosition) -> Option<(usize, FramePosition)> {
        (0..self.cue_count())
            .filter_map(|i| self.cue_time(i).map(|t| (i, t)))
            .min_by_key(|&(_, t)| t.abs_diff(position))
    }

    /// First cue strictly after `position`
    fn next_cue_after(&self, position: FramePosition) -> Option<FramePosition> {
        (0..self.cue_count())
            .filter_map(|i| self.cue_time(i))
            .filter(|&t| t > position)
            .min()
    }

    /// Last cue strictly before `position`
    fn previous_cue_before(&self, position: FramePosition) -> Option<FramePosition> {
        (0..self.cue_count())
            .filter_map(|i| self.cue_time(i))
            .filter(|&t| t < position)
            .max()
    }
}
