//! In-memory sample store

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{AudioReader, SampleStore, StoreError, StoreResult};
use crate::types::{FramePosition, Sample, MAX_CHANNELS};

/// Named marker in a sound
#[derive(Debug, Clone, PartialEq)]
pub struct Cue {
    pub name: String,
    pub time: FramePosition,
}

/// Sound held entirely in memory, one `Vec` per channel
///
/// Readers share the data lock; structural edits take it exclusively
/// through [`MemoryStore::lock_resize`]. The length is mirrored in an
/// atomic so it can be queried while an edit holds the lock.
pub struct MemoryStore {
    data: RwLock<Vec<Vec<Sample>>>,
    length: AtomicU64,
    cues: RwLock<Vec<Cue>>,
    channels: usize,
    sample_rate: u32,
}

impl MemoryStore {
    /// Build a store from de-interleaved channel data
    pub fn from_channels(channels: Vec<Vec<Sample>>, sample_rate: u32) -> StoreResult<Self> {
        if channels.is_empty() || channels.len() > MAX_CHANNELS {
            return Err(StoreError::ChannelCount(channels.len()));
        }
        if sample_rate == 0 {
            return Err(StoreError::SampleRate(sample_rate));
        }
        let len = channels[0].len();
        if channels.iter().any(|c| c.len() != len) {
            return Err(StoreError::RaggedChannels);
        }

        Ok(Self {
            channels: channels.len(),
            length: AtomicU64::new(len as FramePosition),
            data: RwLock::new(channels),
            cues: RwLock::new(Vec::new()),
            sample_rate,
        })
    }

    /// Decode a WAV file (integer or float PCM)
    pub fn from_wav<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        let wav_err = |source| StoreError::Wav {
            path: path.to_path_buf(),
            source,
        };

        let reader = hound::WavReader::open(path).map_err(wav_err)?;
        let spec = reader.spec();
        let channel_count = spec.channels as usize;
        if channel_count == 0 || channel_count > MAX_CHANNELS {
            return Err(StoreError::ChannelCount(channel_count));
        }

        let interleaved: Vec<Sample> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(wav_err)?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(wav_err)?
            }
        };

        let frames = interleaved.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in interleaved.chunks_exact(channel_count) {
            for (ch, &s) in frame.iter().enumerate() {
                channels[ch].push(s);
            }
        }

        log::info!(
            "Loaded {:?}: {} frames, {} channels, {} Hz",
            path,
            frames,
            channel_count,
            spec.sample_rate
        );

        Self::from_channels(channels, spec.sample_rate)
    }

    fn data(&self) -> RwLockReadGuard<'_, Vec<Vec<Sample>>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn cues_read(&self) -> RwLockReadGuard<'_, Vec<Cue>> {
        self.cues.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn cues_write(&self) -> RwLockWriteGuard<'_, Vec<Cue>> {
        self.cues.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the exclusive resize lock
    ///
    /// Blocks prebuffer threads at their next chunk read until dropped.
    pub fn lock_resize(&self) -> ResizeGuard<'_> {
        ResizeGuard {
            data: self.data.write().unwrap_or_else(PoisonError::into_inner),
            store: self,
        }
    }

    /// Insert `frames` frames of silence at `at`
    pub fn insert_silence(&self, at: FramePosition, frames: usize) -> StoreResult<()> {
        self.lock_resize().insert_silence(at, frames)
    }

    /// Remove frames `start..end`
    pub fn remove_range(&self, start: FramePosition, end: FramePosition) -> StoreResult<()> {
        self.lock_resize().remove_range(start, end)
    }

    /// Add a cue, keeping the list sorted by time; returns its index
    pub fn add_cue(&self, name: impl Into<String>, time: FramePosition) -> usize {
        let mut cues = self.cues_write();
        let index = cues.partition_point(|c| c.time <= time);
        cues.insert(
            index,
            Cue {
                name: name.into(),
                time,
            },
        );
        index
    }

    pub fn remove_cue(&self, index: usize) -> Option<Cue> {
        let mut cues = self.cues_write();
        (index < cues.len()).then(|| cues.remove(index))
    }

    pub fn cues(&self) -> Vec<Cue> {
        self.cues_read().clone()
    }
}

/// Exclusive hold on the store's data for structural edits
pub struct ResizeGuard<'a> {
    data: RwLockWriteGuard<'a, Vec<Vec<Sample>>>,
    store: &'a MemoryStore,
}

impl ResizeGuard<'_> {
    pub fn len(&self) -> FramePosition {
        self.data.first().map_or(0, |c| c.len() as FramePosition)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert_silence(&mut self, at: FramePosition, frames: usize) -> StoreResult<()> {
        let len = self.len();
        if at > len {
            return Err(StoreError::RangeOutOfBounds {
                start: at,
                end: at,
                len,
            });
        }
        let at_idx = at as usize;
        for channel in self.data.iter_mut() {
            channel.splice(at_idx..at_idx, std::iter::repeat(0.0).take(frames));
        }
        self.store.length.store(self.len(), Ordering::Release);

        for cue in self.store.cues_write().iter_mut() {
            if cue.time >= at {
                cue.time += frames as FramePosition;
            }
        }
        Ok(())
    }

    pub fn remove_range(&mut self, start: FramePosition, end: FramePosition) -> StoreResult<()> {
        let len = self.len();
        if start > end || end > len {
            return Err(StoreError::RangeOutOfBounds { start, end, len });
        }
        for channel in self.data.iter_mut() {
            channel.drain(start as usize..end as usize);
        }
        self.store.length.store(self.len(), Ordering::Release);

        let removed = end - start;
        let mut cues = self.store.cues_write();
        cues.retain(|c| c.time < start || c.time >= end);
        for cue in cues.iter_mut() {
            if cue.time >= end {
                cue.time -= removed;
            }
        }
        Ok(())
    }
}

struct MemoryReader<'a> {
    data: RwLockReadGuard<'a, Vec<Vec<Sample>>>,
}

impl AudioReader for MemoryReader<'_> {
    fn len(&self) -> FramePosition {
        self.data.first().map_or(0, |c| c.len() as FramePosition)
    }

    #[inline]
    fn sample(&self, channel: usize, index: FramePosition) -> Sample {
        self.data
            .get(channel)
            .and_then(|c| c.get(index as usize))
            .copied()
            .unwrap_or(0.0)
    }
}

impl SampleStore for MemoryStore {
    fn len(&self) -> FramePosition {
        self.length.load(Ordering::Acquire)
    }

    fn channel_count(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read(&self) -> Box<dyn AudioReader + '_> {
        Box::new(MemoryReader { data: self.data() })
    }

    fn cue_count(&self) -> usize {
        self.cues_read().len()
    }

    fn cue_time(&self, index: usize) -> Option<FramePosition> {
        self.cues_read().get(index).map(|c| c.time)
    }

    fn cue_name(&self, index: usize) -> Option<String> {
        self.cues_read().get(index).map(|c| c.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_ramp(frames: usize) -> MemoryStore {
        let left: Vec<Sample> = (0..frames).map(|i| i as Sample).collect();
        let right: Vec<Sample> = (0..frames).map(|i| -(i as Sample)).collect();
        MemoryStore::from_channels(vec![left, right], 44100).unwrap()
    }

    #[test]
    fn test_shape_queries() {
        let store = stereo_ramp(10);
        assert_eq!(store.len(), 10);
        assert_eq!(store.channel_count(), 2);
        assert_eq!(store.sample_rate(), 44100);

        let reader = store.read();
        assert_eq!(reader.sample(0, 3), 3.0);
        assert_eq!(reader.sample(1, 3), -3.0);
        assert_eq!(reader.sample(0, 99), 0.0);
        assert_eq!(reader.sample(5, 0), 0.0);
    }

    #[test]
    fn test_rejects_bad_layouts() {
        assert!(matches!(
            MemoryStore::from_channels(vec![], 44100),
            Err(StoreError::ChannelCount(0))
        ));
        assert!(matches!(
            MemoryStore::from_channels(vec![vec![0.0; 3], vec![0.0; 4]], 44100),
            Err(StoreError::RaggedChannels)
        ));
        assert!(matches!(
            MemoryStore::from_channels(vec![vec![0.0]], 0),
            Err(StoreError::SampleRate(0))
        ));
    }

    #[test]
    fn test_insert_and_remove_shift_cues() {
        let store = stereo_ramp(100);
        store.add_cue("a", 10);
        store.add_cue("b", 50);

        store.insert_silence(20, 5).unwrap();
        assert_eq!(store.len(), 105);
        assert_eq!(store.cue_time(0), Some(10));
        assert_eq!(store.cue_time(1), Some(55));
        assert_eq!(store.read().sample(0, 22), 0.0);
        assert_eq!(store.read().sample(0, 25), 20.0);

        store.remove_range(5, 15).unwrap();
        assert_eq!(store.len(), 95);
        assert_eq!(store.cue_count(), 1);
        assert_eq!(store.cue_name(0).as_deref(), Some("b"));
        assert_eq!(store.cue_time(0), Some(45));

        assert!(store.remove_range(90, 200).is_err());
    }

    #[test]
    fn test_cue_navigation() {
        let store = stereo_ramp(1000);
        store.add_cue("late", 800);
        store.add_cue("early", 100);
        store.add_cue("mid", 400);

        assert_eq!(store.cue_name(0).as_deref(), Some("early"));
        assert_eq!(store.find_nearest_cue(350), Some((1, 400)));
        assert_eq!(store.next_cue_after(400), Some(800));
        assert_eq!(store.previous_cue_before(400), Some(100));
        assert_eq!(store.next_cue_after(900), None);

        assert_eq!(store.remove_cue(1).map(|c| c.time), Some(400));
        assert_eq!(store.remove_cue(7), None);
    }

    #[test]
    fn test_wav_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..64i16 {
            writer.write_sample(i * 100).unwrap();
            writer.write_sample(-i * 100).unwrap();
        }
        writer.finalize().unwrap();

        let store = MemoryStore::from_wav(&path).unwrap();
        assert_eq!(store.len(), 64);
        assert_eq!(store.channel_count(), 2);
        assert_eq!(store.sample_rate(), 48000);
        let reader = store.read();
        assert!((reader.sample(0, 10) - 1000.0 / 32768.0).abs() < 1e-6);
        assert!((reader.sample(1, 10) + 1000.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn test_missing_wav_is_error() {
        assert!(matches!(
            MemoryStore::from_wav("/nonexistent/file.wav"),
            Err(StoreError::Wav { .. })
        ));
    }
}
