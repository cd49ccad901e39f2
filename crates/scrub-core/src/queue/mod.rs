//! Bounded blocking queue between prebuffer threads and the mixer
//!
//! A fixed-capacity circular FIFO of `Copy` elements. Writers block while the
//! queue is full, blocking readers wait for data, and either side can close
//! its end to release the other. One slot is always kept free so that a full
//! queue and an empty one are distinguishable, which makes the usable
//! capacity `capacity - 1`.
//!
//! Every blocking call returns early with a distinguished error when the
//! opposite end goes away ([`QueueError::EndOfPipe`]) or when the queue is
//! [cleared](BoundedQueue::clear) underneath it ([`QueueError::Cleared`]).
//! Callers treat both as end-of-stream, not as failures.
//!
//! ```text
//!   producer ──write()──►  [ r . . . . w ]  ──read(block=false)──► RT mixer
//!            ◄─blocks on full─┘       └─EndOfPipe when write end closed
//! ```

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, TryLockError};

use thiserror::Error;

/// Errors returned by queue operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Capacity too small to hold a single element
    #[error("Queue capacity must be at least 2, got {0}")]
    InvalidCapacity(usize),

    /// `open()` called while both ends are open
    #[error("Queue is already open")]
    AlreadyOpen,

    /// The opposite end was closed (and nothing is left to read)
    #[error("End of pipe")]
    EndOfPipe,

    /// Read attempted after the read end was closed
    #[error("Read end of queue is closed")]
    ReadEndClosed,

    /// Write attempted after the write end was closed
    #[error("Write end of queue is closed")]
    WriteEndClosed,

    /// Peek request larger than the queue can ever hold
    #[error("Peek of {requested} elements exceeds usable capacity {usable}")]
    PeekTooLarge { requested: usize, usable: usize },

    /// The queue was cleared while a write was in progress
    #[error("Queue cleared during write after {written} elements")]
    Cleared { written: usize },
}

impl QueueError {
    /// Whether this is one of the benign end-of-stream signals
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, QueueError::EndOfPipe | QueueError::Cleared { .. })
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

struct QueueState<T> {
    buffer: Vec<T>,
    read_pos: usize,
    write_pos: usize,
    read_open: bool,
    write_open: bool,
    /// Bumped by every clear so in-flight writes notice
    epoch: u64,
    /// Read attempts, successful or not, since the last clear
    reads_since_clear: u64,
    /// A writer is parked in `wait_for_reader`
    reader_awaited: bool,
}

impl<T: Copy> QueueState<T> {
    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn len(&self) -> usize {
        let cap = self.capacity();
        (self.write_pos + cap - self.read_pos) % cap
    }

    fn free(&self) -> usize {
        self.capacity() - 1 - self.len()
    }

    /// Copy as much of `data` as fits; returns elements written
    fn push(&mut self, data: &[T]) -> usize {
        let count = data.len().min(self.free());
        let cap = self.capacity();
        let first = count.min(cap - self.write_pos);
        self.buffer[self.write_pos..self.write_pos + first].copy_from_slice(&data[..first]);
        self.buffer[..count - first].copy_from_slice(&data[first..count]);
        self.write_pos = (self.write_pos + count) % cap;
        count
    }

    /// Copy up to `dest.len()` readable elements without consuming them
    fn copy_out(&self, dest: &mut [T]) -> usize {
        let count = dest.len().min(self.len());
        let cap = self.capacity();
        let first = count.min(cap - self.read_pos);
        dest[..first].copy_from_slice(&self.buffer[self.read_pos..self.read_pos + first]);
        dest[first..count].copy_from_slice(&self.buffer[..count - first]);
        count
    }

    /// Count a read attempt; true when a writer is waiting for one
    fn note_read(&mut self) -> bool {
        self.reads_since_clear = self.reads_since_clear.saturating_add(1);
        self.reader_awaited
    }

    fn consume(&mut self, count: usize) -> usize {
        let count = count.min(self.len());
        self.read_pos = (self.read_pos + count) % self.capacity();
        count
    }
}

/// Fixed-capacity, thread-safe FIFO with blocking and non-blocking access
pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    /// Signalled when data arrives or an end closes
    readable: Condvar,
    /// Signalled when space frees up, on clear, or when an end closes
    writable: Condvar,
}

impl<T: Copy + Default> BoundedQueue<T> {
    /// Create an open queue holding at most `capacity - 1` elements
    pub fn new(capacity: usize) -> QueueResult<Self> {
        if capacity < 2 {
            return Err(QueueError::InvalidCapacity(capacity));
        }
        Ok(Self {
            state: Mutex::new(QueueState {
                buffer: vec![T::default(); capacity],
                read_pos: 0,
                write_pos: 0,
                read_open: true,
                write_open: true,
                epoch: 0,
                reads_since_clear: 0,
                reader_awaited: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        })
    }
}

impl<T: Copy> BoundedQueue<T> {
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_readable<'a>(&self, guard: MutexGuard<'a, QueueState<T>>) -> MutexGuard<'a, QueueState<T>> {
        self.readable.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_writable<'a>(&self, guard: MutexGuard<'a, QueueState<T>>) -> MutexGuard<'a, QueueState<T>> {
        self.writable.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    fn wake_all(&self) {
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Reset the cursors and reopen both ends
    ///
    /// Fails when both ends are still open; close one end first.
    pub fn open(&self) -> QueueResult<()> {
        let mut state = self.lock();
        if state.read_open && state.write_open {
            return Err(QueueError::AlreadyOpen);
        }
        state.read_pos = 0;
        state.write_pos = 0;
        state.read_open = true;
        state.write_open = true;
        state.epoch = state.epoch.wrapping_add(1);
        state.reads_since_clear = 0;
        drop(state);
        self.wake_all();
        Ok(())
    }

    /// Write all of `data`, blocking while the queue is full
    ///
    /// Returns `EndOfPipe` if the read end closes before everything is
    /// written and `Cleared` if the queue is cleared during the call.
    pub fn write(&self, data: &[T]) -> QueueResult<usize> {
        let mut state = self.lock();
        if !state.write_open {
            return Err(QueueError::WriteEndClosed);
        }
        let epoch = state.epoch;
        let mut written = 0;

        loop {
            if !state.read_open {
                return Err(QueueError::EndOfPipe);
            }
            if state.epoch != epoch {
                return Err(QueueError::Cleared { written });
            }
            if !state.write_open {
                return Err(QueueError::WriteEndClosed);
            }

            let n = state.push(&data[written..]);
            if n > 0 {
                written += n;
                self.readable.notify_all();
            }
            if written == data.len() {
                return Ok(written);
            }

            state = self.wait_writable(state);
        }
    }

    /// Read into `dest`
    ///
    /// Non-blocking reads return whatever is available (possibly 0). Blocking
    /// reads fill `dest` completely unless the write end closes first.
    pub fn read(&self, dest: &mut [T], block: bool) -> QueueResult<usize> {
        let mut state = self.lock();
        if !state.read_open {
            return Err(QueueError::ReadEndClosed);
        }
        if state.note_read() {
            self.writable.notify_all();
        }
        let mut total = 0;

        loop {
            let n = state.copy_out(&mut dest[total..]);
            if n > 0 {
                state.consume(n);
                total += n;
                self.writable.notify_all();
            }
            if total == dest.len() {
                return Ok(total);
            }
            if !state.write_open || !state.read_open {
                return if total == 0 { Err(QueueError::EndOfPipe) } else { Ok(total) };
            }
            if !block {
                return Ok(total);
            }

            state = self.wait_readable(state);
        }
    }

    /// Non-blocking read that never waits for the lock either
    ///
    /// Returns `Ok(None)` when another thread holds the queue.
    pub fn try_read(&self, dest: &mut [T]) -> QueueResult<Option<usize>> {
        let mut state = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Ok(None),
        };
        if !state.read_open {
            return Err(QueueError::ReadEndClosed);
        }
        let awaited = state.note_read();
        let n = state.copy_out(dest);
        state.consume(n);
        let write_open = state.write_open;
        drop(state);

        if n > 0 || awaited {
            self.writable.notify_all();
        }
        if n == 0 && !dest.is_empty() && !write_open {
            return Err(QueueError::EndOfPipe);
        }
        Ok(Some(n))
    }

    /// Block until the reader has tried to read since the last clear
    ///
    /// Lets a writer hold off refilling until the queue is being drained
    /// again. Returns `Cleared` if the queue is cleared meanwhile and
    /// `EndOfPipe` if either end closes.
    pub fn wait_for_reader(&self) -> QueueResult<()> {
        let mut state = self.lock();
        let epoch = state.epoch;
        state.reader_awaited = true;

        let result = loop {
            if !state.read_open || !state.write_open {
                break Err(QueueError::EndOfPipe);
            }
            if state.epoch != epoch {
                break Err(QueueError::Cleared { written: 0 });
            }
            if state.reads_since_clear > 0 {
                break Ok(());
            }
            state = self.wait_writable(state);
        };

        state.reader_awaited = false;
        result
    }

    /// Copy the oldest `dest.len()` elements without consuming them
    ///
    /// Blocking peeks wait until the whole request is available.
    pub fn peek(&self, dest: &mut [T], block: bool) -> QueueResult<usize> {
        let mut state = self.lock();
        if !state.read_open {
            return Err(QueueError::ReadEndClosed);
        }
        let usable = state.capacity() - 1;
        if dest.len() > usable {
            return Err(QueueError::PeekTooLarge {
                requested: dest.len(),
                usable,
            });
        }

        loop {
            let available = state.len();
            if available >= dest.len() || !block || !state.write_open || !state.read_open {
                if available == 0 && !dest.is_empty() && !state.write_open {
                    return Err(QueueError::EndOfPipe);
                }
                return Ok(state.copy_out(dest));
            }

            state = self.wait_readable(state);
        }
    }

    /// Discard up to `count` elements without copying them
    pub fn skip(&self, count: usize, block: bool) -> QueueResult<usize> {
        let mut state = self.lock();
        if !state.read_open {
            return Err(QueueError::ReadEndClosed);
        }
        let mut total = 0;

        loop {
            let n = state.consume(count - total);
            if n > 0 {
                total += n;
                self.writable.notify_all();
            }
            if total == count {
                return Ok(total);
            }
            if !state.write_open || !state.read_open {
                return if total == 0 { Err(QueueError::EndOfPipe) } else { Ok(total) };
            }
            if !block {
                return Ok(total);
            }

            state = self.wait_readable(state);
        }
    }

    /// Close the read end, releasing blocked writers
    pub fn close_read(&self) {
        self.lock().read_open = false;
        self.wake_all();
    }

    /// Close the write end, releasing blocked readers
    pub fn close_write(&self) {
        self.lock().write_open = false;
        self.wake_all();
    }

    /// Drop all queued elements
    ///
    /// A write blocked on a full queue returns `Cleared` instead of
    /// continuing into the emptied buffer.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.read_pos = 0;
        state.write_pos = 0;
        state.epoch = state.epoch.wrapping_add(1);
        state.reads_since_clear = 0;
        drop(state);
        self.writable.notify_all();
    }

    /// Elements currently available to read (a snapshot; may be stale)
    pub fn size(&self) -> usize {
        self.lock().len()
    }

    /// [`size`](Self::size) without waiting for the lock; `None` when
    /// another thread holds it
    pub fn try_size(&self) -> Option<usize> {
        match self.state.try_lock() {
            Ok(state) => Some(state.len()),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner().len()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Elements that can be written without blocking
    pub fn free_space(&self) -> usize {
        self.lock().free()
    }

    /// Allocated slot count
    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    /// Maximum number of elements the queue can hold at once
    pub fn usable_capacity(&self) -> usize {
        self.capacity() - 1
    }

    pub fn is_read_open(&self) -> bool {
        self.lock().read_open
    }

    pub fn is_write_open(&self) -> bool {
        self.lock().write_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_rejects_tiny_capacity() {
        assert_eq!(
            BoundedQueue::<u8>::new(0).err(),
            Some(QueueError::InvalidCapacity(0))
        );
        assert!(BoundedQueue::<u8>::new(1).is_err());
        assert!(BoundedQueue::<u8>::new(2).is_ok());
    }

    #[test]
    fn test_usable_capacity() {
        let q = BoundedQueue::<i32>::new(8).unwrap();
        assert_eq!(q.capacity(), 8);
        assert_eq!(q.usable_capacity(), 7);
        assert_eq!(q.free_space(), 7);
    }

    #[test]
    fn test_fifo_roundtrip_for_various_chunk_sizes() {
        for capacity in [3usize, 5, 16, 100] {
            let q = BoundedQueue::<u16>::new(capacity).unwrap();
            for chunk in 1..capacity {
                // Several passes so the cursors wrap around
                for pass in 0..3u16 {
                    let data: Vec<u16> = (0..chunk as u16).map(|i| i * 7 + pass).collect();
                    assert_eq!(q.write(&data).unwrap(), chunk);
                    let mut out = vec![0u16; chunk];
                    assert_eq!(q.read(&mut out, false).unwrap(), chunk);
                    assert_eq!(out, data);
                    assert_eq!(q.size(), 0);
                }
            }
        }
    }

    #[test]
    fn test_capacity_four_scenario() {
        let q = BoundedQueue::<i32>::new(4).unwrap();
        q.write(&[1, 2, 3]).unwrap();

        let mut two = [0; 2];
        assert_eq!(q.read(&mut two, false).unwrap(), 2);
        assert_eq!(two, [1, 2]);

        // Only 2 slots are free here, so the write below has to wait for
        // the reader to drain element 3 before it can finish.
        let q = Arc::new(q);
        let writer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.write(&[4, 5, 6]))
        };

        let mut four = [0; 4];
        assert_eq!(q.read(&mut four, true).unwrap(), 4);
        assert_eq!(four, [3, 4, 5, 6]);
        assert_eq!(writer.join().unwrap().unwrap(), 3);
    }

    #[test]
    fn test_write_fits_after_partial_read() {
        let q = BoundedQueue::<i32>::new(5).unwrap();
        q.write(&[1, 2, 3]).unwrap();
        let mut two = [0; 2];
        q.read(&mut two, false).unwrap();
        assert_eq!(q.free_space(), 3);
        assert_eq!(q.write(&[4, 5, 6]).unwrap(), 3);

        let mut four = [0; 4];
        assert_eq!(q.read(&mut four, false).unwrap(), 4);
        assert_eq!(four, [3, 4, 5, 6]);
    }

    #[test]
    fn test_nonblocking_read_on_empty_queue() {
        let q = BoundedQueue::<f32>::new(4).unwrap();
        let mut out = [0.0; 2];
        assert_eq!(q.read(&mut out, false).unwrap(), 0);
    }

    #[test]
    fn test_end_of_pipe_after_write_end_closes() {
        let q = BoundedQueue::<i32>::new(4).unwrap();
        q.write(&[9]).unwrap();
        q.close_write();

        let mut out = [0; 2];
        // Remaining data is still delivered
        assert_eq!(q.read(&mut out, true).unwrap(), 1);
        assert_eq!(out[0], 9);
        assert_eq!(q.read(&mut out, false), Err(QueueError::EndOfPipe));
        assert_eq!(q.read(&mut out, true), Err(QueueError::EndOfPipe));
    }

    #[test]
    fn test_read_after_read_end_closed_is_error() {
        let q = BoundedQueue::<i32>::new(4).unwrap();
        q.close_read();
        let mut out = [0; 1];
        assert_eq!(q.read(&mut out, false), Err(QueueError::ReadEndClosed));
        assert_eq!(q.write(&[1]), Err(QueueError::EndOfPipe));
    }

    #[test]
    fn test_write_after_write_end_closed_is_error() {
        let q = BoundedQueue::<i32>::new(4).unwrap();
        q.close_write();
        assert_eq!(q.write(&[1]), Err(QueueError::WriteEndClosed));
    }

    #[test]
    fn test_close_read_releases_blocked_writer() {
        let q = Arc::new(BoundedQueue::<i32>::new(3).unwrap());
        q.write(&[1, 2]).unwrap();

        let writer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.write(&[3]))
        };
        thread::sleep(Duration::from_millis(50));
        q.close_read();

        assert_eq!(writer.join().unwrap(), Err(QueueError::EndOfPipe));
    }

    #[test]
    fn test_clear_empties_and_releases_blocked_writer() {
        let q = Arc::new(BoundedQueue::<i32>::new(4).unwrap());
        q.write(&[1, 2, 3]).unwrap();

        let writer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.write(&[4, 5]))
        };
        thread::sleep(Duration::from_millis(50));
        q.clear();
        assert_eq!(q.size(), 0);

        assert_eq!(
            writer.join().unwrap(),
            Err(QueueError::Cleared { written: 0 })
        );
        assert_eq!(q.size(), 0);
        assert_eq!(q.write(&[7]).unwrap(), 1);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let q = BoundedQueue::<i32>::new(6).unwrap();
        q.write(&[10, 20, 30]).unwrap();

        let mut out = [0; 2];
        assert_eq!(q.peek(&mut out, false).unwrap(), 2);
        assert_eq!(out, [10, 20]);
        assert_eq!(q.size(), 3);

        let mut all = [0; 3];
        q.read(&mut all, false).unwrap();
        assert_eq!(all, [10, 20, 30]);
    }

    #[test]
    fn test_peek_larger_than_capacity_fails() {
        let q = BoundedQueue::<i32>::new(4).unwrap();
        let mut out = [0; 4];
        assert_eq!(
            q.peek(&mut out, false),
            Err(QueueError::PeekTooLarge {
                requested: 4,
                usable: 3
            })
        );
    }

    #[test]
    fn test_skip_discards() {
        let q = BoundedQueue::<i32>::new(8).unwrap();
        q.write(&[1, 2, 3, 4]).unwrap();
        assert_eq!(q.skip(3, false).unwrap(), 3);
        let mut out = [0; 1];
        q.read(&mut out, false).unwrap();
        assert_eq!(out, [4]);
        assert_eq!(q.skip(2, false).unwrap(), 0);
    }

    #[test]
    fn test_open_requires_a_closed_end() {
        let q = BoundedQueue::<i32>::new(4).unwrap();
        assert_eq!(q.open(), Err(QueueError::AlreadyOpen));

        q.write(&[1, 2]).unwrap();
        q.close_read();
        q.close_write();
        assert!(!q.is_read_open());
        q.open().unwrap();
        assert!(q.is_read_open() && q.is_write_open());
        assert_eq!(q.size(), 0);
    }

    #[test]
    fn test_blocking_read_waits_for_writer() {
        let q = Arc::new(BoundedQueue::<i32>::new(16).unwrap());
        let reader = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                let mut out = [0; 4];
                let n = q.read(&mut out, true).unwrap();
                (n, out)
            })
        };
        thread::sleep(Duration::from_millis(20));
        q.write(&[1, 2]).unwrap();
        thread::sleep(Duration::from_millis(20));
        q.write(&[3, 4]).unwrap();

        assert_eq!(reader.join().unwrap(), (4, [1, 2, 3, 4]));
    }

    #[test]
    fn test_write_larger_than_capacity_streams_through() {
        let q = Arc::new(BoundedQueue::<u32>::new(5).unwrap());
        let data: Vec<u32> = (0..100).collect();
        let writer = {
            let q = Arc::clone(&q);
            let data = data.clone();
            thread::spawn(move || q.write(&data))
        };

        let mut received = vec![0u32; 100];
        assert_eq!(q.read(&mut received, true).unwrap(), 100);
        assert_eq!(received, data);
        assert_eq!(writer.join().unwrap().unwrap(), 100);
    }

    #[test]
    fn test_try_read_skips_a_held_lock() {
        let q = BoundedQueue::<i32>::new(8).unwrap();
        q.write(&[1, 2, 3]).unwrap();

        let mut out = [0; 2];
        {
            let _held = q.lock();
            assert_eq!(q.try_read(&mut out), Ok(None));
            assert_eq!(q.try_size(), None);
        }
        assert_eq!(q.try_size(), Some(3));
        assert_eq!(q.try_read(&mut out), Ok(Some(2)));
        assert_eq!(out, [1, 2]);

        q.close_write();
        assert_eq!(q.try_read(&mut out), Ok(Some(1)));
        assert_eq!(q.try_read(&mut out), Err(QueueError::EndOfPipe));
    }

    #[test]
    fn test_wait_for_reader_released_by_empty_read() {
        let q = Arc::new(BoundedQueue::<i32>::new(8).unwrap());
        let waiter = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.wait_for_reader())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        let mut out = [0; 1];
        assert_eq!(q.try_read(&mut out), Ok(Some(0)));
        assert_eq!(waiter.join().unwrap(), Ok(()));

        // A read that came first still counts until the next clear
        assert_eq!(q.wait_for_reader(), Ok(()));
    }

    #[test]
    fn test_wait_for_reader_released_by_clear_and_close() {
        let q = Arc::new(BoundedQueue::<i32>::new(8).unwrap());
        let waiter = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.wait_for_reader())
        };
        thread::sleep(Duration::from_millis(50));
        q.clear();
        assert_eq!(waiter.join().unwrap(), Err(QueueError::Cleared { written: 0 }));

        let waiter = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.wait_for_reader())
        };
        thread::sleep(Duration::from_millis(50));
        q.close_read();
        assert_eq!(waiter.join().unwrap(), Err(QueueError::EndOfPipe));
    }
}
