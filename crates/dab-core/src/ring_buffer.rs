//! Bounded blocking FIFO shared by one writer thread and one reader thread.
//!
//! `close` is terminal. Blocked calls wake up and return short counts, and a
//! reader can still drain whatever was buffered before the close.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct Inner<T> {
    buf: Vec<T>,
    read_pos: usize,
    count: usize,
    is_closed: bool,
}

impl<T: Copy> Inner<T> {
    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn free(&self) -> usize {
        self.capacity() - self.count
    }

    fn push(&mut self, src: &[T]) -> usize {
        let n = src.len().min(self.free());
        let cap = self.capacity();
        let write_pos = (self.read_pos + self.count) % cap.max(1);
        let first = n.min(cap - write_pos);
        self.buf[write_pos..write_pos + first].copy_from_slice(&src[..first]);
        self.buf[..n - first].copy_from_slice(&src[first..n]);
        self.count += n;
        n
    }

    fn pop(&mut self, dst: &mut [T]) -> usize {
        let n = dst.len().min(self.count);
        let cap = self.capacity();
        let first = n.min(cap - self.read_pos);
        dst[..first].copy_from_slice(&self.buf[self.read_pos..self.read_pos + first]);
        dst[first..n].copy_from_slice(&self.buf[..n - first]);
        self.read_pos = (self.read_pos + n) % cap.max(1);
        self.count -= n;
        n
    }
}

pub struct ThreadedRingBuffer<T> {
    inner: Mutex<Inner<T>>,
    cv_readable: Condvar,
    cv_writable: Condvar,
}

impl<T: Copy + Default> ThreadedRingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: vec![T::default(); capacity],
                read_pos: 0,
                count: 0,
                is_closed: false,
            }),
            cv_readable: Condvar::new(),
            cv_writable: Condvar::new(),
        }
    }
}

impl<T: Copy> ThreadedRingBuffer<T> {
    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    /// Number of buffered elements.
    pub fn len(&self) -> usize {
        self.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_closed
    }

    /// Writes all of `src`, blocking while the buffer is full.
    ///
    /// Returns fewer than `src.len()` elements only when the buffer was closed.
    pub fn write(&self, src: &[T]) -> usize {
        let mut written = 0usize;
        let mut inner = self.lock();
        while written < src.len() {
            inner = self
                .cv_writable
                .wait_while(inner, |i| !i.is_closed && i.free() == 0)
                .unwrap_or_else(PoisonError::into_inner);
            if inner.is_closed {
                break;
            }
            written += inner.push(&src[written..]);
            self.cv_readable.notify_one();
        }
        written
    }

    /// Fills all of `dst`, blocking while the buffer is empty.
    ///
    /// Returns fewer than `dst.len()` elements only once the buffer is closed
    /// and drained. Callers must treat a short read as end of stream.
    pub fn read(&self, dst: &mut [T]) -> usize {
        let mut read = 0usize;
        let mut inner = self.lock();
        while read < dst.len() {
            inner = self
                .cv_readable
                .wait_while(inner, |i| !i.is_closed && i.count == 0)
                .unwrap_or_else(PoisonError::into_inner);
            if inner.count == 0 {
                break;
            }
            read += inner.pop(&mut dst[read..]);
            self.cv_writable.notify_one();
        }
        read
    }

    /// Writes as much of `src` as currently fits without blocking.
    pub fn try_write(&self, src: &[T]) -> usize {
        let mut inner = self.lock();
        if inner.is_closed {
            return 0;
        }
        let n = inner.push(src);
        drop(inner);
        if n > 0 {
            self.cv_readable.notify_one();
        }
        n
    }

    /// Reads whatever is buffered, up to `dst.len()`, without blocking.
    pub fn try_read(&self, dst: &mut [T]) -> usize {
        let mut inner = self.lock();
        let n = inner.pop(dst);
        drop(inner);
        if n > 0 {
            self.cv_writable.notify_one();
        }
        n
    }

    /// Writes all of `src` or nothing, waiting at most `timeout` for room.
    ///
    /// Returns `src.len()` on success and 0 when the deadline passed, the
    /// buffer closed, or `src` can never fit.
    pub fn try_write_for(&self, src: &[T], timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        if src.len() > inner.capacity() {
            return 0;
        }
        while !inner.is_closed && inner.free() < src.len() {
            let now = Instant::now();
            if now >= deadline {
                return 0;
            }
            let (guard, _) = self
                .cv_writable
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            inner = guard;
        }
        if inner.is_closed {
            return 0;
        }
        let n = inner.push(src);
        drop(inner);
        self.cv_readable.notify_one();
        n
    }

    /// Discards buffered elements.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.read_pos = 0;
        inner.count = 0;
        drop(inner);
        self.cv_writable.notify_all();
    }

    pub fn close(&self) {
        let mut inner = self.lock();
        inner.is_closed = true;
        drop(inner);
        self.cv_readable.notify_all();
        self.cv_writable.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
