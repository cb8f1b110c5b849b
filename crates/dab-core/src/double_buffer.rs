//! Single-slot frame handoff between one producer and one consumer.
//!
//! The producer always writes into the inactive buffer and publishes it on
//! release. The consumer reads the most recently published frame. If the
//! producer publishes while the consumer is still reading, the finished frame
//! waits in the inactive buffer and becomes active as soon as the consumer
//! releases, unless the producer starts overwriting it first.

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct State {
    /// Index of the buffer the consumer reads.
    active: usize,
    /// A published frame is waiting in `active` and has not been acquired.
    is_ready: bool,
    /// The inactive buffer holds a complete frame that could not be swapped in
    /// because the consumer was reading.
    is_pending: bool,
    is_reading: bool,
    is_writing: bool,
    is_closed: bool,
}

pub struct DoubleBuffer<T> {
    length: usize,
    buffers: [Mutex<Vec<T>>; 2],
    state: Mutex<State>,
    cv_ready: Condvar,
}

impl<T: Clone + Default> DoubleBuffer<T> {
    pub fn new(length: usize) -> Self {
        Self {
            length,
            buffers: [
                Mutex::new(vec![T::default(); length]),
                Mutex::new(vec![T::default(); length]),
            ],
            state: Mutex::new(State::default()),
            cv_ready: Condvar::new(),
        }
    }
}

impl<T> DoubleBuffer<T> {
    /// Frame length in elements.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Producer side. Returns `None` once closed.
    ///
    /// A frame that is still waiting for the consumer to finish gets
    /// overwritten, which is how overrun drops frames.
    pub fn acquire_inactive_buffer(&self) -> Option<InactiveBuffer<'_, T>> {
        let index = {
            let mut state = self.lock_state();
            if state.is_closed {
                return None;
            }
            debug_assert!(!state.is_writing, "inactive buffer acquired twice");
            state.is_writing = true;
            state.is_pending = false;
            1 - state.active
        };
        Some(InactiveBuffer {
            owner: self,
            guard: Some(lock(&self.buffers[index])),
        })
    }

    fn release_inactive_buffer(&self) {
        let mut state = self.lock_state();
        state.is_writing = false;
        if state.is_reading {
            state.is_pending = true;
            return;
        }
        state.active = 1 - state.active;
        state.is_ready = true;
        drop(state);
        self.cv_ready.notify_one();
    }

    /// Consumer side. Blocks until a frame is published, returns `None` once
    /// closed.
    pub fn acquire_active_buffer(&self) -> Option<ActiveBuffer<'_, T>> {
        let index = {
            let mut state = self
                .cv_ready
                .wait_while(self.lock_state(), |s| !s.is_ready && !s.is_closed)
                .unwrap_or_else(PoisonError::into_inner);
            if state.is_closed {
                return None;
            }
            state.is_ready = false;
            state.is_reading = true;
            state.active
        };
        Some(ActiveBuffer {
            owner: self,
            guard: Some(lock(&self.buffers[index])),
        })
    }

    fn release_active_buffer(&self) {
        let mut state = self.lock_state();
        state.is_reading = false;
        if state.is_pending {
            state.is_pending = false;
            state.active = 1 - state.active;
            state.is_ready = true;
        }
    }

    /// Wakes every blocked caller. Later acquires return `None`.
    pub fn close(&self) {
        let mut state = self.lock_state();
        if state.is_closed {
            return;
        }
        state.is_closed = true;
        drop(state);
        self.cv_ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().is_closed
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Producer's view of the buffer being filled. Publishes on drop.
pub struct InactiveBuffer<'a, T> {
    owner: &'a DoubleBuffer<T>,
    guard: Option<MutexGuard<'a, Vec<T>>>,
}

impl<T> InactiveBuffer<'_, T> {
    pub fn release(self) {}
}

impl<T> Deref for InactiveBuffer<'_, T> {
    type Target = [T];
    fn deref(&self) -> &[T] {
        self.guard.as_deref().map(Vec::as_slice).unwrap_or_default()
    }
}

impl<T> DerefMut for InactiveBuffer<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.guard
            .as_deref_mut()
            .map(Vec::as_mut_slice)
            .unwrap_or_default()
    }
}

impl<T> Drop for InactiveBuffer<'_, T> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.owner.release_inactive_buffer();
    }
}

/// Consumer's view of the latest published frame. Released on drop.
pub struct ActiveBuffer<'a, T> {
    owner: &'a DoubleBuffer<T>,
    guard: Option<MutexGuard<'a, Vec<T>>>,
}

impl<T> ActiveBuffer<'_, T> {
    pub fn release(self) {}
}

impl<T> Deref for ActiveBuffer<'_, T> {
    type Target = [T];
    fn deref(&self) -> &[T] {
        self.guard.as_deref().map(Vec::as_slice).unwrap_or_default()
    }
}

impl<T> Drop for ActiveBuffer<'_, T> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.owner.release_active_buffer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn lockstep_consumer_sees_every_frame_in_order() {
        let db = Arc::new(DoubleBuffer::<u32>::new(16));
        let (tx, rx) = mpsc::channel::<()>();

        let consumer = {
            let db = db.clone();
            thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(buf) = db.acquire_active_buffer() {
                    assert!(buf.iter().all(|&v| v == buf[0]));
                    seen.push(buf[0]);
                    buf.release();
                    if tx.send(()).is_err() {
                        break;
                    }
                }
                seen
            })
        };

        for frame in 0..50u32 {
            let mut buf = db.acquire_inactive_buffer().expect("open");
            buf.fill(frame);
            buf.release();
            rx.recv_timeout(Duration::from_secs(5)).expect("consumer ack");
        }
        db.close();

        let seen = consumer.join().unwrap();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn slow_consumer_never_sees_a_torn_frame() {
        let db = Arc::new(DoubleBuffer::<u32>::new(256));

        let consumer = {
            let db = db.clone();
            thread::spawn(move || {
                let mut last = None;
                let mut count = 0usize;
                while let Some(buf) = db.acquire_active_buffer() {
                    let first = buf[0];
                    assert!(buf.iter().all(|&v| v == first), "torn frame {first}");
                    if let Some(prev) = last {
                        assert!(first > prev, "frame went backwards");
                    }
                    last = Some(first);
                    count += 1;
                    thread::sleep(Duration::from_micros(300));
                }
                count
            })
        };

        for frame in 1..=2000u32 {
            let mut buf = db.acquire_inactive_buffer().expect("open");
            for v in buf.iter_mut() {
                *v = frame;
            }
        }
        thread::sleep(Duration::from_millis(20));
        db.close();

        let count = consumer.join().unwrap();
        assert!(count >= 1);
        assert!(count < 2000);
    }

    #[test]
    fn close_unblocks_waiting_consumer() {
        let db = Arc::new(DoubleBuffer::<i16>::new(4));
        let consumer = {
            let db = db.clone();
            thread::spawn(move || db.acquire_active_buffer().is_none())
        };
        thread::sleep(Duration::from_millis(20));
        db.close();
        assert!(consumer.join().unwrap());
    }

    #[test]
    fn acquire_after_close_returns_none() {
        let db = DoubleBuffer::<i16>::new(4);
        db.close();
        db.close();
        assert!(db.is_closed());
        assert!(db.acquire_inactive_buffer().is_none());
        assert!(db.acquire_active_buffer().is_none());
    }

    #[test]
    fn pending_frame_becomes_active_after_consumer_release() {
        let db = DoubleBuffer::<u8>::new(2);
        db.acquire_inactive_buffer().unwrap().fill(1);

        let reading = db.acquire_active_buffer().unwrap();
        assert_eq!(&*reading, &[1, 1]);
        db.acquire_inactive_buffer().unwrap().fill(2);
        drop(reading);

        let next = db.acquire_active_buffer().unwrap();
        assert_eq!(&*next, &[2, 2]);
    }
}
