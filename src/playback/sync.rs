//! Frame availability signal between the decode pump and the consumer.
//!
//! A single lock guards the availability flag and the hand-over from the pool.
//! The pump publishes a frame to the pool while holding it and only then sets
//! the flag; the consumer resets the flag and takes the latest frame while
//! holding it. A true flag therefore always has a frame behind it.
//!
//! Lock order is signal, then pool.

use std::time::Instant;
use parking_lot::{Condvar, Mutex};
use crate::pool::{Frame, FramePool};

/// How long `take_latest` may block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Until a frame arrives or the signal is closed
    Forever,
    /// Until a frame arrives, the signal is closed, or the deadline passes
    Until(Instant),
    /// Only take a frame that is already available
    Never,
}

#[derive(Debug, Default)]
struct SignalState {
    available: bool,
    closed: bool,
}

/// Availability flag with wait/notify and cancellation
#[derive(Debug, Default)]
pub struct FrameSignal {
    state: Mutex<SignalState>,
    changed: Condvar,
}

impl FrameSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `render` under the signal lock and mark a frame available if it succeeds
    pub fn publish<E>(&self, render: impl FnOnce() -> Result<(), E>) -> Result<(), E> {
        let mut state = self.state.lock();
        render()?;
        state.available = true;
        Ok(())
    }

    /// Wake one waiting consumer
    pub fn notify(&self) {
        self.changed.notify_one();
    }

    /// Refuse further hand-overs and wake every waiter
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn is_available(&self) -> bool {
        self.state.lock().available
    }

    /// Wait for the flag, reset it and take the pool's newest unclaimed frame.
    ///
    /// Returns `None` once the signal is closed or the wait runs out.
    pub fn take_latest(&self, pool: &FramePool, wait: Wait) -> Option<Frame> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if state.available {
                state.available = false;
                if let Some(frame) = pool.acquire_latest_unclaimed() {
                    return Some(frame);
                }
            }
            match wait {
                Wait::Never => return None,
                Wait::Forever => self.changed.wait(&mut state),
                Wait::Until(deadline) => {
                    if Instant::now() >= deadline {
                        return None;
                    }
                    self.changed.wait_until(&mut state, deadline);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use crate::decode::track::PixelFormat;

    fn pool() -> FramePool {
        FramePool::new(4, 4, PixelFormat::Rgba8, 3).unwrap()
    }

    fn produce(signal: &FrameSignal, pool: &FramePool) -> u64 {
        let buffer = pool.surface().dequeue_buffer(Duration::ZERO).unwrap();
        let mut seq = 0;
        signal
            .publish(|| {
                seq = buffer.queue(0);
                Ok::<(), ()>(())
            })
            .unwrap();
        signal.notify();
        seq
    }

    #[test]
    fn test_publish_sets_flag_only_on_success() {
        let signal = FrameSignal::new();
        assert!(signal.publish(|| Err::<(), &str>("render failed")).is_err());
        assert!(!signal.is_available());

        assert!(signal.publish(|| Ok::<(), ()>(())).is_ok());
        assert!(signal.is_available());
    }

    #[test]
    fn test_take_resets_flag() {
        let signal = FrameSignal::new();
        let pool = pool();
        let seq = produce(&signal, &pool);

        let frame = signal.take_latest(&pool, Wait::Never).unwrap();
        assert_eq!(frame.seq(), seq);
        assert!(!signal.is_available());
        assert!(signal.take_latest(&pool, Wait::Never).is_none());
    }

    #[test]
    fn test_collapses_to_latest() {
        let signal = FrameSignal::new();
        let pool = pool();
        produce(&signal, &pool);
        let last = produce(&signal, &pool);

        let frame = signal.take_latest(&pool, Wait::Never).unwrap();
        assert_eq!(frame.seq(), last);
        drop(frame);
        assert!(signal.take_latest(&pool, Wait::Never).is_none());
    }

    #[test]
    fn test_deadline_expires() {
        let signal = FrameSignal::new();
        let pool = pool();
        let started = Instant::now();
        let deadline = started + Duration::from_millis(20);

        assert!(signal.take_latest(&pool, Wait::Until(deadline)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_waiter_wakes_on_publish() {
        let signal = Arc::new(FrameSignal::new());
        let pool = pool();

        let waiter = {
            let signal = Arc::clone(&signal);
            let pool = pool.clone();
            thread::spawn(move || signal.take_latest(&pool, Wait::Forever).map(|f| f.seq()))
        };
        thread::sleep(Duration::from_millis(20));
        let seq = produce(&signal, &pool);

        assert_eq!(waiter.join().unwrap(), Some(seq));
    }

    #[test]
    fn test_close_releases_waiter() {
        let signal = Arc::new(FrameSignal::new());
        let pool = pool();

        let waiter = {
            let signal = Arc::clone(&signal);
            let pool = pool.clone();
            thread::spawn(move || signal.take_latest(&pool, Wait::Forever).is_none())
        };
        thread::sleep(Duration::from_millis(20));
        signal.close();

        assert!(waiter.join().unwrap());
        assert!(signal.is_closed());
    }
}
