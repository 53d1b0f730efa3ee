//! Shutdown drain barrier.
//!
//! Every externally driven operation (archiving a block, a compression
//! run, one reap pass) holds a [`LatchGuard`] for its duration. Shutdown
//! calls [`ServerLatch::wait`] to drain them before closing the stores
//! underneath.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

#[derive(Default)]
struct LatchInner {
    count: Mutex<usize>,
    drained: Condvar,
}

/// A cloneable wait group. All clones share one counter.
#[derive(Clone, Default)]
pub struct ServerLatch {
    inner: Arc<LatchInner>,
}

impl ServerLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one in-flight operation; the returned guard releases it
    /// on drop.
    pub fn guard(&self) -> LatchGuard {
        *self.inner.count.lock() += 1;
        LatchGuard {
            latch: self.clone(),
        }
    }

    fn release(&self) {
        let mut count = self.inner.count.lock();
        *count -= 1;
        if *count == 0 {
            self.inner.drained.notify_all();
        }
    }

    /// Block until no guards are outstanding.
    pub fn wait(&self) {
        let mut count = self.inner.count.lock();
        while *count > 0 {
            self.inner.drained.wait(&mut count);
        }
    }

    pub fn in_flight(&self) -> usize {
        *self.inner.count.lock()
    }
}

/// RAII handle for one in-flight operation.
pub struct LatchGuard {
    latch: ServerLatch,
}

impl Drop for LatchGuard {
    fn drop(&mut self) {
        self.latch.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_guard_releases_on_drop() {
        let latch = ServerLatch::new();
        {
            let _a = latch.guard();
            let _b = latch.guard();
            assert_eq!(latch.in_flight(), 2);
        }
        assert_eq!(latch.in_flight(), 0);
        latch.wait();
    }

    #[test]
    fn test_wait_blocks_until_drained() {
        let latch = ServerLatch::new();
        let guard = latch.guard();
        let waiter = latch.clone();
        let handle = thread::spawn(move || waiter.wait());
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        drop(guard);
        handle.join().unwrap();
    }
}
