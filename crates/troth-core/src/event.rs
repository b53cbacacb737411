use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// One-shot event backing the lazy wait handle.
///
/// Signalled exactly once, at completion; waiters registered after the
/// signal return immediately.
pub(crate) struct Event {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self {
            signalled: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    pub fn signal(&self) {
        let mut signalled = self.signalled.lock();
        *signalled = true;
        self.condvar.notify_all();
    }

    pub fn wait(&self) {
        let mut signalled = self.signalled.lock();
        while !*signalled {
            self.condvar.wait(&mut signalled);
        }
    }

    /// Returns `false` if the timeout elapsed before the signal.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signalled = self.signalled.lock();
        while !*signalled {
            if self.condvar.wait_until(&mut signalled, deadline).timed_out() {
                return *signalled;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn wait_returns_once_signalled() {
        let event = Arc::new(Event::new());
        let signaller = Arc::clone(&event);

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            signaller.signal();
        });
        event.wait();
        handle.join().expect("signaller panicked");
    }

    #[test]
    fn wait_after_signal_is_immediate() {
        let event = Event::new();
        event.signal();

        event.wait();
        assert!(event.wait_for(Duration::from_millis(1)));
    }

    #[test]
    fn wait_for_times_out_without_signal() {
        let event = Event::new();

        assert!(!event.wait_for(Duration::from_millis(5)));
    }
}
