use std::cell::RefCell;
use std::sync::Arc;

/// A unit of work posted onto a context or the shared worker.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Abstraction of "run this closure on a specific thread or loop".
///
/// Implementations decide where and when posted jobs execute: a game
/// loop pumps them on its frame thread, a runtime-backed context hands
/// them to its thread pool. Dispatch compares contexts by handle
/// identity, so the same `Arc` must be used for registration and for
/// [`enter`].
pub trait SyncContext: Send + Sync {
    /// Queue `job` to run on this context. Must not block.
    fn post(&self, job: Job);
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<dyn SyncContext>>> = const { RefCell::new(None) };
}

/// The context installed on the calling thread, if any.
pub fn current() -> Option<Arc<dyn SyncContext>> {
    CURRENT.with(|cell| cell.borrow().clone())
}

/// Whether `context` is the one installed on the calling thread.
pub fn is_current(context: &Arc<dyn SyncContext>) -> bool {
    CURRENT.with(|cell| {
        cell.borrow()
            .as_ref()
            .is_some_and(|installed| Arc::ptr_eq(installed, context))
    })
}

/// Install `context` as the calling thread's current context for the
/// lifetime of the returned guard. Nested guards restore the previous
/// context on drop.
pub fn enter(context: Arc<dyn SyncContext>) -> ContextGuard {
    let previous = CURRENT.with(|cell| cell.borrow_mut().replace(context));
    ContextGuard { previous }
}

pub struct ContextGuard {
    previous: Option<Arc<dyn SyncContext>>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|cell| *cell.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingContext {
        jobs: Mutex<Vec<Job>>,
    }

    impl RecordingContext {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                jobs: Mutex::new(Vec::new()),
            })
        }
    }

    impl SyncContext for RecordingContext {
        fn post(&self, job: Job) {
            self.jobs.lock().push(job);
        }
    }

    #[test]
    fn no_context_is_installed_by_default() {
        assert!(current().is_none());
    }

    #[test]
    fn enter_installs_and_drop_restores() {
        let outer: Arc<dyn SyncContext> = RecordingContext::new();
        let inner: Arc<dyn SyncContext> = RecordingContext::new();

        let _outer_guard = enter(outer.clone());
        assert!(is_current(&outer));
        {
            let _inner_guard = enter(inner.clone());
            assert!(is_current(&inner));
            assert!(!is_current(&outer));
        }
        assert!(is_current(&outer));
    }

    #[test]
    fn identity_is_per_handle_not_per_type() {
        let first: Arc<dyn SyncContext> = RecordingContext::new();
        let second: Arc<dyn SyncContext> = RecordingContext::new();

        let _guard = enter(first.clone());
        assert!(is_current(&first));
        assert!(!is_current(&second));
    }
}
