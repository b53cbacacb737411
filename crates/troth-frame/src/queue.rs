use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use troth_core::{CompletionSource, PromiseStatus, SyncContext, context};

/// Errors reported by [`PromiseQueue::push`].
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("the promise has already been started")]
    AlreadyStarted,
    #[error("the queue is full (max {max})")]
    Full { max: usize },
}

struct QueueInner<T> {
    items: VecDeque<(u32, CompletionSource<T>)>,
    active: Option<(u32, CompletionSource<T>)>,
    suspended: bool,
    max_len: usize,
    context: Option<Arc<dyn SyncContext>>,
    empty_handlers: Vec<Arc<dyn Fn() + Send + Sync>>,
}

/// A single-lane FIFO of promises.
///
/// Elements are enqueued through their producer handle, since starting an
/// element is a producer-surface act. A pushed element moves to
/// `Scheduled` immediately and to `Running` when it reaches the head;
/// its completion (by whoever drives it) advances the queue. When a
/// marshalling context is configured, head starts are posted onto it so
/// dependent code always observes the transition on the expected thread.
pub struct PromiseQueue<T> {
    inner: Arc<Mutex<QueueInner<T>>>,
}

impl<T> Clone for PromiseQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> PromiseQueue<T> {
    /// An unbounded queue.
    pub fn new() -> Self {
        Self::with_limit(0)
    }

    /// A queue rejecting pushes beyond `max_len` live elements.
    pub fn bounded(max_len: usize) -> Self {
        Self::with_limit(max_len)
    }

    fn with_limit(max_len: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                items: VecDeque::new(),
                active: None,
                suspended: false,
                max_len,
                context: None,
                empty_handlers: Vec::new(),
            })),
        }
    }

    /// Configure the context head starts are posted onto.
    pub fn set_context(&self, context: Option<Arc<dyn SyncContext>>) {
        self.inner.lock().context = context;
    }

    /// Register a handler fired when the last promise completes.
    pub fn on_empty(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.inner.lock().empty_handlers.push(Arc::new(handler));
    }

    /// Queued plus running elements.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.items.len() + usize::from(inner.active.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.lock().suspended
    }

    /// Append a not-yet-started promise.
    pub fn push(&self, source: CompletionSource<T>) -> Result<(), QueueError> {
        let promise = source.promise();
        {
            let mut inner = self.inner.lock();
            if promise.status() != PromiseStatus::Created {
                return Err(QueueError::AlreadyStarted);
            }
            let occupied = inner.items.len() + usize::from(inner.active.is_some());
            if inner.max_len > 0 && occupied >= inner.max_len {
                return Err(QueueError::Full {
                    max: inner.max_len,
                });
            }
            let _ = source.try_set_scheduled();
            inner.items.push_back((promise.id(), source.clone()));
        }
        tracing::debug!(id = promise.id(), "promise queued");
        {
            // Completion drives the queue, wherever it comes from.
            let queue = self.clone();
            let key = promise.id();
            let _ = promise.add_done(move |_antecedent| queue.on_item_completed(key));
        }
        self.try_start_next();
        Ok(())
    }

    fn on_item_completed(&self, key: u32) {
        let fire_empty = {
            let mut inner = self.inner.lock();
            let mut known = false;
            if inner.active.as_ref().is_some_and(|(id, _)| *id == key) {
                inner.active = None;
                known = true;
            } else if let Some(index) = inner.items.iter().position(|(id, _)| *id == key) {
                // Completed while still queued; drop it from the lane.
                inner.items.remove(index);
                known = true;
            }
            known && inner.items.is_empty() && inner.active.is_none()
        };
        self.try_start_next();
        if fire_empty {
            self.fire_empty();
        }
    }

    fn try_start_next(&self) {
        let (head, bound) = {
            let mut inner = self.inner.lock();
            if inner.suspended || inner.active.is_some() {
                return;
            }
            let Some((id, source)) = inner.items.pop_front() else {
                return;
            };
            inner.active = Some((id, source.clone()));
            (source, inner.context.clone())
        };
        let start = move || {
            let _ = head.try_set_running();
        };
        match bound {
            Some(bound) if !context::is_current(&bound) => bound.post(Box::new(start)),
            _ => start(),
        }
    }

    /// Remove every pending promise, cancelling each. The running head,
    /// if any, is left to finish.
    pub fn cancel_all(&self) {
        let drained: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.items.drain(..).collect()
        };
        for (_, source) in &drained {
            let _ = source.try_set_cancelled();
        }
        let fire_empty = {
            let inner = self.inner.lock();
            !drained.is_empty() && inner.items.is_empty() && inner.active.is_none()
        };
        if fire_empty {
            self.fire_empty();
        }
    }

    /// Withhold head starts until [`resume`](Self::resume).
    pub fn suspend(&self) {
        self.inner.lock().suspended = true;
    }

    pub fn resume(&self) {
        {
            self.inner.lock().suspended = false;
        }
        self.try_start_next();
    }

    fn fire_empty(&self) {
        let handlers: Vec<_> = self.inner.lock().empty_handlers.clone();
        tracing::debug!("promise queue drained");
        for handler in handlers {
            handler();
        }
    }
}

impl<T: Send + Sync + 'static> Default for PromiseQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sources(count: usize) -> Vec<CompletionSource<u32>> {
        (0..count).map(|_| CompletionSource::new()).collect()
    }

    #[test_log::test]
    fn completions_advance_the_lane_in_fifo_order() {
        let queue = PromiseQueue::new();
        let lane = sources(3);
        let empty_fired = Arc::new(AtomicUsize::new(0));
        {
            let empty_fired = Arc::clone(&empty_fired);
            queue.on_empty(move || {
                empty_fired.fetch_add(1, Ordering::SeqCst);
            });
        }
        for source in &lane {
            queue.push(source.clone()).expect("push");
        }

        assert_eq!(lane[0].promise().status(), PromiseStatus::Running);
        assert_eq!(lane[1].promise().status(), PromiseStatus::Scheduled);
        assert_eq!(lane[2].promise().status(), PromiseStatus::Scheduled);

        assert!(lane[0].try_set_result(0));
        assert_eq!(lane[1].promise().status(), PromiseStatus::Running);
        assert!(lane[1].try_set_result(1));
        assert_eq!(lane[2].promise().status(), PromiseStatus::Running);
        assert_eq!(empty_fired.load(Ordering::SeqCst), 0);

        assert!(lane[2].try_set_result(2));
        assert!(queue.is_empty());
        assert_eq!(empty_fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn started_promises_are_rejected() {
        let queue = PromiseQueue::new();
        let source = CompletionSource::<u32>::new();
        assert!(source.try_set_running());

        assert_eq!(queue.push(source), Err(QueueError::AlreadyStarted));
    }

    #[test]
    fn a_bounded_queue_rejects_overflow() {
        let queue = PromiseQueue::bounded(2);
        let lane = sources(3);

        queue.push(lane[0].clone()).expect("first");
        queue.push(lane[1].clone()).expect("second");
        assert_eq!(
            queue.push(lane[2].clone()),
            Err(QueueError::Full { max: 2 })
        );

        // Completing the head frees a slot.
        assert!(lane[0].try_set_result(0));
        queue.push(lane[2].clone()).expect("third after drain");
    }

    #[test]
    fn a_suspended_queue_does_not_start_the_head() {
        let queue = PromiseQueue::new();
        queue.suspend();
        let source = CompletionSource::<u32>::new();
        queue.push(source.clone()).expect("push");

        assert_eq!(source.promise().status(), PromiseStatus::Scheduled);
        assert!(queue.is_suspended());

        queue.resume();
        assert_eq!(source.promise().status(), PromiseStatus::Running);
    }

    #[test]
    fn suspension_withholds_the_next_start_after_a_completion() {
        let queue = PromiseQueue::new();
        let lane = sources(2);
        for source in &lane {
            queue.push(source.clone()).expect("push");
        }

        queue.suspend();
        assert!(lane[0].try_set_result(0));
        assert_eq!(lane[1].promise().status(), PromiseStatus::Scheduled);

        queue.resume();
        assert_eq!(lane[1].promise().status(), PromiseStatus::Running);
    }

    #[test]
    fn cancel_all_cancels_pending_promises_only() {
        let queue = PromiseQueue::new();
        let lane = sources(3);
        for source in &lane {
            queue.push(source.clone()).expect("push");
        }

        queue.cancel_all();

        assert_eq!(lane[0].promise().status(), PromiseStatus::Running);
        assert!(lane[1].promise().is_cancelled());
        assert!(lane[2].promise().is_cancelled());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn an_element_completed_while_queued_is_skipped() {
        let queue = PromiseQueue::new();
        let lane = sources(3);
        for source in &lane {
            queue.push(source.clone()).expect("push");
        }

        // The second element settles before ever reaching the head.
        assert!(lane[1].try_set_result(1));
        assert!(lane[0].try_set_result(0));

        assert_eq!(lane[2].promise().status(), PromiseStatus::Running);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn head_starts_are_posted_onto_the_configured_context() {
        use crate::loop_context::LoopContext;

        let queue = PromiseQueue::new();
        let frame = LoopContext::new();
        queue.set_context(Some(frame.handle()));
        let source = CompletionSource::<u32>::new();
        queue.push(source.clone()).expect("push");

        // Not started until the loop pumps.
        assert_eq!(source.promise().status(), PromiseStatus::Scheduled);
        assert_eq!(frame.pump(), 1);
        assert_eq!(source.promise().status(), PromiseStatus::Running);
    }
}
