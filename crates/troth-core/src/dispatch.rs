//! Invokes a stored continuation on the correct thread.
//!
//! The decision keys on the promise's run-continuations-asynchronously
//! flag, the entry's bound context, and the thread-local current context:
//!
//! | run-async | bound context           | action                      |
//! |-----------|-------------------------|-----------------------------|
//! | set       | present                 | post onto the context       |
//! | set       | absent                  | post onto the shared worker |
//! | clear     | absent or current       | invoke inline               |
//! | clear     | present, not current    | post onto the context       |

use std::sync::Arc;

use crate::context::{self, SyncContext};
use crate::promise::Promise;
use crate::slot::{Callback, Registration};
use crate::worker;

pub(crate) fn dispatch<T: Send + Sync + 'static>(
    antecedent: &Promise<T>,
    registration: Registration<T>,
) {
    let status = antecedent.status();
    debug_assert!(status.is_terminal());
    if !registration.options.should_run(status) {
        skip(registration);
        return;
    }
    let bound = registration.context.clone();
    match (antecedent.runs_continuations_asynchronously(), bound) {
        (true, Some(bound)) => post(bound, antecedent.clone(), registration),
        (true, None) => {
            let promise = antecedent.clone();
            worker::post_job(Box::new(move || invoke(&promise, registration)));
        }
        (false, None) => invoke(antecedent, registration),
        (false, Some(bound)) => {
            if context::is_current(&bound) {
                invoke(antecedent, registration);
            } else {
                post(bound, antecedent.clone(), registration);
            }
        }
    }
}

fn post<T: Send + Sync + 'static>(
    bound: Arc<dyn SyncContext>,
    promise: Promise<T>,
    registration: Registration<T>,
) {
    bound.post(Box::new(move || invoke(&promise, registration)));
}

/// Interpret the entry by capability tag.
fn invoke<T: Send + Sync + 'static>(promise: &Promise<T>, registration: Registration<T>) {
    match registration.callback {
        Callback::Done(callback) => callback(promise),
        Callback::Resume(callback) => callback(),
        Callback::Observer(observer) => observer.completed(promise),
        Callback::Handler(callback) => callback(promise, &promise.completed_args()),
        Callback::Progress(callback) => callback(1.0),
    }
}

/// The entry's options mask excluded the terminal status. Structured
/// continuations get their skip hook (which cancels their output so
/// waiting observers unblock); bare delegates are simply not run.
fn skip<T>(registration: Registration<T>) {
    match registration.callback {
        Callback::Observer(observer) => observer.skipped(),
        _ => tracing::trace!("continuation skipped by its options mask"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Job;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use troth_types::{ContinuationOptions, CreationOptions, Fault, FaultKind};

    struct QueueContext {
        jobs: Mutex<Vec<Job>>,
    }

    impl QueueContext {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                jobs: Mutex::new(Vec::new()),
            })
        }

        fn run_all(&self) -> usize {
            let jobs: Vec<_> = std::mem::take(&mut *self.jobs.lock());
            let count = jobs.len();
            for job in jobs {
                job();
            }
            count
        }
    }

    impl SyncContext for QueueContext {
        fn post(&self, job: Job) {
            self.jobs.lock().push(job);
        }
    }

    fn pending() -> Promise<()> {
        Promise::pending(CreationOptions::default(), None, None)
    }

    #[test]
    fn inline_dispatch_without_a_bound_context() {
        let promise = pending();
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            promise
                .add_resume(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                })
                .expect("registration");
        }

        assert!(promise.try_complete_result((), false));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bound_context_receives_the_continuation_when_not_current() {
        let promise = pending();
        let queue = QueueContext::new();
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            promise
                .add_resume_with(
                    move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                    },
                    ContinuationOptions::default(),
                    Some(queue.clone() as Arc<dyn SyncContext>),
                )
                .expect("registration");
        }

        assert!(promise.try_complete_result((), false));
        // Completion did not run it; the context pump does.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.run_all(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bound_context_is_invoked_inline_when_already_current() {
        let promise = pending();
        let queue = QueueContext::new();
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            promise
                .add_resume_with(
                    move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                    },
                    ContinuationOptions::default(),
                    Some(queue.clone() as Arc<dyn SyncContext>),
                )
                .expect("registration");
        }

        let _guard = context::enter(queue.clone() as Arc<dyn SyncContext>);
        assert!(promise.try_complete_result((), false));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.run_all(), 0);
    }

    #[test]
    fn capture_context_picks_up_the_registering_threads_context() {
        let promise = pending();
        let queue = QueueContext::new();
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let _guard = context::enter(queue.clone() as Arc<dyn SyncContext>);
            let calls = Arc::clone(&calls);
            promise
                .add_resume_with(
                    move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                    },
                    ContinuationOptions::CAPTURE_CONTEXT,
                    None,
                )
                .expect("registration");
        }

        // Completing outside the context defers to it.
        assert!(promise.try_complete_result((), false));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.run_all(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn without_capture_nothing_is_captured_silently() {
        let promise = pending();
        let queue = QueueContext::new();
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let _guard = context::enter(queue.clone() as Arc<dyn SyncContext>);
            let calls = Arc::clone(&calls);
            promise
                .add_resume(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                })
                .expect("registration");
        }

        assert!(promise.try_complete_result((), false));
        // Ran inline on the completing thread; the context saw nothing.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.run_all(), 0);
    }

    #[test_log::test]
    fn run_async_flag_posts_even_without_a_bound_context() {
        let promise = Promise::<()>::pending(
            CreationOptions::RUN_CONTINUATIONS_ASYNCHRONOUSLY,
            None,
            None,
        );
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            promise
                .add_resume(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                })
                .expect("registration");
        }

        assert!(promise.try_complete_result((), false));
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while calls.load(Ordering::SeqCst) == 0 {
            assert!(
                std::time::Instant::now() < deadline,
                "worker never ran the continuation"
            );
            std::thread::yield_now();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn masked_bare_delegate_is_skipped_silently() {
        let promise = Promise::<i32>::pending(CreationOptions::default(), None, None);
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            promise
                .add_done_with(
                    move |_antecedent| {
                        calls.fetch_add(1, Ordering::SeqCst);
                    },
                    ContinuationOptions::ONLY_ON_RAN_TO_COMPLETION,
                    None,
                )
                .expect("registration");
        }

        assert!(promise.try_complete_faults(
            troth_types::FaultSet::single(Fault::new(FaultKind::UserError, "boom")),
            false,
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
