//! Bridge between promises and the language's native futures.
//!
//! One direction is `IntoFuture`: awaiting a promise registers a waker
//! resumption and yields the outcome. The other is
//! [`from_future`]/[`from_try_future`]: the future runs on the worker
//! and settles a promise, with abort-on-cancel.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::task::{Context, Poll};

use troth_types::{Fault, PromiseError};

use crate::promise::Promise;
use crate::slot::ContinuationId;
use crate::source::CompletionSource;
use crate::worker;

/// The awaiter for a promise. Re-registers its waker on every poll and
/// drops the stale registration first, so a future polled from multiple
/// wakers never leaks entries.
pub struct PromiseFuture<T> {
    promise: Promise<T>,
    registered: Option<ContinuationId>,
}

impl<T: Clone + Send + Sync + 'static> Future for PromiseFuture<T> {
    type Output = Result<T, PromiseError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.promise.is_completed() {
            return Poll::Ready(self.promise.outcome());
        }
        if let Some(previous) = self.registered.take() {
            self.promise.remove_continuation(previous);
        }
        let waker = cx.waker().clone();
        // A completion racing this registration dispatches the wake
        // inline, so the executor re-polls and hits the ready path.
        match self.promise.add_resume(move || waker.wake()) {
            Ok(id) => {
                self.registered = Some(id);
                Poll::Pending
            }
            Err(error) => Poll::Ready(Err(error)),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> IntoFuture for Promise<T> {
    type Output = Result<T, PromiseError>;
    type IntoFuture = PromiseFuture<T>;

    fn into_future(self) -> PromiseFuture<T> {
        PromiseFuture {
            promise: self,
            registered: None,
        }
    }
}

/// Run `future` on the worker and expose it as a promise. The promise is
/// cancellable: `cancel()` aborts the task.
pub fn from_future<T, F>(future: F) -> Promise<T>
where
    T: Send + Sync + 'static,
    F: Future<Output = T> + Send + 'static,
{
    let source = CompletionSource::<T>::new();
    let _ = source.try_set_running();
    let task = {
        let source = source.clone();
        worker::spawn(async move {
            let value = future.await;
            let _ = source.try_set_result(value);
        })
    };
    {
        let this = source.clone();
        source.on_cancel(move || {
            task.abort();
            let _ = this.try_set_cancelled();
        });
    }
    source.promise()
}

/// Like [`from_future`] for fallible futures: an `Err` faults the
/// promise (a cancellation fault cancels it).
pub fn from_try_future<T, F>(future: F) -> Promise<T>
where
    T: Send + Sync + 'static,
    F: Future<Output = Result<T, Fault>> + Send + 'static,
{
    let source = CompletionSource::<T>::new();
    let _ = source.try_set_running();
    let task = {
        let source = source.clone();
        worker::spawn(async move {
            match future.await {
                Ok(value) => {
                    let _ = source.try_set_result(value);
                }
                Err(fault) => {
                    let _ = source.try_set_fault(fault);
                }
            }
        })
    };
    {
        let this = source.clone();
        source.on_cancel(move || {
            task.abort();
            let _ = this.try_set_cancelled();
        });
    }
    source.promise()
}
