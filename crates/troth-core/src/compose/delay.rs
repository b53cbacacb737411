use std::time::Duration;

use crate::promise::{Promise, completed};
use crate::source::CompletionSource;
use crate::worker;

/// A promise that completes after `duration`.
///
/// Zero yields the shared already-completed promise. `Duration::MAX` is
/// the infinite marker: no timer is scheduled and the promise never
/// fires, but it remains cancellable. Otherwise a one-shot timer runs on
/// the worker; `cancel()` aborts it and cancels the promise.
pub fn delay(duration: Duration) -> Promise<()> {
    if duration.is_zero() {
        return completed();
    }
    let source = CompletionSource::<()>::new();
    let _ = source.try_set_running();
    if duration == Duration::MAX {
        let this = source.clone();
        source.on_cancel(move || {
            let _ = this.try_set_cancelled();
        });
        return source.promise();
    }
    let timer = {
        let source = source.clone();
        worker::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = source.try_set_completed();
        })
    };
    {
        let this = source.clone();
        source.on_cancel(move || {
            timer.abort();
            let _ = this.try_set_cancelled();
        });
    }
    tracing::trace!(?duration, "delay scheduled");
    source.promise()
}
