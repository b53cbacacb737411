//! The host thread pool and timer wheel.
//!
//! Work is spawned onto the ambient tokio runtime when the caller is
//! already inside one; otherwise a small process-wide fallback runtime is
//! built on first use. Both `delay` timers and asynchronous continuation
//! dispatch run here.

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

use crate::context::Job;

static FALLBACK: OnceLock<Runtime> = OnceLock::new();

fn fallback() -> &'static Runtime {
    FALLBACK.get_or_init(|| {
        // A lazy global has no caller to report to; construction only
        // fails on resource exhaustion.
        Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("troth-worker")
            .enable_time()
            .build()
            .expect("failed to build the shared worker runtime")
    })
}

pub(crate) fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => handle.spawn(future),
        Err(_) => fallback().spawn(future),
    }
}

/// Marshal a continuation off the completing thread.
pub(crate) fn post_job(job: Job) {
    let _ = spawn(async move { job() });
}
