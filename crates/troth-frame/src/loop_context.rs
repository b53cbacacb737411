use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use troth_core::context::{self, Job, SyncContext};

use crate::update_source::{Subscription, UpdateSource};

struct LoopShared {
    jobs: Mutex<VecDeque<Job>>,
}

impl SyncContext for LoopShared {
    fn post(&self, job: Job) {
        self.jobs.lock().push_back(job);
    }
}

/// The game-loop synchronization context: continuations posted onto it
/// queue up until the owning thread pumps them.
///
/// While [`pump`](Self::pump) runs, the context is installed as the
/// thread's current one, so continuations completing further promises
/// bound to this context run inline instead of re-queueing.
#[derive(Clone)]
pub struct LoopContext {
    shared: Arc<LoopShared>,
}

impl LoopContext {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(LoopShared {
                jobs: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// The handle to bind continuations to. Identity is per-handle: use
    /// this same handle for registration and dispatch comparison.
    pub fn handle(&self) -> Arc<dyn SyncContext> {
        self.shared.clone()
    }

    pub fn pending(&self) -> usize {
        self.shared.jobs.lock().len()
    }

    /// Run queued jobs on the calling thread until the queue drains,
    /// including jobs posted by the jobs themselves. Returns how many
    /// ran.
    pub fn pump(&self) -> usize {
        let _guard = context::enter(self.handle());
        let mut ran = 0;
        loop {
            let job = self.shared.jobs.lock().pop_front();
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => break,
            }
        }
        ran
    }

    /// Pump once per tick of `source`.
    pub fn attach(&self, source: &UpdateSource) -> Subscription {
        let pump = self.clone();
        source.subscribe_frame(move |_dt| {
            pump.pump();
        })
    }
}

impl Default for LoopContext {
    fn default() -> Self {
        Self::new()
    }
}
