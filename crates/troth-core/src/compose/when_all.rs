use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use troth_types::{Fault, PromiseError};

use crate::promise::{AnyPromise, Promise, completed};
use crate::source::CompletionSource;

/// A promise that completes when every antecedent has completed.
///
/// Succeeds iff every antecedent succeeded. Otherwise the output faults,
/// aggregating the non-cancellation faults of all antecedents in
/// antecedent order; if the only failures were cancellations, the output
/// is cancelled instead. An empty input yields the shared
/// already-completed promise. Requesting cancellation on the output
/// forwards the request to every antecedent.
pub fn when_all<I>(operations: I) -> Promise<()>
where
    I: IntoIterator<Item = Arc<dyn AnyPromise>>,
{
    let operations: Vec<Arc<dyn AnyPromise>> = operations.into_iter().collect();
    if operations.is_empty() {
        return completed();
    }
    tracing::trace!(count = operations.len(), "when_all installed");
    let source = CompletionSource::<()>::new();
    let _ = source.try_set_running();
    {
        let operations = operations.clone();
        source.on_cancel(move || {
            for operation in &operations {
                let _ = operation.request_cancel();
            }
        });
    }
    let pending = Arc::new(AtomicUsize::new(operations.len()));
    // The antecedent list stays alive inside the callbacks until the
    // last completion settles the output.
    let operations = Arc::new(operations);
    for index in 0..operations.len() {
        let pending = Arc::clone(&pending);
        let retained = Arc::clone(&operations);
        let source = source.clone();
        operations[index].when_done(Box::new(move || {
            if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                settle(&source, &retained);
            }
        }));
    }
    source.promise()
}

fn settle(source: &CompletionSource<()>, operations: &[Arc<dyn AnyPromise>]) {
    let mut faults: Vec<Fault> = Vec::new();
    let mut cancelled = false;
    for operation in operations {
        if let Some(set) = operation.fault_set() {
            for fault in set.iter() {
                if fault.is_cancellation() {
                    cancelled = true;
                } else {
                    faults.push(fault.clone());
                }
            }
        }
    }
    if !faults.is_empty() {
        let _ = source.try_set_faults(faults);
    } else if cancelled {
        let _ = source.try_set_cancelled();
    } else {
        let _ = source.try_set_completed();
    }
}

/// Typed `when_all`: succeeds with every antecedent's result in
/// antecedent order. Failure aggregation matches [`when_all`].
pub fn when_all_results<T>(operations: Vec<Promise<T>>) -> Promise<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    if operations.is_empty() {
        return Promise::from_result(Vec::new());
    }
    let source = CompletionSource::<Vec<T>>::new();
    let _ = source.try_set_running();
    {
        let operations = operations.clone();
        source.on_cancel(move || {
            for operation in &operations {
                let _ = operation.cancel();
            }
        });
    }
    let pending = Arc::new(AtomicUsize::new(operations.len()));
    let operations = Arc::new(operations);
    for index in 0..operations.len() {
        let pending = Arc::clone(&pending);
        let retained = Arc::clone(&operations);
        let source = source.clone();
        operations[index].when_done_unguarded(Box::new(move || {
            if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                settle_results(&source, &retained);
            }
        }));
    }
    source.promise()
}

fn settle_results<T>(source: &CompletionSource<Vec<T>>, operations: &[Promise<T>])
where
    T: Clone + Send + Sync + 'static,
{
    let mut faults: Vec<Fault> = Vec::new();
    let mut cancelled = false;
    let mut results = Vec::with_capacity(operations.len());
    for operation in operations {
        match operation.outcome() {
            Ok(value) => results.push(value),
            Err(PromiseError::Faulted(set)) | Err(PromiseError::Cancelled(set)) => {
                for fault in set.iter() {
                    if fault.is_cancellation() {
                        cancelled = true;
                    } else {
                        faults.push(fault.clone());
                    }
                }
            }
            Err(_) => {}
        }
    }
    if !faults.is_empty() {
        let _ = source.try_set_faults(faults);
    } else if cancelled {
        let _ = source.try_set_cancelled();
    } else {
        let _ = source.try_set_result(results);
    }
}
