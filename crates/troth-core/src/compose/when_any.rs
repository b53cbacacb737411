use troth_types::PromiseError;

use crate::promise::Promise;
use crate::source::CompletionSource;

/// A promise that succeeds with the first antecedent to complete.
///
/// The winning antecedent handle is the result; the winner's own
/// outcome (success, fault, or cancellation) is read off the handle.
/// Losers run on, their outcomes discarded. An empty input is rejected at
/// construction with [`PromiseError::EmptyOperationList`]. Requesting
/// cancellation on the output forwards the request to every antecedent.
pub fn when_any<T>(operations: Vec<Promise<T>>) -> Result<Promise<Promise<T>>, PromiseError>
where
    T: Send + Sync + 'static,
{
    if operations.is_empty() {
        return Err(PromiseError::EmptyOperationList);
    }
    tracing::trace!(count = operations.len(), "when_any installed");
    let source = CompletionSource::<Promise<T>>::new();
    let _ = source.try_set_running();
    {
        let operations = operations.clone();
        source.on_cancel(move || {
            for operation in &operations {
                let _ = operation.cancel();
            }
        });
    }
    for operation in &operations {
        let source = source.clone();
        let winner = operation.clone();
        operation.when_done_unguarded(Box::new(move || {
            // First completion wins; the rest lose the race here.
            let _ = source.try_set_result(winner);
        }));
    }
    Ok(source.promise())
}
