//! Chaining combinators: `continue_with`, `transform`, `then`, `catch`,
//! `finally`.
//!
//! All of them run through one engine: the output promise is created in
//! `Scheduled`, a structured continuation is installed on the
//! antecedent, and when the antecedent completes the output moves to
//! `Running` and the action decides its terminal state: directly
//! through the output's completion source, by returning an error, or by
//! chaining a nested promise. A continuation skipped by its options mask
//! cancels its output so waiting observers unblock.

use std::marker::PhantomData;
use std::sync::Arc;

use troth_types::{ContinuationOptions, Fault, FaultSet, PromiseError};

use crate::context::SyncContext;
use crate::promise::Promise;
use crate::slot::CompletionObserver;
use crate::source::CompletionSource;

/// Binds an antecedent completion to the output promise's source.
struct ChainLink<T, U, F> {
    body: F,
    output: CompletionSource<U>,
    _antecedent: PhantomData<fn(&Promise<T>)>,
}

impl<T, U, F> CompletionObserver<T> for ChainLink<T, U, F>
where
    T: Send + Sync + 'static,
    U: Send + Sync + 'static,
    F: FnOnce(&Promise<T>, &CompletionSource<U>) -> Result<(), Fault> + Send,
{
    fn completed(self: Box<Self>, antecedent: &Promise<T>) {
        let ChainLink { body, output, .. } = *self;
        let _ = output.try_set_running();
        if let Err(fault) = body(antecedent, &output) {
            let _ = output.try_set_fault(fault);
        }
    }

    fn skipped(self: Box<Self>) {
        let _ = self.output.try_set_cancelled();
    }
}

impl<T: Send + Sync + 'static> Promise<T> {
    /// The chaining engine. The action receives the completed antecedent
    /// and the output's completion source, and either completes the
    /// output itself or returns an error that faults it.
    ///
    /// Requesting cancellation on the output forwards the request to the
    /// antecedent.
    pub fn continue_with_source<U, F>(
        &self,
        body: F,
        options: ContinuationOptions,
        context: Option<Arc<dyn SyncContext>>,
    ) -> Promise<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&Promise<T>, &CompletionSource<U>) -> Result<(), Fault> + Send + 'static,
    {
        let output = CompletionSource::<U>::new();
        let _ = output.try_set_scheduled();
        {
            let antecedent = self.clone();
            output.on_cancel(move || {
                let _ = antecedent.cancel();
            });
        }
        let link = ChainLink {
            body,
            output: output.clone(),
            _antecedent: PhantomData,
        };
        self.add_observer(Box::new(link), options, context);
        output.promise()
    }

    /// Run `action` when this promise completes, with any outcome.
    /// The output succeeds when the action returns `Ok` and faults with
    /// the action's error otherwise.
    pub fn continue_with<F>(&self, action: F) -> Promise<()>
    where
        F: FnOnce(&Promise<T>) -> Result<(), Fault> + Send + 'static,
    {
        self.continue_with_opts(action, ContinuationOptions::default(), None)
    }

    /// [`continue_with`](Self::continue_with) with an options mask and an
    /// explicit marshalling context.
    pub fn continue_with_opts<F>(
        &self,
        action: F,
        options: ContinuationOptions,
        context: Option<Arc<dyn SyncContext>>,
    ) -> Promise<()>
    where
        F: FnOnce(&Promise<T>) -> Result<(), Fault> + Send + 'static,
    {
        self.continue_with_source(
            move |antecedent: &Promise<T>, output: &CompletionSource<()>| {
                action(antecedent)?;
                let _ = output.try_set_completed();
                Ok(())
            },
            options,
            context,
        )
    }

    /// Map the completed antecedent (whatever its outcome) to a value.
    pub fn transform<U, F>(&self, transform: F) -> Promise<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&Promise<T>) -> Result<U, Fault> + Send + 'static,
    {
        self.transform_opts(transform, ContinuationOptions::default(), None)
    }

    pub fn transform_opts<U, F>(
        &self,
        transform: F,
        options: ContinuationOptions,
        context: Option<Arc<dyn SyncContext>>,
    ) -> Promise<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&Promise<T>) -> Result<U, Fault> + Send + 'static,
    {
        self.continue_with_source(
            move |antecedent: &Promise<T>, output: &CompletionSource<U>| {
                let value = transform(antecedent)?;
                let _ = output.try_set_result(value);
                Ok(())
            },
            options,
            context,
        )
    }

    /// Map a successful result; faults and cancellations pass through to
    /// the output untouched and the mapping is not invoked.
    pub fn then<U, F>(&self, map: F) -> Promise<U>
    where
        T: Clone,
        U: Send + Sync + 'static,
        F: FnOnce(T) -> Result<U, Fault> + Send + 'static,
    {
        self.continue_with_source(
            move |antecedent: &Promise<T>, output: &CompletionSource<U>| {
                match antecedent.outcome() {
                    Ok(value) => {
                        let mapped = map(value)?;
                        let _ = output.try_set_result(mapped);
                    }
                    Err(PromiseError::Faulted(set)) | Err(PromiseError::Cancelled(set)) => {
                        let _ = output.try_set_fault_set(set);
                    }
                    Err(_) => {}
                }
                Ok(())
            },
            ContinuationOptions::default(),
            None,
        )
    }

    /// Like [`then`](Self::then), but the mapping produces a nested
    /// promise whose completion state is copied onto the output.
    pub fn then_chain<U, F>(&self, chain: F) -> Promise<U>
    where
        T: Clone,
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        self.continue_with_source(
            move |antecedent: &Promise<T>, output: &CompletionSource<U>| {
                match antecedent.outcome() {
                    Ok(value) => {
                        let nested = chain(value);
                        let forward = output.clone();
                        let mirrored = nested.clone();
                        nested.when_done_unguarded(Box::new(move || {
                            let _ = forward.try_copy_completion(&mirrored);
                        }));
                    }
                    Err(PromiseError::Faulted(set)) | Err(PromiseError::Cancelled(set)) => {
                        let _ = output.try_set_fault_set(set);
                    }
                    Err(_) => {}
                }
                Ok(())
            },
            ContinuationOptions::default(),
            None,
        )
    }

    /// Recover from a fault or cancellation; success passes through.
    pub fn catch<F>(&self, recover: F) -> Promise<T>
    where
        T: Clone,
        F: FnOnce(&FaultSet) -> Result<T, Fault> + Send + 'static,
    {
        self.continue_with_source(
            move |antecedent: &Promise<T>, output: &CompletionSource<T>| {
                match antecedent.outcome() {
                    Ok(value) => {
                        let _ = output.try_set_result(value);
                    }
                    Err(PromiseError::Faulted(set)) | Err(PromiseError::Cancelled(set)) => {
                        let recovered = recover(&set)?;
                        let _ = output.try_set_result(recovered);
                    }
                    Err(_) => {}
                }
                Ok(())
            },
            ContinuationOptions::default(),
            None,
        )
    }

    /// Run `action` irrespective of outcome; the output mirrors the
    /// antecedent.
    pub fn finally<F>(&self, action: F) -> Promise<T>
    where
        T: Clone,
        F: FnOnce() + Send + 'static,
    {
        self.continue_with_source(
            move |antecedent: &Promise<T>, output: &CompletionSource<T>| {
                action();
                let _ = output.try_copy_completion(antecedent);
                Ok(())
            },
            ContinuationOptions::default(),
            None,
        )
    }
}
