use std::marker::PhantomData;

use troth_types::{CreationOptions, Fault, FaultSet, PromiseError, PromiseStatus};

use crate::promise::{Promise, PromiseHooks, UserState};

/// The producer half of a promise.
///
/// Holds the only surface that can move the promise through its
/// lifecycle; the observer handle is obtained from
/// [`promise`](Self::promise) and handed to callers. `try_*` operations
/// report a lost race as `false`; the strict `set_*` forms are one-line
/// wrappers that turn the same outcome into
/// [`PromiseError::InvalidTransition`].
pub struct CompletionSource<T> {
    promise: Promise<T>,
}

impl<T> Clone for CompletionSource<T> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

/// Fluent construction of a [`CompletionSource`] with non-default
/// creation options, user state, or lifecycle hooks.
pub struct SourceBuilder<T> {
    options: CreationOptions,
    user_state: Option<UserState>,
    hooks: Option<Box<dyn PromiseHooks>>,
    _result: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> SourceBuilder<T> {
    pub fn options(mut self, options: CreationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn user_state(mut self, user_state: UserState) -> Self {
        self.user_state = Some(user_state);
        self
    }

    pub fn hooks(mut self, hooks: impl PromiseHooks + 'static) -> Self {
        self.hooks = Some(Box::new(hooks));
        self
    }

    pub fn build(self) -> CompletionSource<T> {
        CompletionSource {
            promise: Promise::pending(self.options, self.user_state, self.hooks),
        }
    }
}

impl<T: Send + Sync + 'static> CompletionSource<T> {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> SourceBuilder<T> {
        SourceBuilder {
            options: CreationOptions::default(),
            user_state: None,
            hooks: None,
            _result: PhantomData,
        }
    }

    /// The observer handle.
    pub fn promise(&self) -> Promise<T> {
        self.promise.clone()
    }

    fn strict(&self, won: bool, target: PromiseStatus) -> Result<(), PromiseError> {
        if won {
            Ok(())
        } else {
            Err(PromiseError::InvalidTransition {
                from: self.promise.status(),
                to: target,
            })
        }
    }

    pub fn try_set_scheduled(&self) -> bool {
        self.promise.try_start(PromiseStatus::Scheduled)
    }

    pub fn set_scheduled(&self) -> Result<(), PromiseError> {
        let won = self.try_set_scheduled();
        self.strict(won, PromiseStatus::Scheduled)
    }

    pub fn try_set_running(&self) -> bool {
        self.promise.try_start(PromiseStatus::Running)
    }

    pub fn set_running(&self) -> Result<(), PromiseError> {
        let won = self.try_set_running();
        self.strict(won, PromiseStatus::Running)
    }

    pub fn try_set_result(&self, value: T) -> bool {
        self.promise.try_complete_result(value, false)
    }

    pub fn set_result(&self, value: T) -> Result<(), PromiseError> {
        let won = self.try_set_result(value);
        self.strict(won, PromiseStatus::RanToCompletion)
    }

    /// Complete with a single fault. A cancellation fault completes the
    /// promise as `Cancelled`.
    pub fn try_set_fault(&self, fault: Fault) -> bool {
        self.promise.try_complete_faults(FaultSet::single(fault), false)
    }

    pub fn set_fault(&self, fault: Fault) -> Result<(), PromiseError> {
        let won = self.try_set_fault(fault);
        self.strict(won, PromiseStatus::Faulted)
    }

    /// Complete with every fault in `faults`. An empty list is rejected
    /// before any transition; a cancellation anywhere in the list is
    /// promoted to primary and the promise completes as `Cancelled`.
    pub fn try_set_faults(&self, faults: Vec<Fault>) -> Result<bool, PromiseError> {
        let set = FaultSet::from_list(faults).ok_or(PromiseError::EmptyFaultList)?;
        Ok(self.promise.try_complete_faults(set, false))
    }

    pub fn set_faults(&self, faults: Vec<Fault>) -> Result<(), PromiseError> {
        let won = self.try_set_faults(faults)?;
        self.strict(won, PromiseStatus::Faulted)
    }

    pub(crate) fn try_set_fault_set(&self, set: FaultSet) -> bool {
        self.promise.try_complete_faults(set, false)
    }

    pub fn try_set_cancelled(&self) -> bool {
        self.promise.try_complete_cancelled(false)
    }

    pub fn set_cancelled(&self) -> Result<(), PromiseError> {
        let won = self.try_set_cancelled();
        self.strict(won, PromiseStatus::Cancelled)
    }

    /// Report progress. `false` once the promise has completed.
    pub fn try_set_progress(&self, value: f32) -> bool {
        self.promise.try_report_progress(value)
    }

    /// Opt the promise into cancellation: `hook` runs on the first
    /// `cancel()` request and is expected to drive the promise to
    /// `Cancelled` through this source.
    pub fn on_cancel(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.promise.set_cancel_hook(Box::new(hook));
    }

    /// Mirror a terminal antecedent onto this source: result, fault set,
    /// or cancellation, whichever the antecedent carries. `false` when
    /// the antecedent is not terminal or this promise already completed.
    pub(crate) fn try_copy_completion(&self, from: &Promise<T>) -> bool
    where
        T: Clone,
    {
        if !from.is_completed() {
            return false;
        }
        match from.outcome() {
            Ok(value) => self.try_set_result(value),
            Err(PromiseError::Faulted(set)) | Err(PromiseError::Cancelled(set)) => {
                self.try_set_fault_set(set)
            }
            Err(_) => false,
        }
    }
}

impl CompletionSource<()> {
    /// Complete the void promise successfully.
    pub fn try_set_completed(&self) -> bool {
        self.try_set_result(())
    }

    pub fn set_completed(&self) -> Result<(), PromiseError> {
        let won = self.try_set_completed();
        self.strict(won, PromiseStatus::RanToCompletion)
    }
}

impl<T: Send + Sync + 'static> Default for CompletionSource<T> {
    fn default() -> Self {
        Self::new()
    }
}
