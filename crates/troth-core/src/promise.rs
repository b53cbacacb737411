use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use troth_types::{
    ContinuationOptions, CreationOptions, Fault, FaultKind, FaultSet, PromiseError, PromiseStatus,
};

use crate::context::{self, SyncContext};
use crate::dispatch;
use crate::event::Event;
use crate::slot::{Callback, CompletionObserver, ContinuationId, ContinuationSlot, Registration};
use crate::state::{self, StateWord};

static NEXT_PROMISE_ID: AtomicU32 = AtomicU32::new(1);

/// Opaque user handle attached at construction and carried through to
/// completed-event handlers.
pub type UserState = Arc<dyn Any + Send + Sync>;

/// Observation points invoked synchronously on the transitioning thread.
///
/// Install through the completion-source builder. All methods default to
/// no-ops; the built-in completion behavior (drain continuations, final
/// progress, signal the wait handle) always runs and cannot be replaced.
pub trait PromiseHooks: Send + Sync {
    fn status_changed(&self, _status: PromiseStatus) {}
    fn started(&self) {}
    fn completed(&self, _status: PromiseStatus) {}
}

/// Synthesized arguments handed to completed-event handlers.
pub struct CompletedArgs {
    /// The failure payload, when the promise did not succeed.
    pub fault: Option<FaultSet>,
    /// Whether the terminal status is `Cancelled`.
    pub cancelled: bool,
    /// The user handle attached at construction.
    pub user_state: Option<UserState>,
}

pub(crate) struct Inner<T> {
    state: StateWord,
    slot: ContinuationSlot<T>,
    fault: OnceLock<FaultSet>,
    result: OnceLock<T>,
    progress_bits: AtomicU32,
    id: OnceLock<u32>,
    user_state: Option<UserState>,
    wait: Mutex<Option<Arc<Event>>>,
    cancel_hook: OnceLock<Box<dyn Fn() + Send + Sync>>,
    hooks: Option<Box<dyn PromiseHooks>>,
}

/// Observable handle to the eventual completion of an asynchronous
/// computation.
///
/// Cheap to clone; every clone observes the same underlying state. The
/// producer surface lives on [`CompletionSource`](crate::CompletionSource);
/// this type carries the observer surface (status queries, blocking
/// waits, continuation registration, cancellation requests) plus the
/// chaining combinators.
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.id())
            .field("status", &self.status())
            .finish()
    }
}

impl<T> Promise<T> {
    pub(crate) fn pending(
        options: CreationOptions,
        user_state: Option<UserState>,
        hooks: Option<Box<dyn PromiseHooks>>,
    ) -> Self {
        let mut flags = 0;
        if options.contains(CreationOptions::RUN_CONTINUATIONS_ASYNCHRONOUSLY) {
            flags |= state::RUN_CONTINUATIONS_ASYNC;
        }
        Self {
            inner: Arc::new(Inner {
                state: StateWord::new(flags),
                slot: ContinuationSlot::new(),
                fault: OnceLock::new(),
                result: OnceLock::new(),
                progress_bits: AtomicU32::new(0),
                id: OnceLock::new(),
                user_state,
                wait: Mutex::new(None),
                cancel_hook: OnceLock::new(),
                hooks,
            }),
        }
    }

    fn seeded(
        status: PromiseStatus,
        result: Option<T>,
        fault: Option<FaultSet>,
        extra_flags: u32,
    ) -> Self {
        let inner = Inner {
            state: StateWord::sealed(status, extra_flags),
            slot: ContinuationSlot::sealed(),
            fault: OnceLock::new(),
            result: OnceLock::new(),
            progress_bits: AtomicU32::new(0),
            id: OnceLock::new(),
            user_state: None,
            wait: Mutex::new(None),
            cancel_hook: OnceLock::new(),
            hooks: None,
        };
        if let Some(value) = result {
            let _ = inner.result.set(value);
        }
        if let Some(set) = fault {
            let _ = inner.fault.set(set);
        }
        Self {
            inner: Arc::new(inner),
        }
    }

    /// An already-succeeded promise carrying `value`.
    pub fn from_result(value: T) -> Self {
        Self::seeded(PromiseStatus::RanToCompletion, Some(value), None, 0)
    }

    /// An already-completed promise carrying `fault`. A cancellation
    /// fault yields a `Cancelled` promise, anything else `Faulted`.
    pub fn from_fault(fault: Fault) -> Self {
        Self::from_fault_set(FaultSet::single(fault))
    }

    /// An already-completed promise carrying every fault in `faults`.
    ///
    /// A cancellation anywhere in the list is promoted to primary and
    /// the promise completes as `Cancelled`. An empty list is rejected
    /// before any promise is built.
    pub fn from_faults(faults: Vec<Fault>) -> Result<Self, PromiseError> {
        FaultSet::from_list(faults)
            .map(Self::from_fault_set)
            .ok_or(PromiseError::EmptyFaultList)
    }

    pub(crate) fn from_fault_set(set: FaultSet) -> Self {
        let status = if set.is_cancellation() {
            PromiseStatus::Cancelled
        } else {
            PromiseStatus::Faulted
        };
        Self::seeded(status, None, Some(set), 0)
    }

    /// An already-cancelled promise.
    pub fn cancelled() -> Self {
        Self::seeded(
            PromiseStatus::Cancelled,
            None,
            Some(FaultSet::single(Fault::cancelled())),
            0,
        )
    }

    /// Unique non-zero identifier, assigned on first access.
    pub fn id(&self) -> u32 {
        *self
            .inner
            .id
            .get_or_init(|| NEXT_PROMISE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn status(&self) -> PromiseStatus {
        self.inner.state.status()
    }

    pub fn is_completed(&self) -> bool {
        self.inner.state.is_completed()
    }

    pub fn is_completed_successfully(&self) -> bool {
        self.status() == PromiseStatus::RanToCompletion
    }

    pub fn is_faulted(&self) -> bool {
        self.status() == PromiseStatus::Faulted
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == PromiseStatus::Cancelled
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.inner.state.has(state::CANCELLATION_REQUESTED)
    }

    /// Whether completion happened synchronously with construction.
    pub fn completed_synchronously(&self) -> bool {
        self.is_completed() && self.inner.state.has(state::SYNCHRONOUS)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.has(state::DISPOSED)
    }

    pub(crate) fn runs_continuations_asynchronously(&self) -> bool {
        self.inner.state.has(state::RUN_CONTINUATIONS_ASYNC)
    }

    /// The user handle attached at construction.
    pub fn user_state(&self) -> Option<UserState> {
        self.inner.user_state.clone()
    }

    /// Monotonic progress in `[0, 1]`: 0 before `Running`, 1 once
    /// terminal, the last reported value in between.
    pub fn progress(&self) -> f32 {
        let status = self.status();
        if status.is_terminal() {
            1.0
        } else if status == PromiseStatus::Running {
            f32::from_bits(self.inner.progress_bits.load(Ordering::Acquire))
        } else {
            0.0
        }
    }

    /// The failure payload. `Some` iff the promise completed as
    /// `Faulted` or `Cancelled`.
    pub fn fault(&self) -> Option<&FaultSet> {
        if self.is_completed() {
            self.inner.fault.get()
        } else {
            None
        }
    }

    fn fault_set_cloned(&self) -> FaultSet {
        self.inner.fault.get().cloned().unwrap_or_else(|| {
            FaultSet::single(Fault::new(FaultKind::Uncategorized, "fault payload missing"))
        })
    }

    /// The result value. Available iff the promise ran to completion.
    pub fn result(&self) -> Result<T, PromiseError>
    where
        T: Clone,
    {
        self.guard_disposed()?;
        match self.status() {
            PromiseStatus::RanToCompletion => self
                .inner
                .result
                .get()
                .cloned()
                .ok_or(PromiseError::ResultNotAvailable(PromiseStatus::RanToCompletion)),
            status => Err(PromiseError::ResultNotAvailable(status)),
        }
    }

    /// The completed promise's outcome as a `Result`: the value on
    /// success, the failure payload as an error otherwise.
    pub(crate) fn outcome(&self) -> Result<T, PromiseError>
    where
        T: Clone,
    {
        match self.status() {
            PromiseStatus::RanToCompletion => self
                .inner
                .result
                .get()
                .cloned()
                .ok_or(PromiseError::ResultNotAvailable(PromiseStatus::RanToCompletion)),
            PromiseStatus::Faulted => Err(PromiseError::Faulted(self.fault_set_cloned())),
            PromiseStatus::Cancelled => Err(PromiseError::Cancelled(self.fault_set_cloned())),
            status => Err(PromiseError::ResultNotAvailable(status)),
        }
    }

    fn guard_disposed(&self) -> Result<(), PromiseError> {
        if self.is_disposed() {
            Err(PromiseError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Lazily materialize the wait handle. The cell lock doubles as the
    /// double-check: at most one event is ever created, and one created
    /// after completion is pre-signalled.
    fn wait_event(&self) -> Arc<Event> {
        let mut cell = self.inner.wait.lock();
        match &*cell {
            Some(event) => Arc::clone(event),
            None => {
                let event = Arc::new(Event::new());
                if self.is_completed() {
                    event.signal();
                }
                *cell = Some(Arc::clone(&event));
                event
            }
        }
    }

    /// Block the calling thread until the promise completes.
    pub fn wait(&self) -> Result<(), PromiseError> {
        self.guard_disposed()?;
        if self.is_completed() {
            return Ok(());
        }
        self.wait_event().wait();
        Ok(())
    }

    /// Block up to `timeout`. `Ok(false)` means the timeout elapsed.
    pub fn wait_for(&self, timeout: Duration) -> Result<bool, PromiseError> {
        self.guard_disposed()?;
        if self.is_completed() {
            return Ok(true);
        }
        Ok(self.wait_event().wait_for(timeout))
    }

    /// Like [`wait`](Self::wait), then surface a non-success completion
    /// as the corresponding error.
    pub fn join(&self) -> Result<(), PromiseError> {
        self.wait()?;
        self.completed_outcome()
    }

    /// Like [`join`](Self::join) with a deadline; a timeout surfaces as
    /// [`PromiseError::Timeout`].
    pub fn join_for(&self, timeout: Duration) -> Result<(), PromiseError> {
        if !self.wait_for(timeout)? {
            return Err(PromiseError::Timeout(timeout));
        }
        self.completed_outcome()
    }

    fn completed_outcome(&self) -> Result<(), PromiseError> {
        match self.status() {
            PromiseStatus::Faulted => Err(PromiseError::Faulted(self.fault_set_cloned())),
            PromiseStatus::Cancelled => Err(PromiseError::Cancelled(self.fault_set_cloned())),
            _ => Ok(()),
        }
    }

    /// Yield the CPU until completion is visible. For tight internal
    /// retry loops; prefer [`wait`](Self::wait) everywhere else.
    pub fn spin_until_completed(&self) {
        self.inner.state.spin_until_completed();
    }

    /// Drop an entry registered earlier. Returns `false` when the entry
    /// has already been dispatched or removed.
    pub fn remove_continuation(&self, id: ContinuationId) -> bool {
        self.inner.slot.remove(id)
    }

    /// Request cancellation.
    ///
    /// Advisory: sets the cancellation-requested flag (at most once) and
    /// invokes the installed hook; the promise transitions to
    /// `Cancelled` through its normal producer path. On a completed
    /// promise this is a no-op. Promises without a hook report
    /// [`PromiseError::NotSupported`].
    pub fn cancel(&self) -> Result<(), PromiseError> {
        self.guard_disposed()?;
        if !self.inner.state.try_set_flag(state::CANCELLATION_REQUESTED) {
            return Ok(());
        }
        tracing::debug!(id = self.id(), "cancellation requested");
        match self.inner.cancel_hook.get() {
            Some(hook) => {
                hook();
                Ok(())
            }
            None => Err(PromiseError::NotSupported),
        }
    }

    pub(crate) fn set_cancel_hook(&self, hook: Box<dyn Fn() + Send + Sync>) {
        let _ = self.inner.cancel_hook.set(hook);
    }

    /// Release the wait handle and mark the promise unusable.
    ///
    /// Valid only on a terminal status; observable status does not
    /// change. A no-op on shared singletons and on an already-disposed
    /// promise.
    pub fn dispose(&self) -> Result<(), PromiseError> {
        if self.inner.state.has(state::DO_NOT_DISPOSE) || self.is_disposed() {
            return Ok(());
        }
        let status = self.status();
        if !status.is_terminal() {
            return Err(PromiseError::NotCompleted(status));
        }
        self.inner.state.set_flag(state::DISPOSED);
        *self.inner.wait.lock() = None;
        Ok(())
    }

    /// Report producer progress. `false` once completed; regressions are
    /// ignored so the observed value stays monotonic.
    pub(crate) fn try_report_progress(&self, value: f32) -> bool {
        if self.is_completed() {
            return false;
        }
        let value = value.clamp(0.0, 1.0);
        let raised = self
            .inner
            .progress_bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                (value > f32::from_bits(bits)).then(|| value.to_bits())
            })
            .is_ok();
        if raised {
            for (callback, bound) in self.inner.slot.progress_snapshot() {
                match bound {
                    Some(ctx) if !context::is_current(&ctx) => {
                        ctx.post(Box::new(move || callback(value)));
                    }
                    _ => callback(value),
                }
            }
        }
        true
    }

    pub(crate) fn completed_args(&self) -> CompletedArgs {
        CompletedArgs {
            fault: self.fault().cloned(),
            cancelled: self.is_cancelled(),
            user_state: self.inner.user_state.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Promise<T> {
    fn register(
        &self,
        callback: Callback<T>,
        options: ContinuationOptions,
        context: Option<Arc<dyn SyncContext>>,
        guard: bool,
    ) -> Result<ContinuationId, PromiseError> {
        if guard {
            self.guard_disposed()?;
        }
        let mut context = context;
        if context.is_none() && options.contains(ContinuationOptions::CAPTURE_CONTEXT) {
            context = context::current();
        }
        let id = self.inner.slot.allocate_id();
        let mut registration = Registration {
            id,
            callback,
            options,
            context,
        };
        if !self.inner.state.is_completion_underway() {
            match self.inner.slot.push(registration) {
                Ok(()) => return Ok(id),
                Err(back) => registration = back,
            }
        }
        // Completion has begun elsewhere: deliver on this thread once the
        // terminal status is visible.
        self.inner.state.spin_until_completed();
        dispatch::dispatch(self, registration);
        Ok(id)
    }

    /// Register a completion delegate receiving the completed promise.
    ///
    /// On an already-completed promise the delegate runs before this
    /// call returns (subject to the dispatch rules). Exactly-once either
    /// way.
    pub fn add_done<F>(&self, callback: F) -> Result<ContinuationId, PromiseError>
    where
        F: FnOnce(&Promise<T>) + Send + 'static,
    {
        self.register(
            Callback::Done(Box::new(callback)),
            ContinuationOptions::default(),
            None,
            true,
        )
    }

    /// [`add_done`](Self::add_done) with an options mask and an explicit
    /// marshalling context. Nothing is captured silently: pass a context,
    /// or set [`ContinuationOptions::CAPTURE_CONTEXT`] to pick up the
    /// registering thread's current one.
    pub fn add_done_with<F>(
        &self,
        callback: F,
        options: ContinuationOptions,
        context: Option<Arc<dyn SyncContext>>,
    ) -> Result<ContinuationId, PromiseError>
    where
        F: FnOnce(&Promise<T>) + Send + 'static,
    {
        self.register(Callback::Done(Box::new(callback)), options, context, true)
    }

    /// Register a zero-argument resumption, the awaiter primitive.
    pub fn add_resume<F>(&self, callback: F) -> Result<ContinuationId, PromiseError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.register(
            Callback::Resume(Box::new(callback)),
            ContinuationOptions::default(),
            None,
            true,
        )
    }

    pub fn add_resume_with<F>(
        &self,
        callback: F,
        options: ContinuationOptions,
        context: Option<Arc<dyn SyncContext>>,
    ) -> Result<ContinuationId, PromiseError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.register(Callback::Resume(Box::new(callback)), options, context, true)
    }

    /// Register a completed-event handler receiving `(source, args)`.
    pub fn add_completed_handler<F>(&self, callback: F) -> Result<ContinuationId, PromiseError>
    where
        F: FnOnce(&Promise<T>, &CompletedArgs) + Send + 'static,
    {
        self.register(
            Callback::Handler(Box::new(callback)),
            ContinuationOptions::default(),
            None,
            true,
        )
    }

    /// Register a progress callback, invoked on producer reports and
    /// with the final value at completion.
    pub fn add_progress<F>(&self, callback: F) -> Result<ContinuationId, PromiseError>
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        self.register(
            Callback::Progress(Arc::new(callback)),
            ContinuationOptions::default(),
            None,
            true,
        )
    }

    /// Register a structured continuation.
    ///
    /// Unlike the delegate forms this never reports `Disposed`: a
    /// disposed promise is terminal, so the observer is dispatched
    /// inline instead, since composers must always observe completion.
    pub fn add_observer(
        &self,
        observer: Box<dyn CompletionObserver<T>>,
        options: ContinuationOptions,
        context: Option<Arc<dyn SyncContext>>,
    ) {
        let _ = self.register(Callback::Observer(observer), options, context, false);
    }

    pub(crate) fn when_done_unguarded(&self, callback: Box<dyn FnOnce() + Send>) {
        let _ = self.register(
            Callback::Resume(callback),
            ContinuationOptions::default(),
            None,
            false,
        );
    }

    /// Type-erased observer handle for heterogeneous composition.
    pub fn erased(&self) -> Arc<dyn AnyPromise> {
        Arc::new(self.clone())
    }

    pub(crate) fn try_start(&self, target: PromiseStatus) -> bool {
        if self.inner.state.try_set_status(target) {
            self.notify_status(target);
            true
        } else {
            false
        }
    }

    fn notify_status(&self, status: PromiseStatus) {
        tracing::trace!(id = self.id(), %status, "status changed");
        if let Some(hooks) = &self.inner.hooks {
            hooks.status_changed(status);
            if status == PromiseStatus::Running {
                hooks.started();
            }
        }
    }

    pub(crate) fn try_complete_result(&self, value: T, synchronous: bool) -> bool {
        if !self.inner.state.try_reserve_completion() {
            self.inner.state.spin_until_completed();
            return false;
        }
        let _ = self.inner.result.set(value);
        self.finish(PromiseStatus::RanToCompletion, synchronous);
        true
    }

    pub(crate) fn try_complete_faults(&self, faults: FaultSet, synchronous: bool) -> bool {
        let status = if faults.is_cancellation() {
            PromiseStatus::Cancelled
        } else {
            PromiseStatus::Faulted
        };
        if !self.inner.state.try_reserve_completion() {
            self.inner.state.spin_until_completed();
            return false;
        }
        let _ = self.inner.fault.set(faults);
        self.finish(status, synchronous);
        true
    }

    pub(crate) fn try_complete_cancelled(&self, synchronous: bool) -> bool {
        self.try_complete_faults(FaultSet::single(Fault::cancelled()), synchronous)
    }

    /// Terminal install and the default completion behavior: publish the
    /// status, drain continuations in registration order, then signal
    /// the wait handle.
    fn finish(&self, status: PromiseStatus, synchronous: bool) {
        self.inner.state.set_completed(status, synchronous);
        tracing::debug!(id = self.id(), %status, "promise completed");
        if let Some(hooks) = &self.inner.hooks {
            hooks.status_changed(status);
            hooks.completed(status);
        }
        for registration in self.inner.slot.seal() {
            dispatch::dispatch(self, registration);
        }
        let waiter = self.inner.wait.lock().clone();
        if let Some(event) = waiter {
            event.signal();
        }
    }
}

/// The observer surface with the result type erased, for combinators
/// over heterogeneous promises.
pub trait AnyPromise: Send + Sync {
    fn id(&self) -> u32;
    fn status(&self) -> PromiseStatus;
    /// Cloned failure payload, `Some` iff completed non-successfully.
    fn fault_set(&self) -> Option<FaultSet>;
    /// Run `callback` exactly once when the promise completes, inline
    /// if it already has.
    fn when_done(&self, callback: Box<dyn FnOnce() + Send>);
    fn request_cancel(&self) -> Result<(), PromiseError>;
}

impl<T: Send + Sync + 'static> AnyPromise for Promise<T> {
    fn id(&self) -> u32 {
        Promise::id(self)
    }

    fn status(&self) -> PromiseStatus {
        Promise::status(self)
    }

    fn fault_set(&self) -> Option<FaultSet> {
        self.fault().cloned()
    }

    fn when_done(&self, callback: Box<dyn FnOnce() + Send>) {
        self.when_done_unguarded(callback);
    }

    fn request_cancel(&self) -> Result<(), PromiseError> {
        self.cancel()
    }
}

/// The shared already-completed promise: the zero-duration, zero-work
/// answer. Process-wide, immutable, protected from disposal.
pub fn completed() -> Promise<()> {
    static COMPLETED: OnceLock<Promise<()>> = OnceLock::new();
    COMPLETED
        .get_or_init(|| {
            Promise::seeded(
                PromiseStatus::RanToCompletion,
                Some(()),
                None,
                state::DO_NOT_DISPOSE,
            )
        })
        .clone()
}
