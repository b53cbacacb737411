//! A lightweight, thread-safe promise primitive.
//!
//! A [`Promise`] represents the eventual completion (successful,
//! faulted, or cancelled) of an asynchronous computation. It is cheaper
//! than a task runtime and explicit about where continuations execute:
//! inline on the completing thread, on a bound [`SyncContext`], or on
//! the shared worker. Producers drive a promise through its
//! [`CompletionSource`]; observers poll, block, register continuations,
//! and compose promises with [`when_all`], [`when_any`], [`delay`], and
//! the chaining combinators.

pub mod compose;
pub mod context;
mod dispatch;
mod event;
pub mod future;
mod promise;
mod slot;
mod source;
mod state;
mod worker;

pub use compose::{delay, when_all, when_all_results, when_any};
pub use context::SyncContext;
pub use future::{PromiseFuture, from_future, from_try_future};
pub use promise::{AnyPromise, CompletedArgs, Promise, PromiseHooks, UserState, completed};
pub use slot::{CompletionObserver, ContinuationId};
pub use source::{CompletionSource, SourceBuilder};
pub use troth_types::{
    ContinuationOptions, CreationOptions, Fault, FaultKind, FaultSet, PromiseError, PromiseStatus,
};
