use std::time::Duration;

use crate::fault::FaultSet;
use crate::status::PromiseStatus;

/// Errors surfaced by the promise API.
///
/// The first two variants carry the failure payload of a completed
/// promise (the `join` surface); the rest report misuse of the API
/// itself. `try_*` producer operations never raise; they return `false`
/// and leave raising to their strict `set_*` wrappers.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PromiseError {
    /// The promise completed with one or more faults.
    #[error("promise faulted: {0}")]
    Faulted(FaultSet),
    /// The promise completed by cancellation.
    #[error("promise cancelled: {0}")]
    Cancelled(FaultSet),
    /// A strict `set_*` producer call lost to the state machine.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: PromiseStatus,
        to: PromiseStatus,
    },
    /// `result()` was read before successful completion.
    #[error("result is not available while the promise is {0}")]
    ResultNotAvailable(PromiseStatus),
    /// The promise was disposed and can no longer be observed.
    #[error("the promise has been disposed")]
    Disposed,
    /// A dispose was attempted before the promise reached a terminal
    /// status.
    #[error("cannot dispose a promise that is still {0}")]
    NotCompleted(PromiseStatus),
    /// `join_for` gave up waiting.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// `cancel()` was called on a promise with no cancellation hook.
    #[error("cancellation is not supported by this promise")]
    NotSupported,
    /// A combinator was given an empty list of promises.
    #[error("the promise list is empty")]
    EmptyOperationList,
    /// A producer tried to fault a promise with an empty fault list.
    #[error("the fault list is empty")]
    EmptyFaultList,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{Fault, FaultKind};

    #[test]
    fn messages_name_the_offending_status() {
        let err = PromiseError::InvalidTransition {
            from: PromiseStatus::Faulted,
            to: PromiseStatus::Running,
        };
        insta::assert_snapshot!(err.to_string(), @"invalid status transition: Faulted -> Running");

        insta::assert_snapshot!(
            PromiseError::ResultNotAvailable(PromiseStatus::Running).to_string(),
            @"result is not available while the promise is Running"
        );
    }

    #[test]
    fn join_surface_carries_the_fault_payload() {
        let set = FaultSet::single(Fault::new(FaultKind::UserError, "boom"));
        let err = PromiseError::Faulted(set.clone());

        match err {
            PromiseError::Faulted(inner) => assert_eq!(inner, set),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
