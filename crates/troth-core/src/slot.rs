use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use troth_types::ContinuationOptions;

use crate::context::SyncContext;
use crate::promise::{CompletedArgs, Promise};

/// Handle returned by the `add_*` registration APIs, usable with
/// `remove_continuation`.
pub type ContinuationId = u64;

/// A structured continuation: the registering side keeps control of what
/// happens both when the antecedent completes and when the continuation
/// is skipped by its options mask.
///
/// The chaining combinators implement this to move their output promise;
/// `skipped` cancels it so waiting observers unblock.
pub trait CompletionObserver<T>: Send {
    fn completed(self: Box<Self>, antecedent: &Promise<T>);
    fn skipped(self: Box<Self>) {}
}

/// The continuation shapes a promise can store, dispatched by tag.
pub(crate) enum Callback<T> {
    /// One-arg completion delegate.
    Done(Box<dyn FnOnce(&Promise<T>) + Send>),
    /// Zero-arg awaiter resumption.
    Resume(Box<dyn FnOnce() + Send>),
    /// Structured continuation with a skip path.
    Observer(Box<dyn CompletionObserver<T>>),
    /// Completed-event handler receiving synthesized event args.
    Handler(Box<dyn FnOnce(&Promise<T>, &CompletedArgs) + Send>),
    /// Progress callback; invoked on producer progress reports and with
    /// the final value at completion.
    Progress(Arc<dyn Fn(f32) + Send + Sync>),
}

/// One stored continuation plus its dispatch metadata.
pub(crate) struct Registration<T> {
    pub id: ContinuationId,
    pub callback: Callback<T>,
    pub options: ContinuationOptions,
    pub context: Option<Arc<dyn SyncContext>>,
}

/// Slot states: empty, a single bare entry, a list, or the sealed
/// sentinel published once completion has begun dispatching.
enum Slot<T> {
    Empty,
    Single(Registration<T>),
    Many(Vec<Registration<T>>),
    Sealed,
}

/// Storage for registered continuations.
///
/// Allocation-free in the common single-continuation case; promotes to a
/// list on the first contention. The guard is a short `parking_lot`
/// mutex: every critical section is a tag probe plus at most one vector
/// operation, and dispatch always happens outside it.
pub(crate) struct ContinuationSlot<T> {
    state: Mutex<Slot<T>>,
    next_id: AtomicU64,
}

impl<T> ContinuationSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Slot::Empty),
            next_id: AtomicU64::new(1),
        }
    }

    /// A slot born sealed, for already-completed factories.
    pub fn sealed() -> Self {
        Self {
            state: Mutex::new(Slot::Sealed),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn allocate_id(&self) -> ContinuationId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Enqueue a continuation. Fails once the slot is sealed, handing the
    /// entry back so the registering thread can dispatch it inline.
    pub fn push(&self, registration: Registration<T>) -> Result<(), Registration<T>> {
        let mut slot = self.state.lock();
        match &mut *slot {
            Slot::Sealed => Err(registration),
            Slot::Empty => {
                *slot = Slot::Single(registration);
                Ok(())
            }
            Slot::Single(_) => {
                let Slot::Single(first) = std::mem::replace(&mut *slot, Slot::Empty) else {
                    // Tag checked one line above.
                    return Err(registration);
                };
                *slot = Slot::Many(vec![first, registration]);
                Ok(())
            }
            Slot::Many(entries) => {
                entries.push(registration);
                Ok(())
            }
        }
    }

    /// Remove a registration by id. Returns `false` when the entry is
    /// gone: already dispatched, already removed, or never stored here.
    pub fn remove(&self, id: ContinuationId) -> bool {
        let mut slot = self.state.lock();
        match &mut *slot {
            Slot::Single(entry) if entry.id == id => {
                *slot = Slot::Empty;
                true
            }
            Slot::Many(entries) => match entries.iter().position(|entry| entry.id == id) {
                Some(index) => {
                    entries.remove(index);
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Publish the sealed sentinel, returning the stored entries in
    /// registration order. Idempotent: a second seal yields nothing.
    pub fn seal(&self) -> Vec<Registration<T>> {
        let mut slot = self.state.lock();
        match std::mem::replace(&mut *slot, Slot::Sealed) {
            Slot::Empty | Slot::Sealed => Vec::new(),
            Slot::Single(entry) => vec![entry],
            Slot::Many(entries) => entries,
        }
    }

    /// Snapshot of the progress callbacks for producer-driven reports.
    #[allow(clippy::type_complexity)]
    pub fn progress_snapshot(
        &self,
    ) -> Vec<(Arc<dyn Fn(f32) + Send + Sync>, Option<Arc<dyn SyncContext>>)> {
        let slot = self.state.lock();
        let collect = |entry: &Registration<T>| match &entry.callback {
            Callback::Progress(callback) => {
                Some((Arc::clone(callback), entry.context.clone()))
            }
            _ => None,
        };
        match &*slot {
            Slot::Single(entry) => collect(entry).into_iter().collect(),
            Slot::Many(entries) => entries.iter().filter_map(collect).collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resume_entry(slot: &ContinuationSlot<()>, tag: u8) -> Registration<()> {
        Registration {
            id: slot.allocate_id(),
            callback: Callback::Resume(Box::new(move || {
                let _ = tag;
            })),
            options: ContinuationOptions::default(),
            context: None,
        }
    }

    #[test]
    fn entries_drain_in_registration_order() {
        let slot = ContinuationSlot::<()>::new();
        let first = resume_entry(&slot, 1);
        let second = resume_entry(&slot, 2);
        let third = resume_entry(&slot, 3);
        let ids = [first.id, second.id, third.id];

        assert!(slot.push(first).is_ok());
        assert!(slot.push(second).is_ok());
        assert!(slot.push(third).is_ok());

        let drained: Vec<_> = slot.seal().into_iter().map(|entry| entry.id).collect();
        assert_eq!(drained, ids);
    }

    #[test]
    fn push_after_seal_hands_the_entry_back() {
        let slot = ContinuationSlot::<()>::new();
        assert!(slot.seal().is_empty());

        let entry = resume_entry(&slot, 1);
        let id = entry.id;
        match slot.push(entry) {
            Err(returned) => assert_eq!(returned.id, id),
            Ok(()) => panic!("push must fail on a sealed slot"),
        }
    }

    #[test]
    fn second_seal_yields_nothing() {
        let slot = ContinuationSlot::<()>::new();
        assert!(slot.push(resume_entry(&slot, 1)).is_ok());

        assert_eq!(slot.seal().len(), 1);
        assert!(slot.seal().is_empty());
    }

    #[test]
    fn remove_sole_entry_then_add_again() {
        let slot = ContinuationSlot::<()>::new();
        let entry = resume_entry(&slot, 1);
        let id = entry.id;
        assert!(slot.push(entry).is_ok());

        assert!(slot.remove(id));
        assert!(!slot.remove(id));

        assert!(slot.push(resume_entry(&slot, 2)).is_ok());
        assert_eq!(slot.seal().len(), 1);
    }

    #[test]
    fn remove_from_promoted_list_preserves_order() {
        let slot = ContinuationSlot::<()>::new();
        let first = resume_entry(&slot, 1);
        let second = resume_entry(&slot, 2);
        let third = resume_entry(&slot, 3);
        let (first_id, second_id, third_id) = (first.id, second.id, third.id);

        assert!(slot.push(first).is_ok());
        assert!(slot.push(second).is_ok());
        assert!(slot.push(third).is_ok());
        assert!(slot.remove(second_id));

        let drained: Vec<_> = slot.seal().into_iter().map(|entry| entry.id).collect();
        assert_eq!(drained, vec![first_id, third_id]);
    }

    #[test]
    fn remove_after_seal_is_a_no_op() {
        let slot = ContinuationSlot::<()>::new();
        let entry = resume_entry(&slot, 1);
        let id = entry.id;
        assert!(slot.push(entry).is_ok());
        let _ = slot.seal();

        assert!(!slot.remove(id));
    }
}
