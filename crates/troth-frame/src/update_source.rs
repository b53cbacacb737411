use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use troth_core::{CompletionSource, Promise, completed};
use troth_types::Fault;

/// A structured per-frame subscriber.
pub trait Updatable: Send {
    fn update(&mut self, dt: f32);
}

/// A progress observer: receives every tick plus a single terminal
/// notification when the source completes or errors.
pub trait TickObserver: Send {
    fn next(&mut self, dt: f32);
    fn complete(&mut self) {}
    fn error(&mut self, _fault: &Fault) {}
}

enum Subscriber {
    Frame(Box<dyn FnMut(f32) + Send>),
    Updatable(Box<dyn Updatable>),
    Observer(Box<dyn TickObserver>),
}

enum Termination {
    Complete,
    Error(Fault),
}

struct SourceInner {
    subscribers: Vec<(u64, Subscriber)>,
    /// Subscriptions made while a tick is in flight; merged afterwards.
    pending: Vec<(u64, Subscriber)>,
    /// Removals requested while a tick is in flight; applied afterwards.
    removed: Vec<u64>,
    next_id: u64,
    ticking: bool,
    terminated: bool,
    /// A terminal notification requested mid-tick, delivered by the
    /// tick epilogue.
    deferred_termination: Option<Termination>,
}

/// A single-writer multicast tick.
///
/// The host calls [`tick`](Self::tick) once per frame; subscribers are
/// invoked synchronously in registration order. Subscribing and
/// unsubscribing from inside a tick is safe; mutations are deferred
/// until the pass finishes. Ticks are single-threaded by convention;
/// a reentrant tick is rejected.
pub struct UpdateSource {
    inner: Arc<Mutex<SourceInner>>,
}

impl Clone for UpdateSource {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl UpdateSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SourceInner {
                subscribers: Vec::new(),
                pending: Vec::new(),
                removed: Vec::new(),
                next_id: 0,
                ticking: false,
                terminated: false,
                deferred_termination: None,
            })),
        }
    }

    /// Subscribe a bare frame delegate.
    pub fn subscribe_frame(&self, callback: impl FnMut(f32) + Send + 'static) -> Subscription {
        self.subscribe(Subscriber::Frame(Box::new(callback)))
    }

    pub fn subscribe_updatable(&self, updatable: Box<dyn Updatable>) -> Subscription {
        self.subscribe(Subscriber::Updatable(updatable))
    }

    pub fn subscribe_observer(&self, observer: Box<dyn TickObserver>) -> Subscription {
        self.subscribe(Subscriber::Observer(observer))
    }

    fn subscribe(&self, subscriber: Subscriber) -> Subscription {
        let mut inner = self.inner.lock();
        if inner.terminated {
            // The source is gone; hand back an inert handle.
            return Subscription {
                id: 0,
                source: Weak::new(),
            };
        }
        inner.next_id += 1;
        let id = inner.next_id;
        if inner.ticking {
            inner.pending.push((id, subscriber));
        } else {
            inner.subscribers.push((id, subscriber));
        }
        Subscription {
            id,
            source: Arc::downgrade(&self.inner),
        }
    }

    /// Invoke every subscriber with the frame delta, in registration
    /// order.
    pub fn tick(&self, dt: f32) {
        let mut taken = {
            let mut inner = self.inner.lock();
            if inner.ticking {
                debug_assert!(false, "reentrant tick");
                return;
            }
            if inner.terminated {
                return;
            }
            inner.ticking = true;
            std::mem::take(&mut inner.subscribers)
        };

        for (_, subscriber) in taken.iter_mut() {
            match subscriber {
                Subscriber::Frame(callback) => callback(dt),
                Subscriber::Updatable(updatable) => updatable.update(dt),
                Subscriber::Observer(observer) => observer.next(dt),
            }
        }

        let termination = {
            let mut inner = self.inner.lock();
            inner.ticking = false;
            if let Some(termination) = inner.deferred_termination.take() {
                inner.pending.clear();
                inner.removed.clear();
                Some(termination)
            } else {
                let pending = std::mem::take(&mut inner.pending);
                taken.extend(pending);
                let removed = std::mem::take(&mut inner.removed);
                taken.retain(|(id, _)| !removed.contains(id));
                inner.subscribers = std::mem::take(&mut taken);
                None
            }
        };
        if let Some(termination) = termination {
            notify_terminal(taken, &termination);
        }
    }

    /// Terminal notification: tell every observer the source is done and
    /// discard the subscriber list.
    pub fn complete(&self) {
        self.terminate(Termination::Complete);
    }

    /// Terminal notification with an error.
    pub fn error(&self, fault: &Fault) {
        self.terminate(Termination::Error(fault.clone()));
    }

    fn terminate(&self, termination: Termination) {
        let subscribers = {
            let mut inner = self.inner.lock();
            if inner.terminated {
                return;
            }
            inner.terminated = true;
            if inner.ticking {
                // The tick epilogue owns the subscriber list right now;
                // let it deliver the notification.
                inner.deferred_termination = Some(termination);
                return;
            }
            inner.pending.clear();
            inner.removed.clear();
            std::mem::take(&mut inner.subscribers)
        };
        notify_terminal(subscribers, &termination);
    }

    pub fn subscriber_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.subscribers.len() + inner.pending.len()
    }
}

impl Default for UpdateSource {
    fn default() -> Self {
        Self::new()
    }
}

fn notify_terminal(subscribers: Vec<(u64, Subscriber)>, termination: &Termination) {
    for (_, subscriber) in subscribers {
        if let Subscriber::Observer(mut observer) = subscriber {
            match termination {
                Termination::Complete => observer.complete(),
                Termination::Error(fault) => observer.error(fault),
            }
        }
    }
}

/// RAII subscription handle; dropping it unsubscribes (deferred when a
/// tick is in flight).
pub struct Subscription {
    id: u64,
    source: Weak<Mutex<SourceInner>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.source.upgrade() {
            let mut inner = inner.lock();
            if inner.ticking {
                inner.pending.retain(|(id, _)| *id != self.id);
                inner.removed.push(self.id);
            } else {
                inner.subscribers.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

/// A promise that completes after `frames` ticks of `source`.
///
/// Zero frames yields the shared already-completed promise. Cancellable:
/// the subscription is dropped and the promise cancelled.
pub fn delay_frames(frames: u32, source: &UpdateSource) -> Promise<()> {
    if frames == 0 {
        return completed();
    }
    let completion = CompletionSource::<()>::new();
    let _ = completion.try_set_running();
    let remaining = Arc::new(AtomicU32::new(frames));
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
    let subscription = {
        let completion = completion.clone();
        let remaining = Arc::clone(&remaining);
        let slot = Arc::clone(&slot);
        source.subscribe_frame(move |_dt| {
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                let _ = completion.try_set_completed();
                // Self-removal from inside the tick is deferred.
                slot.lock().take();
            }
        })
    };
    *slot.lock() = Some(subscription);
    {
        let this = completion.clone();
        let slot = Arc::clone(&slot);
        completion.on_cancel(move || {
            slot.lock().take();
            let _ = this.try_set_cancelled();
        });
    }
    completion.promise()
}
