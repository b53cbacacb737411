//! Cooperative drivers for promises: the per-frame multicast tick, the
//! single-lane promise queue, and the game-loop synchronization context.

pub mod loop_context;
pub mod queue;
pub mod update_source;

pub use loop_context::LoopContext;
pub use queue::{PromiseQueue, QueueError};
pub use update_source::{Subscription, TickObserver, Updatable, UpdateSource, delay_frames};
