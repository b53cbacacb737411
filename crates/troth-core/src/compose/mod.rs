//! Non-primitive promises: combinators that observe antecedent promises
//! and produce their own.

mod chain;
mod delay;
mod when_all;
mod when_any;

pub use delay::delay;
pub use when_all::{when_all, when_all_results};
pub use when_any::when_any;
