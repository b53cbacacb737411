pub mod error;
pub mod fault;
pub mod options;
pub mod status;

pub use error::PromiseError;
pub use fault::{Fault, FaultKind, FaultSet};
pub use options::{ContinuationOptions, CreationOptions};
pub use status::PromiseStatus;
