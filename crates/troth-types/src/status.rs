use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a promise.
///
/// The numeric code orders the non-terminal states (`Created` <
/// `Scheduled` < `Running`); any of them may transition once to any of
/// the three terminal states, and terminal states never transition.
///
/// Codes fit in the low 4 bits of the packed state word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PromiseStatus {
    /// Constructed, not yet handed to a producer.
    Created,
    /// A producer has accepted the work but not started it.
    Scheduled,
    /// The work is in flight.
    Running,
    /// Terminal: completed successfully, result available.
    RanToCompletion,
    /// Terminal: completed with one or more faults.
    Faulted,
    /// Terminal: completed by cancellation.
    Cancelled,
}

impl PromiseStatus {
    /// Numeric code used inside the packed state word.
    pub const fn code(self) -> u32 {
        match self {
            Self::Created => 0,
            Self::Scheduled => 1,
            Self::Running => 2,
            Self::RanToCompletion => 3,
            Self::Faulted => 4,
            Self::Cancelled => 5,
        }
    }

    /// Inverse of [`code`](Self::code). `None` for codes no status uses.
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Created),
            1 => Some(Self::Scheduled),
            2 => Some(Self::Running),
            3 => Some(Self::RanToCompletion),
            4 => Some(Self::Faulted),
            5 => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether the promise has reached a terminal state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::RanToCompletion | Self::Faulted | Self::Cancelled)
    }
}

impl fmt::Display for PromiseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Scheduled => write!(f, "Scheduled"),
            Self::Running => write!(f, "Running"),
            Self::RanToCompletion => write!(f, "RanToCompletion"),
            Self::Faulted => write!(f, "Faulted"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}
