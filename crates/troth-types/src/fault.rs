use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical category for a promise failure.
///
/// Coarse-grained on purpose: composition rules only need to tell
/// cancellation apart from real faults, and observability only needs a
/// stable dimension for logs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// The promise was intentionally cancelled.
    ///
    /// A control-flow decision, not necessarily an error; every
    /// composition rule checks for this kind before treating a failure
    /// as a true fault.
    Cancelled,
    /// The work exceeded a time limit.
    Timeout,
    /// Application code reported a failure.
    UserError,
    /// Catch-all bucket when no specific category applies.
    Uncategorized,
}

/// Structured failure payload stored on faulted and cancelled promises.
///
/// A stable shape that is easy to:
/// - classify (`kind`) for composition and policy decisions,
/// - render (`message`) for user-facing summaries,
/// - enrich (`detail`) with optional low-level diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Coarse failure category.
    pub kind: FaultKind,
    /// Human-readable summary safe to display in normal logs and UIs.
    pub message: String,
    /// Optional diagnostic detail for deep triage. Omit when no extra
    /// detail exists.
    pub detail: Option<String>,
}

impl Fault {
    /// Creates a [`Fault`] with required fields only.
    ///
    /// Use [`Self::with_detail`] to attach optional diagnostic context.
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    /// Creates a [`Fault`] with all fields in a single call.
    ///
    /// Equivalent to `Self::new(kind, message).with_detail(detail)`.
    pub fn new_with_detail(
        kind: FaultKind,
        message: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: Some(detail.into()),
        }
    }

    /// Adds or replaces the optional diagnostic detail.
    ///
    /// If called multiple times, the last value wins.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// The canonical cancellation marker carried by every cancelled promise.
    pub fn cancelled() -> Self {
        Self::new(FaultKind::Cancelled, "the promise was cancelled")
    }

    /// Whether this fault represents cancellation rather than a true failure.
    pub fn is_cancellation(&self) -> bool {
        self.kind == FaultKind::Cancelled
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(ref detail) = self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

/// The failure payload of a completed promise: one primary fault plus any
/// further faults gathered along the way.
///
/// User code sees `primary` by default; `rest` is surfaced only to code
/// that explicitly asks for the aggregate. Never empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultSet {
    primary: Fault,
    rest: Vec<Fault>,
}

impl FaultSet {
    /// A set holding exactly one fault.
    pub fn single(fault: Fault) -> Self {
        Self {
            primary: fault,
            rest: Vec::new(),
        }
    }

    /// Builds a set from a non-empty list, promoting the first
    /// cancellation fault (if any) to primary so that status mapping only
    /// has to look at `primary`.
    ///
    /// The relative order of the remaining faults is preserved.
    /// Returns `None` for an empty list; callers reject that case before
    /// any state transition.
    pub fn from_list(mut faults: Vec<Fault>) -> Option<Self> {
        if faults.is_empty() {
            return None;
        }
        let primary = match faults.iter().position(Fault::is_cancellation) {
            Some(idx) => faults.remove(idx),
            None => faults.remove(0),
        };
        Some(Self {
            primary,
            rest: faults,
        })
    }

    /// The fault user code sees by default.
    pub fn primary(&self) -> &Fault {
        &self.primary
    }

    /// The remaining faults, in their original order.
    pub fn rest(&self) -> &[Fault] {
        &self.rest
    }

    /// All faults, primary first.
    pub fn iter(&self) -> impl Iterator<Item = &Fault> {
        std::iter::once(&self.primary).chain(self.rest.iter())
    }

    /// Total number of faults. Always at least 1.
    pub fn len(&self) -> usize {
        1 + self.rest.len()
    }

    /// Whether the primary fault is a cancellation.
    ///
    /// This decides the terminal status: a set whose primary is a
    /// cancellation completes the promise as `Cancelled`, not `Faulted`.
    pub fn is_cancellation(&self) -> bool {
        self.primary.is_cancellation()
    }
}

impl fmt::Display for FaultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary)?;
        if !self.rest.is_empty() {
            write!(f, " (+{} more)", self.rest.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_fault(message: &str) -> Fault {
        Fault::new(FaultKind::UserError, message)
    }

    #[test]
    fn from_list_rejects_empty_input() {
        assert_eq!(FaultSet::from_list(vec![]), None);
    }

    #[test]
    fn from_list_keeps_first_fault_primary_when_no_cancellation() {
        let set = FaultSet::from_list(vec![user_fault("a"), user_fault("b"), user_fault("c")])
            .expect("non-empty");

        assert_eq!(set.primary().message, "a");
        assert_eq!(set.rest().len(), 2);
        assert_eq!(set.rest()[0].message, "b");
        assert_eq!(set.rest()[1].message, "c");
        assert!(!set.is_cancellation());
    }

    #[test]
    fn from_list_promotes_cancellation_to_primary() {
        let set = FaultSet::from_list(vec![user_fault("a"), Fault::cancelled(), user_fault("b")])
            .expect("non-empty");

        assert!(set.is_cancellation());
        assert_eq!(set.rest().len(), 2);
        assert_eq!(set.rest()[0].message, "a");
        assert_eq!(set.rest()[1].message, "b");
    }

    #[test]
    fn iter_yields_primary_first() {
        let set = FaultSet::from_list(vec![user_fault("a"), user_fault("b")]).expect("non-empty");
        let messages: Vec<_> = set.iter().map(|f| f.message.as_str()).collect();

        assert_eq!(messages, vec!["a", "b"]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn display_formats() {
        let single = FaultSet::single(Fault::new_with_detail(
            FaultKind::Timeout,
            "request timed out",
            "after 30s",
        ));
        insta::assert_snapshot!(single.to_string(), @"Timeout: request timed out (after 30s)");

        let aggregate =
            FaultSet::from_list(vec![user_fault("first"), user_fault("second")]).expect("non-empty");
        insta::assert_snapshot!(aggregate.to_string(), @"UserError: first (+1 more)");
    }

    #[test]
    fn serde_round_trip() {
        let set = FaultSet::from_list(vec![Fault::cancelled(), user_fault("boom")]).expect("non-empty");
        let json = serde_json::to_string(&set).expect("serialize");
        let back: FaultSet = serde_json::from_str(&json).expect("deserialize");

        similar_asserts::assert_eq!(back, set);
    }
}
