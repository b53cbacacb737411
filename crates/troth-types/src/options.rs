use crate::status::PromiseStatus;

bitflags::bitflags! {
    /// Controls when and where a registered continuation runs.
    ///
    /// The `NOT_ON_*` bits exclude terminal statuses; a continuation whose
    /// mask excludes the antecedent's terminal status is skipped at
    /// dispatch time (and its output promise, if any, is cancelled so
    /// waiting observers unblock).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct ContinuationOptions: u8 {
        /// Skip if the antecedent succeeded.
        const NOT_ON_RAN_TO_COMPLETION = 1;
        /// Skip if the antecedent faulted.
        const NOT_ON_FAULTED = 1 << 1;
        /// Skip if the antecedent was cancelled.
        const NOT_ON_CANCELLED = 1 << 2;
        /// Capture the registering thread's current synchronization
        /// context (if one is installed) and marshal dispatch onto it.
        ///
        /// Without this bit, only an explicit context argument marshals;
        /// nothing is captured silently.
        const CAPTURE_CONTEXT = 1 << 3;
    }
}

impl ContinuationOptions {
    /// Run only when the antecedent succeeded.
    pub const ONLY_ON_RAN_TO_COMPLETION: Self =
        Self::NOT_ON_FAULTED.union(Self::NOT_ON_CANCELLED);
    /// Run only when the antecedent faulted.
    pub const ONLY_ON_FAULTED: Self =
        Self::NOT_ON_RAN_TO_COMPLETION.union(Self::NOT_ON_CANCELLED);
    /// Run only when the antecedent was cancelled.
    pub const ONLY_ON_CANCELLED: Self =
        Self::NOT_ON_RAN_TO_COMPLETION.union(Self::NOT_ON_FAULTED);

    /// Whether a continuation with this mask runs for the given terminal
    /// status. Non-terminal statuses always return `true`; the mask is
    /// only consulted at completion.
    pub fn should_run(self, status: PromiseStatus) -> bool {
        match status {
            PromiseStatus::RanToCompletion => !self.contains(Self::NOT_ON_RAN_TO_COMPLETION),
            PromiseStatus::Faulted => !self.contains(Self::NOT_ON_FAULTED),
            PromiseStatus::Cancelled => !self.contains(Self::NOT_ON_CANCELLED),
            _ => true,
        }
    }
}

bitflags::bitflags! {
    /// Options fixed at promise construction.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct CreationOptions: u8 {
        /// Force every continuation off the completing thread: dispatch
        /// posts onto the entry's bound context, or the shared worker
        /// when the entry has none.
        const RUN_CONTINUATIONS_ASYNCHRONOUSLY = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mask_runs_on_every_terminal_status() {
        let options = ContinuationOptions::default();

        assert!(options.should_run(PromiseStatus::RanToCompletion));
        assert!(options.should_run(PromiseStatus::Faulted));
        assert!(options.should_run(PromiseStatus::Cancelled));
    }

    #[test]
    fn not_on_bits_exclude_exactly_one_status() {
        let options = ContinuationOptions::NOT_ON_FAULTED;

        assert!(options.should_run(PromiseStatus::RanToCompletion));
        assert!(!options.should_run(PromiseStatus::Faulted));
        assert!(options.should_run(PromiseStatus::Cancelled));
    }

    #[test]
    fn only_aliases_are_unions_of_the_other_two_exclusions() {
        let options = ContinuationOptions::ONLY_ON_RAN_TO_COMPLETION;

        assert!(options.should_run(PromiseStatus::RanToCompletion));
        assert!(!options.should_run(PromiseStatus::Faulted));
        assert!(!options.should_run(PromiseStatus::Cancelled));

        assert!(ContinuationOptions::ONLY_ON_CANCELLED.should_run(PromiseStatus::Cancelled));
        assert!(!ContinuationOptions::ONLY_ON_CANCELLED.should_run(PromiseStatus::RanToCompletion));
        assert!(ContinuationOptions::ONLY_ON_FAULTED.should_run(PromiseStatus::Faulted));
        assert!(!ContinuationOptions::ONLY_ON_FAULTED.should_run(PromiseStatus::Cancelled));
    }

    #[test]
    fn capture_context_does_not_affect_the_run_decision() {
        let options = ContinuationOptions::CAPTURE_CONTEXT;

        assert!(options.should_run(PromiseStatus::Faulted));
    }
}
