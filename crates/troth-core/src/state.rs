use std::sync::atomic::{AtomicU32, Ordering};

use troth_types::PromiseStatus;

/// Low 4 bits carry the [`PromiseStatus`] code.
pub(crate) const STATUS_MASK: u32 = 0x0000_000f;
/// A producer has won the completion race and is writing the payload.
pub(crate) const COMPLETION_RESERVED: u32 = 1 << 16;
/// The terminal status and payload are visible.
pub(crate) const COMPLETED: u32 = 1 << 17;
/// Completion happened synchronously with construction.
pub(crate) const SYNCHRONOUS: u32 = 1 << 18;
/// The wait handle has been released; observer APIs report `Disposed`.
pub(crate) const DISPOSED: u32 = 1 << 19;
/// `cancel()` has been requested at least once.
pub(crate) const CANCELLATION_REQUESTED: u32 = 1 << 20;
/// Protects shared singletons from disposal.
pub(crate) const DO_NOT_DISPOSE: u32 = 1 << 21;
/// Continuations must not run inline on the completing thread.
pub(crate) const RUN_CONTINUATIONS_ASYNC: u32 = 1 << 22;

/// The single synchronization point of the promise state machine.
///
/// One 32-bit word packs the status code and the auxiliary flags; every
/// non-terminal-to-terminal transition is a compare-and-swap on it. The
/// store that installs [`COMPLETED`] is the release point matched by the
/// acquire in every status read, so payload writes made by the winning
/// producer are visible to any continuation that observes the terminal
/// status.
pub(crate) struct StateWord(AtomicU32);

impl StateWord {
    /// A fresh word in `Created` with the given auxiliary flags.
    pub fn new(flags: u32) -> Self {
        Self(AtomicU32::new(flags))
    }

    /// A word pre-seeded with a terminal status, for already-completed
    /// factories. Marks the completion synchronous.
    pub fn sealed(status: PromiseStatus, flags: u32) -> Self {
        debug_assert!(status.is_terminal());
        Self(AtomicU32::new(
            status.code() | COMPLETED | SYNCHRONOUS | flags,
        ))
    }

    pub fn load(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    pub fn status(&self) -> PromiseStatus {
        Self::decode(self.load())
    }

    pub fn has(&self, flag: u32) -> bool {
        self.load() & flag != 0
    }

    pub fn is_completed(&self) -> bool {
        self.has(COMPLETED)
    }

    /// True once a producer has either reserved or finished completion.
    /// Past this point continuation adds belong to the registering thread.
    pub fn is_completion_underway(&self) -> bool {
        self.load() & (COMPLETION_RESERVED | COMPLETED) != 0
    }

    fn decode(word: u32) -> PromiseStatus {
        let code = word & STATUS_MASK;
        debug_assert!(
            PromiseStatus::from_code(code).is_some(),
            "corrupt status code {code}"
        );
        PromiseStatus::from_code(code).unwrap_or(PromiseStatus::Created)
    }

    /// Advance to `Scheduled` or `Running`.
    ///
    /// Succeeds iff completion has not been reserved and the current
    /// numeric status is below the target; skipping `Scheduled` on the
    /// way to `Running` is allowed.
    pub fn try_set_status(&self, target: PromiseStatus) -> bool {
        debug_assert!(matches!(
            target,
            PromiseStatus::Scheduled | PromiseStatus::Running
        ));
        let target_code = target.code();
        loop {
            let word = self.0.load(Ordering::Acquire);
            if word & (COMPLETION_RESERVED | COMPLETED) != 0 {
                return false;
            }
            if (word & STATUS_MASK) >= target_code {
                return false;
            }
            let next = (word & !STATUS_MASK) | target_code;
            if self
                .0
                .compare_exchange_weak(word, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Claim the right to complete. Exactly one producer succeeds; the
    /// winner must follow up with [`set_completed`](Self::set_completed).
    pub fn try_reserve_completion(&self) -> bool {
        loop {
            let word = self.0.load(Ordering::Acquire);
            if word & (COMPLETION_RESERVED | COMPLETED) != 0 {
                return false;
            }
            if self
                .0
                .compare_exchange_weak(
                    word,
                    word | COMPLETION_RESERVED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Install the terminal status after a successful reservation.
    ///
    /// The reservation makes this thread the sole writer (`try_set_flag`
    /// and `try_set_status` reject once the reserved bit is visible, and
    /// their CAS fails if the reservation raced ahead of their load), so
    /// a plain release store suffices and doubles as the publication
    /// point for the payload written in between.
    pub fn set_completed(&self, status: PromiseStatus, synchronous: bool) {
        debug_assert!(status.is_terminal());
        let word = self.0.load(Ordering::Relaxed);
        debug_assert!(word & COMPLETION_RESERVED != 0 && word & COMPLETED == 0);
        let mut next = (word & !STATUS_MASK) | status.code() | COMPLETED;
        if synchronous {
            next |= SYNCHRONOUS;
        }
        self.0.store(next, Ordering::Release);
    }

    /// Fused reserve-and-complete for completions with no payload write
    /// between the reservation and the install.
    pub fn try_set_completed(&self, status: PromiseStatus, synchronous: bool) -> bool {
        debug_assert!(status.is_terminal());
        loop {
            let word = self.0.load(Ordering::Acquire);
            if word & (COMPLETION_RESERVED | COMPLETED) != 0 {
                return false;
            }
            let mut next =
                (word & !STATUS_MASK) | status.code() | COMPLETION_RESERVED | COMPLETED;
            if synchronous {
                next |= SYNCHRONOUS;
            }
            if self
                .0
                .compare_exchange_weak(word, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Generic 0 -> 1 transition of an auxiliary flag, rejected once
    /// completion is reserved or done.
    pub fn try_set_flag(&self, flag: u32) -> bool {
        loop {
            let word = self.0.load(Ordering::Acquire);
            if word & (COMPLETION_RESERVED | COMPLETED) != 0 {
                return false;
            }
            if word & flag != 0 {
                return false;
            }
            if self
                .0
                .compare_exchange_weak(word, word | flag, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Unconditional or-in, used for flags that are legal after
    /// completion (disposal).
    pub fn set_flag(&self, flag: u32) {
        self.0.fetch_or(flag, Ordering::AcqRel);
    }

    /// Yield until the winner's completion is visible. Used by losers of
    /// the completion race so that `try_*` only returns after the
    /// terminal status can be observed.
    pub fn spin_until_completed(&self) {
        while !self.is_completed() {
            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn fresh_word_is_created_with_flags() {
        let word = StateWord::new(RUN_CONTINUATIONS_ASYNC);

        assert_eq!(word.status(), PromiseStatus::Created);
        assert!(word.has(RUN_CONTINUATIONS_ASYNC));
        assert!(!word.is_completed());
    }

    #[test]
    fn sealed_word_is_terminal_and_synchronous() {
        let word = StateWord::sealed(PromiseStatus::RanToCompletion, DO_NOT_DISPOSE);

        assert_eq!(word.status(), PromiseStatus::RanToCompletion);
        assert!(word.is_completed());
        assert!(word.has(SYNCHRONOUS));
        assert!(word.has(DO_NOT_DISPOSE));
    }

    #[test]
    fn status_only_moves_forward() {
        let word = StateWord::new(0);

        assert!(word.try_set_status(PromiseStatus::Scheduled));
        assert!(!word.try_set_status(PromiseStatus::Scheduled));
        assert!(word.try_set_status(PromiseStatus::Running));
        assert!(!word.try_set_status(PromiseStatus::Scheduled));
        assert_eq!(word.status(), PromiseStatus::Running);
    }

    #[test]
    fn running_can_be_reached_directly_from_created() {
        let word = StateWord::new(0);

        assert!(word.try_set_status(PromiseStatus::Running));
        assert_eq!(word.status(), PromiseStatus::Running);
    }

    #[test]
    fn reservation_blocks_status_and_flags() {
        let word = StateWord::new(0);

        assert!(word.try_reserve_completion());
        assert!(!word.try_reserve_completion());
        assert!(!word.try_set_status(PromiseStatus::Running));
        assert!(!word.try_set_flag(CANCELLATION_REQUESTED));

        word.set_completed(PromiseStatus::Faulted, false);
        assert_eq!(word.status(), PromiseStatus::Faulted);
        assert!(word.is_completed());
        assert!(!word.has(SYNCHRONOUS));
    }

    #[test]
    fn fused_completion_rejects_a_second_producer() {
        let word = StateWord::new(0);

        assert!(word.try_set_completed(PromiseStatus::RanToCompletion, true));
        assert!(!word.try_set_completed(PromiseStatus::Faulted, false));
        assert_eq!(word.status(), PromiseStatus::RanToCompletion);
        assert!(word.has(SYNCHRONOUS));
    }

    #[test]
    fn flags_set_once_and_stick_through_completion() {
        let word = StateWord::new(0);

        assert!(word.try_set_flag(CANCELLATION_REQUESTED));
        assert!(!word.try_set_flag(CANCELLATION_REQUESTED));
        assert!(word.try_set_completed(PromiseStatus::Cancelled, false));
        assert!(word.has(CANCELLATION_REQUESTED));

        word.set_flag(DISPOSED);
        assert!(word.has(DISPOSED));
    }

    #[test]
    fn concurrent_producers_elect_exactly_one_winner() {
        let word = Arc::new(StateWord::new(0));
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let word = Arc::clone(&word);
                let wins = Arc::clone(&wins);
                std::thread::spawn(move || {
                    let status = if i % 2 == 0 {
                        PromiseStatus::RanToCompletion
                    } else {
                        PromiseStatus::Faulted
                    };
                    if word.try_set_completed(status, false) {
                        wins.fetch_add(1, Ordering::SeqCst);
                    } else {
                        word.spin_until_completed();
                        assert!(word.status().is_terminal());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("producer thread panicked");
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert!(word.status().is_terminal());
    }
}
