//! Sticky record of why a thread should stop waiting.

use bitflags::bitflags;

bitflags! {
    /// Wake reasons that can be pending on a [`StatusRegister`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Status: u8 {
        /// Another thread handed this one a signal.
        const SIGNALED = 1 << 0;
        /// The thread was interrupted.
        const INTERRUPTED = 1 << 1;
        /// A bounded wait expired.
        const TIMEDOUT = 1 << 2;
        /// The thread was canceled. Never surfaced by [`StatusRegister::next`].
        const CANCELED = 1 << 3;

        /// Every flag a wait can return.
        const ANYTHING = Self::SIGNALED.bits() | Self::INTERRUPTED.bits() | Self::TIMEDOUT.bits();
    }
}

/// The reason a wait ended, as returned by [`StatusRegister::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WakeReason {
    Signaled,
    Interrupted,
    TimedOut,
}

impl WakeReason {
    pub const fn status(self) -> Status {
        match self {
            Self::Signaled => Status::SIGNALED,
            Self::Interrupted => Status::INTERRUPTED,
            Self::TimedOut => Status::TIMEDOUT,
        }
    }
}

/// Set of pending wake reasons plus an interest mask.
///
/// Flags stay set until [`next`](Self::next) consumes them. The interest mask
/// only hides flags; anything outside it stays stored and reappears once the
/// mask is widened again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRegister {
    pending: Status,
    interest: Status,
}

impl Default for StatusRegister {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusRegister {
    pub const fn new() -> Self {
        Self { pending: Status::empty(), interest: Status::ANYTHING }
    }

    /// Records `flag`.
    ///
    /// A timeout arriving while a signal is still pending is absorbed: the
    /// signal wins and the timeout never shows up.
    pub fn push(&mut self, flag: Status) {
        if flag.contains(Status::TIMEDOUT) && self.pending.contains(Status::SIGNALED) {
            self.pending |= flag - Status::TIMEDOUT;
        } else {
            self.pending |= flag;
        }
    }

    /// True if any flag in `mask` is pending and of current interest.
    ///
    /// CANCELED is outside every interest mask, so it is only reported when
    /// asked for explicitly.
    pub fn pending(&self, mask: Status) -> bool {
        self.visible().intersects(mask)
    }

    /// True if `flag` is stored, regardless of the interest mask.
    pub fn examine(&self, flag: Status) -> bool {
        self.pending.intersects(flag)
    }

    /// Consumes and returns the highest ranked visible wake reason.
    ///
    /// SIGNALED outranks TIMEDOUT, which outranks INTERRUPTED.
    pub fn next(&mut self) -> Option<WakeReason> {
        let visible = self.visible();
        let reason = if visible.contains(Status::SIGNALED) {
            WakeReason::Signaled
        } else if visible.contains(Status::TIMEDOUT) {
            WakeReason::TimedOut
        } else if visible.contains(Status::INTERRUPTED) {
            WakeReason::Interrupted
        } else {
            return None;
        };
        self.pending.remove(reason.status());
        Some(reason)
    }

    /// Restricts which flags [`next`](Self::next) and
    /// [`pending`](Self::pending) can see.
    pub fn interest(&mut self, mask: Status) {
        self.interest = mask & Status::ANYTHING;
    }

    pub fn current_interest(&self) -> Status {
        self.interest
    }

    pub fn clear(&mut self, flag: Status) {
        self.pending.remove(flag);
    }

    fn visible(&self) -> Status {
        self.pending & (self.interest | Status::CANCELED)
    }
}
