//! Error type shared by every blocking operation in the crate.

use thiserror::Error;

/// Reasons a synchronization operation did not complete.
///
/// `Interrupted`, `Canceled`, `Timeout` and `BrokenBarrier` are expected
/// outcomes that callers handle locally (see [`Error::is_expected`]). The
/// remaining variants describe programming or environmental errors and are
/// not meant to be retried.
#[derive(Debug, Error)]
pub enum Error {
    /// A blocking call was aborted because the waiting thread was interrupted.
    #[error("blocking operation was interrupted")]
    Interrupted,

    /// The operation was rejected because its owner has been disabled, such
    /// as starting a thread on a context that was shut down.
    #[error("operation rejected: the owning structure was canceled")]
    Canceled,

    /// A bounded wait expired.
    #[error("bounded wait expired")]
    Timeout,

    /// The caller would wait on itself forever.
    #[error("deadlock: {0}")]
    Deadlock(&'static str),

    /// The call is not valid in the current state or from the current thread.
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// A barrier was broken by an interrupted, timed-out or failing party.
    #[error("barrier is broken")]
    BrokenBarrier,

    /// A resource could not be created.
    #[error("failed to initialize {what}: {reason}")]
    Initialization {
        /// The resource being created.
        what: &'static str,
        /// What went wrong.
        reason: String,
    },

    /// An internal invariant was violated.
    #[error("internal synchronization error: {0}")]
    Synchronization(&'static str),
}

impl Error {
    /// Returns true for the outcomes a well-behaved program is expected to
    /// handle: interruption, cancellation, timeouts and broken barriers.
    #[must_use]
    pub const fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::Interrupted | Self::Canceled | Self::Timeout | Self::BrokenBarrier
        )
    }
}

/// A specialized [`Result`](core::result::Result) for this crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;
