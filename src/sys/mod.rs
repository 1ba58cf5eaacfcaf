mod backoff;
mod fast_lock;
mod futex;
mod timespec;
pub(crate) mod thread_ops;

pub(crate) use backoff::Backoff;
pub(crate) use fast_lock::{FastLock, FastLockGuard, RawFastLock};
pub(crate) use futex::{futex_wait, futex_wake, Futex};
