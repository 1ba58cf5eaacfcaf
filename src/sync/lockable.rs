use core::fmt;
use core::marker::PhantomData;
use core::time::Duration;

use tracing::error;

use crate::error::Result;

/// An object a thread can hold exclusively (or, for semaphores, hold one
/// permit of).
///
/// Blocking calls fail with [`Error::Interrupted`](crate::Error::Interrupted)
/// if the calling thread is interrupted while waiting.
pub trait Lockable {
    fn acquire(&self) -> Result<()>;

    /// Acquires within `timeout`. Returns false if the timeout expired; a
    /// zero timeout never blocks.
    fn try_acquire(&self, timeout: Duration) -> Result<bool>;

    fn release(&self) -> Result<()>;
}

/// Holds a [`Lockable`] for the lifetime of the guard.
#[must_use = "if unused the lock will immediately be released"]
pub struct Guard<'a, L: Lockable + ?Sized> {
    lock: &'a L,
    // Release must happen on the acquiring thread.
    _not_send: PhantomData<*const ()>,
}

impl<'a, L: Lockable + ?Sized> Guard<'a, L> {
    pub fn new(lock: &'a L) -> Result<Self> {
        lock.acquire()?;
        Ok(Self { lock, _not_send: PhantomData })
    }

    /// Returns `None` if `timeout` expired first.
    pub fn try_new(lock: &'a L, timeout: Duration) -> Result<Option<Self>> {
        Ok(lock.try_acquire(timeout)?.then(|| Self { lock, _not_send: PhantomData }))
    }
}

impl<L: Lockable + ?Sized> Drop for Guard<'_, L> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.release() {
            error!(%err, "failed to release a guarded lock");
        }
    }
}

impl<L: Lockable + ?Sized> fmt::Debug for Guard<'_, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard").finish_non_exhaustive()
    }
}
