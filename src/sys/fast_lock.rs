use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crate::sys::futex::{futex_wait, futex_wake, Futex};

const UNLOCKED: u32 = 0;
/// Locked, no other threads waiting.
const LOCKED: u32 = 1;
/// Locked, and other threads waiting (contended).
const CONTENDED: u32 = 2;

/// The short internal lock every primitive and every [`Monitor`] uses to
/// serialize its own bookkeeping.
///
/// It is never held across a blocking wait on another object, so contention
/// is brief and a bounded spin before parking on the futex pays off.
///
/// [`Monitor`]: crate::monitor::Monitor
pub(crate) struct RawFastLock {
    futex: Futex,
}

impl RawFastLock {
    #[inline]
    pub const fn new() -> Self {
        Self { futex: Futex::new(UNLOCKED) }
    }

    #[inline]
    pub fn try_lock(&self) -> bool {
        self.futex.compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed).is_ok()
    }

    #[inline]
    pub fn lock(&self) {
        if self.futex.compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed).is_err() {
            self.lock_contended();
        }
    }

    #[cold]
    fn lock_contended(&self) {
        // Spin first to speed things up if the lock is released quickly.
        let mut state = self.spin();

        // If it's unlocked now, attempt to take the lock
        // without marking it as contended.
        if state == UNLOCKED {
            match self.futex.compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed) {
                Ok(_) => return, // Locked!
                Err(s) => state = s,
            }
        }

        loop {
            // Put the lock in contended state.
            // We avoid an unnecessary write if it as already set to CONTENDED,
            // to be friendlier for the caches.
            if state != CONTENDED && self.futex.swap(CONTENDED, Acquire) == UNLOCKED {
                // We changed it from UNLOCKED to CONTENDED, so we just successfully locked it.
                return;
            }

            // Wait for the futex to change state, assuming it is still CONTENDED.
            futex_wait(&self.futex, CONTENDED, None);

            // Spin again after waking up.
            state = self.spin();
        }
    }

    fn spin(&self) -> u32 {
        let mut spin = 100;
        loop {
            // We only use `load` (and not `swap` or `compare_exchange`)
            // while spinning, to be easier on the caches.
            let state = self.futex.load(Relaxed);

            // We stop spinning when the lock is unlocked,
            // but also when it's contended.
            if state != LOCKED || spin == 0 {
                return state;
            }

            core::hint::spin_loop();
            spin -= 1;
        }
    }

    /// # Safety
    ///
    /// The lock must be held by the caller.
    #[inline]
    pub unsafe fn unlock(&self) {
        if self.futex.swap(UNLOCKED, Release) == CONTENDED {
            // We only wake up one thread. When that thread locks the lock,
            // it will mark the lock as CONTENDED (see lock_contended above),
            // which makes sure that any other waiting threads will also be
            // woken up eventually.
            futex_wake(&self.futex);
        }
    }
}

/// A [`RawFastLock`] protecting a value.
pub(crate) struct FastLock<T> {
    raw: RawFastLock,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for FastLock<T> {}
unsafe impl<T: Send> Sync for FastLock<T> {}

/// Scoped access to the value behind a [`FastLock`].
#[must_use = "if unused the FastLock will immediately unlock"]
pub(crate) struct FastLockGuard<'a, T> {
    lock: &'a FastLock<T>,
    // Must be released on the thread that took it.
    _not_send: PhantomData<*const ()>,
}

impl<T> FastLock<T> {
    pub const fn new(data: T) -> Self {
        Self { raw: RawFastLock::new(), data: UnsafeCell::new(data) }
    }

    pub fn lock(&self) -> FastLockGuard<'_, T> {
        self.raw.lock();
        FastLockGuard { lock: self, _not_send: PhantomData }
    }

    pub fn try_lock(&self) -> Option<FastLockGuard<'_, T>> {
        self.raw
            .try_lock()
            .then(|| FastLockGuard { lock: self, _not_send: PhantomData })
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for FastLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for FastLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("FastLock");
        match self.try_lock() {
            Some(guard) => d.field("data", &&*guard),
            None => d.field("data", &format_args!("<locked>")),
        };
        d.finish_non_exhaustive()
    }
}

impl<'a, T> FastLockGuard<'a, T> {
    /// Releases the lock while `f` runs and takes it back afterwards, even if
    /// `f` unwinds.
    pub fn unlocked<F, U>(this: &mut Self, f: F) -> U
    where
        F: FnOnce() -> U,
    {
        struct Relock<'b>(&'b RawFastLock);

        impl Drop for Relock<'_> {
            fn drop(&mut self) {
                self.0.lock();
            }
        }

        unsafe { this.lock.raw.unlock() };
        let _relock = Relock(&this.lock.raw);
        f()
    }
}

impl<T> Deref for FastLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for FastLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for FastLockGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        unsafe { self.lock.raw.unlock() }
    }
}
