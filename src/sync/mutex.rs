use core::fmt;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering::Relaxed;
use core::time::Duration;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::sync::lock_engine::{InheritPriority, LockEngine, NullBehavior};
use crate::sync::waiter_list::{FifoList, PriorityList};
use crate::sync::{Guard, Lockable};
use crate::sys::{thread_ops, Backoff, RawFastLock};

macro_rules! lock_type {
    ($(#[$attr:meta])* $name:ident, $list:ty, $behavior:ty, recursive: $recursive:expr) => {
        $(#[$attr])*
        pub struct $name {
            engine: LockEngine<$list, $behavior>,
        }

        impl $name {
            pub fn new() -> Self {
                Self { engine: LockEngine::new($recursive) }
            }

            /// Acquires the lock until the returned guard is dropped.
            pub fn lock(&self) -> Result<Guard<'_, Self>> {
                Guard::new(self)
            }

            /// Like [`lock`](Self::lock), giving up after `timeout`.
            pub fn try_lock_for(&self, timeout: Duration) -> Result<Option<Guard<'_, Self>>> {
                Guard::try_new(self, timeout)
            }

            pub fn is_locked(&self) -> bool {
                self.engine.is_locked()
            }

            /// True if the calling thread is the owner.
            pub fn is_held_by_current(&self) -> bool {
                self.engine.is_owned_by_current()
            }

            /// Number of threads blocked waiting for the lock.
            pub fn waiters(&self) -> usize {
                self.engine.waiters()
            }
        }

        impl Lockable for $name {
            fn acquire(&self) -> Result<()> {
                self.engine.acquire(None).map(|_| ())
            }

            fn try_acquire(&self, timeout: Duration) -> Result<bool> {
                self.engine.acquire(Some(timeout))
            }

            fn release(&self) -> Result<()> {
                self.engine.release()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("locked", &self.is_locked())
                    .field("waiters", &self.waiters())
                    .finish()
            }
        }
    };
}

lock_type! {
    /// A non-recursive lock handed to waiters in arrival order.
    ///
    /// Acquiring it again from the owner fails with
    /// [`Error::Deadlock`](crate::Error::Deadlock); releasing it from another
    /// thread fails with [`Error::InvalidOperation`](crate::Error::InvalidOperation).
    Mutex, FifoList, NullBehavior, recursive: false
}

lock_type! {
    /// A lock its owner may acquire repeatedly. It is free again after as
    /// many releases as acquisitions.
    RecursiveMutex, FifoList, NullBehavior, recursive: true
}

lock_type! {
    /// A non-recursive lock handed to the highest priority waiter first.
    PriorityMutex, PriorityList, NullBehavior, recursive: false
}

lock_type! {
    /// A [`PriorityMutex`] whose owner runs at the priority of its most
    /// important waiter until it releases the lock.
    PriorityInheritanceMutex, PriorityList, InheritPriority, recursive: false
}

/// The bare futex lock, for short critical sections that make no blocking
/// calls.
///
/// No waiter list and no monitor: contenders spin, then park on the futex,
/// and cannot be interrupted while they do. Bounded acquisition polls until
/// the timeout passes.
pub struct FastMutex {
    raw: RawFastLock,
    /// Kernel thread id of the holder, 0 when free.
    holder: AtomicU32,
}

impl FastMutex {
    pub const fn new() -> Self {
        Self { raw: RawFastLock::new(), holder: AtomicU32::new(0) }
    }

    /// Acquires the lock until the returned guard is dropped.
    pub fn lock(&self) -> Result<Guard<'_, Self>> {
        Guard::new(self)
    }

    pub fn try_lock_for(&self, timeout: Duration) -> Result<Option<Guard<'_, Self>>> {
        Guard::try_new(self, timeout)
    }

    pub fn is_locked(&self) -> bool {
        self.holder.load(Relaxed) != 0
    }

    fn check_relock(&self, me: u32) -> Result<()> {
        if self.holder.load(Relaxed) == me {
            return Err(Error::Deadlock("lock is already held by the calling thread"));
        }
        Ok(())
    }
}

impl Lockable for FastMutex {
    fn acquire(&self) -> Result<()> {
        let me = thread_ops::current_tid();
        self.check_relock(me)?;
        self.raw.lock();
        self.holder.store(me, Relaxed);
        Ok(())
    }

    fn try_acquire(&self, timeout: Duration) -> Result<bool> {
        let me = thread_ops::current_tid();
        self.check_relock(me)?;
        let deadline = Instant::now().checked_add(timeout);
        let mut backoff = Backoff::new();
        loop {
            if self.raw.try_lock() {
                self.holder.store(me, Relaxed);
                return Ok(true);
            }
            if timeout.is_zero() || deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(false);
            }
            backoff.snooze();
        }
    }

    fn release(&self) -> Result<()> {
        if self.holder.load(Relaxed) != thread_ops::current_tid() {
            return Err(Error::InvalidOperation("lock is not held by the calling thread"));
        }
        self.holder.store(0, Relaxed);
        // SAFETY: the holder check above proves the caller locked it.
        unsafe { self.raw.unlock() };
        Ok(())
    }
}

impl Default for FastMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FastMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FastMutex").field("locked", &self.is_locked()).finish()
    }
}
