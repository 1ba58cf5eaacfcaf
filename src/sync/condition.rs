//! Condition variables bound to a [`Lockable`].

use core::fmt;
use core::time::Duration;
use std::sync::Arc;

use tracing::trace;

use crate::error::{Error, Result};
use crate::status::WakeReason;
use crate::sync::waiter_list::{wake_all, wake_first, FifoList, PriorityList, WaiterList};
use crate::sync::{Lockable, Mutex};
use crate::sys::{Backoff, FastLock, FastLockGuard};
use crate::thread::ThreadImpl;

/// Objects a thread can block on until another thread wakes it.
///
/// Wakeups may be spurious: callers re-check the predicate they wait for.
pub trait Waitable {
    fn wait(&self) -> Result<()>;

    /// Waits at most `timeout`. Returns false if the timeout expired; a zero
    /// timeout never blocks.
    fn wait_for(&self, timeout: Duration) -> Result<bool>;
}

pub(crate) struct ConditionEngine<L> {
    waiters: FastLock<L>,
}

impl<L: WaiterList> ConditionEngine<L> {
    pub fn new() -> Self {
        Self { waiters: FastLock::new(L::default()) }
    }

    /// Releases `lock` while blocked and holds it again when this returns,
    /// whatever the outcome.
    pub fn wait<K: Lockable + ?Sized>(&self, lock: &K, timeout: Option<Duration>) -> Result<bool> {
        if timeout.is_some_and(|t| t.is_zero()) {
            return Ok(false);
        }
        let me = ThreadImpl::current();

        let mut waiters = self.waiters.lock();
        waiters.insert(Arc::clone(&me));

        let mut monitor = me.monitor().lock();
        let waited = FastLockGuard::unlocked(&mut waiters, || {
            lock.release()?;
            Ok::<_, Error>(monitor.wait(timeout))
        });
        // Off the list before the monitor is let go, so no signal can land
        // once this wait is over.
        waiters.remove(&me);
        drop(waiters);
        drop(monitor);

        let reason = waited?;

        // Interruption is deferred so the lock is held again on every path.
        me.monitor().deferring_interruption(|| lock.acquire())?;

        match reason {
            WakeReason::Signaled => Ok(true),
            WakeReason::TimedOut => Ok(false),
            WakeReason::Interrupted => Err(Error::Interrupted),
        }
    }

    pub fn signal(&self) {
        let mut waiters = self.waiters.lock();
        let mut backoff = Backoff::new();
        while !wake_first(&mut *waiters) && !waiters.is_empty() {
            FastLockGuard::unlocked(&mut waiters, || backoff.snooze());
        }
    }

    pub fn broadcast(&self) {
        let mut waiters = self.waiters.lock();
        let mut backoff = Backoff::new();
        loop {
            wake_all(&mut *waiters);
            if waiters.is_empty() {
                break;
            }
            if backoff.is_yielding() {
                trace!(busy = waiters.len(), "broadcast backing off");
            }
            FastLockGuard::unlocked(&mut waiters, || backoff.snooze());
        }
    }

    pub fn waiters(&self) -> usize {
        self.waiters.lock().len()
    }
}

macro_rules! condition_type {
    ($(#[$attr:meta])* $name:ident, $list:ty) => {
        $(#[$attr])*
        pub struct $name<K: Lockable = Mutex> {
            lock: Arc<K>,
            engine: ConditionEngine<$list>,
        }

        impl<K: Lockable> $name<K> {
            pub fn new(lock: Arc<K>) -> Self {
                Self { lock, engine: ConditionEngine::new() }
            }

            /// The lock waiters release while blocked.
            pub fn lock(&self) -> &Arc<K> {
                &self.lock
            }

            /// Wakes one waiting thread, if there is one.
            pub fn signal(&self) {
                self.engine.signal();
            }

            /// Wakes every waiting thread.
            pub fn broadcast(&self) {
                self.engine.broadcast();
            }

            pub fn waiters(&self) -> usize {
                self.engine.waiters()
            }
        }

        impl<K: Lockable> Waitable for $name<K> {
            /// Must be called with the associated lock held.
            fn wait(&self) -> Result<()> {
                self.engine.wait(&*self.lock, None).map(|_| ())
            }

            fn wait_for(&self, timeout: Duration) -> Result<bool> {
                self.engine.wait(&*self.lock, Some(timeout))
            }
        }

        impl<K: Lockable> fmt::Debug for $name<K> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("waiters", &self.waiters())
                    .finish_non_exhaustive()
            }
        }
    };
}

condition_type! {
    /// A condition variable that wakes waiters in arrival order.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use monitor_sync::{Condition, Lockable, Mutex, Waitable};
    ///
    /// let lock = Arc::new(Mutex::new());
    /// let ready = Condition::new(Arc::clone(&lock));
    ///
    /// lock.acquire()?;
    /// assert!(!ready.wait_for(std::time::Duration::from_millis(1))?);
    /// lock.release()?;
    /// # Ok::<(), monitor_sync::Error>(())
    /// ```
    Condition, FifoList
}

condition_type! {
    /// A condition variable that wakes the highest priority waiter first.
    PriorityCondition, PriorityList
}
