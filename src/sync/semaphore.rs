//! Counted permits.

use core::fmt;
use core::time::Duration;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, trace, warn};

use crate::error::{Error, Result};
use crate::status::WakeReason;
use crate::sync::waiter_list::{wake_first, FifoList, PriorityList, WaiterList};
use crate::sync::{Guard, Lockable};
use crate::sys::{Backoff, FastLock, FastLockGuard};
use crate::thread::ThreadImpl;

struct CountState<L> {
    count: usize,
    /// Threads inside the slow path of `acquire`. While any are, new callers
    /// queue behind them instead of taking a permit directly.
    entry_count: usize,
    waiters: L,
}

pub(crate) struct CountingEngine<L> {
    state: FastLock<CountState<L>>,
    max: Option<usize>,
}

impl<L: WaiterList> CountingEngine<L> {
    /// `max` of `None` leaves the count unchecked. An initial count above
    /// `max` is clamped to it.
    pub fn new(count: usize, max: Option<usize>) -> Self {
        let count = match max {
            Some(max) if count > max => {
                warn!(count, max, "initial semaphore count above its maximum, clamped");
                max
            }
            _ => count,
        };
        Self {
            state: FastLock::new(CountState { count, entry_count: 0, waiters: L::default() }),
            max,
        }
    }

    pub fn acquire(&self, timeout: Option<Duration>) -> Result<bool> {
        let me = ThreadImpl::current();
        let mut state = self.state.lock();

        if state.count > 0 && state.entry_count == 0 {
            state.count -= 1;
            return Ok(true);
        }
        if timeout.is_some_and(|t| t.is_zero()) {
            return Ok(false);
        }
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        state.entry_count += 1;
        state.waiters.insert(Arc::clone(&me));

        // Held until we are off the list, except while blocked.
        let mut monitor = me.monitor().lock();
        let outcome = loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let reason = FastLockGuard::unlocked(&mut state, || monitor.wait(remaining));
            match reason {
                WakeReason::Signaled if state.count > 0 => break Ok(true),
                WakeReason::Signaled => {
                    // Woken, but the permit went elsewhere. `release` drops
                    // the waiters it tried, so queue up again.
                    state.waiters.remove(&me);
                    state.waiters.insert(Arc::clone(&me));
                }
                WakeReason::TimedOut => break Ok(false),
                WakeReason::Interrupted => break Err(Error::Interrupted),
            }
        };

        state.waiters.remove(&me);
        drop(monitor);
        state.entry_count -= 1;
        if let Ok(true) = outcome {
            state.count -= 1;
        }
        outcome
    }

    pub fn release(&self) -> Result<()> {
        let mut state = self.state.lock();
        if self.max.is_some_and(|max| state.count >= max) {
            return Err(Error::InvalidOperation("semaphore count is already at its maximum"));
        }
        state.count += 1;

        let mut backoff = Backoff::new();
        while !wake_first(&mut state.waiters) && !state.waiters.is_empty() {
            if backoff.is_yielding() {
                trace!(waiters = state.waiters.len(), "semaphore release backing off");
            }
            FastLockGuard::unlocked(&mut state, || backoff.snooze());
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    pub fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl<L> Drop for CountingEngine<L> {
    fn drop(&mut self) {
        let blocked = self.state.get_mut().entry_count;
        if blocked > 0 {
            error!(blocked, "semaphore destroyed while threads were blocked on it");
        }
        debug_assert_eq!(blocked, 0, "semaphore destroyed while in use");
    }
}

macro_rules! semaphore_type {
    ($(#[$attr:meta])* $name:ident, $list:ty) => {
        $(#[$attr])*
        pub struct $name {
            engine: CountingEngine<$list>,
        }

        impl $name {
            /// Takes one permit until the returned guard is dropped.
            pub fn lock(&self) -> Result<Guard<'_, Self>> {
                Guard::new(self)
            }

            /// Permits currently available.
            pub fn count(&self) -> usize {
                self.engine.count()
            }

            /// Number of threads blocked waiting for a permit.
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

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("count", &self.count())
                    .field("waiters", &self.waiters())
                    .finish()
            }
        }
    };
}

semaphore_type! {
    /// A semaphore whose count may never exceed a maximum. Waiters are served
    /// in arrival order.
    ///
    /// Releasing at the maximum fails with
    /// [`Error::InvalidOperation`](crate::Error::InvalidOperation).
    Semaphore, FifoList
}

impl Semaphore {
    /// `count` permits, never more than `max`. A `count` above `max` is
    /// clamped.
    pub fn new(count: usize, max: usize) -> Self {
        Self { engine: CountingEngine::new(count, Some(max)) }
    }
}

impl Default for Semaphore {
    /// One permit, at most one.
    fn default() -> Self {
        Self::new(1, 1)
    }
}

semaphore_type! {
    /// A semaphore without a maximum count.
    CountingSemaphore, FifoList
}

impl CountingSemaphore {
    pub fn new(count: usize) -> Self {
        Self { engine: CountingEngine::new(count, None) }
    }
}

impl Default for CountingSemaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

semaphore_type! {
    /// A bounded semaphore that hands permits to the highest priority waiter
    /// first.
    PrioritySemaphore, PriorityList
}

impl PrioritySemaphore {
    /// Same bounds as [`Semaphore::new`].
    pub fn new(count: usize, max: usize) -> Self {
        Self { engine: CountingEngine::new(count, Some(max)) }
    }
}

impl Default for PrioritySemaphore {
    fn default() -> Self {
        Self::new(1, 1)
    }
}
