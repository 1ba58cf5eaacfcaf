//! The owner/waiter protocol shared by every mutex flavor.
//!
//! A waiter enqueues itself, takes its own monitor and only then lets go of
//! the engine lock. It keeps the monitor until it has left the list again,
//! so a releaser that finds it in the list either cannot lock its monitor
//! (and backs off) or finds it blocked and hands it a signal. A signaled
//! waiter is the next owner; nobody can take the lock from under it because
//! the fast path requires an empty waiter list.

use core::time::Duration;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, trace};

use crate::error::{Error, Result};
use crate::status::WakeReason;
use crate::sync::waiter_list::WaiterList;
use crate::sys::{Backoff, FastLock, FastLockGuard};
use crate::thread::{Priority, ThreadImpl};

/// Hooks run under the engine lock at each ownership transition.
pub(crate) trait Behavior: Default + Send {
    fn waiter_arrived(&mut self, _owner: Option<&Arc<ThreadImpl>>, _waiter: &Arc<ThreadImpl>) {}

    /// `highest` is the top priority among the waiters that remain.
    fn waiter_departed(&mut self, _owner: Option<&Arc<ThreadImpl>>, _highest: Option<Priority>) {}

    fn owner_acquired(&mut self, _owner: &Arc<ThreadImpl>, _highest: Option<Priority>) {}

    fn owner_released(&mut self, _owner: &Arc<ThreadImpl>) {}
}

#[derive(Debug, Default)]
pub(crate) struct NullBehavior;

impl Behavior for NullBehavior {}

/// Raises the owner to the priority of its most important waiter for as
/// long as it holds the lock.
#[derive(Debug, Default)]
pub(crate) struct InheritPriority {
    boosted: bool,
}

impl InheritPriority {
    fn raise(&mut self, owner: &Arc<ThreadImpl>, to: Priority) {
        if to > owner.effective_priority() {
            trace!(thread = owner.id(), ?to, "inheriting waiter priority");
            owner.apply_priority(to);
            self.boosted = true;
        }
    }
}

impl Behavior for InheritPriority {
    fn waiter_arrived(&mut self, owner: Option<&Arc<ThreadImpl>>, waiter: &Arc<ThreadImpl>) {
        if let Some(owner) = owner {
            self.raise(owner, waiter.priority());
        }
    }

    fn waiter_departed(&mut self, owner: Option<&Arc<ThreadImpl>>, highest: Option<Priority>) {
        let Some(owner) = owner else { return };
        if !self.boosted {
            return;
        }
        let target = highest.map_or(owner.priority(), |p| p.max(owner.priority()));
        if target != owner.effective_priority() {
            owner.apply_priority(target);
        }
        self.boosted = target > owner.priority();
    }

    fn owner_acquired(&mut self, owner: &Arc<ThreadImpl>, highest: Option<Priority>) {
        if let Some(highest) = highest {
            self.raise(owner, highest);
        }
    }

    fn owner_released(&mut self, owner: &Arc<ThreadImpl>) {
        if self.boosted {
            owner.apply_priority(owner.priority());
            self.boosted = false;
        }
    }
}

struct EngineState<L, B> {
    owner: Option<Arc<ThreadImpl>>,
    count: usize,
    waiters: L,
    behavior: B,
}

pub(crate) struct LockEngine<L, B> {
    state: FastLock<EngineState<L, B>>,
    recursive: bool,
}

impl<L: WaiterList, B: Behavior> LockEngine<L, B> {
    pub fn new(recursive: bool) -> Self {
        Self {
            state: FastLock::new(EngineState {
                owner: None,
                count: 0,
                waiters: L::default(),
                behavior: B::default(),
            }),
            recursive,
        }
    }

    /// `None` waits forever.
    pub fn acquire(&self, timeout: Option<Duration>) -> Result<bool> {
        let me = ThreadImpl::current();
        let mut state = self.state.lock();

        if let Some(owner) = &state.owner {
            if Arc::ptr_eq(owner, &me) {
                if !self.recursive {
                    return Err(Error::Deadlock("lock is already held by the calling thread"));
                }
                state.count += 1;
                return Ok(true);
            }
        } else if state.waiters.is_empty() {
            Self::take(&mut state, &me);
            return Ok(true);
        }

        if timeout.is_some_and(|t| t.is_zero()) {
            return Ok(false);
        }
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        state.waiters.insert(Arc::clone(&me));
        {
            let state = &mut *state;
            state.behavior.waiter_arrived(state.owner.as_ref(), &me);
        }

        let mut monitor = me.monitor().lock();
        let outcome = loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let reason = FastLockGuard::unlocked(&mut state, || monitor.wait(remaining));
            match reason {
                WakeReason::Signaled if state.owner.is_none() => break Ok(true),
                WakeReason::Signaled => {}
                WakeReason::TimedOut => break Ok(false),
                WakeReason::Interrupted => break Err(Error::Interrupted),
            }
        };

        state.waiters.remove(&me);
        drop(monitor);
        if let Ok(true) = outcome {
            Self::take(&mut state, &me);
        } else {
            let state = &mut *state;
            let highest = state.waiters.highest_priority();
            state.behavior.waiter_departed(state.owner.as_ref(), highest);
        }
        outcome
    }

    fn take(state: &mut EngineState<L, B>, me: &Arc<ThreadImpl>) {
        state.owner = Some(Arc::clone(me));
        state.count = 1;
        let highest = state.waiters.highest_priority();
        state.behavior.owner_acquired(me, highest);
    }

    pub fn release(&self) -> Result<()> {
        let me = ThreadImpl::current();
        let mut state = self.state.lock();

        if !state.owner.as_ref().is_some_and(|owner| Arc::ptr_eq(owner, &me)) {
            return Err(Error::InvalidOperation("lock is not held by the calling thread"));
        }
        if state.count > 1 {
            state.count -= 1;
            return Ok(());
        }
        state.owner = None;
        state.count = 0;
        state.behavior.owner_released(&me);

        let mut backoff = Backoff::new();
        while state.owner.is_none() && !state.waiters.is_empty() {
            if Self::notify_first(&state.waiters) {
                break;
            }
            if backoff.is_yielding() {
                trace!(waiters = state.waiters.len(), "release backing off");
            }
            FastLockGuard::unlocked(&mut state, || backoff.snooze());
        }
        Ok(())
    }

    /// Signals the first waiter, in list order, whose monitor is free and
    /// who has no interruption pending.
    fn notify_first(waiters: &L) -> bool {
        (0..waiters.len())
            .filter_map(|i| waiters.get(i))
            .any(|waiter| waiter.monitor().try_lock().is_some_and(|monitor| monitor.notify()))
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    pub fn is_owned_by_current(&self) -> bool {
        let me = ThreadImpl::current();
        self.state.lock().owner.as_ref().is_some_and(|owner| Arc::ptr_eq(owner, &me))
    }

    /// Threads currently queued.
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl<L, B> Drop for LockEngine<L, B> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let busy = state.owner.is_some() || state.count > 0;
        if busy {
            error!("lock destroyed while it was held");
        }
        debug_assert!(!busy, "lock destroyed while it was held");
    }
}
