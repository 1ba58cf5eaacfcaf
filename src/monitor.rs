//! The per-thread wait/notify object every blocking call ends up on.
//!
//! A [`Monitor`] pairs a [`StatusRegister`] with a futex event word. It has
//! two locks:
//!
//! * the *external* lock, taken through [`Monitor::lock`] or
//!   [`Monitor::try_lock`]. A thread about to wait holds its own external lock
//!   from the moment it registers with a primitive until it actually blocks,
//!   and [`MonitorGuard::wait`] reacquires it before deciding why it woke up.
//!   Notifiers must hold it too, so a waiter that keeps its lock after
//!   waking can't be handed a signal meant for the wait it just finished.
//! * the *state* lock, a [`FastLock`] around the register. Interrupts and
//!   cancellation only need this one, so they can be delivered from anywhere.

use core::marker::PhantomData;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use core::time::Duration;
use std::time::Instant;

use crate::status::{Status, StatusRegister, WakeReason};
use crate::sys::{futex_wait, futex_wake, thread_ops, FastLock, Futex, RawFastLock};

const EVENT_RESET: u32 = 0;
const EVENT_SET: u32 = 1;

struct MonitorState {
    status: StatusRegister,
    waiting: bool,
}

pub(crate) struct Monitor {
    lock: RawFastLock,
    state: FastLock<MonitorState>,
    event: Futex,
    owner: AtomicU32,
}

/// Proof that the caller holds a monitor's external lock.
#[must_use = "if unused the Monitor will immediately unlock"]
pub(crate) struct MonitorGuard<'a> {
    monitor: &'a Monitor,
    _not_send: PhantomData<*const ()>,
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            lock: RawFastLock::new(),
            state: FastLock::new(MonitorState { status: StatusRegister::new(), waiting: false }),
            event: Futex::new(EVENT_RESET),
            owner: AtomicU32::new(0),
        }
    }

    /// Makes the calling OS thread the owner of this monitor.
    pub fn bind_to_current(&self) {
        self.owner.store(thread_ops::current_tid(), Release);
    }

    pub fn owner_tid(&self) -> u32 {
        self.owner.load(Acquire)
    }

    fn is_owned_by_current(&self) -> bool {
        let owner = self.owner.load(Acquire);
        owner != 0 && owner == thread_ops::current_tid()
    }

    pub fn lock(&self) -> MonitorGuard<'_> {
        self.lock.lock();
        MonitorGuard { monitor: self, _not_send: PhantomData }
    }

    pub fn try_lock(&self) -> Option<MonitorGuard<'_>> {
        self.lock
            .try_lock()
            .then(|| MonitorGuard { monitor: self, _not_send: PhantomData })
    }

    /// Sets INTERRUPTED and wakes the owner if it is blocked.
    ///
    /// Returns false if the thread was already interrupted.
    pub fn interrupt(&self) -> bool {
        let mut state = self.state.lock();
        let interruptible = !state.status.examine(Status::INTERRUPTED);
        if interruptible {
            state.status.push(Status::INTERRUPTED);
            self.wake(&state);
        }
        interruptible
    }

    /// Sets the permanent CANCELED flag, interrupting the owner as well.
    ///
    /// Returns false if the thread was already interrupted.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        state.status.push(Status::CANCELED);
        let interruptible = !state.status.examine(Status::INTERRUPTED);
        if interruptible {
            state.status.push(Status::INTERRUPTED);
            self.wake(&state);
        }
        interruptible
    }

    /// Reports a pending interruption. The owner consumes it, anyone else
    /// only looks.
    pub fn is_interrupted(&self) -> bool {
        let mut state = self.state.lock();
        let interrupted = state.status.examine(Status::INTERRUPTED);
        if self.is_owned_by_current() {
            state.status.clear(Status::INTERRUPTED);
        }
        interrupted
    }

    /// Reports cancellation, which is never cleared. When the owner asks, the
    /// interruption that came with the cancellation is consumed.
    pub fn is_canceled(&self) -> bool {
        let mut state = self.state.lock();
        let canceled = state.status.examine(Status::CANCELED);
        if canceled && self.is_owned_by_current() {
            state.status.clear(Status::INTERRUPTED);
        }
        canceled
    }

    pub fn clear(&self, flag: Status) {
        self.state.lock().status.clear(flag & !Status::CANCELED);
    }

    /// Restricts which wake reasons end a wait and returns the previous
    /// mask. Only the owner changes its interest.
    pub fn set_interest(&self, mask: Status) -> Status {
        let mut state = self.state.lock();
        let previous = state.status.current_interest();
        state.status.interest(mask);
        previous
    }

    /// Like [`MonitorGuard::deferring_interruption`], for code that has to
    /// block on other objects (and so take this monitor itself) meanwhile.
    pub fn deferring_interruption<U>(&self, f: impl FnOnce() -> U) -> U {
        let previous = self.set_interest(Status::SIGNALED);
        let result = f();
        self.set_interest(previous);
        result
    }

    #[cfg(test)]
    pub fn is_waiting(&self) -> bool {
        self.state.lock().waiting
    }

    fn wake(&self, state: &MonitorState) {
        if state.waiting {
            self.event.store(EVENT_SET, Release);
            futex_wake(&self.event);
        }
    }

    /// Blocks on the event word until it is set or `deadline` passes.
    ///
    /// Returns true if the deadline passed first.
    fn block(&self, deadline: Option<Instant>) -> bool {
        loop {
            if self.event.load(Acquire) != EVENT_RESET {
                return false;
            }
            let remaining = match deadline {
                None => None,
                Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                    Some(left) if !left.is_zero() => Some(left),
                    _ => return true,
                },
            };
            if !futex_wait(&self.event, EVENT_RESET, remaining) {
                return self.event.load(Acquire) == EVENT_RESET;
            }
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

// Monitors die with their thread's control block, possibly while the
// thread's own thread-locals are torn down, so this must not log.
impl Drop for Monitor {
    fn drop(&mut self) {
        let waiting = self.state.get_mut().waiting;
        debug_assert!(!waiting, "monitor destroyed while its owner was waiting");
    }
}

impl MonitorGuard<'_> {
    /// Waits for a wake reason of current interest. `None` waits forever.
    ///
    /// Must be called by the owning thread. The external lock is released
    /// while blocked and held again when this returns.
    pub fn wait(&mut self, timeout: Option<Duration>) -> WakeReason {
        let monitor = self.monitor;
        debug_assert!(monitor.is_owned_by_current(), "monitor waited on by a foreign thread");

        // Durations too large to represent are treated as infinite.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        let mut state = monitor.state.lock();
        if let Some(reason) = state.status.next() {
            return reason;
        }

        loop {
            state.waiting = true;
            drop(state);
            unsafe { monitor.lock.unlock() };

            let expired = monitor.block(deadline);

            // Decide under the external lock, so a notifier that already owns
            // it either lands before the decision or finds us gone.
            monitor.lock.lock();
            state = monitor.state.lock();
            state.waiting = false;
            monitor.event.store(EVENT_RESET, Relaxed);

            if expired {
                state.status.push(Status::TIMEDOUT);
            }
            if let Some(reason) = state.status.next() {
                return reason;
            }
            if expired || deadline.is_some_and(|d| Instant::now() >= d) {
                // TIMEDOUT is outside the interest mask; still honor the deadline.
                state.status.clear(Status::TIMEDOUT);
                return WakeReason::TimedOut;
            }
            // Woken for a flag we're not interested in right now.
        }
    }

    /// Hands the owner a signal, waking it if it is blocked. A signal sent
    /// while the owner is not waiting ends its next wait.
    ///
    /// Returns false, without changing anything, if an interruption of
    /// current interest is pending.
    pub fn notify(&self) -> bool {
        let monitor = self.monitor;
        let mut state = monitor.state.lock();
        if state.status.pending(Status::INTERRUPTED) {
            return false;
        }
        state.status.push(Status::SIGNALED);
        monitor.wake(&state);
        true
    }

    /// Runs `f` with interruption deferred: only SIGNALED ends a wait until
    /// `f` returns. A pending interruption stays stored for later.
    pub fn deferring_interruption<F, U>(&mut self, f: F) -> U
    where
        F: FnOnce(&mut Self) -> U,
    {
        let previous = self.monitor.set_interest(Status::SIGNALED);
        let result = f(self);
        self.monitor.set_interest(previous);
        result
    }
}

impl Drop for MonitorGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        unsafe { self.monitor.lock.unlock() }
    }
}
