//! Bookkeeping of the threads a [`Context`](crate::Context) has to account
//! for at shutdown.

use core::time::Duration;
use std::mem;
use std::sync::{Arc, Weak};

use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::status::{Status, WakeReason};
use crate::sys::FastLock;
use crate::thread::control::ThreadImpl;
use crate::thread::ThreadState;

#[derive(Default)]
struct RegistryState {
    /// Completed daemons whose OS threads have not been joined yet.
    daemons: Vec<Arc<ThreadImpl>>,
    /// Unmanaged threads seen through `Context::current_thread`.
    references: Vec<Arc<ThreadImpl>>,
    /// Every thread started through the context, for `cancel_all`.
    live: Vec<Weak<ThreadImpl>>,
    /// Started daemons that have not completed yet.
    pending: usize,
    /// The thread blocked in `shutdown`, notified when `pending` drops to 0.
    waiter: Option<Arc<ThreadImpl>>,
    shut_down: bool,
}

#[derive(Default)]
pub(crate) struct ThreadRegistry {
    state: FastLock<RegistryState>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a thread about to start. Fails with [`Error::Canceled`] once
    /// the registry is shut down.
    pub fn track(&self, thread: &Arc<ThreadImpl>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.shut_down {
                return Err(Error::Canceled);
            }
            state.live.retain(|live| live.strong_count() > 0);
            state.live.push(Arc::downgrade(thread));
        }
        self.poll();
        Ok(())
    }

    /// Announces a daemon that shutdown must wait for.
    pub fn reserve_daemon(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(Error::Canceled);
        }
        state.pending += 1;
        trace!(pending = state.pending, "daemon reserved");
        Ok(())
    }

    /// Undoes [`track`](Self::track), and [`reserve_daemon`](Self::reserve_daemon)
    /// if `daemon` is set, for a thread that failed to start.
    pub fn withdraw(&self, thread: &Arc<ThreadImpl>, daemon: bool) {
        let mut state = self.state.lock();
        state.live.retain(|live| !core::ptr::eq(live.as_ptr(), Arc::as_ptr(thread)));
        if daemon {
            Self::settle(&mut state);
        }
    }

    /// Hands over a daemon whose task has completed.
    pub fn insert(&self, thread: Arc<ThreadImpl>) {
        let mut state = self.state.lock();
        trace!(thread = thread.id(), "daemon completed");
        state.daemons.push(thread);
        Self::settle(&mut state);
    }

    /// Keeps an unmanaged thread alive until shutdown. Returns false if it
    /// was already registered.
    pub fn insert_reference_thread(&self, thread: Arc<ThreadImpl>) -> bool {
        let mut state = self.state.lock();
        if state.references.iter().any(|known| Arc::ptr_eq(known, &thread)) {
            return false;
        }
        debug!(thread = thread.id(), "reference thread registered");
        state.references.push(thread);
        true
    }

    /// Counts a daemon as done, waking the shutdown waiter after the last.
    /// The registry lock stays held, so shutdown sees either the waiter
    /// still registered or its signal already stored.
    fn settle(state: &mut RegistryState) {
        state.pending = state.pending.saturating_sub(1);
        if state.pending > 0 {
            return;
        }
        if let Some(waiter) = state.waiter.take() {
            waiter.monitor().lock().notify();
        }
    }

    /// Joins the OS threads of completed daemons that have already exited.
    /// Never blocks on a running thread. Returns how many were reclaimed.
    pub fn poll(&self) -> usize {
        let handles: Vec<_> = {
            let mut state = self.state.lock();
            let (finished, running) = mem::take(&mut state.daemons)
                .into_iter()
                .partition::<Vec<_>, _>(|daemon| daemon.os_finished());
            state.daemons = running;
            finished.iter().filter_map(|daemon| daemon.take_os_handle()).collect()
        };
        let reclaimed = handles.len();
        for handle in handles {
            let _ = handle.join();
        }
        if reclaimed > 0 {
            debug!(reclaimed, "reclaimed finished daemon threads");
        }
        reclaimed
    }

    /// Cancels every live thread that has auto-cancel enabled, except the
    /// caller. Returns how many were canceled.
    pub fn cancel_all(&self) -> usize {
        let live: Vec<_> = self.state.lock().live.iter().filter_map(Weak::upgrade).collect();
        let mut canceled = 0;
        for thread in live {
            let reachable = thread.state() == ThreadState::Running && thread.auto_cancel();
            if !reachable || thread.is_current() {
                continue;
            }
            if thread.cancel().is_ok() {
                canceled += 1;
            }
        }
        debug!(canceled, "auto-cancel pass finished");
        canceled
    }

    pub fn pending_daemons(&self) -> usize {
        self.state.lock().pending
    }

    pub fn reference_threads(&self) -> usize {
        self.state.lock().references.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    /// Refuses new threads, waits up to `timeout` for pending daemons, joins
    /// them and releases reference threads.
    ///
    /// The wait defers interruption. On timeout the daemons still running
    /// are left detached and [`Error::Timeout`] is returned.
    pub fn shutdown(&self, timeout: Option<Duration>) -> Result<()> {
        let me = ThreadImpl::current();
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(Error::InvalidOperation("thread registry is already shut down"));
        }
        state.shut_down = true;

        let mut outcome = Ok(());
        if state.pending > 0 {
            debug!(pending = state.pending, "waiting for daemon threads");
            state.waiter = Some(Arc::clone(&me));
            // Locked before the registry is released, so the last daemon
            // cannot notify before we wait.
            let mut monitor = me.monitor().lock();
            drop(state);
            let reason = monitor.deferring_interruption(|monitor| loop {
                match monitor.wait(timeout) {
                    WakeReason::Interrupted => {}
                    reason => break reason,
                }
            });
            drop(monitor);

            state = self.state.lock();
            // The last daemon may have signaled us after the timeout.
            me.monitor().clear(Status::SIGNALED);
            if reason == WakeReason::TimedOut && state.pending > 0 {
                warn!(pending = state.pending, "daemon threads still running at shutdown");
                state.waiter = None;
                outcome = Err(Error::Timeout);
            }
        }

        let daemons = mem::take(&mut state.daemons);
        let references = mem::take(&mut state.references);
        state.live.clear();
        drop(state);

        for daemon in &daemons {
            if let Some(handle) = daemon.take_os_handle() {
                let _ = handle.join();
            }
        }
        debug!(daemons = daemons.len(), references = references.len(), "thread registry drained");
        outcome
    }
}
