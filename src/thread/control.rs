//! Per-thread control block: lifecycle state machine, start handshake,
//! joining and the mapping of the running thread onto its block.

use core::sync::atomic::Ordering::Relaxed;
use core::sync::atomic::{AtomicU64, AtomicU8};
use core::time::Duration;
use std::any::Any;
use std::cell::RefCell;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Instant;

use tracing::{debug, error, trace, warn};

use crate::context::Shared;
use crate::error::{Error, Result};
use crate::monitor::Monitor;
use crate::status::{Status, WakeReason};
use crate::sys::{thread_ops, FastLock};
use crate::thread::local::LocalMap;
use crate::thread::{Priority, ThreadState};

/// Work handed to a started thread.
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<Arc<ThreadImpl>>> = const { RefCell::new(None) };
}

struct Control {
    state: ThreadState,
    daemon: bool,
    auto_cancel: bool,
    joiners: Vec<Arc<ThreadImpl>>,
}

pub(crate) struct ThreadImpl {
    id: u64,
    name: Option<String>,
    monitor: Monitor,
    control: FastLock<Control>,
    priority: AtomicU8,
    effective_priority: AtomicU8,
    locals: FastLock<LocalMap>,
    os: FastLock<Option<JoinHandle<()>>>,
    context: Weak<Shared>,
}

impl ThreadImpl {
    fn with_state(
        id: u64,
        state: ThreadState,
        name: Option<String>,
        priority: Priority,
        context: Weak<Shared>,
    ) -> Self {
        Self {
            id,
            name,
            monitor: Monitor::new(),
            control: FastLock::new(Control {
                state,
                daemon: false,
                auto_cancel: true,
                joiners: Vec::new(),
            }),
            priority: AtomicU8::new(priority as u8),
            effective_priority: AtomicU8::new(priority as u8),
            locals: FastLock::new(LocalMap::default()),
            os: FastLock::new(None),
            context,
        }
    }

    /// A fresh, not yet started thread owned by `context`.
    pub fn idle(context: &Arc<Shared>) -> Arc<Self> {
        let config = context.config();
        let id = NEXT_ID.fetch_add(1, Relaxed);
        let name = format!("{}-{id}", config.thread_name_prefix);
        Arc::new(Self::with_state(
            id,
            ThreadState::Idle,
            Some(name),
            config.default_priority,
            Arc::downgrade(context),
        ))
    }

    /// Wraps the calling OS thread, which this crate did not start.
    fn discover(name: Option<String>) -> Arc<Self> {
        let id = NEXT_ID.fetch_add(1, Relaxed);
        let this = Arc::new(Self::with_state(
            id,
            ThreadState::Reference,
            name,
            Priority::Medium,
            Weak::new(),
        ));
        this.monitor.bind_to_current();
        this
    }

    /// The control block mapped onto the calling thread, creating a
    /// reference block on first use by an unmanaged thread.
    ///
    /// Once the calling thread's thread-locals are being destroyed the
    /// mapping is gone. Every call then returns a fresh reference block that
    /// nothing else knows about, so identity checks against it fail.
    pub fn current() -> Arc<Self> {
        CURRENT
            .try_with(|slot| {
                let mut slot = slot.borrow_mut();
                let current = slot.get_or_insert_with(|| {
                    let this = Self::discover(std::thread::current().name().map(str::to_owned));
                    trace!(thread = this.id, "discovered reference thread");
                    this
                });
                Arc::clone(current)
            })
            .unwrap_or_else(|_| Self::discover(None))
    }

    fn install(this: &Arc<Self>) {
        CURRENT.with(|slot| {
            let previous = slot.replace(Some(Arc::clone(this)));
            debug_assert!(
                previous.is_none(),
                "thread started on an OS thread that already had a control block"
            );
        });
    }

    /// Unmaps the calling thread, so its block is not released from inside
    /// a thread-local destructor.
    fn uninstall() {
        let released = CURRENT.try_with(RefCell::take);
        drop(released);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn locals(&self) -> &FastLock<LocalMap> {
        &self.locals
    }

    pub fn context(&self) -> Option<Arc<Shared>> {
        self.context.upgrade()
    }

    pub fn is_current(self: &Arc<Self>) -> bool {
        CURRENT
            .try_with(|slot| {
                slot.borrow().as_ref().is_some_and(|current| Arc::ptr_eq(current, self))
            })
            .unwrap_or(false)
    }

    pub fn state(&self) -> ThreadState {
        self.control.lock().state
    }

    pub fn is_reference(&self) -> bool {
        self.state() == ThreadState::Reference
    }

    pub fn is_daemon(&self) -> bool {
        self.control.lock().daemon
    }

    pub fn set_daemon(self: &Arc<Self>, daemon: bool) -> Result<()> {
        if self.is_current() {
            return Err(Error::InvalidOperation("a thread cannot change its own daemon status"));
        }
        let mut control = self.control.lock();
        if control.state != ThreadState::Idle {
            return Err(Error::InvalidOperation("daemon status can only change before start"));
        }
        control.daemon = daemon;
        Ok(())
    }

    pub fn auto_cancel(&self) -> bool {
        self.control.lock().auto_cancel
    }

    pub fn set_auto_cancel(&self, auto_cancel: bool) {
        self.control.lock().auto_cancel = auto_cancel;
    }

    pub fn priority(&self) -> Priority {
        Priority::from_u8(self.priority.load(Relaxed))
    }

    pub fn effective_priority(&self) -> Priority {
        Priority::from_u8(self.effective_priority.load(Relaxed))
    }

    pub fn set_priority(&self, priority: Priority) {
        self.priority.store(priority as u8, Relaxed);
        let running = matches!(self.state(), ThreadState::Running | ThreadState::Reference);
        if running {
            self.apply_priority(priority);
        } else {
            self.effective_priority.store(priority as u8, Relaxed);
        }
    }

    /// Changes the priority the scheduler sees without touching the cached
    /// base priority. Used by priority inheritance.
    pub fn apply_priority(&self, priority: Priority) {
        self.effective_priority.store(priority as u8, Relaxed);
        if let Err(errno) = thread_ops::set_priority(self.monitor.owner_tid(), priority) {
            warn!(thread = self.id, ?priority, %errno, "scheduler refused priority change");
        }
    }

    pub fn interrupt(&self) -> bool {
        self.monitor.interrupt()
    }

    pub fn is_canceled(&self) -> bool {
        self.monitor.is_canceled()
    }

    pub fn cancel(self: &Arc<Self>) -> Result<()> {
        if self.is_current() {
            return Err(Error::InvalidOperation("a thread cannot cancel itself"));
        }
        if self.monitor.is_canceled() {
            return Err(Error::InvalidOperation("thread is already canceled"));
        }
        self.monitor.cancel();
        Ok(())
    }

    /// Starts `task` on a new OS thread.
    ///
    /// Returns once the child has mapped itself and signaled back.
    /// Interruption of the caller is deferred for the duration.
    pub fn start(self: &Arc<Self>, task: Task) -> Result<()> {
        let shared = self.context().ok_or(Error::Canceled)?;

        let daemon = {
            let mut control = self.control.lock();
            if control.state != ThreadState::Idle {
                return Err(Error::InvalidOperation("thread is not idle"));
            }
            control.state = ThreadState::Running;
            control.daemon
        };

        let registry = shared.registry();
        let admitted = registry.track(self).and_then(|()| {
            if daemon {
                registry
                    .reserve_daemon()
                    .inspect_err(|_| registry.withdraw(self, false))
            } else {
                Ok(())
            }
        });
        if let Err(err) = admitted {
            self.control.lock().state = ThreadState::Idle;
            return Err(err);
        }

        let parent = Self::current();
        let inherited = {
            let values = mem::take(&mut *parent.locals.lock());
            let inherited = values.inherit();
            parent.locals.lock().restore(values);
            inherited
        };

        let mut handshake = parent.monitor.lock();
        let child = Arc::clone(self);
        let child_parent = Arc::clone(&parent);
        let spawned = thread_ops::spawn(
            self.name.clone().unwrap_or_default(),
            shared.config().stack_size,
            move || child.dispatch(child_parent, inherited, task),
        );

        match spawned {
            Ok(handle) => *self.os.lock() = Some(handle),
            Err(err) => {
                drop(handshake);
                shared.registry().withdraw(self, daemon);
                self.control.lock().state = ThreadState::Idle;
                return Err(Error::Initialization { what: "thread", reason: err.to_string() });
            }
        }

        handshake.deferring_interruption(|monitor| {
            while monitor.wait(None) != WakeReason::Signaled {}
        });
        trace!(thread = self.id, daemon, "thread started");
        Ok(())
    }

    /// Entry point of every OS thread started by [`start`](Self::start).
    fn dispatch(self: Arc<Self>, parent: Arc<ThreadImpl>, inherited: LocalMap, task: Task) {
        self.monitor.bind_to_current();
        Self::install(&self);
        self.apply_priority(self.priority());
        self.monitor.clear(Status::INTERRUPTED);

        let daemon = self.is_daemon();

        {
            let handshake = parent.monitor.lock();
            let woke = handshake.notify();
            debug_assert!(woke, "parent refused the start handshake");
        }
        drop(parent);

        self.locals.lock().restore(inherited);

        trace!(thread = self.id, "thread running");
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            error!(
                thread = self.id,
                name = self.name.as_deref().unwrap_or("<unnamed>"),
                panic = panic_message(payload.as_ref()),
                "task panicked; the panic was contained"
            );
        }

        self.complete();

        let values = mem::take(&mut *self.locals.lock());
        drop(values);

        if daemon {
            match self.context() {
                Some(shared) => shared.registry().insert(Arc::clone(&self)),
                None => debug!(thread = self.id, "daemon finished after its context was dropped"),
            }
        }
        trace!(thread = self.id, "thread exiting");
        Self::uninstall();
    }

    /// Marks the task finished and wakes every registered joiner.
    ///
    /// Joiners whose monitor can be taken right away are notified first;
    /// the rest are waited for afterwards.
    fn complete(&self) {
        let mut control = self.control.lock();
        control.state = ThreadState::Complete;

        let mut blocked = Vec::new();
        for joiner in &control.joiners {
            match joiner.monitor.try_lock() {
                Some(monitor) => {
                    monitor.notify();
                }
                None => blocked.push(Arc::clone(joiner)),
            }
        }
        for joiner in blocked {
            joiner.monitor.lock().notify();
        }
    }

    /// Waits for the thread to complete. `None` waits forever, a zero
    /// timeout never blocks.
    pub fn join(self: &Arc<Self>, timeout: Option<Duration>) -> Result<bool> {
        let me = Self::current();
        if Arc::ptr_eq(&me, self) {
            return Err(Error::Deadlock("a thread cannot join itself"));
        }
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        let mut control = self.control.lock();
        loop {
            match control.state {
                ThreadState::Reference => {
                    return Err(Error::InvalidOperation("reference threads cannot be joined"));
                }
                ThreadState::Idle => {
                    return Err(Error::InvalidOperation("thread has not been started"));
                }
                ThreadState::Complete | ThreadState::Joined => break,
                ThreadState::Running => {}
            }

            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if remaining.is_some_and(|r| r.is_zero()) {
                return Ok(false);
            }

            control.joiners.push(Arc::clone(&me));
            let mut monitor = me.monitor.lock();
            drop(control);
            let reason = monitor.wait(remaining);
            // Our monitor must be free again before the control lock is
            // retaken; `complete` locks them in the other order.
            drop(monitor);

            control = self.control.lock();
            control.joiners.retain(|joiner| !Arc::ptr_eq(joiner, &me));
            // `complete` may have signaled us after the wait ended.
            me.monitor.clear(Status::SIGNALED);
            match reason {
                WakeReason::Signaled | WakeReason::TimedOut => continue,
                WakeReason::Interrupted => return Err(Error::Interrupted),
            }
        }

        let first_join = control.state == ThreadState::Complete;
        control.state = ThreadState::Joined;
        let daemon = control.daemon;
        drop(control);

        if first_join && !daemon {
            let handle = self.os.lock().take();
            if let Some(handle) = handle {
                handle
                    .join()
                    .map_err(|_| Error::Synchronization("OS thread exited abnormally"))?;
            }
        }
        Ok(true)
    }

    pub fn os_finished(&self) -> bool {
        self.os.lock().as_ref().map_or(true, JoinHandle::is_finished)
    }

    pub fn take_os_handle(&self) -> Option<JoinHandle<()>> {
        self.os.lock().take()
    }
}

/// Suspends the calling thread for `duration`. Interruptible.
pub(crate) fn sleep(duration: Duration) -> Result<()> {
    if duration.is_zero() {
        thread_ops::yield_now();
        return Ok(());
    }
    let me = ThreadImpl::current();
    let mut monitor = me.monitor.lock();
    let deadline = Instant::now() + duration;
    loop {
        match monitor.wait(Some(deadline.saturating_duration_since(Instant::now()))) {
            WakeReason::Interrupted => return Err(Error::Interrupted),
            WakeReason::TimedOut => return Ok(()),
            WakeReason::Signaled => {}
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}
