//! Threads with interruption, cancellation, joining and priorities.
//!
//! A [`Thread`] is created idle through a [`Context`], started once and then
//! joined (or left running as a daemon). Any thread, including ones this
//! crate did not start, can be reached through a [`ThreadRef`].

use core::fmt;
use core::ops::Deref;
use core::str::FromStr;
use core::time::Duration;
use std::sync::Arc;

use tracing::debug;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::sys::thread_ops;

pub(crate) mod control;
mod local;
pub(crate) mod registry;

pub use local::ThreadLocal;

pub(crate) use control::ThreadImpl;

/// Scheduling priority of a thread. Ordered from `Low` to `High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Priority {
    Low = 0,
    #[default]
    Medium = 1,
    High = 2,
}

impl Priority {
    pub(crate) const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Low,
            1 => Self::Medium,
            _ => Self::High,
        }
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(Error::Initialization {
                what: "priority",
                reason: format!("expected low, medium or high, got {s:?}"),
            }),
        }
    }
}

/// Lifecycle state of a thread. Transitions only move forward:
/// `Idle -> Running -> Complete -> Joined`. `Reference` threads never move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadState {
    /// An OS thread this crate did not start.
    Reference,
    /// Created, not started.
    Idle,
    /// Started; the task is executing.
    Running,
    /// The task has returned.
    Complete,
    /// Complete, and a join observed it.
    Joined,
}

/// Objects that can be canceled from another thread.
///
/// Cancellation is permanent, and also interrupts.
pub trait Cancelable {
    fn cancel(&self) -> Result<()>;

    fn is_canceled(&self) -> bool;
}

/// A shared reference to any thread.
#[derive(Clone)]
pub struct ThreadRef {
    inner: Arc<ThreadImpl>,
}

impl ThreadRef {
    pub(crate) fn from_impl(inner: Arc<ThreadImpl>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id()
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name()
    }

    pub fn state(&self) -> ThreadState {
        self.inner.state()
    }

    pub fn is_daemon(&self) -> bool {
        self.inner.is_daemon()
    }

    pub fn priority(&self) -> Priority {
        self.inner.priority()
    }

    /// The priority the scheduler currently sees, which differs from
    /// [`priority`](Self::priority) while priority inheritance boosts it.
    pub fn effective_priority(&self) -> Priority {
        self.inner.effective_priority()
    }

    /// Stores the priority and, if the thread is running, applies it.
    ///
    /// Raising a priority needs `CAP_SYS_NICE`; without it only the stored
    /// value changes.
    pub fn set_priority(&self, priority: Priority) {
        self.inner.set_priority(priority);
    }

    pub fn auto_cancel(&self) -> bool {
        self.inner.auto_cancel()
    }

    /// Whether [`Context::cancel_all`] reaches this thread. On by default.
    pub fn set_auto_cancel(&self, auto_cancel: bool) {
        self.inner.set_auto_cancel(auto_cancel);
    }

    /// Interrupts the thread: its current or next blocking call fails with
    /// [`Error::Interrupted`]. Returns false if it was already interrupted.
    pub fn interrupt(&self) -> bool {
        self.inner.interrupt()
    }
}

impl Cancelable for ThreadRef {
    fn cancel(&self) -> Result<()> {
        self.inner.cancel()
    }

    fn is_canceled(&self) -> bool {
        self.inner.is_canceled()
    }
}

impl PartialEq for ThreadRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ThreadRef {}

impl fmt::Debug for ThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadRef")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

/// An owned thread started through a [`Context`].
///
/// Dropping the handle of a started non-daemon thread joins it.
pub struct Thread {
    handle: ThreadRef,
}

impl Thread {
    /// Creates an idle thread.
    pub fn new(context: &Context) -> Self {
        Self { handle: ThreadRef::from_impl(ThreadImpl::idle(context.shared())) }
    }

    /// Creates a thread and starts `task` on it.
    pub fn spawn<F>(context: &Context, task: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let thread = Self::new(context);
        thread.start(task)?;
        Ok(thread)
    }

    /// Starts `task`. Only valid once, on an idle thread.
    ///
    /// Returns after the new thread is up; interruption of the caller is
    /// deferred until then.
    pub fn start<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.inner.start(Box::new(task))
    }

    /// Waits for the task to return.
    pub fn join(&self) -> Result<()> {
        self.handle.inner.join(None).map(|_| ())
    }

    /// Waits at most `timeout` for the task to return. Returns false on
    /// timeout; a zero timeout never blocks.
    pub fn try_join(&self, timeout: Duration) -> Result<bool> {
        self.handle.inner.join(Some(timeout))
    }

    /// Makes this a daemon. Only valid before start, from another thread.
    pub fn set_daemon(&self, daemon: bool) -> Result<()> {
        self.handle.inner.set_daemon(daemon)
    }

    pub fn reference(&self) -> &ThreadRef {
        &self.handle
    }
}

impl Deref for Thread {
    type Target = ThreadRef;

    fn deref(&self) -> &ThreadRef {
        &self.handle
    }
}

impl Cancelable for Thread {
    fn cancel(&self) -> Result<()> {
        self.handle.cancel()
    }

    fn is_canceled(&self) -> bool {
        self.handle.is_canceled()
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Thread").field(&self.handle).finish()
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        let inner = &self.handle.inner;
        let joinable = matches!(inner.state(), ThreadState::Running | ThreadState::Complete);
        if inner.is_daemon() || !joinable {
            return;
        }
        if let Err(err) = inner.join(None) {
            debug!(thread = inner.id(), %err, "implicit join on drop failed");
        }
    }
}

/// The calling thread.
///
/// An unmanaged OS thread gets a reference block on first use but is not
/// registered with any context. Use
/// [`Context::current_thread`](crate::Context::current_thread) to keep it
/// until that context shuts down.
pub fn current() -> ThreadRef {
    ThreadRef::from_impl(ThreadImpl::current())
}

/// Reports and clears a pending interruption of the calling thread.
pub fn interrupted() -> bool {
    ThreadImpl::current().monitor().is_interrupted()
}

/// Reports whether the calling thread was canceled. Also clears the
/// interruption that came with the cancellation.
pub fn canceled() -> bool {
    ThreadImpl::current().is_canceled()
}

/// Blocks the calling thread for `duration`. Fails with
/// [`Error::Interrupted`] if interrupted meanwhile. A zero duration yields.
pub fn sleep(duration: Duration) -> Result<()> {
    control::sleep(duration)
}

pub fn yield_now() {
    thread_ops::yield_now();
}
