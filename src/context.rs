use core::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Result;
use crate::thread::registry::ThreadRegistry;
use crate::thread::{Thread, ThreadImpl, ThreadRef};

pub(crate) struct Shared {
    config: Config,
    registry: ThreadRegistry,
}

impl Shared {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ThreadRegistry {
        &self.registry
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if !self.registry.is_shut_down() {
            warn!("context dropped without shutdown; daemon threads were not waited for");
        }
    }
}

/// Owner of the threads started through it.
///
/// A context is set up once, handed (cloned) to whoever starts threads and
/// shut down once at the end. Shutdown refuses new threads, waits for running
/// daemons and releases every reference thread it recorded.
///
/// ```
/// use monitor_sync::{Config, Context};
///
/// let context = Context::new(Config::default());
/// let worker = context.spawn(|| {
///     // ...
/// })?;
/// worker.join()?;
/// context.shutdown()?;
/// # Ok::<(), monitor_sync::Error>(())
/// ```
#[derive(Clone)]
pub struct Context {
    shared: Arc<Shared>,
}

impl Context {
    pub fn new(config: Config) -> Self {
        debug!(?config, "context created");
        Self { shared: Arc::new(Shared { config, registry: ThreadRegistry::new() }) }
    }

    /// A context configured from `MONITOR_SYNC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(Config::from_env()?))
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// An idle thread owned by this context.
    pub fn thread(&self) -> Thread {
        Thread::new(self)
    }

    pub fn spawn<F>(&self, task: F) -> Result<Thread>
    where
        F: FnOnce() + Send + 'static,
    {
        Thread::spawn(self, task)
    }

    /// The calling thread. An unmanaged OS thread is recorded as a reference
    /// thread and kept until shutdown.
    pub fn current_thread(&self) -> ThreadRef {
        let current = ThreadImpl::current();
        if current.is_reference() {
            self.shared.registry.insert_reference_thread(Arc::clone(&current));
        }
        ThreadRef::from_impl(current)
    }

    /// Reclaims the OS threads of finished daemons without blocking.
    pub fn poll(&self) -> usize {
        self.shared.registry.poll()
    }

    /// Cancels every running thread of this context that has auto-cancel
    /// enabled. Returns how many were reached.
    pub fn cancel_all(&self) -> usize {
        self.shared.registry.cancel_all()
    }

    /// Daemons started and not yet completed.
    pub fn pending_daemons(&self) -> usize {
        self.shared.registry.pending_daemons()
    }

    pub fn reference_threads(&self) -> usize {
        self.shared.registry.reference_threads()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.registry.is_shut_down()
    }

    /// Refuses new threads and waits for daemons, bounded by
    /// [`Config::shutdown_timeout`].
    ///
    /// Fails with [`Error::Timeout`](crate::Error::Timeout) if daemons were
    /// still running when the timeout expired, and with
    /// [`Error::InvalidOperation`](crate::Error::InvalidOperation) on a second
    /// call.
    pub fn shutdown(&self) -> Result<()> {
        debug!("context shutting down");
        self.shared.registry.shutdown(self.shared.config.shutdown_timeout)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.shared.config)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
