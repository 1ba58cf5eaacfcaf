//! Read/write locks exposing their two roles as [`Lockable`] views.

use core::fmt;
use core::time::Duration;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::sync::{Condition, Lockable, Mutex, Waitable};
use crate::sys::FastLock;
use crate::thread::ThreadImpl;

/// A lock with a shared (read) and an exclusive (write) role.
///
/// ```
/// use monitor_sync::{FairReadWriteLock, Guard, ReadWriteLock};
///
/// let rw = FairReadWriteLock::new();
/// {
///     let read = rw.read_lock();
///     let _first = Guard::new(&read)?;
///     let _second = Guard::new(&read)?;
/// }
/// let write = rw.write_lock();
/// let _exclusive = Guard::new(&write)?;
/// # Ok::<(), monitor_sync::Error>(())
/// ```
pub trait ReadWriteLock {
    type ReadLock<'a>: Lockable
    where
        Self: 'a;
    type WriteLock<'a>: Lockable
    where
        Self: 'a;

    fn read_lock(&self) -> Self::ReadLock<'_>;

    fn write_lock(&self) -> Self::WriteLock<'_>;
}

/// The shared role of a read/write lock.
pub struct ReadView<'a, T>(&'a T);

/// The exclusive role of a read/write lock.
pub struct WriteView<'a, T>(&'a T);

impl<T> Clone for ReadView<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ReadView<'_, T> {}

impl<T> Clone for WriteView<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for WriteView<'_, T> {}

impl<T> fmt::Debug for ReadView<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReadView")
    }
}

impl<T> fmt::Debug for WriteView<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WriteView")
    }
}

fn remaining(deadline: Option<Instant>) -> Duration {
    deadline.map_or(Duration::MAX, |d| d.saturating_duration_since(Instant::now()))
}

/// Readers and writers are admitted in the order they arrive.
///
/// A writer holds the internal mutex for as long as it holds the write
/// role, so it also shuts out readers that arrive after it.
pub struct FairReadWriteLock {
    lock: Arc<Mutex>,
    no_readers: Condition<Mutex>,
    readers: FastLock<usize>,
}

impl FairReadWriteLock {
    pub fn new() -> Self {
        let lock = Arc::new(Mutex::new());
        Self { no_readers: Condition::new(Arc::clone(&lock)), lock, readers: FastLock::new(0) }
    }

    /// Number of threads holding the read role.
    pub fn readers(&self) -> usize {
        *self.readers.lock()
    }

    fn read_acquire(&self) -> Result<()> {
        let _guard = self.lock.lock()?;
        *self.readers.lock() += 1;
        Ok(())
    }

    fn read_try_acquire(&self, timeout: Duration) -> Result<bool> {
        let Some(_guard) = self.lock.try_lock_for(timeout)? else {
            return Ok(false);
        };
        *self.readers.lock() += 1;
        Ok(true)
    }

    fn read_release(&self) -> Result<()> {
        let _guard = self.lock.lock()?;
        let mut readers = self.readers.lock();
        if *readers == 0 {
            return Err(Error::InvalidOperation("read lock is not held"));
        }
        *readers -= 1;
        if *readers == 0 {
            drop(readers);
            self.no_readers.signal();
        }
        Ok(())
    }

    fn write_acquire(&self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let acquired = match timeout {
            None => self.lock.acquire().map(|()| true)?,
            Some(timeout) => self.lock.try_acquire(timeout)?,
        };
        if !acquired {
            return Ok(false);
        }

        while *self.readers.lock() > 0 {
            let waited = match timeout {
                None => self.no_readers.wait().map(|()| true),
                Some(_) => self.no_readers.wait_for(remaining(deadline)),
            };
            match waited {
                Ok(true) => {}
                Ok(false) if deadline.is_some_and(|d| Instant::now() < d) => {}
                Ok(false) => {
                    self.lock.release()?;
                    return Ok(false);
                }
                Err(err) => {
                    self.lock.release()?;
                    return Err(err);
                }
            }
        }
        Ok(true)
    }
}

impl Default for FairReadWriteLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FairReadWriteLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FairReadWriteLock")
            .field("readers", &self.readers())
            .field("write_locked", &self.lock.is_locked())
            .finish()
    }
}

impl ReadWriteLock for FairReadWriteLock {
    type ReadLock<'a> = ReadView<'a, Self>;
    type WriteLock<'a> = WriteView<'a, Self>;

    fn read_lock(&self) -> ReadView<'_, Self> {
        ReadView(self)
    }

    fn write_lock(&self) -> WriteView<'_, Self> {
        WriteView(self)
    }
}

impl Lockable for ReadView<'_, FairReadWriteLock> {
    fn acquire(&self) -> Result<()> {
        self.0.read_acquire()
    }

    fn try_acquire(&self, timeout: Duration) -> Result<bool> {
        self.0.read_try_acquire(timeout)
    }

    fn release(&self) -> Result<()> {
        self.0.read_release()
    }
}

impl Lockable for WriteView<'_, FairReadWriteLock> {
    fn acquire(&self) -> Result<()> {
        self.0.write_acquire(None).map(|_| ())
    }

    fn try_acquire(&self, timeout: Duration) -> Result<bool> {
        self.0.write_acquire(Some(timeout))
    }

    fn release(&self) -> Result<()> {
        self.0.lock.release()
    }
}

#[derive(Debug, Default)]
struct Counters {
    active_readers: usize,
    /// Id of the thread holding the write role.
    writer: Option<u64>,
    waiting_readers: usize,
    waiting_writers: usize,
}

impl Counters {
    fn allow_reader(&self) -> bool {
        self.writer.is_none() && self.waiting_writers == 0
    }

    fn allow_writer(&self) -> bool {
        self.writer.is_none() && self.active_readers == 0
    }
}

#[derive(Clone, Copy)]
enum Role {
    Reader,
    Writer,
}

/// Writers first: once a writer is waiting, new readers queue behind it.
pub struct BiasedReadWriteLock {
    lock: Arc<Mutex>,
    read_ready: Condition<Mutex>,
    write_ready: Condition<Mutex>,
    // Only touched with `lock` held.
    counters: FastLock<Counters>,
}

impl BiasedReadWriteLock {
    pub fn new() -> Self {
        let lock = Arc::new(Mutex::new());
        Self {
            read_ready: Condition::new(Arc::clone(&lock)),
            write_ready: Condition::new(Arc::clone(&lock)),
            lock,
            counters: FastLock::new(Counters::default()),
        }
    }

    pub fn readers(&self) -> usize {
        self.counters.lock().active_readers
    }

    pub fn is_write_locked(&self) -> bool {
        self.counters.lock().writer.is_some()
    }

    /// Writers blocked waiting for the write role.
    pub fn waiting_writers(&self) -> usize {
        self.counters.lock().waiting_writers
    }

    fn enter(&self, role: Role, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let _guard = self.lock.lock()?;

        let (ready, condition) = match role {
            Role::Reader => (Counters::allow_reader as fn(&Counters) -> bool, &self.read_ready),
            Role::Writer => (Counters::allow_writer as fn(&Counters) -> bool, &self.write_ready),
        };
        self.adjust_waiting(role, true);

        let outcome = loop {
            if ready(&self.counters.lock()) {
                break Ok(true);
            }
            let waited = match timeout {
                None => condition.wait().map(|()| true),
                Some(_) => condition.wait_for(remaining(deadline)),
            };
            match waited {
                Ok(true) => {}
                Ok(false) if deadline.is_some_and(|d| Instant::now() < d) => {}
                Ok(false) => break Ok(false),
                Err(err) => break Err(err),
            }
        };

        self.adjust_waiting(role, false);
        let mut counters = self.counters.lock();
        match (&outcome, role) {
            (Ok(true), Role::Reader) => counters.active_readers += 1,
            (Ok(true), Role::Writer) => counters.writer = Some(ThreadImpl::current().id()),
            (_, Role::Writer) => {
                // A writer giving up may be all that held readers back.
                let unblocked = counters.waiting_writers == 0
                    && counters.writer.is_none()
                    && counters.waiting_readers > 0;
                drop(counters);
                if unblocked {
                    self.read_ready.broadcast();
                }
            }
            (_, Role::Reader) => {}
        }
        outcome
    }

    fn adjust_waiting(&self, role: Role, arriving: bool) {
        let mut counters = self.counters.lock();
        let waiting = match role {
            Role::Reader => &mut counters.waiting_readers,
            Role::Writer => &mut counters.waiting_writers,
        };
        if arriving {
            *waiting += 1;
        } else {
            *waiting -= 1;
        }
    }

    fn leave(&self, role: Role) -> Result<()> {
        let me = ThreadImpl::current().id();
        let _guard = self.lock.lock()?;
        let mut counters = self.counters.lock();
        match role {
            Role::Reader if counters.active_readers == 0 => {
                return Err(Error::InvalidOperation("read lock is not held"));
            }
            Role::Reader => counters.active_readers -= 1,
            Role::Writer if counters.writer != Some(me) => {
                return Err(Error::InvalidOperation("write lock is not held by the calling thread"));
            }
            Role::Writer => counters.writer = None,
        }
        let wake_writer = counters.waiting_writers > 0 && counters.allow_writer();
        let wake_readers = counters.waiting_writers == 0
            && counters.waiting_readers > 0
            && counters.allow_reader();
        drop(counters);

        if wake_writer {
            self.write_ready.signal();
        } else if wake_readers {
            self.read_ready.broadcast();
        }
        Ok(())
    }
}

impl Default for BiasedReadWriteLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BiasedReadWriteLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BiasedReadWriteLock").field("counters", &*self.counters.lock()).finish()
    }
}

impl ReadWriteLock for BiasedReadWriteLock {
    type ReadLock<'a> = ReadView<'a, Self>;
    type WriteLock<'a> = WriteView<'a, Self>;

    fn read_lock(&self) -> ReadView<'_, Self> {
        ReadView(self)
    }

    fn write_lock(&self) -> WriteView<'_, Self> {
        WriteView(self)
    }
}

impl Lockable for ReadView<'_, BiasedReadWriteLock> {
    fn acquire(&self) -> Result<()> {
        self.0.enter(Role::Reader, None).map(|_| ())
    }

    fn try_acquire(&self, timeout: Duration) -> Result<bool> {
        self.0.enter(Role::Reader, Some(timeout))
    }

    fn release(&self) -> Result<()> {
        self.0.leave(Role::Reader)
    }
}

impl Lockable for WriteView<'_, BiasedReadWriteLock> {
    fn acquire(&self) -> Result<()> {
        self.0.enter(Role::Writer, None).map(|_| ())
    }

    fn try_acquire(&self, timeout: Duration) -> Result<bool> {
        self.0.enter(Role::Writer, Some(timeout))
    }

    fn release(&self) -> Result<()> {
        self.0.leave(Role::Writer)
    }
}
