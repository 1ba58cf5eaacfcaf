use core::fmt;
use core::time::Duration;
use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use crate::error::{Error, Result};
use crate::sync::{Condition, Mutex, Waitable};
use crate::sys::FastLock;
use crate::thread;

type Command = Box<dyn Fn() -> Result<()> + Send + Sync + 'static>;

struct BarrierState {
    /// Parties still missing from the current generation.
    count: usize,
    generation: u64,
    broken: bool,
}

/// A cyclic rendezvous point for a fixed number of threads.
///
/// Each generation completes when the last of `parties` threads arrives. The
/// last thread runs the optional command and then releases the others; the
/// barrier is immediately ready for the next generation.
///
/// A party that is interrupted or times out, or a command that fails, breaks
/// the barrier: every current and future waiter gets
/// [`Error::BrokenBarrier`] until [`reset`](Self::reset).
pub struct Barrier {
    parties: usize,
    lock: Arc<Mutex>,
    arrived: Condition<Mutex>,
    // Only touched with `lock` held.
    state: FastLock<BarrierState>,
    command: Option<Command>,
}

/// Returned to every party of a completed generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    leader: bool,
}

impl BarrierWaitResult {
    /// True for exactly one party per generation: the one that arrived last
    /// and ran the command.
    pub fn is_leader(&self) -> bool {
        self.leader
    }
}

impl Barrier {
    /// A barrier for `parties` threads. Zero behaves like one.
    pub fn new(parties: usize) -> Self {
        Self::build(parties, None)
    }

    /// A barrier whose last arriving party runs `command` before the others
    /// are released. A failing command breaks the barrier.
    pub fn with_command<F>(parties: usize, command: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        Self::build(parties, Some(Box::new(command)))
    }

    fn build(parties: usize, command: Option<Command>) -> Self {
        let parties = parties.max(1);
        let lock = Arc::new(Mutex::new());
        Self {
            parties,
            arrived: Condition::new(Arc::clone(&lock)),
            lock,
            state: FastLock::new(BarrierState { count: parties, generation: 0, broken: false }),
            command,
        }
    }

    pub fn wait(&self) -> Result<BarrierWaitResult> {
        self.arrive(None)?.ok_or(Error::Synchronization("unbounded barrier wait timed out"))
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`. A party that
    /// gives up breaks the barrier and gets `None`.
    pub fn wait_for(&self, timeout: Duration) -> Result<Option<BarrierWaitResult>> {
        self.arrive(Some(timeout))
    }

    fn arrive(&self, timeout: Option<Duration>) -> Result<Option<BarrierWaitResult>> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let _guard = self.lock.lock()?;

        if self.state.lock().broken {
            return Err(Error::BrokenBarrier);
        }
        if thread::interrupted() {
            self.break_barrier();
            return Err(Error::Interrupted);
        }

        let (last, generation) = {
            let mut state = self.state.lock();
            state.count -= 1;
            (state.count == 0, state.generation)
        };

        if last {
            let outcome = self.command.as_ref().map_or(Ok(()), |command| command());
            if let Err(err) = outcome {
                warn!(%err, "barrier command failed");
                self.break_barrier();
                return Err(err);
            }
            {
                let mut state = self.state.lock();
                state.generation += 1;
                state.count = self.parties;
            }
            self.arrived.broadcast();
            return Ok(Some(BarrierWaitResult { leader: true }));
        }

        loop {
            let waited = match deadline {
                None => self.arrived.wait().map(|()| true),
                Some(deadline) => {
                    self.arrived.wait_for(deadline.saturating_duration_since(Instant::now()))
                }
            };

            let state = self.state.lock();
            if state.generation != generation {
                drop(state);
                if let Err(Error::Interrupted) = waited {
                    // Too late to matter here; keep it for the next blocking call.
                    thread::current().interrupt();
                }
                return Ok(Some(BarrierWaitResult { leader: false }));
            }
            if state.broken {
                return Err(Error::BrokenBarrier);
            }
            drop(state);

            match waited {
                Ok(true) => {}
                Ok(false) if deadline.is_some_and(|d| Instant::now() < d) => {}
                Ok(false) => {
                    self.break_barrier();
                    return Ok(None);
                }
                Err(err) => {
                    self.break_barrier();
                    return Err(err);
                }
            }
        }
    }

    fn break_barrier(&self) {
        self.state.lock().broken = true;
        self.arrived.broadcast();
    }

    /// Breaks the barrier, releasing every waiting party with
    /// [`Error::BrokenBarrier`].
    pub fn shatter(&self) -> Result<()> {
        let _guard = self.lock.lock()?;
        self.break_barrier();
        Ok(())
    }

    /// Repairs a broken barrier and starts a fresh generation. Parties still
    /// waiting are released as if their generation had completed.
    pub fn reset(&self) -> Result<()> {
        let _guard = self.lock.lock()?;
        {
            let mut state = self.state.lock();
            state.broken = false;
            state.generation += 1;
            state.count = self.parties;
        }
        self.arrived.broadcast();
        Ok(())
    }

    pub fn is_broken(&self) -> bool {
        self.state.lock().broken
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Parties of the current generation that have arrived so far.
    pub fn arrived(&self) -> usize {
        self.parties - self.state.lock().count
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Barrier")
            .field("parties", &self.parties)
            .field("count", &state.count)
            .field("generation", &state.generation)
            .field("broken", &state.broken)
            .finish_non_exhaustive()
    }
}
