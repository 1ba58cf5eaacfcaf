//! Synchronization objects built on the per-thread monitor.
//!
//! ## Locks
//!
//! - [`Mutex`], [`RecursiveMutex`], [`PriorityMutex`] and
//!   [`PriorityInheritanceMutex`]: exclusive ownership, differing in wake
//!   order, reentrancy and priority inheritance.
//!
//! - [`FastMutex`]: the bare futex lock underneath, uninterruptible.
//!
//! - [`Semaphore`], [`CountingSemaphore`] and [`PrioritySemaphore`]: counted
//!   permits.
//!
//! - [`FairReadWriteLock`] and [`BiasedReadWriteLock`]: shared and exclusive
//!   roles behind the [`ReadWriteLock`] trait.
//!
//! All of them implement [`Lockable`] and can be held through a [`Guard`].
//! Unlike [`std::sync::Mutex`] they guard no data and have no poison
//! mechanism. Every blocking call can be interrupted.
//!
//! ## Waiting
//!
//! - [`Condition`] and [`PriorityCondition`]: condition variables bound to a
//!   shared [`Lockable`], implementing [`Waitable`].
//!
//! - [`Barrier`]: a cyclic rendezvous point for a fixed number of threads.

mod barrier;
mod condition;
mod lock_engine;
mod lockable;
mod mutex;
mod rwlock;
mod semaphore;
pub(crate) mod waiter_list;

pub use barrier::{Barrier, BarrierWaitResult};
pub use condition::{Condition, PriorityCondition, Waitable};
pub use lockable::{Guard, Lockable};
pub use mutex::{FastMutex, Mutex, PriorityInheritanceMutex, PriorityMutex, RecursiveMutex};
pub use rwlock::{BiasedReadWriteLock, FairReadWriteLock, ReadView, ReadWriteLock, WriteView};
pub use semaphore::{CountingSemaphore, PrioritySemaphore, Semaphore};
