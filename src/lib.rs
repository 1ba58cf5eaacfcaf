/*!
Portable concurrency primitives for Linux, built on a single futex-backed
monitor per thread.

Every blocking operation of this crate parks the calling thread on its own
monitor instead of on the object it waits for. That gives every
wait the same three exits: being signaled by the object, being interrupted by
another thread, or timing out. Cancellation is a permanent interruption.

```
use std::sync::Arc;
use monitor_sync::{Context, Lockable, Mutex};

let context = Context::default();
let lock = Arc::new(Mutex::new());

let worker = {
    let lock = Arc::clone(&lock);
    context.spawn(move || {
        let _held = lock.lock().unwrap();
    })?
};
worker.join()?;
context.shutdown()?;
# Ok::<(), monitor_sync::Error>(())
```

# Crate features

* **not_process_private** -
  Drops `FUTEX_PRIVATE_FLAG`, for futex words shared with other processes.
*/

#![cfg(target_os = "linux")]

pub mod config;
mod context;
pub mod error;
mod monitor;
pub mod status;
pub mod sync;
mod sys;
pub mod thread;

#[cfg(test)]
mod tests;

pub use config::Config;
pub use context::Context;
pub use error::{Error, Result};
pub use sync::{
    Barrier, BarrierWaitResult, BiasedReadWriteLock, Condition, CountingSemaphore,
    FairReadWriteLock, FastMutex, Guard, Lockable, Mutex, PriorityCondition,
    PriorityInheritanceMutex, PriorityMutex, PrioritySemaphore, ReadWriteLock, RecursiveMutex,
    Semaphore, Waitable,
};
pub use thread::{Cancelable, Priority, Thread, ThreadLocal, ThreadRef, ThreadState};
