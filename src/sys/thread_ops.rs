//! The OS thread layer: creation, yielding, identity and scheduling priority.
//!
//! Thread creation and OS-level join go through [`std::thread`]; everything
//! else is a raw Linux syscall.

use std::io;
use std::thread::{Builder, JoinHandle};

use syscalls::{syscall, Errno, Sysno};

use crate::thread::Priority;

/// `which` argument of `setpriority(2)` addressing a single thread id.
const PRIO_PROCESS: usize = 0;

/// Linux thread id of the calling thread.
pub(crate) fn current_tid() -> u32 {
    // gettid cannot fail.
    unsafe { syscall!(Sysno::gettid) }.map_or(0, |tid| tid as u32)
}

pub(crate) fn yield_now() {
    // sched_yield always succeeds on Linux.
    let _ = unsafe { syscall!(Sysno::sched_yield) };
}

/// Nice value used to express a [`Priority`] to the Linux scheduler.
pub(crate) const fn nice_value(priority: Priority) -> i32 {
    match priority {
        Priority::Low => 10,
        Priority::Medium => 0,
        Priority::High => -10,
    }
}

/// Applies `priority` to the thread `tid`.
///
/// Lowering the nice value below the current one needs `CAP_SYS_NICE`, so
/// this is best-effort and reports the kernel's answer instead of failing.
pub(crate) fn set_priority(tid: u32, priority: Priority) -> Result<(), Errno> {
    if tid == 0 {
        return Err(Errno::ESRCH);
    }
    let nice = nice_value(priority) as isize as usize;
    unsafe { syscall!(Sysno::setpriority, PRIO_PROCESS, tid as usize, nice) }.map(|_| ())
}

/// Spawns the OS thread backing a started `Thread`.
pub(crate) fn spawn<F>(name: String, stack_size: Option<usize>, f: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let mut builder = Builder::new().name(name);
    if let Some(size) = stack_size {
        builder = builder.stack_size(size);
    }
    builder.spawn(f)
}
