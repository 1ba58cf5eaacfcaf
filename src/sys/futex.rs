//! The two futex operations everything else parks on.

use core::ptr::null;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering::Relaxed;
use core::time::Duration;

use syscalls::{syscall, Errno, Sysno};

use crate::sys::timespec::monotonic_deadline;

/// The kernel only ever looks at 32 bits.
pub type Futex = AtomicU32;

/// `$op`, marked process private unless the `not_process_private` feature
/// is on.
macro_rules! futex_op {
    ($op:expr) => {{
        #[cfg(feature = "not_process_private")]
        let op = $op;
        #[cfg(not(feature = "not_process_private"))]
        let op = $op | nc::FUTEX_PRIVATE_FLAG;
        op
    }};
}

/// Blocks while `futex` holds `expected`, for at most `timeout`.
///
/// Returns false only if the timeout expired.
pub fn futex_wait(futex: &Futex, expected: u32, timeout: Option<Duration>) -> bool {
    // Absolute, so retrying after EINTR doesn't stretch the wait. A deadline
    // too far out to represent waits forever.
    let deadline = timeout.and_then(monotonic_deadline);
    let deadline_ptr = deadline.as_ref().map_or(null(), |t| t as *const nc::timespec_t);

    while futex.load(Relaxed) == expected {
        let r = unsafe {
            syscall!(
                Sysno::futex,
                futex as *const Futex,
                futex_op!(nc::FUTEX_WAIT_BITSET),
                expected,
                deadline_ptr,
                null::<u32>(), // unused by FUTEX_WAIT_BITSET
                u32::MAX       // match every waker, like plain FUTEX_WAIT
            )
        };
        match r {
            Err(Errno::ETIMEDOUT) => return false,
            Err(Errno::EINTR) => {}
            _ => return true,
        }
    }
    true
}

/// Wakes one thread blocked in [`futex_wait`] on `futex`. Returns whether
/// there was one.
pub fn futex_wake(futex: &Futex) -> bool {
    let woken =
        unsafe { syscall!(Sysno::futex, futex as *const Futex, futex_op!(nc::FUTEX_WAKE), 1) };
    // Only EFAULT and EINVAL are possible, and `futex` is a live, aligned word.
    woken.expect("futex_wake failed") > 0
}
