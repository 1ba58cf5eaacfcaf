//! Absolute `CLOCK_MONOTONIC` deadlines, the form `FUTEX_WAIT_BITSET` takes.

use core::mem::MaybeUninit;
use core::time::Duration;

use nc::timespec_t;

const NSEC_PER_SEC: i64 = 1_000_000_000;

/// The monotonic time `timeout` from now, or `None` if it can't be
/// represented.
pub(crate) fn monotonic_deadline(timeout: Duration) -> Option<timespec_t> {
    let mut now: MaybeUninit<timespec_t> = MaybeUninit::uninit();
    // Only EINVAL and EFAULT are possible and neither applies to a valid
    // clock id and a live stack slot.
    unsafe { nc::clock_gettime(nc::CLOCK_MONOTONIC, &mut *now.as_mut_ptr()) }
        .expect("clock_gettime failed");
    let now = unsafe { now.assume_init() };

    let mut secs = (now.tv_sec as i64).checked_add_unsigned(timeout.as_secs())?;
    // Both parts are below one second, so this can't overflow.
    let mut nsec = now.tv_nsec as i64 + i64::from(timeout.subsec_nanos());
    if nsec >= NSEC_PER_SEC {
        nsec -= NSEC_PER_SEC;
        secs = secs.checked_add(1)?;
    }

    Some(timespec_t { tv_sec: secs.try_into().ok()?, tv_nsec: nsec.try_into().ok()? })
}
