use crate::sys::thread_ops;

/// Number of rounds that only spin before the backoff starts yielding.
const SPIN_LIMIT: u32 = 6;
/// Number of rounds after which every further step is a plain yield.
const YIELD_LIMIT: u32 = 10;

/// Exponential spin, then yield, used by release paths that could not find a
/// waiter whose monitor was free.
///
/// The caller always drops its own fast lock around [`Backoff::snooze`], so
/// the waiter it is racing with can make progress.
#[derive(Debug, Default)]
pub(crate) struct Backoff {
    step: u32,
}

impl Backoff {
    pub const fn new() -> Self {
        Self { step: 0 }
    }

    pub fn snooze(&mut self) {
        if self.step <= SPIN_LIMIT {
            for _ in 0..1u32 << self.step {
                core::hint::spin_loop();
            }
        } else {
            thread_ops::yield_now();
        }

        if self.step <= YIELD_LIMIT {
            self.step += 1;
        }
    }

    pub fn is_yielding(&self) -> bool {
        self.step > SPIN_LIMIT
    }
}
