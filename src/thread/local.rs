//! Typed per-thread slots that live on the thread's control block.

use core::any::Any;
use core::fmt;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed};
use std::collections::HashMap;

use crate::thread::control::ThreadImpl;

static NEXT_KEY: AtomicUsize = AtomicUsize::new(1);

/// Key 0 means "not assigned yet".
const UNASSIGNED: usize = 0;

/// A value of type `T` kept separately for every thread.
///
/// Each thread that touches the slot first sees the value produced by the
/// `init` function. An inheritable slot also carries an `inherit` function:
/// when a thread starts another one, the child's value is computed from the
/// parent's at that moment.
///
/// Slots can live in statics:
///
/// ```
/// use monitor_sync::ThreadLocal;
///
/// static DEPTH: ThreadLocal<u32> = ThreadLocal::new(|| 0);
///
/// DEPTH.with(|depth| *depth += 1);
/// assert_eq!(DEPTH.get(), 1);
/// ```
pub struct ThreadLocal<T> {
    key: AtomicUsize,
    init: fn() -> T,
    inherit: Option<fn(&T) -> T>,
}

impl<T: Send + 'static> ThreadLocal<T> {
    pub const fn new(init: fn() -> T) -> Self {
        Self { key: AtomicUsize::new(UNASSIGNED), init, inherit: None }
    }

    /// A slot whose value is passed on to threads started by the owner.
    pub const fn inheritable(init: fn() -> T, inherit: fn(&T) -> T) -> Self {
        Self { key: AtomicUsize::new(UNASSIGNED), init, inherit: Some(inherit) }
    }

    fn key(&self) -> usize {
        let key = self.key.load(Acquire);
        if key != UNASSIGNED {
            return key;
        }
        let fresh = NEXT_KEY.fetch_add(1, Relaxed);
        match self.key.compare_exchange(UNASSIGNED, fresh, AcqRel, Acquire) {
            Ok(_) => fresh,
            Err(winner) => winner,
        }
    }

    /// Runs `f` on the calling thread's value.
    ///
    /// `f` may use other slots, but not this one.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let me = ThreadImpl::current();
        let key = self.key();

        // Taken out of the map so no lock is held while user code runs.
        let taken = me.locals().lock().values.remove(&key);
        let mut slot = taken
            .and_then(|slot| slot.into_any().downcast::<Slot<T>>().ok())
            .unwrap_or_else(|| Box::new(Slot { value: (self.init)(), inherit: self.inherit }));

        let result = f(&mut slot.value);
        me.locals().lock().values.insert(key, slot);
        result
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(|value| value.clone())
    }

    /// Replaces the calling thread's value, returning the previous one if
    /// the slot had been used.
    pub fn set(&self, value: T) -> Option<T> {
        let me = ThreadImpl::current();
        let slot = Box::new(Slot { value, inherit: self.inherit });
        let previous = me.locals().lock().values.insert(self.key(), slot);
        previous
            .and_then(|slot| slot.into_any().downcast::<Slot<T>>().ok())
            .map(|slot| slot.value)
    }

    /// Removes the calling thread's value. The next access starts over from
    /// `init`.
    pub fn take(&self) -> Option<T> {
        let me = ThreadImpl::current();
        let previous = me.locals().lock().values.remove(&self.key());
        previous
            .and_then(|slot| slot.into_any().downcast::<Slot<T>>().ok())
            .map(|slot| slot.value)
    }
}

impl<T> fmt::Debug for ThreadLocal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadLocal")
            .field("key", &self.key.load(Relaxed))
            .field("inheritable", &self.inherit.is_some())
            .finish()
    }
}

struct Slot<T> {
    value: T,
    inherit: Option<fn(&T) -> T>,
}

trait LocalValue: Send {
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
    fn inherit(&self) -> Option<Box<dyn LocalValue>>;
}

impl<T: Send + 'static> LocalValue for Slot<T> {
    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn inherit(&self) -> Option<Box<dyn LocalValue>> {
        let inherit = self.inherit?;
        Some(Box::new(Slot { value: inherit(&self.value), inherit: self.inherit }))
    }
}

/// The slots of one thread, keyed by [`ThreadLocal`] identity.
#[derive(Default)]
pub(crate) struct LocalMap {
    values: HashMap<usize, Box<dyn LocalValue>>,
}

impl LocalMap {
    /// Values a child thread starts with.
    pub fn inherit(&self) -> LocalMap {
        let values = self
            .values
            .iter()
            .filter_map(|(&key, slot)| slot.inherit().map(|child| (key, child)))
            .collect();
        LocalMap { values }
    }

    /// Moves `other`'s values in, keeping ours where both have one.
    pub fn restore(&mut self, other: LocalMap) {
        for (key, slot) in other.values {
            self.values.entry(key).or_insert(slot);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.values.len()
    }
}
