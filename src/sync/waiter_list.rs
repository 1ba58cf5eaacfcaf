//! Orderings of threads waiting on a primitive.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::thread::ThreadImpl;

/// The queue a primitive keeps its waiters in.
///
/// Entries are visited front to back when a waiter is to be woken, so the
/// order of the list is the wake order.
pub(crate) trait WaiterList: Default + Send {
    fn insert(&mut self, thread: Arc<ThreadImpl>);

    /// Removes `thread` if present. Returns whether it was.
    fn remove(&mut self, thread: &Arc<ThreadImpl>) -> bool;

    fn get(&self, index: usize) -> Option<&Arc<ThreadImpl>>;

    fn remove_at(&mut self, index: usize) -> Option<Arc<ThreadImpl>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest priority among the waiters.
    fn highest_priority(&self) -> Option<crate::thread::Priority> {
        (0..self.len()).filter_map(|i| self.get(i)).map(|thread| thread.priority()).max()
    }
}

/// Arrival order.
#[derive(Default)]
pub(crate) struct FifoList {
    threads: VecDeque<Arc<ThreadImpl>>,
}

impl WaiterList for FifoList {
    fn insert(&mut self, thread: Arc<ThreadImpl>) {
        self.threads.push_back(thread);
    }

    fn remove(&mut self, thread: &Arc<ThreadImpl>) -> bool {
        match self.threads.iter().position(|t| Arc::ptr_eq(t, thread)) {
            Some(index) => self.threads.remove(index).is_some(),
            None => false,
        }
    }

    fn get(&self, index: usize) -> Option<&Arc<ThreadImpl>> {
        self.threads.get(index)
    }

    fn remove_at(&mut self, index: usize) -> Option<Arc<ThreadImpl>> {
        self.threads.remove(index)
    }

    fn len(&self) -> usize {
        self.threads.len()
    }
}

/// Highest [`Priority`](crate::thread::Priority) first, arrival order among
/// equals. Priorities are read at insertion time.
#[derive(Default)]
pub(crate) struct PriorityList {
    threads: Vec<Arc<ThreadImpl>>,
}

impl WaiterList for PriorityList {
    fn insert(&mut self, thread: Arc<ThreadImpl>) {
        let priority = thread.priority();
        let index = self.threads.partition_point(|t| t.priority() >= priority);
        self.threads.insert(index, thread);
    }

    fn remove(&mut self, thread: &Arc<ThreadImpl>) -> bool {
        match self.threads.iter().position(|t| Arc::ptr_eq(t, thread)) {
            Some(index) => {
                self.threads.remove(index);
                true
            }
            None => false,
        }
    }

    fn get(&self, index: usize) -> Option<&Arc<ThreadImpl>> {
        self.threads.get(index)
    }

    fn remove_at(&mut self, index: usize) -> Option<Arc<ThreadImpl>> {
        (index < self.threads.len()).then(|| self.threads.remove(index))
    }

    fn len(&self) -> usize {
        self.threads.len()
    }

    fn highest_priority(&self) -> Option<crate::thread::Priority> {
        self.threads.first().map(|thread| thread.priority())
    }
}

/// Signals the first waiter, in list order, whose monitor is free and that
/// accepts the signal. Every waiter tried is dropped from the list, whether
/// or not it took the signal.
pub(crate) fn wake_first<L: WaiterList>(waiters: &mut L) -> bool {
    let mut index = 0;
    while let Some(waiter) = waiters.get(index) {
        let Some(monitor) = waiter.monitor().try_lock() else {
            index += 1;
            continue;
        };
        let woke = monitor.notify();
        drop(monitor);
        waiters.remove_at(index);
        if woke {
            return true;
        }
    }
    false
}

/// Signals every waiter whose monitor is free and drops them from the list.
/// The ones left over were busy and need another pass.
pub(crate) fn wake_all<L: WaiterList>(waiters: &mut L) {
    let mut index = 0;
    while let Some(waiter) = waiters.get(index) {
        let Some(monitor) = waiter.monitor().try_lock() else {
            index += 1;
            continue;
        };
        monitor.notify();
        drop(monitor);
        waiters.remove_at(index);
    }
}
