use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex};

use crate::context::Context;
use crate::tests::init_test_logging;
use crate::thread::{ThreadImpl, ThreadLocal};

static COUNTER: ThreadLocal<u32> = ThreadLocal::new(|| 7);
static TRACE: ThreadLocal<String> =
    ThreadLocal::inheritable(String::new, |parent| format!("{parent}/child"));

#[test]
fn init_set_get_take() {
    assert_eq!(COUNTER.get(), 7);
    assert_eq!(COUNTER.set(9), Some(7));
    assert_eq!(COUNTER.get(), 9);

    COUNTER.with(|value| *value += 1);
    assert_eq!(COUNTER.take(), Some(10));
    assert_eq!(COUNTER.take(), None);
    assert_eq!(COUNTER.get(), 7);
}

#[test]
fn set_before_first_use() {
    static FRESH: ThreadLocal<Vec<u8>> = ThreadLocal::new(Vec::new);
    assert_eq!(FRESH.set(vec![1, 2]), None);
    FRESH.with(|bytes| bytes.push(3));
    assert_eq!(FRESH.get(), [1, 2, 3]);
}

#[test]
fn values_are_per_thread() {
    COUNTER.set(1);
    let other = std::thread::spawn(|| {
        let seen = COUNTER.get();
        COUNTER.set(2);
        seen
    })
    .join()
    .unwrap();
    assert_eq!(other, 7);
    assert_eq!(COUNTER.get(), 1);
}

#[test]
fn started_threads_inherit() {
    let context = Context::default();
    TRACE.set("root".to_owned());
    COUNTER.set(1);

    let (tx, rx) = channel();
    let nested = context.clone();
    let child = context
        .spawn(move || {
            tx.send((TRACE.get(), COUNTER.get())).unwrap();
            let tx = tx.clone();
            let grandchild =
                nested.spawn(move || tx.send((TRACE.get(), COUNTER.get())).unwrap()).unwrap();
            grandchild.join().unwrap();
        })
        .unwrap();
    child.join().unwrap();

    assert_eq!(rx.recv().unwrap(), ("root/child".to_owned(), 7));
    assert_eq!(rx.recv().unwrap(), ("root/child/child".to_owned(), 7));
    assert_eq!(TRACE.get(), "root");
    assert_eq!(COUNTER.get(), 1);
    context.shutdown().unwrap();
}

#[test]
fn slots_live_on_the_control_block() {
    let context = Context::default();
    let worker = context.thread();
    worker
        .start(|| {
            COUNTER.set(3);
            assert_eq!(ThreadImpl::current().locals().lock().len(), 1);
        })
        .unwrap();
    worker.join().unwrap();
    context.shutdown().unwrap();
}

/// Records which thread id its drop saw.
struct Witness(Arc<Mutex<Option<u64>>>);

impl Drop for Witness {
    fn drop(&mut self) {
        *self.0.lock().unwrap() = Some(ThreadImpl::current().id());
    }
}

static WITNESS: ThreadLocal<Option<Witness>> = ThreadLocal::new(|| None);

#[test]
fn values_dropped_during_thread_exit() {
    init_test_logging();
    let seen = Arc::new(Mutex::new(None));

    // A plain thread: its control block is released by thread-local
    // teardown, with logging active.
    let witness = Witness(seen.clone());
    let id = std::thread::spawn(move || {
        WITNESS.set(Some(witness));
        ThreadImpl::current().id()
    })
    .join()
    .unwrap();

    let during_exit = seen.lock().unwrap().expect("value was never dropped");
    assert_ne!(during_exit, id, "teardown handed out the dying block");

    // The same, for a started thread.
    let context = Context::default();
    let seen = Arc::new(Mutex::new(None));
    let witness = Witness(seen.clone());
    let worker = context
        .spawn(move || {
            WITNESS.set(Some(witness));
        })
        .unwrap();
    worker.join().unwrap();
    assert_eq!(*seen.lock().unwrap(), Some(worker.id()));
    context.shutdown().unwrap();
}
