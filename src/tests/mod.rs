use std::sync::mpsc::channel;
use std::sync::{Arc, Once};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::thread::ThreadImpl;

mod local;
mod mutex;
mod registry;
mod status;
mod thread;

static INIT_LOGGING: Once = Once::new();

/// Routes `tracing` output through the test harness. The first call wins.
pub(crate) fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_thread_ids(true)
            .with_target(true)
            .try_init();
    });
}

/// Polls `condition` every millisecond, failing the test after ten seconds.
pub(crate) fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Runs `f` on a plain OS thread, returning its control block as soon as it
/// exists.
pub(crate) fn spawn_tracked<T, F>(f: F) -> (Arc<ThreadImpl>, JoinHandle<T>)
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = channel();
    let handle = std::thread::spawn(move || {
        tx.send(ThreadImpl::current()).unwrap();
        f()
    });
    (rx.recv().unwrap(), handle)
}

/// Waits until `thread` is parked on its monitor.
pub(crate) fn wait_blocked(thread: &ThreadImpl) {
    wait_until("thread to block", || thread.monitor().is_waiting());
}
