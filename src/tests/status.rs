use crate::status::{Status, StatusRegister, WakeReason};

#[test]
fn starts_empty() {
    let mut status = StatusRegister::new();
    assert!(!status.pending(Status::ANYTHING));
    assert_eq!(status.next(), None);
    assert_eq!(status.current_interest(), Status::ANYTHING);
}

#[test]
fn flags_are_sticky_until_consumed() {
    let mut status = StatusRegister::new();
    status.push(Status::INTERRUPTED);
    assert!(status.pending(Status::INTERRUPTED));
    assert!(status.pending(Status::INTERRUPTED));
    assert_eq!(status.next(), Some(WakeReason::Interrupted));
    assert!(!status.pending(Status::ANYTHING));
}

#[test]
fn timeout_outranks_interruption() {
    let mut status = StatusRegister::new();
    status.push(Status::INTERRUPTED);
    status.push(Status::TIMEDOUT);
    assert_eq!(status.next(), Some(WakeReason::TimedOut));
    assert_eq!(status.next(), Some(WakeReason::Interrupted));
    assert_eq!(status.next(), None);
}

#[test]
fn signal_outranks_interruption() {
    let mut status = StatusRegister::new();
    status.push(Status::INTERRUPTED);
    status.push(Status::SIGNALED);
    assert_eq!(status.next(), Some(WakeReason::Signaled));
    assert_eq!(status.next(), Some(WakeReason::Interrupted));
}

#[test]
fn pending_signal_absorbs_timeout() {
    let mut status = StatusRegister::new();
    status.push(Status::SIGNALED);
    status.push(Status::TIMEDOUT);
    assert!(!status.examine(Status::TIMEDOUT));
    assert_eq!(status.next(), Some(WakeReason::Signaled));
    assert_eq!(status.next(), None);
}

#[test]
fn interest_hides_without_discarding() {
    let mut status = StatusRegister::new();
    status.push(Status::INTERRUPTED);
    status.interest(Status::SIGNALED);

    assert!(!status.pending(Status::INTERRUPTED));
    assert!(status.examine(Status::INTERRUPTED));
    assert_eq!(status.next(), None);

    status.push(Status::SIGNALED);
    assert_eq!(status.next(), Some(WakeReason::Signaled));

    status.interest(Status::ANYTHING);
    assert_eq!(status.next(), Some(WakeReason::Interrupted));
}

#[test]
fn canceled_is_invisible_to_waits() {
    let mut status = StatusRegister::new();
    status.push(Status::CANCELED);
    assert!(!status.pending(Status::ANYTHING));
    assert!(status.pending(Status::CANCELED));
    assert_eq!(status.next(), None);
    assert!(status.examine(Status::CANCELED));

    // Interest masks cannot hide it from an explicit query either.
    status.interest(Status::SIGNALED);
    assert!(status.pending(Status::CANCELED));
}

#[test]
fn clear_removes_only_the_named_flag() {
    let mut status = StatusRegister::new();
    status.push(Status::INTERRUPTED | Status::TIMEDOUT);
    status.clear(Status::TIMEDOUT);
    assert_eq!(status.next(), Some(WakeReason::Interrupted));
    assert_eq!(status.next(), None);
}
