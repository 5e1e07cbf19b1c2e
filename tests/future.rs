use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

#[test]
fn success() {
    let (completer, future) = future_mux::new::<u8, ()>(());

    // Complete the future after a short delay
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        completer.complete(7).expect("Future was cancelled?!");
    });

    // Wait until the future is completed
    assert_eq!(future.wait(), Some(7), "Future has invalid result");
}

#[test]
fn success_timeout() {
    let (completer, future) = future_mux::new::<u8, ()>(());

    // Complete the future after a short delay
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        completer.complete(7).expect("Future was cancelled?!");
    });

    // Await the result
    let result = future.wait_timeout(Duration::from_secs(5)).expect("Future has not been completed in time");
    assert_eq!(result, Some(7), "Future has invalid result");
}

#[test]
fn timeout_then_retry() {
    let (completer, future) = future_mux::new::<u8, ()>(());

    // Let the wait expire, then complete and retry; the expired wait must not have consumed
    // anything
    let future = future.wait_timeout(Duration::from_millis(100)).expect_err("Future has been completed too early");
    completer.complete(7).expect("Future was cancelled?!");
    assert_eq!(future.wait(), Some(7), "Future has invalid result");
}

#[test]
fn try_result() {
    let (completer, future) = future_mux::new::<u8, ()>(());

    // Poll before and after the completion
    let future = future.try_result().expect_err("Future has a result before completion?!");
    completer.complete(7).expect("Future was cancelled?!");
    let result = future.try_result().expect("Future has no result after completion?!");
    assert_eq!(result, Some(7), "Future has invalid result");
}

#[test]
fn cancel_before_completion() {
    let (completer, future) = future_mux::new::<u8, ()>(());

    // Cancel first; the completion must then be rejected and the result handed back
    assert_eq!(future.cancel(), None, "Future has a result before completion?!");
    let error = completer.complete(7).expect_err("Completion of a cancelled future was accepted?!");
    assert_eq!(error.0, 7, "Rejected result has not been handed back");
}

#[test]
fn cancel_after_completion() {
    let (completer, future) = future_mux::new::<u8, ()>(());

    // The cancellation captures the already-set result so the caller can dispose of it
    completer.complete(7).expect("Future was cancelled?!");
    assert_eq!(future.cancel(), Some(7), "Cancellation did not capture the result");
}

#[test]
fn producer_observes_cancellation() {
    let (completer, future) = future_mux::new::<u8, ()>(());
    assert!(!completer.is_cancelled(), "Future is cancelled before anyone cancelled it?!");

    assert_eq!(future.cancel(), None, "Future has a result before completion?!");
    assert!(completer.is_cancelled(), "Producer does not observe the cancellation");
}

#[test]
fn abandoned_producer() {
    let (completer, future) = future_mux::new::<u8, ()>(());

    // Drop the completer after a short delay
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        drop(completer);
    });

    // Wait until the future is cancelled
    assert_eq!(future.wait(), None, "Future has not been cancelled on drop");
}

#[test]
fn abandoned_producer_timeout() {
    let (completer, future) = future_mux::new::<u8, ()>(());

    // Drop the completer after a short delay
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        drop(completer);
    });

    // Wait until the future is cancelled
    let result = future.wait_timeout(Duration::from_secs(5)).expect("Future has not been cancelled in time");
    assert_eq!(result, None, "Future has not been marked as cancelled on drop");
}

#[test]
fn callback() {
    let seen = Arc::new(Mutex::new(None));
    let _seen = seen.clone();

    // The callback runs synchronously during completion, on the completing thread. Callbacks must
    // not call back into their own future; reentrancy is unsupported.
    let (completer, future) = future_mux::with_callback::<u8, (), _>((), move |result, _context| {
        *_seen.lock().expect("Failed to lock mutex") = Some(*result);
    });

    completer.complete(7).expect("Future was cancelled?!");
    assert_eq!(*seen.lock().expect("Failed to lock mutex"), Some(7), "Callback has not been invoked");
    assert_eq!(future.wait(), Some(7), "Future has invalid result");
}

#[test]
fn context() {
    let (completer, future) = future_mux::new::<u8, &'static str>("request-42");
    assert_eq!(*completer.context(), "request-42");
    assert_eq!(*future.context(), "request-42");

    completer.complete(7).expect("Future was cancelled?!");
    assert_eq!(future.wait(), Some(7), "Future has invalid result");
}
