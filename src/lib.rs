//! This crate provides simple, [`Condvar`](std::sync::Condvar) based one-shot futures together
//! with future-sets for wait-any/wait-all multiplexing.
//!
//! A future is a single-assignment result slot shared between a producer and a requester. The
//! requester either blocks on the future, polls it without blocking, or cancels it; the producer
//! completes it exactly once. A [`FutureSet`] groups many in-flight futures so that one caller can
//! block until *any* or *all* of them complete without polling each future individually.
//!
//! The crate uses plain OS threads and the monitor pattern; there is no async runtime involved.
//! Completers created without a matching completion cancel their future on drop, so waiters are
//! never stuck on a producer that went away.
//!
//! # Example
//! ```rust
//! use std::{thread, time::Duration};
//!
//! // Create a future and complete it from a producer thread
//! let (completer, future) = future_mux::new::<u8, ()>(());
//! thread::spawn(move || {
//!     thread::sleep(Duration::from_millis(50));
//!     completer.complete(7).expect("Future was cancelled?!");
//! });
//! assert_eq!(future.wait(), Some(7));
//!
//! // Multiplex multiple futures over one set
//! let set = future_mux::FutureSet::new();
//! let (completer, future) = future_mux::new::<u8, ()>(());
//! set.add(&future);
//! drop(future);
//!
//! completer.complete(4).expect("Future was cancelled?!");
//! let done = set.wait_any();
//! assert_eq!(done.wait(), Some(4));
//! ```

mod future;
mod set;

pub use crate::{
    future::{Callback, Cancelled, Completer, Future},
    set::{FutureSet, TimedOut},
};

/// Creates a new future as a connected pair of producer and requester handles
///
/// The context is an arbitrary caller-supplied value that travels with the future and is
/// accessible from both handles.
pub fn new<R, C>(context: C) -> (Completer<R, C>, Future<R, C>) {
    let core = crate::future::FutureCore::new(context, None);
    (Completer::new(core.clone()), Future::new(core))
}

/// Creates a new future with a completion callback
///
/// The callback is invoked with the result and the context, synchronously on the producer's
/// thread, after the completion has become visible. It is not invoked on cancellation. The
/// callback must not call back into the future it belongs to.
pub fn with_callback<R, C, F>(context: C, callback: F) -> (Completer<R, C>, Future<R, C>)
where
    F: FnOnce(&R, &C) + Send + 'static,
{
    let core = crate::future::FutureCore::new(context, Some(Box::new(callback)));
    (Completer::new(core.clone()), Future::new(core))
}
