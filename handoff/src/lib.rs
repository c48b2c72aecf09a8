//! Lock-free synchronous hand-off queues for Rust.
//!
//! A [`SynchronousQueue`] has no capacity: every `put` waits for a `take` and
//! every `take` waits for a `put`, so a value moves directly from one producer
//! thread to one consumer thread with no intermediate storage.
//!
//! Two pairing strategies are available, chosen at construction:
//!
//! - a non-fair, LIFO fulfilling stack (the default), which has the lowest latency
//! - a fair, FIFO fulfilling queue, which pairs waiters in arrival order
//!
//! Both are lock-free. A blocked thread spins briefly while it is next in line
//! and then parks; it can be cancelled by a timeout or through the
//! [`interrupt`] module.
//!
//! ```
//! use fibre_handoff::SynchronousQueue;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let queue = Arc::new(SynchronousQueue::new());
//! let consumer = {
//!   let queue = Arc::clone(&queue);
//!   thread::spawn(move || queue.take().unwrap())
//! };
//! queue.put(42).unwrap();
//! assert_eq!(consumer.join().unwrap(), 42);
//! ```

pub mod error;
pub mod interrupt;
pub mod telemetry;

mod sync_queue;

// Internal utilities - not part of public API
mod internal;
mod sync_util;
mod transfer;

pub use error::{PutError, PutTimeoutError, TakeError, TakeTimeoutError, TryPutError, TryTakeError};
pub use interrupt::InterruptHandle;
pub use sync_queue::{Fairness, SpinConfig, SynchronousQueue, SynchronousQueueBuilder, TryIter};
