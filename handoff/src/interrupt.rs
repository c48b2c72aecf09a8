//! Cooperative interruption for threads blocked in a hand-off.
//!
//! Every thread lazily owns an interrupt flag. Another thread holding that
//! thread's [`InterruptHandle`] can raise the flag, which also unparks the
//! target so a blocked `put`/`take` observes it at its next re-check point and
//! cancels its pending hand-off.
//!
//! ```
//! use fibre_handoff::{interrupt, SynchronousQueue, TakeError};
//! use std::sync::{mpsc, Arc};
//! use std::thread;
//!
//! let queue = Arc::new(SynchronousQueue::<u32>::new());
//! let (handle_tx, handle_rx) = mpsc::channel();
//!
//! let q = Arc::clone(&queue);
//! let taker = thread::spawn(move || {
//!   handle_tx.send(interrupt::current()).unwrap();
//!   q.take()
//! });
//!
//! handle_rx.recv().unwrap().interrupt();
//! assert_eq!(taker.join().unwrap(), Err(TakeError::Interrupted));
//! ```

use crate::sync_util;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};

struct InterruptState {
  flag: AtomicBool,
  thread: Thread,
}

thread_local! {
  static CURRENT: Arc<InterruptState> = Arc::new(InterruptState {
    flag: AtomicBool::new(false),
    thread: thread::current(),
  });
}

/// A clonable handle that can interrupt one particular thread.
#[derive(Clone)]
pub struct InterruptHandle {
  state: Arc<InterruptState>,
}

impl InterruptHandle {
  /// Raises the target thread's interrupt flag and unparks it.
  ///
  /// If the target is blocked in a hand-off, that hand-off is cancelled unless a
  /// counterpart matches it first.
  pub fn interrupt(&self) {
    self.state.flag.store(true, Ordering::SeqCst);
    sync_util::unpark_thread(&self.state.thread);
  }

  /// Returns `true` if the target's interrupt flag is raised.
  pub fn is_interrupted(&self) -> bool {
    self.state.flag.load(Ordering::SeqCst)
  }

  /// The thread this handle interrupts.
  pub fn thread(&self) -> &Thread {
    &self.state.thread
  }
}

impl fmt::Debug for InterruptHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("InterruptHandle")
      .field("thread", &self.state.thread.id())
      .field("interrupted", &self.is_interrupted())
      .finish()
  }
}

/// Returns the interrupt handle of the calling thread.
pub fn current() -> InterruptHandle {
  CURRENT.with(|state| InterruptHandle {
    state: Arc::clone(state),
  })
}

/// Returns `true` if the calling thread's interrupt flag is raised. The flag is left untouched.
pub fn is_interrupted() -> bool {
  CURRENT.with(|state| state.flag.load(Ordering::SeqCst))
}

/// Clears the calling thread's interrupt flag, returning whether it was raised.
pub fn interrupted() -> bool {
  CURRENT.with(|state| state.flag.swap(false, Ordering::SeqCst))
}
