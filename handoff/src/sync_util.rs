//! Utilities for synchronous blocking and parking.
//! Thin wrappers around std::thread::park/unpark plus the spin hint and CPU count
//! the spin-park waiter sizes its budget from.

use std::thread;
use std::time::Duration;

/// Parks the current thread.
#[inline]
pub(crate) fn park_thread() {
  thread::park();
}

/// Parks the current thread for a given duration.
#[inline]
pub(crate) fn park_thread_timeout(duration: Duration) {
  thread::park_timeout(duration);
}

/// Unparks the given thread. A permit is stored if the target has not parked yet.
#[inline]
pub(crate) fn unpark_thread(thread: &thread::Thread) {
  thread.unpark();
}

/// Emits a CPU instruction that signals the processor that it is in a spin loop.
#[inline(always)]
pub(crate) fn spin_hint() {
  std::hint::spin_loop();
}

/// Number of logical CPUs available to the process.
#[inline]
pub(crate) fn available_parallelism() -> usize {
  num_cpus::get()
}
