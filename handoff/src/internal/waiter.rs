//! Spin-then-park blocking for published nodes.
//!
//! A waiter spins while its node is next in line, then registers its thread and
//! parks. Interruption and deadlines cancel the node through the same CAS a
//! matcher uses, so exactly one of the two wins.

use crate::interrupt;
use crate::sync_util;
use crate::telemetry;
use crate::transfer::CancelReason;

use once_cell::sync::OnceCell;

use std::fmt;
use std::sync::atomic::{fence, Ordering};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use tracing::trace;

/// The thread blocked on a node, published once its spin budget runs out.
///
/// Only the node's owner ever registers, so the cell is written at most once.
pub(crate) struct WaiterCell {
  thread: OnceCell<Thread>,
}

impl WaiterCell {
  pub(crate) const fn new() -> Self {
    Self { thread: OnceCell::new() }
  }

  /// Publishes the calling thread. The caller must re-check its node before parking.
  pub(crate) fn register(&self) {
    let _ = self.thread.set(thread::current());
    // Pairs with the fence in `wake`: either the owner sees the match on its
    // re-check, or the fulfiller sees the registered thread.
    fence(Ordering::SeqCst);
  }

  #[inline]
  pub(crate) fn is_registered(&self) -> bool {
    self.thread.get().is_some()
  }

  /// Unparks the registered thread, if any.
  pub(crate) fn wake(&self) {
    fence(Ordering::SeqCst);
    if let Some(thread) = self.thread.get() {
      sync_util::unpark_thread(thread);
    }
  }
}

impl fmt::Debug for WaiterCell {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WaiterCell")
      .field("thread", &self.thread.get().map(Thread::id))
      .finish()
  }
}

/// A published node whose owner can block on it.
pub(crate) trait WaitNode {
  /// Matched by a counterpart or cancelled by its owner.
  fn is_resolved(&self) -> bool;
  /// Moves the node into the cancelled state with the same atomic transition a
  /// matcher uses. Returns `false` if a matcher got there first.
  fn try_cancel(&self) -> bool;
  fn waiter(&self) -> &WaiterCell;
}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
  Matched,
  Cancelled(CancelReason),
}

/// Spin-then-park blocking strategy shared by both transferers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SpinPark {
  timed_spins: u32,
  untimed_spins: u32,
  park_threshold: Duration,
}

impl SpinPark {
  pub(crate) fn new(timed_spins: u32, untimed_spins: u32, park_threshold: Duration) -> Self {
    Self {
      timed_spins,
      untimed_spins,
      park_threshold,
    }
  }

  /// Blocks until `node` is matched or cancelled.
  ///
  /// `at_front` reports whether the node is next in line to be fulfilled; the
  /// waiter only spins while it is, since nobody else is about to match it.
  /// With a deadline the node is cancelled once it passes; a deadline closer
  /// than the park threshold is waited out by spinning.
  pub(crate) fn await_resolution<N, F>(&self, node: &N, deadline: Option<Instant>, at_front: F) -> Resolution
  where
    N: WaitNode + ?Sized,
    F: Fn() -> bool,
  {
    let budget = if deadline.is_some() {
      self.timed_spins
    } else {
      self.untimed_spins
    };
    let mut spins = if at_front() { budget } else { 0 };

    loop {
      if interrupt::is_interrupted() && node.try_cancel() {
        return Resolution::Cancelled(CancelReason::Interrupted);
      }
      if node.is_resolved() {
        return Resolution::Matched;
      }

      let mut remaining = None;
      if let Some(deadline) = deadline {
        let now = Instant::now();
        if now >= deadline {
          if node.try_cancel() {
            return Resolution::Cancelled(CancelReason::TimedOut);
          }
          continue;
        }
        remaining = Some(deadline - now);
      }

      if spins > 0 {
        spins = if at_front() { spins - 1 } else { 0 };
        telemetry::increment_counter(telemetry::LOC_WAITER, telemetry::CTR_SPINS);
        sync_util::spin_hint();
      } else if !node.waiter().is_registered() {
        node.waiter().register();
      } else {
        match remaining {
          None => {
            trace!("parking untimed waiter");
            telemetry::increment_counter(telemetry::LOC_WAITER, telemetry::CTR_PARKS);
            sync_util::park_thread();
          }
          Some(left) if left > self.park_threshold => {
            trace!(?left, "parking timed waiter");
            telemetry::increment_counter(telemetry::LOC_WAITER, telemetry::CTR_PARKS);
            sync_util::park_thread_timeout(left);
          }
          Some(_) => sync_util::spin_hint(),
        }
      }
    }
  }
}
