// src/sync_queue.rs

//! A blocking queue with no capacity, in which each put waits for a take.
//!
//! `SynchronousQueue` never stores an item. A `put` hands its value directly to
//! a thread blocked in `take` (or waits until one arrives), and a `take` waits
//! for a putter. This makes it a rendezvous point for handing ownership of a
//! value from exactly one producer thread to exactly one consumer thread.
//!
//! ### Fairness
//!
//! - `Fairness::Unfair` (the default) pairs the most recently arrived waiter
//!   first. This has lower latency under contention.
//! - `Fairness::Fair` pairs waiters strictly in arrival order.
//!
//! The mode is chosen at construction and never changes.
//!
//! ### Cancellation
//!
//! A blocked call is cancelled when its thread is interrupted through an
//! [`InterruptHandle`](crate::interrupt::InterruptHandle) or when its timeout
//! elapses. Cancellation races safely with a concurrent counterpart: either the
//! value changes hands or the call reports the failure and a put gets its item
//! back, never both.

use crate::error::{PutError, PutTimeoutError, TakeError, TakeTimeoutError, TryPutError, TryTakeError};
use crate::internal::waiter::SpinPark;
use crate::interrupt;
use crate::sync_util;
use crate::transfer::{CancelReason, Cancelled, Transferer, Wait};

use core::fmt;
use std::time::Duration;

/// Pairing order among waiting threads of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fairness {
  /// Most recent waiter first.
  #[default]
  Unfair,
  /// Longest waiting first.
  Fair,
}

/// How long a blocked call busy-waits before parking its thread.
///
/// Spinning only happens while the waiting call is next in line to be paired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinConfig {
  /// Spin iterations before parking, for calls with a timeout.
  pub timed_spins: u32,
  /// Spin iterations before parking, for calls without a timeout.
  pub untimed_spins: u32,
  /// A timed call with less time than this left keeps spinning instead of parking.
  pub park_threshold: Duration,
}

impl Default for SpinConfig {
  /// 32 timed spins and 16 times as many untimed ones on multi-core machines,
  /// no spinning on a single core.
  fn default() -> Self {
    let timed_spins = if sync_util::available_parallelism() < 2 { 0 } else { 32 };
    Self {
      timed_spins,
      untimed_spins: timed_spins * 16,
      park_threshold: Duration::from_nanos(1000),
    }
  }
}

impl SpinConfig {
  fn waiter(&self) -> SpinPark {
    SpinPark::new(self.timed_spins, self.untimed_spins, self.park_threshold)
  }
}

/// A builder for [`SynchronousQueue`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SynchronousQueueBuilder {
  fairness: Fairness,
  spin: SpinConfig,
}

impl SynchronousQueueBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the pairing order.
  pub fn fairness(mut self, fairness: Fairness) -> Self {
    self.fairness = fairness;
    self
  }

  /// Shorthand for `fairness(Fairness::Fair)` / `fairness(Fairness::Unfair)`.
  pub fn fair(self, fair: bool) -> Self {
    self.fairness(if fair { Fairness::Fair } else { Fairness::Unfair })
  }

  pub fn timed_spins(mut self, spins: u32) -> Self {
    self.spin.timed_spins = spins;
    self
  }

  pub fn untimed_spins(mut self, spins: u32) -> Self {
    self.spin.untimed_spins = spins;
    self
  }

  pub fn park_threshold(mut self, threshold: Duration) -> Self {
    self.spin.park_threshold = threshold;
    self
  }

  /// Replaces all spin settings at once.
  pub fn spin_config(mut self, spin: SpinConfig) -> Self {
    self.spin = spin;
    self
  }

  pub fn build<T: Send>(self) -> SynchronousQueue<T> {
    SynchronousQueue {
      transferer: Transferer::new(self.fairness == Fairness::Fair, self.spin.waiter()),
      spin: self.spin,
    }
  }
}

/// A zero-capacity hand-off queue. Share it between threads with an `Arc`.
pub struct SynchronousQueue<T: Send> {
  transferer: Transferer<T>,
  spin: SpinConfig,
}

impl<T: Send> fmt::Debug for SynchronousQueue<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SynchronousQueue")
      .field("fair", &self.is_fair())
      .field("spin", &self.spin)
      .finish_non_exhaustive()
  }
}

impl<T: Send> Default for SynchronousQueue<T> {
  fn default() -> Self {
    Self::new()
  }
}

// A cancelled put always hands its item back.
fn returned_item<T>(cancelled: Cancelled<T>) -> T {
  match cancelled.item {
    Some(item) => item,
    None => unreachable!("cancelled put did not return its item"),
  }
}

fn received<T>(item: Option<T>) -> T {
  match item {
    Some(item) => item,
    None => unreachable!("take completed without an item"),
  }
}

impl<T: Send> SynchronousQueue<T> {
  /// Creates a non-fair queue.
  pub fn new() -> Self {
    Self::builder().build()
  }

  pub fn with_fairness(fairness: Fairness) -> Self {
    Self::builder().fairness(fairness).build()
  }

  /// Starts a builder. Name the item type, as in `SynchronousQueue::<u32>::builder()`,
  /// or start from [`SynchronousQueueBuilder::new`] and let `build` infer it.
  pub fn builder() -> SynchronousQueueBuilder {
    SynchronousQueueBuilder::new()
  }

  /// Hands `item` to a taker, blocking until one receives it.
  ///
  /// # Errors
  ///
  /// `Err(PutError::Interrupted(item))` if the thread is interrupted before a
  /// taker arrives. The interrupt flag is cleared.
  pub fn put(&self, item: T) -> Result<(), PutError<T>> {
    match self.transferer.transfer(Some(item), Wait::Forever) {
      Ok(_) => Ok(()),
      Err(cancelled) => match cancelled.reason {
        CancelReason::Interrupted => {
          interrupt::interrupted();
          Err(PutError::Interrupted(returned_item(cancelled)))
        }
        CancelReason::TimedOut | CancelReason::Unmatched => {
          unreachable!("untimed put cancelled without an interrupt")
        }
      },
    }
  }

  /// Like [`put`](Self::put), for callers holding an optional value.
  ///
  /// `None` fails with `PutError::InvalidArgument` without touching the queue.
  pub fn put_opt(&self, item: Option<T>) -> Result<(), PutError<T>> {
    match item {
      Some(item) => self.put(item),
      None => Err(PutError::InvalidArgument),
    }
  }

  /// Receives an item from a putter, blocking until one arrives.
  ///
  /// # Errors
  ///
  /// `Err(TakeError::Interrupted)` if the thread is interrupted before a putter
  /// arrives. The interrupt flag is cleared.
  pub fn take(&self) -> Result<T, TakeError> {
    match self.transferer.transfer(None, Wait::Forever) {
      Ok(item) => Ok(received(item)),
      Err(cancelled) => match cancelled.reason {
        CancelReason::Interrupted => {
          interrupt::interrupted();
          Err(TakeError::Interrupted)
        }
        CancelReason::TimedOut | CancelReason::Unmatched => {
          unreachable!("untimed take cancelled without an interrupt")
        }
      },
    }
  }

  /// Hands `item` to a taker only if one is already waiting.
  pub fn try_put(&self, item: T) -> Result<(), TryPutError<T>> {
    self
      .transferer
      .transfer(Some(item), Wait::Never)
      .map(|_| ())
      .map_err(|cancelled| TryPutError::NoTaker(returned_item(cancelled)))
  }

  /// Receives an item only if a putter is already waiting.
  pub fn try_take(&self) -> Result<T, TryTakeError> {
    self
      .transferer
      .transfer(None, Wait::Never)
      .map(received)
      .map_err(|_| TryTakeError::NoPutter)
  }

  /// Hands `item` to a taker, waiting at most `timeout` for one.
  ///
  /// A zero timeout behaves like [`try_put`](Self::try_put) but reports `Timeout`.
  pub fn put_timeout(&self, item: T, timeout: Duration) -> Result<(), PutTimeoutError<T>> {
    match self.transferer.transfer(Some(item), Wait::timeout(timeout)) {
      Ok(_) => Ok(()),
      Err(cancelled) => match cancelled.reason {
        CancelReason::Interrupted => {
          interrupt::interrupted();
          Err(PutTimeoutError::Interrupted(returned_item(cancelled)))
        }
        CancelReason::TimedOut | CancelReason::Unmatched => Err(PutTimeoutError::Timeout(returned_item(cancelled))),
      },
    }
  }

  /// Receives an item, waiting at most `timeout` for a putter.
  pub fn take_timeout(&self, timeout: Duration) -> Result<T, TakeTimeoutError> {
    match self.transferer.transfer(None, Wait::timeout(timeout)) {
      Ok(item) => Ok(received(item)),
      Err(cancelled) => match cancelled.reason {
        CancelReason::Interrupted => {
          interrupt::interrupted();
          Err(TakeTimeoutError::Interrupted)
        }
        CancelReason::TimedOut | CancelReason::Unmatched => Err(TakeTimeoutError::Timeout),
      },
    }
  }

  /// Returns an iterator that takes from waiting putters until none are left.
  ///
  /// The iterator never blocks.
  pub fn try_iter(&self) -> TryIter<'_, T> {
    TryIter { queue: self }
  }

  /// Returns `true` if waiters are paired in arrival order.
  pub fn is_fair(&self) -> bool {
    self.transferer.is_fair()
  }

  /// Spin settings this queue was built with.
  pub fn spin_config(&self) -> SpinConfig {
    self.spin
  }

  /// Always `0`: the queue never holds items.
  #[inline]
  pub fn len(&self) -> usize {
    0
  }

  /// Always `true`.
  #[inline]
  pub fn is_empty(&self) -> bool {
    true
  }

  /// Always `0`.
  #[inline]
  pub fn capacity(&self) -> usize {
    0
  }

  #[cfg(test)]
  pub(crate) fn waiting_nodes(&self) -> usize {
    self.transferer.linked_nodes()
  }
}

/// Non-blocking iterator returned by [`SynchronousQueue::try_iter`].
#[derive(Debug)]
pub struct TryIter<'a, T: Send> {
  queue: &'a SynchronousQueue<T>,
}

impl<T: Send> Iterator for TryIter<'_, T> {
  type Item = T;

  fn next(&mut self) -> Option<T> {
    self.queue.try_take().ok()
  }
}
