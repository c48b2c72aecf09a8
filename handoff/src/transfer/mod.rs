//! The dual transfer algorithms.
//!
//! Both structures hold nodes for pending operations of one kind at a time.
//! An arriving operation of the complementary kind fulfils a waiting node; an
//! operation of the same kind publishes its own node and waits on it.

pub(crate) mod queue;
pub(crate) mod stack;

use crate::internal::waiter::SpinPark;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;

pub(crate) use queue::TransferQueue;
pub(crate) use stack::TransferStack;

/// How long a transfer may wait for its counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wait {
  /// Only pair with a counterpart that is already waiting.
  Never,
  Until(Instant),
  Forever,
}

impl Wait {
  /// A timeout too large to represent as a deadline waits forever.
  pub(crate) fn timeout(timeout: Duration) -> Self {
    match Instant::now().checked_add(timeout) {
      Some(deadline) => Wait::Until(deadline),
      None => Wait::Forever,
    }
  }

  pub(crate) fn deadline(self) -> Option<Instant> {
    match self {
      Wait::Until(deadline) => Some(deadline),
      Wait::Never | Wait::Forever => None,
    }
  }

  /// Why a node must not be published, if this wait has no time left.
  pub(crate) fn exhausted(self) -> Option<CancelReason> {
    match self {
      Wait::Never => Some(CancelReason::Unmatched),
      Wait::Until(deadline) if Instant::now() >= deadline => Some(CancelReason::TimedOut),
      Wait::Until(_) | Wait::Forever => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CancelReason {
  Interrupted,
  TimedOut,
  /// A non-blocking transfer found no counterpart.
  Unmatched,
}

/// A transfer that ended without a counterpart. The caller's item comes back.
pub(crate) struct Cancelled<T> {
  pub(crate) reason: CancelReason,
  pub(crate) item: Option<T>,
}

impl<T> Cancelled<T> {
  pub(crate) fn new(reason: CancelReason, item: Option<T>) -> Self {
    Self { reason, item }
  }
}

impl<T> fmt::Debug for Cancelled<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Cancelled")
      .field("reason", &self.reason)
      .field("has_item", &self.item.is_some())
      .finish()
  }
}

/// `Ok(Some(v))` for a take that received `v`, `Ok(None)` for a delivered put.
pub(crate) type TransferResult<T> = Result<Option<T>, Cancelled<T>>;

/// The two pairing strategies, fixed at construction.
pub(crate) enum Transferer<T> {
  /// LIFO pairing.
  Stack(TransferStack<T>),
  /// FIFO pairing.
  Queue(TransferQueue<T>),
}

impl<T: Send> Transferer<T> {
  pub(crate) fn new(fair: bool, spin: SpinPark) -> Self {
    if fair {
      Transferer::Queue(TransferQueue::new(spin))
    } else {
      Transferer::Stack(TransferStack::new(spin))
    }
  }

  /// Puts `item` if present, takes otherwise.
  #[inline]
  pub(crate) fn transfer(&self, item: Option<T>, wait: Wait) -> TransferResult<T> {
    match self {
      Transferer::Stack(stack) => stack.transfer(item, wait),
      Transferer::Queue(queue) => queue.transfer(item, wait),
    }
  }

  pub(crate) fn is_fair(&self) -> bool {
    matches!(self, Transferer::Queue(_))
  }

  #[cfg(test)]
  pub(crate) fn linked_nodes(&self) -> usize {
    match self {
      Transferer::Stack(stack) => stack.linked_nodes(),
      Transferer::Queue(queue) => queue.linked_nodes(),
    }
  }
}

impl<T> fmt::Debug for Transferer<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Transferer::Stack(_) => f.write_str("Transferer::Stack"),
      Transferer::Queue(_) => f.write_str("Transferer::Queue"),
    }
  }
}

#[inline]
pub(crate) fn same_node<N>(a: &Option<Arc<N>>, b: &Option<Arc<N>>) -> bool {
  match (a, b) {
    (Some(a), Some(b)) => Arc::ptr_eq(a, b),
    (None, None) => true,
    _ => false,
  }
}

#[inline]
pub(crate) fn is_node<N>(link: &Option<Arc<N>>, node: &Arc<N>) -> bool {
  matches!(link, Some(n) if Arc::ptr_eq(n, node))
}

/// Swings `cell` from `current` to `new`. Fails if another thread moved it first.
#[inline]
pub(crate) fn cas_link<N>(cell: &ArcSwapOption<N>, current: &Option<Arc<N>>, new: Option<Arc<N>>) -> bool {
  let previous = cell.compare_and_swap(current, new);
  same_node(&*previous, current)
}
