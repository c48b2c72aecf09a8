//! Fair transferer: a Michael-Scott style queue with a dummy head.
//!
//! Waiting nodes are appended at the tail; a complementary arrival fulfils the
//! node right after the head by swapping its item in one CAS, then advances the
//! head past it. The node the head moves off is pointed at the queue's
//! off-list sentinel, which releases everything that followed it.

use super::{cas_link, is_node, Cancelled, TransferResult, Wait};
use crate::internal::slot::{self, ItemSlot};
use crate::internal::waiter::{Resolution, SpinPark, WaitNode, WaiterCell};
use crate::telemetry;

use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam_utils::CachePadded;
use tracing::{debug, trace};

pub(crate) struct QNode<T> {
  is_data: bool,
  /// Moves from the owner's item to the counterpart's, or to the cancelled marker.
  item: ItemSlot<T>,
  /// The queue's sentinel once the node is off the list.
  next: ArcSwapOption<QNode<T>>,
  waiter: WaiterCell,
}

impl<T> QNode<T> {
  fn new(item: Option<T>, is_data: bool) -> Arc<Self> {
    Arc::new(Self {
      is_data,
      item: ItemSlot::new(item),
      next: ArcSwapOption::empty(),
      waiter: WaiterCell::new(),
    })
  }

  #[inline]
  fn next(&self) -> Option<Arc<QNode<T>>> {
    self.next.load_full()
  }

  #[inline]
  fn is_cancelled(&self) -> bool {
    self.item.is_cancelled()
  }
}

impl<T> Drop for QNode<T> {
  fn drop(&mut self) {
    let mut next = self.next.swap(None);
    while let Some(node) = next {
      match Arc::try_unwrap(node) {
        Ok(node) => next = node.next.swap(None),
        Err(_) => break,
      }
    }
  }
}

/// A published node as seen by its owner, who alone knows the item it put in.
struct Pending<'a, T> {
  node: &'a QNode<T>,
  own: *mut T,
}

impl<T> WaitNode for Pending<'_, T> {
  #[inline]
  fn is_resolved(&self) -> bool {
    self.node.item.load() != self.own
  }

  fn try_cancel(&self) -> bool {
    self.node.item.try_cancel(self.own)
  }

  #[inline]
  fn waiter(&self) -> &WaiterCell {
    &self.node.waiter
  }
}

#[inline]
fn cas_arc<N>(cell: &ArcSwap<N>, current: &Arc<N>, new: Arc<N>) -> bool {
  let previous = cell.compare_and_swap(current, new);
  Arc::ptr_eq(&*previous, current)
}

pub(crate) struct TransferQueue<T> {
  head: CachePadded<ArcSwap<QNode<T>>>,
  tail: CachePadded<ArcSwap<QNode<T>>>,
  /// Predecessor of a cancelled node that could not be unlinked because it was
  /// the tail at the time.
  clean_me: ArcSwapOption<QNode<T>>,
  /// Successor of every node the head has moved past. Never linked itself,
  /// so it never gains a successor and an append onto an off-list node fails.
  off_list: Arc<QNode<T>>,
  spin: SpinPark,
}

impl<T: Send> TransferQueue<T> {
  pub(crate) fn new(spin: SpinPark) -> Self {
    let dummy = QNode::new(None, false);
    Self {
      head: CachePadded::new(ArcSwap::new(Arc::clone(&dummy))),
      tail: CachePadded::new(ArcSwap::new(dummy)),
      clean_me: ArcSwapOption::empty(),
      off_list: QNode::new(None, false),
      spin,
    }
  }

  #[inline]
  fn is_head(&self, h: &Arc<QNode<T>>) -> bool {
    Arc::ptr_eq(&*self.head.load(), h)
  }

  #[inline]
  fn is_tail(&self, t: &Arc<QNode<T>>) -> bool {
    Arc::ptr_eq(&*self.tail.load(), t)
  }

  #[inline]
  fn is_sentinel(&self, node: &Arc<QNode<T>>) -> bool {
    Arc::ptr_eq(node, &self.off_list)
  }

  /// Whether the head has moved past `node`.
  #[inline]
  fn is_off_list(&self, node: &QNode<T>) -> bool {
    matches!(&*node.next.load(), Some(n) if self.is_sentinel(n))
  }

  /// Moves the head from `h` to its successor `nh`, taking `h` off the list.
  fn advance_head(&self, h: &Arc<QNode<T>>, nh: Arc<QNode<T>>) {
    if self.is_head(h) && cas_arc(&self.head, h, nh) {
      h.next.store(Some(Arc::clone(&self.off_list)));
    }
  }

  fn advance_tail(&self, t: &Arc<QNode<T>>, nt: Arc<QNode<T>>) {
    if self.is_tail(t) {
      cas_arc(&self.tail, t, nt);
    }
  }

  /// Puts or takes an item.
  pub(crate) fn transfer(&self, item: Option<T>, wait: Wait) -> TransferResult<T> {
    let is_data = item.is_some();
    let mut item = item;

    loop {
      let t = self.tail.load_full();
      let h = self.head.load_full();

      if Arc::ptr_eq(&h, &t) || t.is_data == is_data {
        // Empty or same mode: append and wait.
        let tn = t.next();
        if !self.is_tail(&t) {
          continue;
        }
        if let Some(tn) = tn {
          // Lagging tail. If it already fell off the list, wait for the
          // appender that owns the next link to swing it.
          if !self.is_sentinel(&tn) {
            self.advance_tail(&t, tn);
          }
          continue;
        }
        if let Some(reason) = wait.exhausted() {
          telemetry::log_event(telemetry::LOC_QUEUE, telemetry::EVT_UNMATCHED, None);
          return Err(Cancelled::new(reason, item));
        }

        let s = QNode::new(item.take(), is_data);
        let own = s.item.load();
        if !cas_link(&t.next, &None, Some(Arc::clone(&s))) {
          item = s.item.take();
          telemetry::increment_counter(telemetry::LOC_QUEUE, telemetry::CTR_CAS_RETRY);
          continue;
        }
        self.advance_tail(&t, Arc::clone(&s));
        telemetry::log_event(telemetry::LOC_QUEUE, telemetry::EVT_PUBLISHED, None);
        return self.await_fulfill(t, s, own, wait);
      }

      // Complementary mode: fulfil the first waiter.
      let m = h.next();
      if !self.is_tail(&t) || !self.is_head(&h) {
        continue;
      }
      let Some(m) = m else { continue };

      let x = m.item.load();
      if is_data == !x.is_null() || m.item.is_marker(x) {
        // Already fulfilled or cancelled: dequeue and retry.
        self.advance_head(&h, m);
        continue;
      }
      match m.item.try_replace(x, item.take()) {
        Ok(taken) => {
          self.advance_head(&h, Arc::clone(&m));
          m.waiter.wake();
          telemetry::log_event(telemetry::LOC_QUEUE, telemetry::EVT_FULFILLED, None);
          return Ok(taken);
        }
        Err(back) => {
          item = back;
          telemetry::increment_counter(telemetry::LOC_QUEUE, telemetry::CTR_CAS_RETRY);
          self.advance_head(&h, m);
        }
      }
    }
  }

  fn await_fulfill(&self, pred: Arc<QNode<T>>, s: Arc<QNode<T>>, own: *mut T, wait: Wait) -> TransferResult<T> {
    let pending = Pending { node: &s, own };
    match self.spin.await_resolution(&pending, wait.deadline(), || self.is_first(&s)) {
      Resolution::Cancelled(reason) => {
        self.clean(&pred, &s);
        // SAFETY: the cancelling CAS moved `own` out of the slot and back to us.
        let item = unsafe { slot::from_raw(own) };
        let op = if s.is_data { "put" } else { "take" };
        debug!(?reason, op, "queue transfer cancelled");
        telemetry::log_event(
          telemetry::LOC_QUEUE,
          telemetry::EVT_CANCELLED,
          Some(format!("{:?} data={}", reason, s.is_data)),
        );
        Err(Cancelled::new(reason, item))
      }
      Resolution::Matched => {
        telemetry::log_event(telemetry::LOC_QUEUE, telemetry::EVT_MATCHED, None);
        if !self.is_off_list(&s) {
          self.advance_head(&pred, Arc::clone(&s));
        }
        if s.is_data {
          return Ok(None);
        }
        // Leave the marker behind so the node never looks unfulfilled again.
        match s.item.retire() {
          Some(value) => Ok(Some(value)),
          None => unreachable!("take was matched without an item"),
        }
      }
    }
  }

  #[inline]
  fn is_first(&self, s: &Arc<QNode<T>>) -> bool {
    is_node(&self.head.load().next(), s)
  }

  /// Unlinks the cancelled node `s`, originally appended after `pred`.
  ///
  /// The last node cannot be unspliced without racing appenders, so when `s` is
  /// the tail its predecessor is parked in `clean_me` and the next call unlinks
  /// it instead. At most one such deferred node exists at a time.
  fn clean(&self, pred: &Arc<QNode<T>>, s: &Arc<QNode<T>>) {
    let s_link = Some(Arc::clone(s));

    while is_node(&pred.next(), s) {
      let h = self.head.load_full();
      if let Some(hn) = h.next() {
        if hn.is_cancelled() {
          // Absorb a cancelled first node as the new dummy head.
          self.advance_head(&h, hn);
          continue;
        }
      }

      let t = self.tail.load_full();
      if Arc::ptr_eq(&t, &h) {
        return;
      }
      let tn = t.next();
      if !self.is_tail(&t) {
        continue;
      }
      if let Some(tn) = tn {
        if !self.is_sentinel(&tn) {
          self.advance_tail(&t, tn);
        }
        continue;
      }

      if !Arc::ptr_eq(s, &t) {
        let sn = s.next();
        let gone = matches!(&sn, Some(n) if self.is_sentinel(n));
        if gone || cas_link(&pred.next, &s_link, sn) {
          trace!("unspliced cancelled queue node");
          telemetry::log_event(telemetry::LOC_QUEUE, telemetry::EVT_UNSPLICED, None);
          return;
        }
      }

      match self.clean_me.load_full() {
        Some(dp) => {
          // Try to unlink the node saved by an earlier cleaner.
          let d = dp.next();
          let done = match d.as_ref() {
            None => true,
            Some(d) if self.is_sentinel(d) => true,
            Some(d) if !d.is_cancelled() => true,
            Some(d) => {
              !Arc::ptr_eq(d, &t)
                && match d.next() {
                  Some(dn) if !self.is_sentinel(&dn) => cas_link(&dp.next, &Some(Arc::clone(d)), Some(dn)),
                  _ => false,
                }
            }
          };
          if done && cas_link(&self.clean_me, &Some(Arc::clone(&dp)), None) {
            trace!("cleared deferred queue node");
          }
          if Arc::ptr_eq(&dp, pred) {
            // `s` is already the deferred node.
            return;
          }
        }
        None => {
          if cas_link(&self.clean_me, &None, Some(Arc::clone(pred))) {
            telemetry::log_event(telemetry::LOC_QUEUE, telemetry::EVT_CLEAN_DEFERRED, None);
            return;
          }
        }
      }
    }
  }

  /// Nodes linked after the dummy head.
  #[cfg(test)]
  pub(crate) fn linked_nodes(&self) -> usize {
    let mut count = 0;
    let mut p = self.head.load_full().next();
    while let Some(node) = p {
      if self.is_sentinel(&node) {
        break;
      }
      count += 1;
      p = node.next();
    }
    count
  }

  /// Nodes kept alive by the deferred clean slot, itself included.
  #[cfg(test)]
  pub(crate) fn clean_me_retained(&self) -> usize {
    let mut count = 0;
    let mut p = self.clean_me.load_full();
    while let Some(node) = p {
      if self.is_sentinel(&node) {
        break;
      }
      count += 1;
      p = node.next();
    }
    count
  }
}
