//! Non-fair transferer: a Treiber stack whose head is either a run of waiting
//! nodes of one mode, or a fulfilling node sitting on top of the waiter it is
//! pairing with.
//!
//! A fulfilling node is pushed, then matched against the node below it; any
//! thread that finds a fulfilling node at the head helps finish that pairing
//! before doing its own work, so a stalled fulfiller never blocks the stack.

use super::{cas_link, is_node, same_node, Cancelled, TransferResult, Wait};
use crate::internal::slot::{cancelled_marker, ItemSlot};
use crate::internal::waiter::{Resolution, SpinPark, WaitNode, WaiterCell};
use crate::telemetry;

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use crossbeam_utils::CachePadded;
use tracing::{debug, trace};

/// Node represents an unfulfilled take.
const REQUEST: u8 = 0;
/// Node represents an unfulfilled put.
const DATA: u8 = 1;
/// Node is fulfilling another unfulfilled REQUEST or DATA.
const FULFILLING: u8 = 2;

#[inline]
fn is_fulfilling(mode: u8) -> bool {
  mode & FULFILLING != 0
}

fn mode_name(mode: u8) -> &'static str {
  if mode & DATA != 0 {
    "put"
  } else {
    "take"
  }
}

pub(crate) struct SNode<T> {
  mode: u8,
  next: ArcSwapOption<SNode<T>>,
  /// Null while waiting, the shared cancelled marker once cancelled, otherwise a
  /// strong reference (from `Arc::into_raw`) to the fulfiller it was paired with.
  matched: AtomicPtr<SNode<T>>,
  item: ItemSlot<T>,
  waiter: WaiterCell,
}

impl<T> SNode<T> {
  fn new(mode: u8, item: Option<T>, next: Option<Arc<SNode<T>>>) -> Arc<Self> {
    Arc::new(Self {
      mode,
      next: ArcSwapOption::new(next),
      matched: AtomicPtr::new(ptr::null_mut()),
      item: ItemSlot::new(item),
      waiter: WaiterCell::new(),
    })
  }

  #[inline]
  fn next(&self) -> Option<Arc<SNode<T>>> {
    self.next.load_full()
  }

  #[inline]
  fn is_cancelled(&self) -> bool {
    self.matched.load(Ordering::SeqCst) == cancelled_marker()
  }

  /// Pairs this waiting node with `fulfiller`, waking its owner.
  ///
  /// Also returns `true` if some helper already paired the two, so every
  /// thread working on the same fulfilment agrees on the outcome.
  fn try_match(&self, fulfiller: &Arc<SNode<T>>) -> bool {
    let target = Arc::as_ptr(fulfiller) as *mut SNode<T>;
    let current = self.matched.load(Ordering::SeqCst);
    if !current.is_null() {
      return current == target;
    }

    let raw = Arc::into_raw(Arc::clone(fulfiller)) as *mut SNode<T>;
    match self
      .matched
      .compare_exchange(ptr::null_mut(), raw, Ordering::SeqCst, Ordering::SeqCst)
    {
      Ok(_) => {
        self.waiter.wake();
        true
      }
      Err(actual) => {
        // SAFETY: `raw` was never published.
        drop(unsafe { Arc::from_raw(raw as *const SNode<T>) });
        actual == target
      }
    }
  }

  /// The fulfiller this node was paired with. Valid for as long as `self` is.
  fn fulfiller(&self) -> Option<&SNode<T>> {
    let m = self.matched.load(Ordering::SeqCst);
    if m.is_null() || m == cancelled_marker() {
      None
    } else {
      // SAFETY: `matched` owns a strong reference that is only released when `self` drops.
      Some(unsafe { &*m })
    }
  }
}

impl<T> WaitNode for SNode<T> {
  #[inline]
  fn is_resolved(&self) -> bool {
    !self.matched.load(Ordering::SeqCst).is_null()
  }

  fn try_cancel(&self) -> bool {
    self
      .matched
      .compare_exchange(ptr::null_mut(), cancelled_marker(), Ordering::SeqCst, Ordering::SeqCst)
      .is_ok()
  }

  #[inline]
  fn waiter(&self) -> &WaiterCell {
    &self.waiter
  }
}

impl<T> Drop for SNode<T> {
  fn drop(&mut self) {
    let m = *self.matched.get_mut();
    if !m.is_null() && m != cancelled_marker() {
      // SAFETY: the reference was leaked by the winning `try_match` CAS.
      drop(unsafe { Arc::from_raw(m as *const SNode<T>) });
    }

    // Unlink iteratively so a long chain of dead nodes cannot overflow the stack.
    let mut next = self.next.swap(None);
    while let Some(node) = next {
      match Arc::try_unwrap(node) {
        Ok(node) => next = node.next.swap(None),
        Err(_) => break,
      }
    }
  }
}

pub(crate) struct TransferStack<T> {
  head: CachePadded<ArcSwapOption<SNode<T>>>,
  spin: SpinPark,
}

impl<T: Send> TransferStack<T> {
  pub(crate) fn new(spin: SpinPark) -> Self {
    Self {
      head: CachePadded::new(ArcSwapOption::empty()),
      spin,
    }
  }

  #[inline]
  fn cas_head(&self, current: &Option<Arc<SNode<T>>>, new: Option<Arc<SNode<T>>>) -> bool {
    cas_link(&self.head, current, new)
  }

  /// Puts or takes an item.
  pub(crate) fn transfer(&self, item: Option<T>, wait: Wait) -> TransferResult<T> {
    let mode = if item.is_some() { DATA } else { REQUEST };
    let mut item = item;

    loop {
      let h = self.head.load_full();
      let head_mode = h.as_ref().map(|n| n.mode);

      if head_mode.map_or(true, |m| m == mode) {
        // Empty or same mode: wait for a counterpart.
        if let Some(reason) = wait.exhausted() {
          match &h {
            Some(hn) if hn.is_cancelled() => {
              self.cas_head(&h, hn.next());
              continue;
            }
            _ => {
              telemetry::log_event(telemetry::LOC_STACK, telemetry::EVT_UNMATCHED, None);
              return Err(Cancelled::new(reason, item));
            }
          }
        }

        let s = SNode::new(mode, item.take(), h.clone());
        if !self.cas_head(&h, Some(Arc::clone(&s))) {
          item = s.item.take();
          telemetry::increment_counter(telemetry::LOC_STACK, telemetry::CTR_CAS_RETRY);
          continue;
        }
        telemetry::log_event(telemetry::LOC_STACK, telemetry::EVT_PUBLISHED, None);
        return self.await_fulfill(s, mode, wait);
      }

      let Some(hn) = h.as_ref() else { continue };

      if !is_fulfilling(hn.mode) {
        // Complementary waiter on top: push a fulfilling node and pair with it.
        if hn.is_cancelled() {
          self.cas_head(&h, hn.next());
          continue;
        }

        let s = SNode::new(FULFILLING | mode, item.take(), h.clone());
        let s_link = Some(Arc::clone(&s));
        if !self.cas_head(&h, s_link.clone()) {
          item = s.item.take();
          telemetry::increment_counter(telemetry::LOC_STACK, telemetry::CTR_CAS_RETRY);
          continue;
        }

        loop {
          let m_link = s.next();
          let Some(m) = m_link.as_ref() else {
            // Every waiter below was cancelled: pop the fulfilling node and start over.
            self.cas_head(&s_link, None);
            item = s.item.take();
            break;
          };

          let mn = m.next();
          if m.try_match(&s) {
            self.cas_head(&s_link, mn);
            // The matched node keeps `s` alive; drop the link back to it.
            s.next.store(None);
            telemetry::log_event(telemetry::LOC_STACK, telemetry::EVT_FULFILLED, None);
            return Ok(if mode == REQUEST { m.item.take() } else { None });
          }
          cas_link(&s.next, &m_link, mn);
        }
      } else {
        // Another pair is mid-fulfilment: help it along.
        let m_link = hn.next();
        match m_link.as_ref() {
          None => {
            self.cas_head(&h, None);
          }
          Some(m) => {
            let mn = m.next();
            if m.try_match(hn) {
              self.cas_head(&h, mn);
              telemetry::increment_counter(telemetry::LOC_STACK, telemetry::CTR_HELPS);
            } else {
              cas_link(&hn.next, &m_link, mn);
            }
          }
        }
      }
    }
  }

  fn await_fulfill(&self, s: Arc<SNode<T>>, mode: u8, wait: Wait) -> TransferResult<T> {
    match self.spin.await_resolution(&*s, wait.deadline(), || self.should_spin(&s)) {
      Resolution::Cancelled(reason) => {
        let item = s.item.take();
        self.clean(&s);
        debug!(?reason, op = mode_name(mode), "stack transfer cancelled");
        telemetry::log_event(
          telemetry::LOC_STACK,
          telemetry::EVT_CANCELLED,
          Some(format!("{:?} {}", reason, mode_name(mode))),
        );
        Err(Cancelled::new(reason, item))
      }
      Resolution::Matched => {
        telemetry::log_event(telemetry::LOC_STACK, telemetry::EVT_MATCHED, None);
        // Help the fulfiller pop both nodes.
        let h = self.head.load_full();
        if let Some(hn) = h.as_ref() {
          if is_node(&hn.next(), &s) {
            self.cas_head(&h, s.next());
          }
        }
        if mode == DATA {
          return Ok(None);
        }
        match s.fulfiller().and_then(|m| m.item.take()) {
          Some(value) => Ok(Some(value)),
          None => unreachable!("take was matched by a fulfiller without an item"),
        }
      }
    }
  }

  /// Spin only while at the head or while a fulfilment is in progress there.
  fn should_spin(&self, s: &Arc<SNode<T>>) -> bool {
    match self.head.load_full() {
      None => true,
      Some(h) => Arc::ptr_eq(&h, s) || is_fulfilling(h.mode),
    }
  }

  /// Unlinks the cancelled node `s`, plus any other cancelled nodes found
  /// between the head and the first live node below `s`.
  fn clean(&self, s: &Arc<SNode<T>>) {
    // Stop at `s`'s successor, or the one after that if it is cancelled too.
    // A concurrent cleaner may keep `s` linked past this point; the next
    // traversal that reaches it unsplices it.
    let mut past = s.next();
    if let Some(p) = past.as_ref() {
      if p.is_cancelled() {
        past = p.next();
      }
    }

    // Absorb cancelled nodes at the head.
    let mut p = self.head.load_full();
    while let Some(pn) = p.as_ref() {
      if same_node(&p, &past) || !pn.is_cancelled() {
        break;
      }
      self.cas_head(&p, pn.next());
      p = self.head.load_full();
    }

    // Unsplice embedded ones.
    while let Some(pn) = p.as_ref() {
      if same_node(&p, &past) {
        break;
      }
      let n = pn.next();
      match n.as_ref() {
        Some(nn) if nn.is_cancelled() => {
          if cas_link(&pn.next, &n, nn.next()) {
            trace!("unspliced cancelled stack node");
            telemetry::log_event(telemetry::LOC_STACK, telemetry::EVT_UNSPLICED, None);
          }
        }
        _ => p = n,
      }
    }
  }

  /// Nodes reachable from the head.
  #[cfg(test)]
  pub(crate) fn linked_nodes(&self) -> usize {
    let mut count = 0;
    let mut p = self.head.load_full();
    while let Some(node) = p {
      count += 1;
      p = node.next();
    }
    count
  }
}
