//! Atomic item cell shared by both node flavors.
//!
//! A slot holds a heap-boxed item as a raw pointer, so handing the item to
//! another thread is a single pointer CAS. The pointer has three kinds of value:
//!
//! - null: no item (a take request, or a put whose item was already taken)
//! - [`cancelled_marker`]: the slot was cancelled, or its delivered item collected
//! - anything else: a boxed item owned by whoever last installed it
//!
//! Whoever wins the CAS that removes a boxed pointer from the slot owns the box.

use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

static CANCELLED: u8 = 0;

/// Address shared by every cancelled slot and node link.
///
/// It points at a static, so it can never collide with a heap allocation and
/// stays valid when the holder is moved.
#[inline]
pub(crate) fn cancelled_marker<U>() -> *mut U {
  ptr::addr_of!(CANCELLED) as *mut U
}

pub(crate) struct ItemSlot<T> {
  ptr: AtomicPtr<T>,
  _owns: PhantomData<Box<T>>,
}

// The slot only ever moves `T` between threads; no `&T` is shared.
unsafe impl<T: Send> Send for ItemSlot<T> {}
unsafe impl<T: Send> Sync for ItemSlot<T> {}

#[inline]
pub(crate) fn into_raw<T>(item: Option<T>) -> *mut T {
  match item {
    Some(value) => Box::into_raw(Box::new(value)),
    None => ptr::null_mut(),
  }
}

/// Takes back ownership of a pointer produced by [`into_raw`].
///
/// # Safety
/// `raw` must be null or a pointer from `into_raw` that the caller exclusively owns.
#[inline]
pub(crate) unsafe fn from_raw<T>(raw: *mut T) -> Option<T> {
  if raw.is_null() {
    None
  } else {
    Some(*Box::from_raw(raw))
  }
}

impl<T> ItemSlot<T> {
  pub(crate) fn new(item: Option<T>) -> Self {
    Self {
      ptr: AtomicPtr::new(into_raw(item)),
      _owns: PhantomData,
    }
  }

  /// Current raw value. Only compare it, never dereference it.
  #[inline]
  pub(crate) fn load(&self) -> *mut T {
    self.ptr.load(Ordering::SeqCst)
  }

  #[inline]
  pub(crate) fn is_marker(&self, raw: *mut T) -> bool {
    raw == cancelled_marker()
  }

  #[inline]
  pub(crate) fn is_cancelled(&self) -> bool {
    self.is_marker(self.load())
  }

  /// Moves the slot from `current` to the cancelled marker.
  ///
  /// On success the caller keeps ownership of whatever `current` pointed to.
  pub(crate) fn try_cancel(&self, current: *mut T) -> bool {
    self
      .ptr
      .compare_exchange(current, cancelled_marker(), Ordering::SeqCst, Ordering::SeqCst)
      .is_ok()
  }

  /// Replaces `current` with `replacement` in one CAS.
  ///
  /// On success ownership of `replacement` passes to the slot and the item that
  /// `current` pointed to (if any) is returned to the caller. On failure the
  /// replacement is handed back untouched.
  pub(crate) fn try_replace(&self, current: *mut T, replacement: Option<T>) -> Result<Option<T>, Option<T>> {
    debug_assert!(!self.is_marker(current), "cannot replace a cancelled slot");
    let new = into_raw(replacement);
    match self
      .ptr
      .compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst)
    {
      // SAFETY: winning the CAS transfers exclusive ownership of `current`.
      Ok(_) => Ok(unsafe { from_raw(current) }),
      // SAFETY: `new` was never published.
      Err(_) => Err(unsafe { from_raw(new) }),
    }
  }

  /// Removes the item, leaving the slot empty. Returns `None` if the slot is
  /// empty or cancelled; a cancelled slot stays cancelled.
  pub(crate) fn take(&self) -> Option<T> {
    let mut current = self.load();
    loop {
      if current.is_null() || self.is_marker(current) {
        return None;
      }
      match self
        .ptr
        .compare_exchange(current, ptr::null_mut(), Ordering::SeqCst, Ordering::SeqCst)
      {
        // SAFETY: winning the CAS transfers exclusive ownership of `current`.
        Ok(_) => return unsafe { from_raw(current) },
        Err(actual) => current = actual,
      }
    }
  }

  /// Marks the slot cancelled unconditionally and returns the item it held.
  ///
  /// Used by the owner of a matched request node to collect the delivered item
  /// while making the node look dead to later fulfillers.
  pub(crate) fn retire(&self) -> Option<T> {
    let previous = self.ptr.swap(cancelled_marker(), Ordering::SeqCst);
    if self.is_marker(previous) {
      return None;
    }
    // SAFETY: the swap removed `previous` from the slot; nobody else can obtain it.
    unsafe { from_raw(previous) }
  }
}

impl<T> Drop for ItemSlot<T> {
  fn drop(&mut self) {
    let raw = *self.ptr.get_mut();
    if !raw.is_null() && raw != cancelled_marker() {
      // SAFETY: a boxed item still in the slot at drop time has no other owner.
      drop(unsafe { Box::from_raw(raw) });
    }
  }
}

impl<T> fmt::Debug for ItemSlot<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let raw = self.load();
    let state = if raw.is_null() {
      "empty"
    } else if self.is_marker(raw) {
      "cancelled"
    } else {
      "occupied"
    };
    f.debug_struct("ItemSlot").field("state", &state).finish()
  }
}
