// src/error.rs

use core::fmt;

// Value-carrying errors hand the rejected item back to the caller. Every variant
// of an enum passed to this macro must wrap exactly one `T`.
macro_rules! impl_error_for_enum_with_inner {
    (
        $enum_name:ident < $generic_param:ident >,
        $($variant:ident ( $message:expr ) ),+
        $(,)?
    ) => {
        impl<$generic_param> $enum_name<$generic_param> {
            /// Consumes the error, returning the item that could not be handed off.
            #[inline]
            pub fn into_inner(self) -> $generic_param {
                match self {
                    $( $enum_name::$variant(v) => v, )+
                }
            }
        }

        impl<$generic_param> fmt::Debug for $enum_name<$generic_param> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $( $enum_name::$variant(_) => f.write_str(concat!(stringify!($enum_name), "::", stringify!($variant), "(..)")), )+
                }
            }
        }

        impl<$generic_param> fmt::Display for $enum_name<$generic_param> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $( $enum_name::$variant(_) => f.write_str($message), )+
                }
            }
        }

        impl<$generic_param> std::error::Error for $enum_name<$generic_param> {}
    };
}

/// Error returned by [`try_put`](crate::SynchronousQueue::try_put) when no
/// taker was waiting to receive the item.
#[derive(PartialEq, Eq, Clone)]
pub enum TryPutError<T> {
  /// No thread was blocked in a take. The item is returned.
  NoTaker(T),
}

impl_error_for_enum_with_inner!(
  TryPutError<T>,
  NoTaker("no taker waiting for hand-off"),
);

/// Error returned by [`put_timeout`](crate::SynchronousQueue::put_timeout).
#[derive(PartialEq, Eq, Clone)]
pub enum PutTimeoutError<T> {
  /// No taker arrived before the deadline. The item is returned.
  Timeout(T),
  /// The waiting thread was interrupted. The item is returned.
  Interrupted(T),
}

impl_error_for_enum_with_inner!(
  PutTimeoutError<T>,
  Timeout("put timed out waiting for a taker"),
  Interrupted("put interrupted while waiting for a taker"),
);

/// Error returned by the blocking [`put`](crate::SynchronousQueue::put) family.
#[derive(PartialEq, Eq, Clone)]
pub enum PutError<T> {
  /// The waiting thread was interrupted before a taker arrived. The item is returned.
  Interrupted(T),
  /// `put_opt` was called without a value. Nothing was published.
  InvalidArgument,
}

impl<T> PutError<T> {
  /// Consumes the error, returning the item if the put carried one.
  #[inline]
  pub fn into_inner(self) -> Option<T> {
    match self {
      PutError::Interrupted(v) => Some(v),
      PutError::InvalidArgument => None,
    }
  }
}

impl<T> fmt::Debug for PutError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PutError::Interrupted(_) => write!(f, "PutError::Interrupted(..)"),
      PutError::InvalidArgument => write!(f, "PutError::InvalidArgument"),
    }
  }
}

impl<T> fmt::Display for PutError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PutError::Interrupted(_) => write!(f, "put interrupted while waiting for a taker"),
      PutError::InvalidArgument => write!(f, "put requires a value"),
    }
  }
}

impl<T> std::error::Error for PutError<T> {}

/// Error returned by the blocking [`take`](crate::SynchronousQueue::take).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TakeError {
  /// The waiting thread was interrupted before a putter arrived.
  Interrupted,
}
impl std::error::Error for TakeError {}
impl fmt::Display for TakeError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TakeError::Interrupted => write!(f, "take interrupted while waiting for a putter"),
    }
  }
}

/// Error returned by [`try_take`](crate::SynchronousQueue::try_take).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TryTakeError {
  /// No thread was blocked in a put.
  NoPutter,
}
impl std::error::Error for TryTakeError {}
impl fmt::Display for TryTakeError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TryTakeError::NoPutter => write!(f, "no putter waiting for hand-off"),
    }
  }
}

/// Error returned by [`take_timeout`](crate::SynchronousQueue::take_timeout).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TakeTimeoutError {
  /// No putter arrived before the deadline.
  Timeout,
  /// The waiting thread was interrupted.
  Interrupted,
}

impl std::error::Error for TakeTimeoutError {}
impl fmt::Display for TakeTimeoutError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TakeTimeoutError::Timeout => write!(f, "take timed out waiting for a putter"),
      TakeTimeoutError::Interrupted => write!(f, "take interrupted while waiting for a putter"),
    }
  }
}
