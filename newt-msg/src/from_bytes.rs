use crate::cursor::Cursor;

/// Trait for fallible conversion from a whole byte buffer
pub trait TryFromBytes<T>: Sized {
  /// Error yielded when the buffer does not contain `Self`
  type Error;

  /// Try to parse `Self` out of `bytes`
  fn try_from_bytes(bytes: T) -> Result<Self, Self::Error>;
}

/// Trait for fallible conversion from the front of a byte stream,
/// leaving the cursor pointed at whatever follows
pub trait TryConsumeBytes<T>: Sized {
  /// Error yielded when the stream does not begin with `Self`
  type Error;

  /// Try to parse `Self` off the front of `bytes`
  fn try_consume_bytes(bytes: &mut Cursor<T>) -> Result<Self, Self::Error>;
}
