use core::ops::{Add, Sub};
use core::str::{from_utf8, Utf8Error};
use std::collections::BTreeMap;

use crate::cursor::Cursor;
use crate::from_bytes::TryConsumeBytes;

/// Option parsing errors
pub mod parse_error;
pub use parse_error::*;

/// Well-known options
pub mod known;
pub use known::*;

/// The map of option number to values used by [`crate::Message`].
///
/// `BTreeMap` gives us the on-the-wire ascending-number ordering for
/// free; repeated values keep their insertion order within the `Vec`.
pub type OptMap = BTreeMap<OptNumber, Vec<OptValue>>;

/// Identifier for an option (e.g. Content-Format is 12).
///
/// The number is not just a name; its bit pattern carries the
/// option's forwarding semantics
/// ([RFC7252 §5.4.6](https://datatracker.ietf.org/doc/html/rfc7252#section-5.4.6)):
///
/// ```text
/// 0   1   2   3   4   5   6   7
/// +---+---+---+---+---+---+---+---+
/// |         | NoCacheKey| U | C |
/// +---+---+---+---+---+---+---+---+
/// ```
#[derive(Copy, Clone, Hash, PartialEq, PartialOrd, Eq, Ord, Debug, Default)]
pub struct OptNumber(pub u32);

impl OptNumber {
  /// An endpoint receiving this option must either process it or
  /// reject the message (4.02 Bad Option for requests).
  pub fn is_critical(&self) -> bool {
    self.0 & 0b01 != 0
  }

  /// A proxy that does not understand this option must not forward
  /// the message. OSCORE uses this bit as the baseline for its
  /// Class E (encrypted) selection.
  pub fn is_unsafe_to_forward(&self) -> bool {
    self.0 & 0b10 != 0
  }

  /// The option does not participate in the cache key.
  pub fn is_no_cache_key(&self) -> bool {
    self.0 & 0b11110 == 0b11100
  }

  /// The option participates in the cache key.
  pub fn is_cache_key(&self) -> bool {
    !self.is_no_cache_key()
  }
}

impl Add for OptNumber {
  type Output = OptNumber;

  fn add(self, rhs: Self) -> Self::Output {
    Self(self.0 + rhs.0)
  }
}

impl Sub for OptNumber {
  type Output = OptNumber;

  fn sub(self, rhs: Self) -> Self::Output {
    Self(self.0 - rhs.0)
  }
}

/// The "Option Delta" between an option's number and
/// the number of the option preceding it on the wire.
#[derive(Copy, Clone, Hash, PartialEq, PartialOrd, Eq, Ord, Debug, Default)]
pub struct OptDelta(pub u16);

/// The value of a single option instance.
#[derive(Clone, Hash, PartialEq, PartialOrd, Eq, Ord, Debug, Default)]
pub struct OptValue(pub Vec<u8>);

impl OptValue {
  /// Encode an unsigned integer in the canonical no-leading-zero-bytes
  /// form ([RFC7252 §3.2](https://datatracker.ietf.org/doc/html/rfc7252#section-3.2)).
  ///
  /// Zero encodes as the empty string.
  ///
  /// ```
  /// use newt_msg::OptValue;
  ///
  /// assert_eq!(OptValue::uint(0).0, Vec::<u8>::new());
  /// assert_eq!(OptValue::uint(60).0, vec![60]);
  /// assert_eq!(OptValue::uint(0x0102).0, vec![1, 2]);
  /// ```
  pub fn uint(n: u64) -> Self {
    let bytes = n.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    OptValue(bytes[skip..].to_vec())
  }

  /// Decode a canonical unsigned integer, rejecting non-canonical
  /// (leading-zero) and oversized encodings.
  pub fn as_uint(&self) -> Option<u64> {
    if self.0.len() > 8 || self.0.first() == Some(&0) {
      return None;
    }

    Some(self.0.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
  }

  /// Interpret the value as UTF-8
  pub fn as_str(&self) -> Result<&str, Utf8Error> {
    from_utf8(&self.0)
  }

  /// The raw bytes
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }

  /// Number of bytes in the value
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// Is the value the empty string?
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl From<&[u8]> for OptValue {
  fn from(bytes: &[u8]) -> Self {
    OptValue(bytes.to_vec())
  }
}

impl From<&str> for OptValue {
  fn from(s: &str) -> Self {
    OptValue(s.as_bytes().to_vec())
  }
}

/// Low-level representation of a single CoAP Option instance,
/// closely mirroring the byte layout of message options.
///
/// Notably this doesn't include the Number; on the wire numbers are
/// recovered by summing deltas, and in [`crate::Message`] they key
/// the [`OptMap`].
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Opt {
  /// See [`OptDelta`]
  pub delta: OptDelta,
  /// See [`OptValue`]
  pub value: OptValue,
}

impl Opt {
  /// Append this option's bytes (header nibbles, extensions, value)
  /// to a buffer.
  pub fn extend_bytes(&self, bytes: &mut Vec<u8>) {
    let (del, del_bytes) = opt_len_or_delta(self.delta.0);
    let (len, len_bytes) = opt_len_or_delta(self.value.0.len() as u16);

    bytes.push((del << 4) | len);

    if let Some(bs) = del_bytes {
      bytes.extend(bs);
    }

    if let Some(bs) = len_bytes {
      bytes.extend(bs);
    }

    bytes.extend(&self.value.0);
  }
}

impl<B: AsRef<[u8]>> TryConsumeBytes<B> for Opt {
  type Error = OptParseError;

  fn try_consume_bytes(bytes: &mut Cursor<B>) -> Result<Self, Self::Error> {
    let head = bytes.next().ok_or_else(OptParseError::eof)?;

    let delta = parse_opt_len_or_delta(head >> 4,
                                       bytes,
                                       OptParseError::OptionDeltaReservedValue(15))?;
    let len = parse_opt_len_or_delta(head & 0b1111,
                                     bytes,
                                     OptParseError::ValueLengthReservedValue(15))?;

    let value = bytes.take_exact(len as usize)
                     .ok_or_else(OptParseError::eof)?;

    Ok(Opt { delta: OptDelta(delta),
             value: OptValue(value.to_vec()) })
  }
}

pub(crate) fn parse_opt_len_or_delta<A: AsRef<[u8]>>(head: u8,
                                                     bytes: &mut Cursor<A>,
                                                     reserved_err: OptParseError)
                                                     -> Result<u16, OptParseError> {
  match head {
    | 13 => {
      let n = bytes.next().ok_or_else(OptParseError::eof)?;
      Ok((n as u16) + 13)
    },
    | 14 => match bytes.take_exact(2) {
      | Some(&[a, b]) => Ok(u16::from_be_bytes([a, b]) + 269),
      | _ => Err(OptParseError::eof()),
    },
    | 15 => Err(reserved_err),
    | _ => Ok(head as u16),
  }
}

pub(crate) fn opt_len_or_delta(val: u16) -> (u8, Option<tinyvec::ArrayVec<[u8; 2]>>) {
  match val {
    | n if n >= 269 => {
      let mut bytes = tinyvec::ArrayVec::new();
      bytes.extend((n - 269).to_be_bytes());
      (14, Some(bytes))
    },
    | n if n >= 13 => {
      let mut bytes = tinyvec::ArrayVec::new();
      bytes.push((n as u8) - 13);
      (13, Some(bytes))
    },
    | n => (n as u8, None),
  }
}

/// Parse the option block of a message, stopping at the payload
/// marker or the end of input.
///
/// Yields the parsed map and whether the 0xFF marker was seen.
///
/// Exposed publicly because OSCORE serializes its inner
/// (encrypted) message with the same option wire format.
pub fn try_consume_opts<B: AsRef<[u8]>>(
  bytes: &mut Cursor<B>)
  -> Result<(OptMap, bool), OptParseError> {
  let mut opts = OptMap::new();
  let mut number = OptNumber(0);

  loop {
    match bytes.peek() {
      | None => return Ok((opts, false)),
      | Some(0xFF) => {
        bytes.next();
        return Ok((opts, true));
      },
      | Some(_) => {
        let opt = Opt::try_consume_bytes(bytes)?;
        number = number + OptNumber(opt.delta.0 as u32);
        opts.entry(number).or_default().push(opt.value);
      },
    }
  }
}

/// Append an entire option map to a buffer, numbers ascending,
/// repeated values in insertion order.
///
/// Exposed publicly because OSCORE serializes its inner
/// (encrypted) message with the same option wire format.
pub fn extend_opts_bytes(opts: &OptMap, bytes: &mut Vec<u8>) {
  let mut last = OptNumber(0);

  for (number, values) in opts {
    for (ix, value) in values.iter().enumerate() {
      let delta = if ix == 0 { *number - last } else { OptNumber(0) };
      Opt { delta: OptDelta(delta.0 as u16),
            value: value.clone() }.extend_bytes(bytes);
    }
    last = *number;
  }
}
