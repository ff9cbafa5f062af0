use crate::msg::opt::extend_opts_bytes;
use crate::*;

/// Trait allowing fallible conversion into bytes
pub trait TryIntoBytes {
  /// Error yielded when the value cannot be serialized
  type Error;

  /// Try to convert into a collection of bytes
  ///
  /// ```
  /// use newt_msg::{Code, Id, Message, Token, TryIntoBytes, Type};
  ///
  /// let msg = Message::new(Type::Con, Code::GET, Id(1), Token(Default::default()));
  /// let bytes: Vec<u8> = msg.try_into_bytes().unwrap();
  /// ```
  fn try_into_bytes(self) -> Result<Vec<u8>, Self::Error>;
}

/// Errors encounterable serializing to bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageToBytesError {
  /// The gap between two option numbers, or an option value's
  /// length, exceeded what the 2-byte nibble extension can carry
  OptionTooLong {
    /// The offending option
    number: OptNumber,
    /// Its value's length
    len: usize,
  },
}

impl TryIntoBytes for Message {
  type Error = MessageToBytesError;

  fn try_into_bytes(self) -> Result<Vec<u8>, Self::Error> {
    let mut bytes = Vec::with_capacity(self.size());

    if let Some((number, value)) =
      self.opts
          .iter()
          .flat_map(|(n, vs)| vs.iter().map(move |v| (n, v)))
          .find(|(_, v)| v.len() > (u16::MAX as usize) + 269)
    {
      return Err(Self::Error::OptionTooLong { number: *number,
                                              len: value.len() });
    }

    let byte1: u8 = Byte1 { tkl: self.token.0.len() as u8,
                            ver: self.ver,
                            ty: self.ty }.into();
    let code: u8 = self.code.into();
    let id: [u8; 2] = self.id.into();

    bytes.push(byte1);
    bytes.push(code);
    bytes.extend(id);
    bytes.extend(self.token.0);

    extend_opts_bytes(&self.opts, &mut bytes);

    if !self.payload.0.is_empty() {
      bytes.push(0b11111111);
      bytes.extend(self.payload.0);
    }

    Ok(bytes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{assert_eqb, assert_eqb_iter};

  #[test]
  fn msg() {
    let (msg, expected) = crate::test_msg();
    let actual: Vec<u8> = msg.try_into_bytes().unwrap();
    assert_eqb_iter!(actual, expected);
  }

  #[test]
  fn byte_1() {
    let byte = Byte1 { ver: Version(1),
                       ty: Type::Ack,
                       tkl: 3 };
    let actual: u8 = byte.into();
    let expected = 0b_01_10_0011u8;
    assert_eqb!(actual, expected)
  }

  #[test]
  fn no_payload_marker() {
    let msg = Message::new(Type::Con, Code::CONTENT, Id(0), Token(Default::default()));

    assert_ne!(msg.try_into_bytes().unwrap().last(), Some(&0b11111111));
  }

  #[test]
  fn round_trip_both_directions() {
    use crate::TryFromBytes;

    let (msg, bytes) = crate::test_msg();

    // decode(encode(m)) == m
    let encoded: Vec<u8> = msg.clone().try_into_bytes().unwrap();
    assert_eq!(Message::try_from_bytes(&encoded).unwrap(), msg);

    // encode(decode(b)) == b
    let decoded = Message::try_from_bytes(&bytes).unwrap();
    assert_eqb_iter!(decoded.clone().try_into_bytes().unwrap(), bytes);
  }
}
