use tinyvec::ArrayVec;

/// # Message Token
///
/// 0-8 opaque bytes correlating a response with the request that
/// elicited it. Where [`super::Id`] deduplicates retransmissions at
/// the message layer, the Token ties together an entire
/// request/response exchange, which may span several message IDs
/// (separate responses, observe notifications, blockwise transfers).
///
/// See [RFC7252 §5.3.1](https://datatracker.ietf.org/doc/html/rfc7252#section-5.3.1).
#[derive(Copy, Clone, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Token(pub ArrayVec<[u8; 8]>);

impl Token {
  /// Take an arbitrary-length sequence of bytes and turn it into an
  /// opaque 8-byte token.
  ///
  /// Currently uses the BLAKE2 hashing algorithm, but this may change
  /// in the future.
  ///
  /// ```
  /// use newt_msg::Token;
  ///
  /// let my_token = Token::opaque(&[0, 1, 2]);
  /// assert_eq!(my_token.0.len(), 8);
  /// ```
  pub fn opaque(data: &[u8]) -> Token {
    use blake2::digest::consts::U8;
    use blake2::{Blake2b, Digest};

    let mut digest = Blake2b::<U8>::new();
    digest.update(data);
    Token(Into::<[u8; 8]>::into(digest.finalize()).into())
  }

  /// Construct a token from raw bytes.
  ///
  /// Slices longer than 8 bytes are truncated.
  pub fn from_bytes(bytes: &[u8]) -> Token {
    Token(bytes.iter().copied().take(8).collect())
  }

  /// The token bytes as a slice
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }

  /// Shorten this token to its first `len` bytes
  pub fn truncate(&self, len: usize) -> Token {
    Token(self.0.iter().copied().take(len).collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn opaque_is_deterministic() {
    assert_eq!(Token::opaque(&[1, 2, 3]), Token::opaque(&[1, 2, 3]));
    assert_ne!(Token::opaque(&[1, 2, 3]), Token::opaque(&[3, 2, 1]));
  }

  #[test]
  fn truncate() {
    let t = Token::from_bytes(&[1, 2, 3, 4]);
    assert_eq!(t.truncate(2), Token::from_bytes(&[1, 2]));
    assert_eq!(t.truncate(8), t);
  }
}
