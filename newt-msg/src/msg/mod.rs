use core::str::Utf8Error;

use crate::cursor::Cursor;
use crate::from_bytes::{TryConsumeBytes, TryFromBytes};

/// Message Code
pub mod code;

/// Message parsing errors
pub mod parse_error;

/// Message ID
pub mod id;

/// Message Options
pub mod opt;

/// Message Type
pub mod ty;

/// Message Token
pub mod token;

/// Message Version
pub mod ver;

pub use code::*;
pub use id::*;
pub use opt::*;
pub use parse_error::*;
pub use token::*;
pub use ty::*;
pub use ver::*;

/// The request/response body
/// ([RFC7252 §5.5](https://datatracker.ietf.org/doc/html/rfc7252#section-5.5))
#[derive(Default, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Payload(pub Vec<u8>);

impl Payload {
  /// Convert a reference to a Payload to a byte slice
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }

  /// Is the payload zero-length?
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

/// Struct representing the first byte of a message.
///
/// ```text
/// CoAP version
/// |
/// |  Message type (request, response, empty)
/// |  |
/// |  |  Length of token, in bytes. (4-bit integer)
/// |  |  |
/// vv vv vvvv
/// 01 00 0000
/// ```
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Eq, Ord)]
pub(crate) struct Byte1 {
  pub(crate) ver: Version,
  pub(crate) ty: Type,
  pub(crate) tkl: u8,
}

impl TryFrom<u8> for Byte1 {
  type Error = MessageParseError;

  fn try_from(b: u8) -> Result<Self, Self::Error> {
    let ver = b >> 6; // bits 0 & 1
    let ty = b >> 4 & 0b11; // bits 2 & 3
    let tkl = b & 0b1111u8; // last 4 bits

    Ok(Byte1 { ver: Version(ver),
               ty: Type::try_from(ty)?,
               tkl })
  }
}

impl From<Byte1> for u8 {
  fn from(b: Byte1) -> u8 {
    let ver = b.ver.0 << 6;
    let ty = u8::from(b.ty) << 4;
    let tkl = b.tkl;

    ver | ty | tkl
  }
}

/// # CoAP Messages
///
/// A high-level API for manipulating requests & responses, cheaply
/// serializable to & from the byte layout of CoAP messages on the wire
/// ([RFC7252 §3](https://datatracker.ietf.org/doc/html/rfc7252#section-3)).
///
/// ## Options
/// Options (the CoAP equivalent to HTTP headers) live in a sorted map
/// keyed by [`OptNumber`]; accessors for the options known to this
/// library are provided as methods (e.g. [`Message::set_path`],
/// [`Message::block1`]).
///
/// ## Constructing
/// [`Message::new`] is the most straightforward way to initialize
/// messages, and all fields are public for struct-literal use.
///
/// ```
/// use newt_msg::{Code, Id, Message, Token, Type};
///
/// let mut req = Message::new(Type::Con, Code::GET, Id(1), Token(Default::default()));
/// req.set_path("sensors/temperature");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
  /// see [`Id`] for details
  pub id: Id,
  /// see [`Type`] for details
  pub ty: Type,
  /// see [`Version`] for details
  pub ver: Version,
  /// see [`Token`] for details
  pub token: Token,
  /// see [`Code`] for details
  pub code: Code,
  /// see [`opt::OptMap`] for details
  pub opts: OptMap,
  /// see [`Payload`]
  pub payload: Payload,
}

impl Message {
  /// Create a new message
  pub fn new(ty: Type, code: Code, id: Id, token: Token) -> Self {
    Self { id,
           token,
           ty,
           code,
           ver: Version::default(),
           payload: Payload(Default::default()),
           opts: OptMap::default() }
  }

  /// Create the empty ACK for this message.
  pub fn ack(&self) -> Self {
    Self { id: self.id,
           token: Token(Default::default()),
           ver: Default::default(),
           ty: Type::Ack,
           code: Code::EMPTY,
           payload: Payload(Default::default()),
           opts: Default::default() }
  }

  /// Create the empty RST for this message.
  pub fn reset(&self) -> Self {
    Self { id: self.id,
           token: Token(Default::default()),
           ver: Default::default(),
           ty: Type::Reset,
           code: Code::EMPTY,
           payload: Payload(Default::default()),
           opts: Default::default() }
  }

  /// Serialized size in bytes
  pub fn size(&self) -> usize {
    let opts: usize = self.opts
                          .values()
                          .flatten()
                          // worst case: 1 header byte + two 2-byte extensions
                          .map(|v| 5 + v.len())
                          .sum();

    4 + self.token.0.len() + opts + 1 + self.payload.0.len()
  }

  /// Set the payload, returning the old payload if there was one
  pub fn set_payload(&mut self, p: Payload) -> Option<Payload> {
    let mut old: Payload = p;
    core::mem::swap(&mut old, &mut self.payload);
    Some(old).filter(|old| !old.0.is_empty())
  }

  /// Insert a new value for a given option, alongside any existing values
  pub fn add(&mut self, n: OptNumber, v: OptValue) {
    self.opts.entry(n).or_default().push(v);
  }

  /// Replace any / all existing values with a new one,
  /// yielding the previous value(s)
  pub fn set(&mut self, n: OptNumber, v: OptValue) -> Option<Vec<OptValue>> {
    self.opts.insert(n, vec![v])
  }

  /// Get the value(s) of an option by number
  pub fn get(&self, n: OptNumber) -> Option<&Vec<OptValue>> {
    self.opts.get(&n)
  }

  /// Get the value of an option, taking the first if there are multiple
  pub fn get_first(&self, n: OptNumber) -> Option<&OptValue> {
    self.get(n).and_then(|vs| vs.first())
  }

  /// Get the number of values for a given option
  pub fn count(&self, n: OptNumber) -> usize {
    self.get(n).map(|vs| vs.len()).unwrap_or(0)
  }

  /// Get the value of an option interpreted as a canonical uint
  pub fn get_uint(&self, n: OptNumber) -> Option<u64> {
    self.get_first(n).and_then(|v| v.as_uint())
  }

  /// Get the value of an option interpreted as a UTF-8 string
  pub fn get_str(&self, n: OptNumber) -> Result<Option<&str>, Utf8Error> {
    match self.get_first(n) {
      | Some(v) => v.as_str().map(Some),
      | _ => Ok(None),
    }
  }

  /// Get all values for an option interpreted as UTF-8 strings
  pub fn get_strs(&self, n: OptNumber) -> Result<Vec<&str>, Utf8Error> {
    match self.get(n) {
      | Some(vs) => vs.iter().map(|v| v.as_str()).collect(),
      | _ => Ok(vec![]),
    }
  }

  /// Remove all values for the option from this message,
  /// returning them if there were any
  pub fn remove(&mut self, n: OptNumber) -> Option<Vec<OptValue>> {
    self.opts.remove(&n)
  }

  /// Update the value for the Uri-Path option, one value per segment,
  /// discarding any existing values.
  ///
  /// ```
  /// use newt_msg::{Code, Id, Message, Token, Type};
  ///
  /// let mut msg = Message::new(Type::Con, Code::GET, Id(1), Token(Default::default()));
  /// msg.set_path("cheese/havarti/suggestions");
  /// assert_eq!(msg.path_string().unwrap(), "cheese/havarti/suggestions".to_string());
  /// ```
  pub fn set_path<S: AsRef<str>>(&mut self, path: S) {
    self.remove(repeat::PATH);
    path.as_ref()
        .split('/')
        .filter(|seg| !seg.is_empty())
        .for_each(|seg| self.add(repeat::PATH, OptValue::from(seg)));
  }

  /// Get the Uri-Path segments
  pub fn path(&self) -> Result<Vec<&str>, Utf8Error> {
    self.get_strs(repeat::PATH)
  }

  /// Get the fully built path, joining segments with '/'
  pub fn path_string(&self) -> Result<String, Utf8Error> {
    self.path().map(|segs| segs.join("/"))
  }

  /// Insert a new value for the Uri-Query option,
  /// alongside any existing values
  pub fn add_query<S: AsRef<str>>(&mut self, query: S) {
    self.add(repeat::QUERY, OptValue::from(query.as_ref()));
  }

  /// Get all query parameters for this request
  pub fn query(&self) -> Result<Vec<&str>, Utf8Error> {
    self.get_strs(repeat::QUERY)
  }

  /// Update the value for the Content-Format option
  pub fn set_content_format(&mut self, format: ContentFormat) {
    self.set(no_repeat::CONTENT_FORMAT,
             OptValue::uint(u16::from(&format) as u64));
  }

  /// Get the value for the Content-Format option
  pub fn content_format(&self) -> Option<ContentFormat> {
    self.get_uint(no_repeat::CONTENT_FORMAT)
        .map(|n| ContentFormat::from(n as u16))
  }

  /// Update the value for the Accept option
  pub fn set_accept(&mut self, format: ContentFormat) {
    self.set(no_repeat::ACCEPT, OptValue::uint(u16::from(&format) as u64));
  }

  /// Get the value for the Accept option
  pub fn accept(&self) -> Option<ContentFormat> {
    self.get_uint(no_repeat::ACCEPT)
        .map(|n| ContentFormat::from(n as u16))
  }

  /// Set the raw Observe value (a register/deregister
  /// [`observe::Action`] in requests, a 24-bit sequence number in
  /// notifications)
  pub fn set_observe(&mut self, n: u64) {
    self.set(no_repeat::OBSERVE, OptValue::uint(n & 0xFF_FF_FF));
  }

  /// Get the raw Observe value
  pub fn observe(&self) -> Option<u64> {
    self.get_uint(no_repeat::OBSERVE)
  }

  /// Get the Observe value interpreted as a request's [`observe::Action`]
  pub fn observe_action(&self) -> Option<observe::Action> {
    self.observe().and_then(observe::Action::from_uint)
  }

  /// Get the Block1 descriptor
  pub fn block1(&self) -> Option<Block> {
    self.get_uint(no_repeat::BLOCK1).map(|n| Block::from(n as u32))
  }

  /// Set the Block1 descriptor
  pub fn set_block1(&mut self, size: u16, num: u32, more: bool) {
    self.set(no_repeat::BLOCK1,
             OptValue::uint(u32::from(Block::new(size, num, more)) as u64));
  }

  /// Get the Block2 descriptor
  pub fn block2(&self) -> Option<Block> {
    self.get_uint(no_repeat::BLOCK2).map(|n| Block::from(n as u32))
  }

  /// Set the Block2 descriptor
  pub fn set_block2(&mut self, size: u16, num: u32, more: bool) {
    self.set(no_repeat::BLOCK2,
             OptValue::uint(u32::from(Block::new(size, num, more)) as u64));
  }

  /// Set the Size1 option (total size of a chunked request body)
  pub fn set_size1(&mut self, size_bytes: u64) {
    self.set(no_repeat::SIZE1, OptValue::uint(size_bytes));
  }

  /// Get the Size1 option
  pub fn size1(&self) -> Option<u64> {
    self.get_uint(no_repeat::SIZE1)
  }

  /// Set the Size2 option (total size of a chunked response body)
  pub fn set_size2(&mut self, size_bytes: u64) {
    self.set(no_repeat::SIZE2, OptValue::uint(size_bytes));
  }

  /// Get the Size2 option
  pub fn size2(&self) -> Option<u64> {
    self.get_uint(no_repeat::SIZE2)
  }

  /// Set the Max-Age option, in seconds
  pub fn set_max_age(&mut self, max_age_seconds: u32) {
    self.set(no_repeat::MAX_AGE, OptValue::uint(max_age_seconds as u64));
  }

  /// Get the Max-Age option, in seconds
  pub fn max_age_seconds(&self) -> Option<u32> {
    self.get_uint(no_repeat::MAX_AGE).map(|n| n as u32)
  }

  /// Insert a new value for the If-Match option,
  /// alongside any existing (non-empty) values
  pub fn add_if_match<B: AsRef<[u8]>>(&mut self, tag: B) {
    if let Some(others) = self.remove(repeat::IF_MATCH) {
      others.into_iter()
            .filter(|v| !v.is_empty())
            .for_each(|v| self.add(repeat::IF_MATCH, v));
    }

    self.add(repeat::IF_MATCH, OptValue(tag.as_ref().to_vec()));
  }

  /// Get all values for the If-Match option
  pub fn if_match(&self) -> Option<&Vec<OptValue>> {
    self.get(repeat::IF_MATCH)
  }

  /// Replace If-Match values with the empty tag, meaning "only
  /// process this request against a resource that exists"
  pub fn set_if_exists(&mut self) {
    self.set(repeat::IF_MATCH, Default::default());
  }

  /// Get whether [`Message::set_if_exists`] applies
  pub fn if_exists_flag_enabled(&self) -> bool {
    self.get(repeat::IF_MATCH)
        .map(|vs| vs.iter().any(|v| v.is_empty()))
        .unwrap_or(false)
  }

  /// Enable the If-None-Match flag, meaning "only process this
  /// request against a resource that does not exist"
  pub fn set_if_not_exists(&mut self) {
    self.set(no_repeat::IF_NONE_MATCH, Default::default());
  }

  /// Get whether [`Message::set_if_not_exists`] applies
  pub fn if_not_exists_flag_enabled(&self) -> bool {
    self.get_first(no_repeat::IF_NONE_MATCH).is_some()
  }

  /// Set the Echo freshness challenge (RFC9175)
  pub fn set_echo<B: AsRef<[u8]>>(&mut self, challenge: B) {
    self.set(no_repeat::ECHO, OptValue(challenge.as_ref().to_vec()));
  }

  /// Get the Echo freshness challenge
  pub fn echo(&self) -> Option<&OptValue> {
    self.get_first(no_repeat::ECHO)
  }

  /// Set the raw OSCORE option value (the compressed COSE header)
  pub fn set_oscore<B: AsRef<[u8]>>(&mut self, value: B) {
    self.set(no_repeat::OSCORE, OptValue(value.as_ref().to_vec()));
  }

  /// Get the raw OSCORE option value
  pub fn oscore(&self) -> Option<&OptValue> {
    self.get_first(no_repeat::OSCORE)
  }
}

impl<Bytes: AsRef<[u8]>> TryFromBytes<Bytes> for Message {
  type Error = MessageParseError;

  fn try_from_bytes(bytes: Bytes) -> Result<Self, Self::Error> {
    let mut bytes = Cursor::new(bytes);

    let Byte1 { tkl, ty, ver } = bytes.next()
                                      .ok_or_else(MessageParseError::eof)?
                                      .try_into()?;

    if ver.0 != 1 {
      return Err(Self::Error::InvalidVersion(ver.0));
    }

    if tkl > 8 {
      return Err(Self::Error::InvalidTokenLength(tkl));
    }

    let code: Code = bytes.next().ok_or_else(MessageParseError::eof)?.into();
    let id: Id = Id::try_consume_bytes(&mut bytes)?;

    let token = bytes.take_exact(tkl as usize)
                     .ok_or_else(MessageParseError::eof)?;
    let token = Token::from_bytes(token);

    let (opts, saw_marker) =
      opt::try_consume_opts(&mut bytes).map_err(Self::Error::OptParseError)?;

    if saw_marker && bytes.is_exhausted() {
      return Err(Self::Error::PayloadMarkerWithoutPayload);
    }

    let payload = Payload(bytes.take_until_end().to_vec());

    Ok(Message { id,
                 ty,
                 ver,
                 code,
                 token,
                 opts,
                 payload })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_msg() {
    let (expect, msg) = crate::test_msg();
    assert_eq!(Message::try_from_bytes(&msg).unwrap(), expect)
  }

  #[test]
  fn parse_byte1() {
    let byte = 0b_01_10_0011u8;
    let byte = Byte1::try_from(byte).unwrap();
    assert_eq!(byte,
               Byte1 { ver: Version(1),
                       ty: Type::Ack,
                       tkl: 3 })
  }

  #[test]
  fn parse_id() {
    let mut id_bytes = Cursor::new(34u16.to_be_bytes());
    let id = Id::try_consume_bytes(&mut id_bytes).unwrap();
    assert_eq!(id, Id(34));
  }

  #[test]
  fn rejects_bad_version() {
    let (_, mut bytes) = crate::test_msg();
    bytes[0] = (bytes[0] & 0b0011_1111) | 0b1000_0000;
    assert_eq!(Message::try_from_bytes(&bytes),
               Err(MessageParseError::InvalidVersion(2)));
  }

  #[test]
  fn rejects_long_token() {
    let (_, mut bytes) = crate::test_msg();
    bytes[0] = (bytes[0] & 0b1111_0000) | 12;
    assert_eq!(Message::try_from_bytes(&bytes),
               Err(MessageParseError::InvalidTokenLength(12)));
  }

  #[test]
  fn rejects_marker_without_payload() {
    // CON GET, no token, no options, then a bare payload marker
    let bytes = [0b0100_0000u8, 0x01, 0x00, 0x01, 0xFF];
    assert_eq!(Message::try_from_bytes(&bytes),
               Err(MessageParseError::PayloadMarkerWithoutPayload));
  }

  #[test]
  fn trailing_garbage_is_an_option_error() {
    // a lone 0xF1 after the header parses as delta 15 -> reserved
    let bytes = [0b0100_0000u8, 0x01, 0x00, 0x01, 0b1111_0001];
    assert!(matches!(Message::try_from_bytes(&bytes),
                     Err(MessageParseError::OptParseError(_))));
  }
}
