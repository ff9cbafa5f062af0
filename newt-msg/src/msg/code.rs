/// # Message Code
///
/// 8-bit number split into a 3-bit class and 5-bit detail,
/// written `c.dd` (e.g. `2.05` Content, `4.04` Not Found).
///
/// See [RFC7252 §12.1](https://datatracker.ietf.org/doc/html/rfc7252#section-12.1).
///
/// ```
/// use newt_msg::Code;
///
/// assert_eq!(String::from_iter(Code { class: 2,
///                                     detail: 5 }.to_human()),
///            "2.05".to_string());
/// ```
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Code {
  /// The "class" of message codes identifies it as a request or response, and provides the class of response status:
  ///
  /// |class|meaning|
  /// |---|---|
  /// |`0`|Message is a request|
  /// |`2`|Message is a success response|
  /// |`4`|Message is a client error response|
  /// |`5`|Message is a server error response|
  pub class: u8,

  /// 2-digit integer (range `[0, 32)`) that provides granular information about the response status.
  ///
  /// Will always be `0` for requests.
  pub detail: u8,
}

/// Whether a code is for a request, response, or empty message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeKind {
  /// A request code (0.xx)
  Request,
  /// A response code ([2-5].xx)
  Response,
  /// EMPTY (0.00)
  Empty,
}

impl Code {
  /// Create a new Code
  ///
  /// ```
  /// use newt_msg::Code;
  ///
  /// let content = Code::new(2, 05);
  /// ```
  pub const fn new(class: u8, detail: u8) -> Self {
    Self { class, detail }
  }

  /// Get the human string representation of a message code as a `char` array
  ///
  /// ```
  /// use newt_msg::Code;
  ///
  /// let code = Code { class: 2,
  ///                   detail: 5 };
  /// assert_eq!(String::from_iter(code.to_human()), "2.05".to_string());
  /// ```
  pub fn to_human(&self) -> [char; 4] {
    let to_char = |d: u8| char::from_digit(d.into(), 10).unwrap();
    [to_char(self.class),
     '.',
     to_char(self.detail / 10),
     to_char(self.detail % 10)]
  }

  /// Get whether this code is for a request, response, or empty message
  ///
  /// ```
  /// use newt_msg::{Code, CodeKind};
  ///
  /// assert_eq!(Code::new(0, 0).kind(), CodeKind::Empty);
  /// assert_eq!(Code::GET.kind(), CodeKind::Request);
  /// assert_eq!(Code::CONTENT.kind(), CodeKind::Response);
  /// ```
  pub fn kind(&self) -> CodeKind {
    match (self.class, self.detail) {
      | (0, 0) => CodeKind::Empty,
      | (0, _) => CodeKind::Request,
      | _ => CodeKind::Response,
    }
  }

  /// 0.00 EMPTY, used by bare ACKs, RSTs and the CoAP ping
  pub const EMPTY: Self = Self::new(0, 0);

  /// 0.01 GET
  pub const GET: Self = Self::new(0, 1);

  /// 0.02 PUT
  pub const PUT: Self = Self::new(0, 2);

  /// 0.03 POST
  pub const POST: Self = Self::new(0, 3);

  /// 0.04 DELETE
  pub const DELETE: Self = Self::new(0, 4);

  /// 0.05 FETCH (RFC8132)
  pub const FETCH: Self = Self::new(0, 5);

  /// 0.06 PATCH (RFC8132)
  pub const PATCH: Self = Self::new(0, 6);

  /// 0.07 iPATCH (RFC8132)
  pub const IPATCH: Self = Self::new(0, 7);

  /// 2.03 Valid
  pub const VALID: Self = Self::new(2, 3);

  /// 2.04 Changed
  pub const CHANGED: Self = Self::new(2, 4);

  /// 2.05 Content
  pub const CONTENT: Self = Self::new(2, 5);

  /// 2.31 Continue (RFC7959)
  pub const CONTINUE: Self = Self::new(2, 31);

  /// 4.00 Bad Request
  pub const BAD_REQUEST: Self = Self::new(4, 0);

  /// 4.01 Unauthorized
  pub const UNAUTHORIZED: Self = Self::new(4, 1);

  /// 4.02 Bad Option
  pub const BAD_OPTION: Self = Self::new(4, 2);

  /// 4.04 Not Found
  pub const NOT_FOUND: Self = Self::new(4, 4);

  /// 4.05 Method Not Allowed
  pub const METHOD_NOT_ALLOWED: Self = Self::new(4, 5);

  /// 4.08 Request Entity Incomplete (RFC7959)
  pub const REQUEST_ENTITY_INCOMPLETE: Self = Self::new(4, 8);

  /// 4.12 Precondition Failed
  pub const PRECONDITION_FAILED: Self = Self::new(4, 12);

  /// 4.13 Request Entity Too Large
  pub const REQUEST_ENTITY_TOO_LARGE: Self = Self::new(4, 13);

  /// 5.00 Internal Server Error
  pub const INTERNAL_SERVER_ERROR: Self = Self::new(5, 0);

  /// 5.03 Service Unavailable
  pub const SERVICE_UNAVAILABLE: Self = Self::new(5, 3);
}

impl From<u8> for Code {
  fn from(b: u8) -> Self {
    // xxxyyyyy

    // xxx => class
    let class = b >> 5;

    // yyyyy => detail
    let detail = b & 0b00011111;

    Code { class, detail }
  }
}

impl From<Code> for u8 {
  fn from(code: Code) -> u8 {
    let class = (code.class << 5) & 0b11100000;
    let detail = code.detail & 0b00011111;

    class | detail
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::assert_eqb;

  #[test]
  fn parse_code() {
    let byte = 0b01000101_u8;
    let code = Code::from(byte);
    assert_eq!(code,
               Code { class: 2,
                      detail: 5 })
  }

  #[test]
  fn serialize_code() {
    let code = Code { class: 2,
                      detail: 5 };
    let actual: u8 = code.into();
    let expected = 0b01000101_u8;
    assert_eqb!(actual, expected)
  }

  #[test]
  fn code_kinds() {
    assert_eq!(Code::EMPTY.kind(), CodeKind::Empty);
    assert_eq!(Code::IPATCH.kind(), CodeKind::Request);
    assert_eq!(Code::CONTINUE.kind(), CodeKind::Response);
    assert_eq!(Code::SERVICE_UNAVAILABLE.kind(), CodeKind::Response);
  }
}
