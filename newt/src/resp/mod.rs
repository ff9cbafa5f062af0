use core::str::Utf8Error;

use newt_msg::{Code, Message, Payload, Type};

use crate::req::Req;

/// A CoAP response: a [`Message`] whose code is a response status.
///
/// ```
/// use newt::req::Req;
/// use newt::resp::Resp;
///
/// let req = Req::get("hello");
/// let mut resp = Resp::for_request(&req);
/// resp.set_payload("Hello World!");
/// assert_eq!(resp.msg().code, newt_msg::Code::CONTENT);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resp(pub Message);

impl Resp {
  /// Create a response to a request.
  ///
  /// The response starts as a piggybacked 2.05 on the request's ACK;
  /// the runtime rewrites the type (separate CON, or NON) as the
  /// exchange demands.
  pub fn for_request(req: &Req) -> Self {
    let mut msg = Message::new(Type::Ack, Code::CONTENT, req.msg().id, req.msg().token);
    msg.ver = req.msg().ver;
    Resp(msg)
  }

  /// The response status code
  pub fn code(&self) -> Code {
    self.0.code
  }

  /// Set the response status code
  pub fn set_code(&mut self, code: Code) {
    self.0.code = code;
  }

  /// Borrow the underlying message
  pub fn msg(&self) -> &Message {
    &self.0
  }

  /// Mutably borrow the underlying message
  pub fn msg_mut(&mut self) -> &mut Message {
    &mut self.0
  }

  /// The response body
  pub fn payload(&self) -> &[u8] {
    self.0.payload.as_bytes()
  }

  /// The response body, interpreted as UTF-8
  pub fn payload_str(&self) -> Result<&str, Utf8Error> {
    core::str::from_utf8(self.payload())
  }

  /// Replace the response body
  pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
    self.0.set_payload(Payload(payload.into()));
  }
}

impl From<Message> for Resp {
  fn from(msg: Message) -> Self {
    Resp(msg)
  }
}

impl From<Resp> for Message {
  fn from(resp: Resp) -> Self {
    resp.0
  }
}
