use core::str::Utf8Error;

use newt_msg::{Code, Id, Message, Payload, Token, Type};

/// A CoAP request: a [`Message`] whose code is a method.
///
/// `Req` is a thin view; the message is public and everything on
/// [`Message`] applies.
///
/// ```
/// use newt::req::Req;
///
/// let req = Req::get("sensors/temperature");
/// assert_eq!(req.msg().code, newt_msg::Code::GET);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Req(pub Message);

impl Req {
  fn with_code(code: Code, path: &str) -> Self {
    let mut msg = Message::new(Type::Con, code, Id(0), Token(Default::default()));
    msg.set_path(path);
    Req(msg)
  }

  /// Create a confirmable GET request
  pub fn get(path: &str) -> Self {
    Self::with_code(Code::GET, path)
  }

  /// Create a confirmable POST request
  pub fn post(path: &str) -> Self {
    Self::with_code(Code::POST, path)
  }

  /// Create a confirmable PUT request
  pub fn put(path: &str) -> Self {
    Self::with_code(Code::PUT, path)
  }

  /// Create a confirmable DELETE request
  pub fn delete(path: &str) -> Self {
    Self::with_code(Code::DELETE, path)
  }

  /// Make this request non-confirmable
  pub fn non(mut self) -> Self {
    self.0.ty = Type::Non;
    self
  }

  /// Ask the server to add us to the observer list of the
  /// requested resource
  pub fn observing(mut self) -> Self {
    self.0.set_observe(newt_msg::observe::Action::Register.into());
    self
  }

  /// Borrow the underlying message
  pub fn msg(&self) -> &Message {
    &self.0
  }

  /// Mutably borrow the underlying message
  pub fn msg_mut(&mut self) -> &mut Message {
    &mut self.0
  }

  /// The request method
  pub fn method(&self) -> Code {
    self.0.code
  }

  /// The request path
  pub fn path(&self) -> Result<String, Utf8Error> {
    self.0.path_string()
  }

  /// The request body
  pub fn payload(&self) -> &[u8] {
    self.0.payload.as_bytes()
  }

  /// Replace the request body
  pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
    self.0.set_payload(Payload(payload.into()));
    self
  }
}

impl From<Message> for Req {
  fn from(msg: Message) -> Self {
    Req(msg)
  }
}

impl From<Req> for Message {
  fn from(req: Req) -> Self {
    req.0
  }
}
