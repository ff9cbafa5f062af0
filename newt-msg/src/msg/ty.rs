use super::MessageParseError;

/// Indicates if this message is of
/// type Confirmable (0), Non-confirmable (1), Acknowledgement (2), or Reset (3).
///
/// See [RFC7252 §3 - Message Format](https://datatracker.ietf.org/doc/html/rfc7252#section-3) for context
#[derive(Copy, Clone, Hash, Eq, Ord, PartialEq, PartialOrd, Debug)]
pub enum Type {
  /// Messages that do not require an acknowledgement,
  /// e.g. repeated readings from a sensor.
  Non,
  /// Messages that require an acknowledgement. When no packets
  /// are lost, each Confirmable message elicits exactly one
  /// return message of type Acknowledgement or Reset.
  Con,
  /// Acknowledges that a specific Confirmable message arrived.
  /// May carry a piggybacked response.
  Ack,
  /// Indicates that a specific message was received, but some
  /// context is missing to properly process it. Also elicited by
  /// an Empty Confirmable message as a liveness check ("CoAP ping").
  Reset,
}

impl TryFrom<u8> for Type {
  type Error = MessageParseError;

  fn try_from(b: u8) -> Result<Self, Self::Error> {
    match b {
      | 0 => Ok(Type::Con),
      | 1 => Ok(Type::Non),
      | 2 => Ok(Type::Ack),
      | 3 => Ok(Type::Reset),
      | _ => Err(MessageParseError::InvalidType(b)),
    }
  }
}

impl From<Type> for u8 {
  fn from(t: Type) -> u8 {
    use Type::*;
    match t {
      | Con => 0,
      | Non => 1,
      | Ack => 2,
      | Reset => 3,
    }
  }
}
