/// Version of the CoAP protocol that the message adheres to.
///
/// Always 1 on the wire today; decoding any other value fails
/// with [`super::MessageParseError::InvalidVersion`].
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Version(pub u8);

impl Default for Version {
  fn default() -> Self {
    Version(1)
  }
}
