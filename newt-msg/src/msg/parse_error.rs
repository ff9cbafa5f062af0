/// Errors encounterable while parsing a message from bytes
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Eq, Ord)]
pub enum MessageParseError {
  /// Reached end of stream before parsing was finished
  UnexpectedEndOfStream,

  /// Version field was not 1
  InvalidVersion(u8),

  /// Token length was > 8
  InvalidTokenLength(u8),

  /// Error parsing option
  OptParseError(super::opt::parse_error::OptParseError),

  /// The message type is invalid (see [`super::Type`] for valid values)
  InvalidType(u8),

  /// The payload marker (0xFF) was present but no payload followed it
  PayloadMarkerWithoutPayload,
}

impl MessageParseError {
  /// Shorthand for [`MessageParseError::UnexpectedEndOfStream`]
  pub fn eof() -> Self {
    Self::UnexpectedEndOfStream
  }
}
