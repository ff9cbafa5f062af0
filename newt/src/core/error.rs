use core::convert::Infallible;
use std::net::SocketAddr;

use newt_msg::to_bytes::MessageToBytesError;
use newt_msg::OptNumber;

use crate::net::{Addrd, Socket};
use crate::oscore;
use crate::platform::{Message, PlatformError, PlatformTypes};
use crate::step;

/// The error type the full [`Runtime`](crate::step::Runtime) chain
/// can produce.
///
/// Every layer that cannot fail passes its inner error through, so
/// the whole chain collapses to retry / blockwise / OSCORE failures
/// over [`Infallible`].
pub type RuntimeError =
  step::retry::Error<step::block::Error<step::oscore::Error<Infallible>>>;

/// The context that an error occurred in
#[derive(Debug, Clone, Copy)]
pub enum When {
  /// We were polling for a message when the error occurred
  Polling,
  /// We were sending a message
  SendingMessage(Option<SocketAddr>),
  /// No more specific context applies
  None,
}

impl When {
  /// Construct a specific error from the context the error occurred in
  pub fn what<P: PlatformTypes>(self, what: What<P>) -> Error<P> {
    Error { when: self, what }
  }
}

/// An error encounterable from within [`Core`](crate::core::Core)
#[derive(Debug)]
pub struct Error<P: PlatformTypes> {
  /// What happened?
  pub what: What<P>,
  /// What were we doing when it happened?
  pub when: When,
}

/// A contextless error with some additional debug data attached.
///
/// This is the top-level error taxonomy of the endpoint: the deep
/// step errors are flattened into their own variants here so callers
/// match on one enum.
#[derive(Debug)]
pub enum What<P: PlatformTypes> {
  /// Some socket operation failed
  SockError(<<P as PlatformTypes>::Socket as Socket>::Error),
  /// Serializing a message to bytes failed
  ToBytes(MessageToBytesError),
  /// The clock failed to provide timing
  ClockError,
  /// A CONfirmable message was retransmitted to exhaustion without
  /// an ACKnowledgement
  Timeout,
  /// The remote rejected our CON with a RST
  MessageReset,
  /// A Block1 option appeared where the transfer state does not allow one
  UnexpectedBlock1,
  /// A Block2 option appeared where the transfer state does not allow one
  UnexpectedBlock2,
  /// OSCORE protection or unprotection failed
  Oscore(oscore::Error),
  /// A protected response was required but a plain one arrived;
  /// carries the plain message
  NotAProtectedMessage(Box<Addrd<Message>>),
  /// A response carried a critical option we do not know
  BadOption(OptNumber),
  /// The operation was cancelled by the caller
  Cancelled,
  /// The endpoint was shut down while the operation was pending
  Shutdown,
}

impl<P: PlatformTypes> PlatformError<RuntimeError, <P::Socket as Socket>::Error> for Error<P> {
  fn msg_to_bytes(e: MessageToBytesError) -> Self {
    When::None.what(What::ToBytes(e))
  }

  fn step(e: RuntimeError) -> Self {
    use step::block::Error as Block;
    use step::oscore::Error as Oscore;
    use step::retry::Error as Retry;

    let what = match e {
      | Retry::Timeout => What::Timeout,
      | Retry::ConReset => What::MessageReset,
      | Retry::Inner(Block::UnexpectedBlock1) => What::UnexpectedBlock1,
      | Retry::Inner(Block::UnexpectedBlock2) => What::UnexpectedBlock2,
      | Retry::Inner(Block::Inner(Oscore::Oscore(e))) => What::Oscore(e),
      | Retry::Inner(Block::Inner(Oscore::NotAProtectedMessage(m))) => {
        What::NotAProtectedMessage(m)
      },
      | Retry::Inner(Block::Inner(Oscore::Inner(never))) => match never {},
    };

    When::None.what(what)
  }

  fn socket(e: <P::Socket as Socket>::Error) -> Self {
    When::None.what(What::SockError(e))
  }

  fn clock(_: embedded_time::clock::Error) -> Self {
    When::None.what(What::ClockError)
  }
}
