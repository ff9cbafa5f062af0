use core::convert::Infallible;
use std::net::SocketAddr;

use newt_msg::Token;

use crate::net::Addrd;
use crate::platform::{Effect, Message, PlatformTypes, Snapshot};

/// # ACK bookkeeping
///
/// Records inbound confirmable requests and decides whether the
/// response to each goes out piggybacked on the ACK or as a
/// separate exchange. Requests the application sits on for longer
/// than half of ACK_TIMEOUT get an early empty ACK.
pub mod ack;

/// # Blockwise transfers (RFC7959)
///
/// Splits oversized outbound bodies into Block1/Block2 sequences
/// and reassembles inbound ones, on both the client and server
/// sides of an exchange.
pub mod block;

/// # Buffering out-of-order responses
///
/// Responses that do not match the token currently being polled for
/// are parked here until someone polls for them.
pub mod buffer_responses;

/// # Message-ID deduplication
///
/// Remembers (remote, message ID) pairs for EXCHANGE_LIFETIME and
/// suppresses duplicates, re-emitting the cached reply when one
/// exists.
pub mod dedup;

/// # Observation (RFC7641)
///
/// Server side: keeps the registry of observers and re-renders
/// resources on [`crate::platform::Platform::notify`]. Client side:
/// drops stale notifications by the freshness rule.
pub mod observe;

/// # OSCORE protection (RFC8613)
///
/// Unprotects inbound messages as they flow up the chain and
/// protects outbound ones on their way to the wire.
pub mod oscore;

/// # Parsing
///
/// Initiates the step pipe by reading the platform's
/// [`Snapshot`] for a dgram received from an external source
/// and parsing it into a [`Req`](crate::req::Req) or
/// [`Resp`](crate::resp::Resp).
pub mod parse;

/// # Message ID provisioning
///
/// Stamps outbound messages that carry the unassigned sentinel
/// `Id(0)` with the next id from a per-remote wrapping counter.
pub mod provision_ids;

/// # Token provisioning
///
/// Stamps outbound requests that carry an empty token with an
/// opaque token that no outstanding exchange with that remote is
/// using.
pub mod provision_tokens;

/// # RST handling
///
/// Answers CoAP pings, and passes RSTs up the chain so exchanges
/// and observations they refer to get torn down.
pub mod reset;

/// # Retransmission
///
/// Outbound CONs are retransmitted on the RFC7252 §4.2 schedule
/// until ACKed, RST, or attempts are exhausted.
pub mod retry;

/// The full step pipeline: the composition that turns a socket into
/// a CoAP endpoint.
///
/// Reading inside-out gives the order inbound datagrams are
/// processed; outbound messages traverse the same chain
/// outside-in.
pub type Runtime<P> =
  retry::Retry<P,
  ack::Ack<P,
  provision_tokens::ProvisionTokens<P,
  provision_ids::ProvisionIds<P,
  buffer_responses::BufferResponses<P,
  observe::Observe<P,
  block::Block<P,
  oscore::Oscore<P,
  reset::Reset<P,
  dedup::Dedup<P,
  parse::Parse<P>>>>>>>>>>>;

/// ```text
///             None -> "You may run, the step may have done nothing or just performed some effects"
///         Some(Ok) -> "You may run, the step yielded a T that could be transformed or discarded"
///        Some(Err) -> "You should not run, something unrecoverable happened"
/// Some(WouldBlock) -> "You may run, but we should all wait until the resource would no longer block"
/// ```
pub type StepOutput<T, E> = Option<nb::Result<T, E>>;

/// Macro to execute inner steps,
/// converting the `Option<nb::Result<T, E>>` to `Option<T>`
/// by returning the inner step's Errors & WouldBlock
#[macro_export]
macro_rules! exec_inner_step {
  ($result:expr, $err:expr) => {
    exec_inner_step!(run_anyway_when_would_block = false, $result, $err)
  };
  (run_anyway_when_would_block = $run_anyway_when_would_block:expr, $result:expr, $err:expr) => {
    match $result {
      | None => None,
      | Some(Ok(t)) => Some(t),
      | Some(Err(nb::Error::WouldBlock)) if $run_anyway_when_would_block => None,
      | Some(Err(nb::Error::WouldBlock)) => return Some(Err(nb::Error::WouldBlock)),
      | Some(Err(nb::Error::Other(e))) => return Some(Err(nb::Error::Other($err(e)))),
    }
  };
}

pub use exec_inner_step;

/// An error that can be returned by a [`Step`].
pub trait Error: core::fmt::Debug {}

impl Error for Infallible {}
impl Error for () {}

/// An [`Error`] that just passes an inner step's error
/// through, for steps that are infallible but wrap fallible
/// steps.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PassThrough<E>(pub E);

impl<E: core::fmt::Debug> core::fmt::Debug for PassThrough<E> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    self.0.fmt(f)
  }
}

impl<E: Error> Error for PassThrough<E> {}

/// A step in the message-handling CoAP runtime.
///
/// Steps form a chain by wrapping one another; polling a step polls
/// its inner step first and transforms or filters what comes back,
/// while the `*_message_sent` hooks run top-down so that each outer
/// layer sees the message before the layers it wraps.
pub trait Step<P: PlatformTypes>: Default {
  /// Type that this step returns when polling for a request
  type PollReq;

  /// Type that this step returns when polling for a response
  type PollResp;

  /// Type of error that can be yielded by poll_req / poll_resp
  type Error: Error;

  /// Poll for an inbound request
  ///
  /// (A message which we have no existing conception of)
  fn poll_req(&mut self,
              snap: &Snapshot<P>,
              effects: &mut Vec<Effect>)
              -> StepOutput<Self::PollReq, Self::Error>;

  /// Poll for an inbound response
  ///
  /// (A message which we are expecting as a direct result of a message we sent)
  fn poll_resp(&mut self,
               snap: &Snapshot<P>,
               effects: &mut Vec<Effect>,
               token: Token,
               addr: SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error>;

  /// A message is about to be sent over the wire and may be modified
  fn before_message_sent(&mut self,
                         snap: &Snapshot<P>,
                         effects: &mut Vec<Effect>,
                         msg: &mut Addrd<Message>)
                         -> Result<(), Self::Error> {
    let _ = (snap, effects, msg);
    Ok(())
  }

  /// A message has been sent over the wire
  fn on_message_sent(&mut self,
                     snap: &Snapshot<P>,
                     msg: &Addrd<Message>)
                     -> Result<(), Self::Error> {
    let _ = (snap, msg);
    Ok(())
  }

  /// A new representation of the resource at `path` is available
  fn notify(&mut self, path: &str, effects: &mut Vec<Effect>) -> Result<(), Self::Error> {
    let _ = (path, effects);
    Ok(())
  }

  /// The resource at `path` no longer exists
  fn resource_removed(&mut self,
                      path: &str,
                      effects: &mut Vec<Effect>)
                      -> Result<(), Self::Error> {
    let _ = (path, effects);
    Ok(())
  }
}

/// A step that does nothing
///
/// This step is usually at the bottom / beginning of step chains.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Empty;

impl<P: PlatformTypes> Step<P> for Empty {
  type PollReq = ();
  type PollResp = ();
  type Error = Infallible;

  fn poll_req(&mut self,
              _: &Snapshot<P>,
              _: &mut Vec<Effect>)
              -> StepOutput<(), Infallible> {
    None
  }

  fn poll_resp(&mut self,
               _: &Snapshot<P>,
               _: &mut Vec<Effect>,
               _: Token,
               _: SocketAddr)
               -> StepOutput<(), Infallible> {
    None
  }
}
