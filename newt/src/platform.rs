use core::fmt::Debug;
use std::net::SocketAddr;

use embedded_time::Instant;
use newt_msg::{Id, Token, TryIntoBytes};

use crate::config::Config;
use crate::net::{Addrd, Socket};
use crate::req::Req;
use crate::resp::Resp;
use crate::retry::RetryTimer;
use crate::step::Step;
use crate::time::Clock;

/// The concrete message type moved through the runtime.
pub type Message = newt_msg::Message;

/// The types a platform brings to the party: a clock and a socket.
///
/// Everything else (collections, messages, effects) is fixed; this
/// library is std-only and keeps its configurability at the seams
/// that matter: time sources and transports, which tests mock.
pub trait PlatformTypes: Sized + 'static + Debug {
  /// What should we use to keep track of time?
  type Clock: Clock;

  /// What should we use for networking?
  type Socket: Socket;
}

/// Default [`PlatformError`] implementation
#[derive(Debug)]
#[allow(missing_docs)]
pub enum Error<Step, Socket> {
  MessageToBytes(newt_msg::MessageToBytesError),
  Step(Step),
  Socket(Socket),
  Clock(embedded_time::clock::Error),
}

impl<Step, Socket> PlatformError<Step, Socket> for Error<Step, Socket>
  where Step: Debug,
        Socket: Debug
{
  fn msg_to_bytes(e: newt_msg::MessageToBytesError) -> Self {
    Self::MessageToBytes(e)
  }

  fn step(e: Step) -> Self {
    Self::Step(e)
  }

  fn socket(e: Socket) -> Self {
    Self::Socket(e)
  }

  fn clock(e: embedded_time::clock::Error) -> Self {
    Self::Clock(e)
  }
}

/// Errors that may be encountered during the CoAP lifecycle
pub trait PlatformError<StepError, SocketError>: Sized + Debug {
  /// Convert a [`newt_msg::MessageToBytesError`] to PlatformError
  fn msg_to_bytes(e: newt_msg::MessageToBytesError) -> Self;

  /// Convert a step error to PlatformError
  fn step(e: StepError) -> Self;

  /// Convert a socket error to PlatformError
  fn socket(e: SocketError) -> Self;

  /// Convert a clock error to PlatformError
  fn clock(e: embedded_time::clock::Error) -> Self;
}

/// A snapshot of the system's state at a given moment
#[non_exhaustive]
pub struct Snapshot<P: PlatformTypes> {
  /// The current system time at the start of the step pipe
  pub time: Instant<P::Clock>,

  /// A UDP datagram received from somewhere
  pub recvd_dgram: Option<Addrd<Vec<u8>>>,

  /// Runtime config, includes many useful timings
  pub config: Config,
}

impl<P: PlatformTypes> Debug for Snapshot<P> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Snapshot")
     .field("recvd_dgram", &self.recvd_dgram)
     .field("config", &self.config)
     .finish()
  }
}

impl<P: PlatformTypes> Clone for Snapshot<P> {
  fn clone(&self) -> Self {
    Self { time: self.time,
           recvd_dgram: self.recvd_dgram.clone(),
           config: self.config }
  }
}

/// Used by [`Step`]s to deterministically communicate
/// to [`Platform`]s side-effects that they would like
/// to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
  /// Transmit a message (it passes through the full step pipe first)
  Send(Addrd<Message>),
  /// Retransmit a message exactly as previously sent: straight to the
  /// socket, without running the step hooks again. Retransmissions and
  /// deduplication replays use this so an already-protected message is
  /// not protected twice.
  Resend(Addrd<Message>),
  /// Emit a log line
  Log(log::Level, String),
  /// Do nothing
  Nop,
}

impl Default for Effect {
  fn default() -> Self {
    Self::Nop
  }
}

impl Effect {
  /// Is this [`Effect::Send`]?
  pub fn is_send(&self) -> bool {
    self.get_send().is_some()
  }

  /// If this is [`Effect::Send`], yields a reference to the message
  pub fn get_send(&self) -> Option<&Addrd<Message>> {
    match self {
      | Self::Send(r) => Some(r),
      | _ => None,
    }
  }
}

/// Used to associate a value with a RetryTimer.
///
/// The value is usually used as the basis for some
/// fallible IO, e.g. `T` may be an outbound message -
/// `Retryable` allows us to keep track of how many times
/// we've attempted to send it and whether we
/// should consider it poisoned.
#[derive(Debug, Clone, Copy)]
pub struct Retryable<P: PlatformTypes, T>(pub T, pub RetryTimer<P::Clock>);

impl<P: PlatformTypes, T> Retryable<P, T> {
  /// Gets the data, discarding the retry timer
  pub fn unwrap(self) -> T {
    self.0
  }
}

/// The runtime component of the platform abstraction.
///
/// Wires a [`Step`] chain to a socket and clock: polling pulls
/// datagrams through the chain, sending pushes messages through the
/// chain's `before_message_sent` / `on_message_sent` hooks, and
/// side effects the steps request are executed in order.
pub trait Platform<Steps>: Sized
  where Steps:
          Step<Self::Types, PollReq = Addrd<Req>, PollResp = Addrd<Resp>>
{
  /// See [`PlatformTypes`]
  type Types: PlatformTypes;

  /// Slot for any error type that impls [`PlatformError`].
  ///
  /// If no custom behavior is needed, [`self::Error`] is a sensible default.
  type Error: PlatformError<<Steps as Step<Self::Types>>::Error,
                            <<Self::Types as PlatformTypes>::Socket as Socket>::Error>;

  /// Take a snapshot of the platform's state right now,
  /// including the system time and any datagram currently
  /// in the network socket
  fn snapshot(&self) -> Result<Snapshot<Self::Types>, Self::Error> {
    use embedded_time::Clock;

    let recvd_dgram = self.socket().poll().map_err(Self::Error::socket)?;
    let time = self.clock().try_now().map_err(Self::Error::clock)?;

    Ok(Snapshot { recvd_dgram,
                  config: self.config(),
                  time })
  }

  /// A snapshot carrying the time but leaving the socket alone.
  ///
  /// The send path uses this; pulling a datagram there would
  /// silently eat inbound traffic.
  fn snapshot_sans_dgram(&self) -> Result<Snapshot<Self::Types>, Self::Error> {
    use embedded_time::Clock;

    let time = self.clock().try_now().map_err(Self::Error::clock)?;

    Ok(Snapshot { recvd_dgram: None,
                  config: self.config(),
                  time })
  }

  /// Poll for an inbound request, and pass it through `Steps`
  /// for processing.
  fn poll_req(&mut self) -> nb::Result<Addrd<Req>, Self::Error> {
    let snapshot = self.snapshot().map_err(nb::Error::Other)?;
    let mut effects = Vec::<Effect>::new();

    let res = self.steps_mut()
                  .poll_req(&snapshot, &mut effects)
                  .unwrap_or(Err(nb::Error::WouldBlock))
                  .map_err(|e| e.map(Self::Error::step));

    // NOTE: exec effects even if the above blocks
    self.exec_many(effects).map_err(nb::Error::Other)?;

    res
  }

  /// Poll for a response to a sent request, and pass it through `Steps`
  /// for processing.
  fn poll_resp(&mut self,
               token: Token,
               addr: SocketAddr)
               -> nb::Result<Addrd<Resp>, Self::Error> {
    let snapshot = self.snapshot().map_err(nb::Error::Other)?;
    let mut effects = Vec::<Effect>::new();

    let res = self.steps_mut()
                  .poll_resp(&snapshot, &mut effects, token, addr)
                  .unwrap_or(Err(nb::Error::WouldBlock))
                  .map_err(|e| e.map(Self::Error::step));

    // NOTE: exec effects even if the above blocks
    self.exec_many(effects).map_err(nb::Error::Other)?;

    res
  }

  /// Notify Observe subscribers that a new representation of the resource
  /// at `path` is available
  fn notify<P>(&mut self, path: P) -> Result<(), Self::Error>
    where P: AsRef<str>
  {
    let mut effects = Vec::<Effect>::new();
    self.steps_mut()
        .notify(path.as_ref(), &mut effects)
        .map_err(Self::Error::step)?;

    self.exec_many(effects)
  }

  /// Tell Observe subscribers that the resource at `path` is gone
  /// (terminal notification), tearing down their registrations.
  fn notify_removed<P>(&mut self, path: P) -> Result<(), Self::Error>
    where P: AsRef<str>
  {
    let mut effects = Vec::<Effect>::new();
    self.steps_mut()
        .resource_removed(path.as_ref(), &mut effects)
        .map_err(Self::Error::step)?;

    self.exec_many(effects)
  }

  /// Send a [`Message`]
  fn send_msg(&mut self, mut msg: Addrd<Message>) -> nb::Result<(Id, Token), Self::Error> {
    let snapshot = self.snapshot_sans_dgram().map_err(nb::Error::Other)?;

    let mut effects = Vec::<Effect>::new();
    self.steps_mut()
        .before_message_sent(&snapshot, &mut effects, &mut msg)
        .map_err(Self::Error::step)
        .map_err(nb::Error::Other)?;
    self.exec_many(effects).map_err(nb::Error::Other)?;

    let (id, token) = (msg.data().id, msg.data().token);

    let bytes = msg.data()
                   .clone()
                   .try_into_bytes()
                   .map_err(Self::Error::msg_to_bytes)
                   .map_err(nb::Error::Other)?;

    self.socket()
        .send(Addrd(&bytes, msg.addr()))
        .map_err(|e| e.map(Self::Error::socket))?;

    self.steps_mut()
        .on_message_sent(&snapshot, &msg)
        .map_err(Self::Error::step)
        .map_err(nb::Error::Other)?;

    Ok((id, token))
  }

  /// Send a message straight to the socket, skipping the step hooks
  fn send_msg_raw(&mut self, msg: &Addrd<Message>) -> nb::Result<(), Self::Error> {
    let bytes = msg.data()
                   .clone()
                   .try_into_bytes()
                   .map_err(Self::Error::msg_to_bytes)
                   .map_err(nb::Error::Other)?;

    self.socket()
        .send(Addrd(&bytes, msg.addr()))
        .map_err(|e| e.map(Self::Error::socket))
  }

  /// Execute an [`Effect`]
  fn exec_1(&mut self, effect: &Effect) -> nb::Result<(), Self::Error> {
    match effect {
      | &Effect::Log(level, ref msg) => self.log(level, msg).map_err(nb::Error::Other),
      | &Effect::Send(ref msg) => self.send_msg(msg.clone()).map(|_| ()),
      | &Effect::Resend(ref msg) => self.send_msg_raw(msg),
      | &Effect::Nop => Ok(()),
    }
  }

  /// Execute many [`Effect`]s, blocking on effects that yield
  /// `nb::WouldBlock`.
  fn exec_many(&mut self, effects: Vec<Effect>) -> Result<(), Self::Error> {
    effects.iter()
           .try_for_each(|eff| nb::block!(self.exec_1(eff)))
  }

  /// `newt` may occasionally emit tracing and logs by invoking this method.
  ///
  /// It's completely up to the Platform to handle them meaningfully
  /// (e.g. the `log` crate macros)
  fn log(&mut self, level: log::Level, msg: &str) -> Result<(), Self::Error>;

  /// Copy of runtime behavior [`Config`] to be used
  fn config(&self) -> Config;

  /// Obtain a mutable reference to the step chain
  fn steps_mut(&mut self) -> &mut Steps;

  /// Obtain a reference to the socket
  fn socket(&self) -> &<Self::Types as PlatformTypes>::Socket;

  /// Get a reference to the system clock
  fn clock(&self) -> &<Self::Types as PlatformTypes>::Clock;
}
