use std::collections::HashMap;
use std::net::SocketAddr;

use newt_msg::{CodeKind, Id, Token, Type};

use super::{Step, StepOutput};
use crate::exec_inner_step;
use crate::log_effect;
use crate::net::Addrd;
use crate::platform::{Effect, Message, PlatformTypes, Retryable, Snapshot};
use crate::req::Req;
use crate::resp::Resp;
use crate::retry::{RetryTimer, YouShould};

/// Errors raised by the retry step
#[derive(Debug)]
pub enum Error<E> {
  /// The inner step failed
  Inner(E),
  /// A CON was retransmitted MAX_RETRANSMIT times without an ACK
  /// or RST coming back
  Timeout,
  /// The remote rejected our CON with a RST
  ConReset,
}

impl<E: super::Error> super::Error for Error<E> {}

impl<E> From<E> for Error<E> {
  fn from(e: E) -> Self {
    Error::Inner(e)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
  Timeout,
  ConReset,
}

impl Failure {
  fn surface<E>(self) -> Error<E> {
    match self {
      | Failure::Timeout => Error::Timeout,
      | Failure::ConReset => Error::ConReset,
    }
  }
}

/// Reliable delivery of confirmable messages (RFC7252 §4.2).
///
/// Every CON that hits the wire is remembered with a jittered
/// exponential [`RetryTimer`]; due messages are retransmitted
/// byte-identical ([`Effect::Resend`], skipping the pipeline so an
/// OSCORE-protected message is not protected twice). A matching
/// ACK or RST stops the timer; running out of attempts surfaces
/// [`Error::Timeout`] to whoever polls for that exchange.
pub struct Retry<P: PlatformTypes, Inner> {
  buf: Vec<Retryable<P, Addrd<Message>>>,
  failed: HashMap<(SocketAddr, Token), Failure>,
  inner: Inner,
}

impl<P: PlatformTypes, Inner: core::fmt::Debug> core::fmt::Debug for Retry<P, Inner> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Retry")
     .field("in_flight", &self.buf.len())
     .field("inner", &self.inner)
     .finish()
  }
}

impl<P: PlatformTypes, Inner: Default> Default for Retry<P, Inner> {
  fn default() -> Self {
    Self { buf: Vec::new(),
           failed: HashMap::new(),
           inner: Inner::default() }
  }
}

impl<P: PlatformTypes, Inner: super::oscore::Security> super::oscore::Security
  for Retry<P, Inner>
{
  fn security_mut(&mut self) -> &mut crate::oscore::SecurityStore {
    self.inner.security_mut()
  }
}

impl<P: PlatformTypes, Inner> Retry<P, Inner> {
  /// How many CONs are awaiting an ACK from `addr`
  pub fn in_flight(&self, addr: &SocketAddr) -> usize {
    self.buf.iter().filter(|r| r.0.addr() == *addr).count()
  }

  fn attempt_all(&mut self, snap: &Snapshot<P>, effects: &mut Vec<Effect>) {
    let mut gone = vec![];

    for (ix, Retryable(msg, timer)) in self.buf.iter_mut().enumerate() {
      match timer.what_should_i_do(snap.time) {
        | Ok(YouShould::Retry) => {
          log_effect!(effects,
                      log::Level::Debug,
                      "retransmitting {:?} to {} (attempt {})",
                      msg.data().id,
                      msg.addr(),
                      timer.attempts().0);
          effects.push(Effect::Resend(msg.clone()));
        },
        | Ok(YouShould::Cry) => {
          log_effect!(effects,
                      log::Level::Warn,
                      "{:?} to {} was never acked, giving up",
                      msg.data().id,
                      msg.addr());
          gone.push(ix);
        },
        | Err(nb::Error::WouldBlock) => (),
        | Err(nb::Error::Other(_)) => unreachable!("retry timers are infallible"),
      }
    }

    for ix in gone.into_iter().rev() {
      let Retryable(msg, _) = self.buf.remove(ix);
      self.failed
          .insert((msg.addr(), msg.data().token), Failure::Timeout);
    }
  }

  fn find_by_id(&self, addr: SocketAddr, id: Id) -> Option<usize> {
    self.buf
        .iter()
        .position(|Retryable(msg, _)| msg.addr() == addr && msg.data().id == id)
  }

  pub(crate) fn forget_token(&mut self, addr: SocketAddr, token: Token) {
    self.buf
        .retain(|Retryable(msg, _)| !(msg.addr() == addr && msg.data().token == token));
  }
}

impl<P: PlatformTypes, Inner> Step<P> for Retry<P, Inner>
  where Inner: Step<P, PollReq = Addrd<Req>, PollResp = Addrd<Resp>>
{
  type PollReq = Addrd<Req>;
  type PollResp = Addrd<Resp>;
  type Error = Error<Inner::Error>;

  fn poll_req(&mut self,
              snap: &Snapshot<P>,
              effects: &mut Vec<Effect>)
              -> StepOutput<Self::PollReq, Self::Error> {
    self.attempt_all(snap, effects);
    self.inner.poll_req(snap, effects).map(|r| r.map_err(|e| e.map(Error::Inner)))
  }

  fn poll_resp(&mut self,
               snap: &Snapshot<P>,
               effects: &mut Vec<Effect>,
               token: Token,
               addr: SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error> {
    self.attempt_all(snap, effects);

    if let Some(failure) = self.failed.remove(&(addr, token)) {
      return Some(Err(nb::Error::Other(failure.surface())));
    }

    let resp = exec_inner_step!(self.inner.poll_resp(snap, effects, token, addr), Error::Inner)?;

    match (resp.data().msg().ty, resp.data().msg().code.kind()) {
      // an empty ACK settles the exchange at the message layer; the
      // separate response will correlate by token later
      | (Type::Ack, CodeKind::Empty) => {
        if let Some(ix) = self.find_by_id(resp.addr(), resp.data().msg().id) {
          self.buf.remove(ix);
        }
        None
      },
      | (Type::Reset, _) => {
        if let Some(ix) = self.find_by_id(resp.addr(), resp.data().msg().id) {
          let Retryable(msg, _) = self.buf.remove(ix);
          log_effect!(effects,
                      log::Level::Warn,
                      "{} reset our {:?}",
                      msg.addr(),
                      msg.data().id);

          if msg.addr() == addr && msg.data().token == token {
            return Some(Err(nb::Error::Other(Error::ConReset)));
          }

          self.failed
              .insert((msg.addr(), msg.data().token), Failure::ConReset);
        }
        None
      },
      // any genuine response (piggybacked or separate) settles the
      // exchange for its token
      | (_, CodeKind::Response) => {
        self.forget_token(resp.addr(), resp.data().msg().token);
        Some(Ok(resp))
      },
      | _ => Some(Ok(resp)),
    }
  }

  fn before_message_sent(&mut self,
                         snap: &Snapshot<P>,
                         effects: &mut Vec<Effect>,
                         msg: &mut Addrd<Message>)
                         -> Result<(), Self::Error> {
    self.inner
        .before_message_sent(snap, effects, msg)
        .map_err(Error::Inner)
  }

  fn on_message_sent(&mut self,
                     snap: &Snapshot<P>,
                     msg: &Addrd<Message>)
                     -> Result<(), Self::Error> {
    if msg.data().ty == Type::Con {
      self.buf.push(Retryable(msg.clone(),
                              RetryTimer::new(snap.time,
                                              snap.config.msg.con.retry_strategy,
                                              snap.config.msg.con.max_retransmits)));
    }

    self.inner.on_message_sent(snap, msg).map_err(Error::Inner)
  }

  fn notify(&mut self, path: &str, effects: &mut Vec<Effect>) -> Result<(), Self::Error> {
    self.inner.notify(path, effects).map_err(Error::Inner)
  }

  fn resource_removed(&mut self,
                      path: &str,
                      effects: &mut Vec<Effect>)
                      -> Result<(), Self::Error> {
    self.inner
        .resource_removed(path, effects)
        .map_err(Error::Inner)
  }
}

#[cfg(test)]
mod tests {
  use newt_msg::{Code, TryIntoBytes};

  use super::*;
  use crate::step::ack::Ack;
  use crate::step::dedup::Dedup;
  use crate::step::parse::Parse;
  use crate::test::{self, ClockMock};

  type Chain = Retry<test::Platform, Ack<test::Platform, Dedup<test::Platform, Parse<test::Platform>>>>;

  fn snapshot_at(millis: u64, dgram: Option<Addrd<Vec<u8>>>) -> Snapshot<test::Platform> {
    Snapshot { time: ClockMock::instant(millis),
               recvd_dgram: dgram,
               config: Default::default() }
  }

  fn con_get(id: u16, token_byte: u8) -> Addrd<Message> {
    let mut msg = Message::new(Type::Con,
                               Code::GET,
                               Id(id),
                               Token(tinyvec::array_vec!([u8; 8] => token_byte)));
    msg.set_path("hello");
    Addrd(msg, test::dummy_addr())
  }

  #[test]
  fn con_is_retransmitted_on_schedule() {
    let mut step = Chain::default();
    let msg = con_get(1, 1);
    let token = msg.data().token;
    let addr = msg.addr();

    step.on_message_sent(&snapshot_at(0, None), &msg).unwrap();

    // the initial timeout is drawn from [2s, 3s]; nothing before 2s
    let mut effects = vec![];
    step.poll_resp(&snapshot_at(1_999, None), &mut effects, token, addr);
    assert!(effects.iter().all(|e| !matches!(e, Effect::Resend(_))));

    // by 3s it must have fired exactly once
    let mut effects = vec![];
    step.poll_resp(&snapshot_at(3_000, None), &mut effects, token, addr);
    let resends = effects.iter()
                         .filter(|e| matches!(e, Effect::Resend(_)))
                         .count();
    assert_eq!(resends, 1);
  }

  #[test]
  fn exhausted_retransmissions_surface_timeout() {
    let mut step = Chain::default();
    let msg = con_get(1, 1);
    let token = msg.data().token;
    let addr = msg.addr();

    step.on_message_sent(&snapshot_at(0, None), &msg).unwrap();

    // drive well past MAX_TRANSMIT_WAIT one poll at a time
    let mut out = None;
    for t in (0..120).map(|s| s * 1000) {
      let mut effects = vec![];
      match step.poll_resp(&snapshot_at(t, None), &mut effects, token, addr) {
        | Some(Err(nb::Error::Other(e))) => {
          out = Some(e);
          break;
        },
        | _ => continue,
      }
    }

    assert!(matches!(out, Some(Error::Timeout)));
  }

  #[test]
  fn ack_stops_retransmission() {
    let mut step = Chain::default();
    let msg = con_get(5, 2);
    let token = msg.data().token;
    let addr = msg.addr();

    step.on_message_sent(&snapshot_at(0, None), &msg).unwrap();

    let ack = Message::new(Type::Ack, Code::EMPTY, Id(5), Token(Default::default()));
    let mut effects = vec![];
    let polled = step.poll_resp(&snapshot_at(100,
                                             Some(Addrd(ack.try_into_bytes().unwrap(), addr))),
                                &mut effects,
                                token,
                                addr);
    // the empty ACK itself is consumed
    assert!(polled.is_none());

    // long after every retransmission would have fired: silence
    let mut effects = vec![];
    step.poll_resp(&snapshot_at(60_000, None), &mut effects, token, addr);
    assert!(effects.iter().all(|e| !matches!(e, Effect::Resend(_))));
  }

  #[test]
  fn reset_fails_the_exchange() {
    let mut step = Chain::default();
    let msg = con_get(5, 2);
    let token = msg.data().token;
    let addr = msg.addr();

    step.on_message_sent(&snapshot_at(0, None), &msg).unwrap();

    let rst = Message::new(Type::Reset, Code::EMPTY, Id(5), Token(Default::default()));
    let mut effects = vec![];
    let polled = step.poll_resp(&snapshot_at(100,
                                             Some(Addrd(rst.try_into_bytes().unwrap(), addr))),
                                &mut effects,
                                token,
                                addr);

    assert!(matches!(polled, Some(Err(nb::Error::Other(Error::ConReset)))));
  }

  #[test]
  fn piggybacked_response_settles_the_exchange() {
    let mut step = Chain::default();
    let msg = con_get(6, 3);
    let token = msg.data().token;
    let addr = msg.addr();

    step.on_message_sent(&snapshot_at(0, None), &msg).unwrap();

    let mut resp = Message::new(Type::Ack, Code::CONTENT, Id(6), token);
    resp.payload = newt_msg::Payload(b"hi".to_vec());

    let mut effects = vec![];
    let polled = step.poll_resp(&snapshot_at(100,
                                             Some(Addrd(resp.try_into_bytes().unwrap(), addr))),
                                &mut effects,
                                token,
                                addr);
    assert!(matches!(polled, Some(Ok(_))));
    assert_eq!(step.in_flight(&addr), 0);
  }
}
