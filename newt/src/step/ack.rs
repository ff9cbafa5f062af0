use std::collections::HashMap;
use std::net::SocketAddr;

use embedded_time::Instant;
use newt_msg::{CodeKind, Id, Token, Type};

use super::{Step, StepOutput};
use crate::exec_inner_step;
use crate::log_effect;
use crate::net::Addrd;
use crate::platform::{Effect, Message, PlatformTypes, Snapshot};
use crate::req::Req;
use crate::resp::Resp;
use crate::time::millis_since;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
  ConUnacked,
  ConAcked,
  Non,
}

struct Pending<P: PlatformTypes> {
  at: Instant<P::Clock>,
  kind: Kind,
}

/// Decides how responses ride on the message layer.
///
/// Inbound CON requests are remembered; when the application answers
/// within half of ACK_TIMEOUT the response goes out piggybacked on
/// the ACK, otherwise an empty ACK is emitted and the eventual
/// response is promoted to its own confirmable exchange (the
/// separate response pattern). Responses to NON requests go out NON.
///
/// Inbound CON *responses* (the other half of the separate pattern)
/// are ACKed immediately.
pub struct Ack<P: PlatformTypes, Inner> {
  pending: HashMap<(SocketAddr, Id), Pending<P>>,
  inner: Inner,
}

impl<P: PlatformTypes, Inner: core::fmt::Debug> core::fmt::Debug for Ack<P, Inner> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Ack")
     .field("pending", &self.pending.len())
     .field("inner", &self.inner)
     .finish()
  }
}

impl<P: PlatformTypes, Inner: Default> Default for Ack<P, Inner> {
  fn default() -> Self {
    Self { pending: HashMap::new(),
           inner: Inner::default() }
  }
}

impl<P: PlatformTypes, Inner: super::oscore::Security> super::oscore::Security for Ack<P, Inner> {
  fn security_mut(&mut self) -> &mut crate::oscore::SecurityStore {
    self.inner.security_mut()
  }
}

impl<P: PlatformTypes, Inner> Ack<P, Inner> {
  /// Emit early empty ACKs for requests the application is sitting on
  fn sweep(&mut self, snap: &Snapshot<P>, effects: &mut Vec<Effect>) {
    let window = snap.config.piggyback_window_millis();
    let lifetime = snap.config.exchange_lifetime_millis();
    let now = snap.time;

    for (&(addr, id), pending) in self.pending.iter_mut() {
      if pending.kind == Kind::ConUnacked && millis_since::<P::Clock>(now, pending.at) > window {
        let mut ack = Message::new(Type::Ack, newt_msg::Code::EMPTY, id, Token(Default::default()));
        ack.ver = Default::default();
        effects.push(Effect::Send(Addrd(ack, addr)));
        pending.kind = Kind::ConAcked;
      }
    }

    self.pending
        .retain(|_, p| millis_since::<P::Clock>(now, p.at) < lifetime);
  }
}

impl<P: PlatformTypes, Inner> Step<P> for Ack<P, Inner>
  where Inner: Step<P, PollReq = Addrd<Req>, PollResp = Addrd<Resp>>
{
  type PollReq = Addrd<Req>;
  type PollResp = Addrd<Resp>;
  type Error = Inner::Error;

  fn poll_req(&mut self,
              snap: &Snapshot<P>,
              effects: &mut Vec<Effect>)
              -> StepOutput<Self::PollReq, Self::Error> {
    self.sweep(snap, effects);

    let req = exec_inner_step!(self.inner.poll_req(snap, effects), core::convert::identity)?;

    let kind = match req.data().msg().ty {
      | Type::Con => Kind::ConUnacked,
      | _ => Kind::Non,
    };
    self.pending.insert((req.addr(), req.data().msg().id),
                        Pending { at: snap.time,
                                  kind });

    Some(Ok(req))
  }

  fn poll_resp(&mut self,
               snap: &Snapshot<P>,
               effects: &mut Vec<Effect>,
               token: Token,
               addr: SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error> {
    self.sweep(snap, effects);

    let resp = exec_inner_step!(self.inner.poll_resp(snap, effects, token, addr),
                                core::convert::identity)?;

    // a separate response arrives as a fresh CON; it wants an ACK now
    if resp.data().msg().ty == Type::Con
       && resp.data().msg().code.kind() == CodeKind::Response
    {
      log_effect!(effects,
                  log::Level::Debug,
                  "separate response {:?} from {}, acking",
                  resp.data().msg().id,
                  resp.addr());
      effects.push(Effect::Send(resp.as_ref().map(|r| r.msg().ack())));
    }

    Some(Ok(resp))
  }

  fn before_message_sent(&mut self,
                         snap: &Snapshot<P>,
                         effects: &mut Vec<Effect>,
                         msg: &mut Addrd<Message>)
                         -> Result<(), Self::Error> {
    if msg.data().code.kind() == CodeKind::Response && msg.data().ty == Type::Ack {
      match self.pending.remove(&(msg.addr(), msg.data().id)) {
        | Some(Pending { kind: Kind::ConUnacked, .. }) => {
          // quick enough: ride the ACK
        },
        | Some(Pending { kind: Kind::ConAcked, .. }) => {
          // the empty ACK went out already: separate response
          msg.data_mut().ty = Type::Con;
          msg.data_mut().id = Id(0);
        },
        | Some(Pending { kind: Kind::Non, .. }) => {
          msg.data_mut().ty = Type::Non;
          msg.data_mut().id = Id(0);
        },
        // replays & notifications are not ours to rewrite
        | None => (),
      }
    }

    self.inner.before_message_sent(snap, effects, msg)
  }

  fn on_message_sent(&mut self,
                     snap: &Snapshot<P>,
                     msg: &Addrd<Message>)
                     -> Result<(), Self::Error> {
    self.inner.on_message_sent(snap, msg)
  }

  fn notify(&mut self, path: &str, effects: &mut Vec<Effect>) -> Result<(), Self::Error> {
    self.inner.notify(path, effects)
  }

  fn resource_removed(&mut self,
                      path: &str,
                      effects: &mut Vec<Effect>)
                      -> Result<(), Self::Error> {
    self.inner.resource_removed(path, effects)
  }
}

#[cfg(test)]
mod tests {
  use newt_msg::{Code, TryIntoBytes};

  use super::*;
  use crate::step::dedup::Dedup;
  use crate::step::parse::Parse;
  use crate::test::{self, ClockMock};

  type Chain = Ack<test::Platform, Dedup<test::Platform, Parse<test::Platform>>>;

  fn snapshot_at(millis: u64, dgram: Option<Addrd<Vec<u8>>>) -> Snapshot<test::Platform> {
    Snapshot { time: ClockMock::instant(millis),
               recvd_dgram: dgram,
               config: Default::default() }
  }

  fn con_get(id: u16, token_byte: u8) -> Message {
    let mut msg = Message::new(Type::Con,
                               Code::GET,
                               Id(id),
                               Token(tinyvec::array_vec!([u8; 8] => token_byte)));
    msg.set_path("hello");
    msg
  }

  #[test]
  fn quick_response_rides_the_ack() {
    let addr = test::dummy_addr();
    let mut step = Chain::default();
    let mut effects = vec![];

    let req = con_get(7, 1);
    step.poll_req(&snapshot_at(0, Some(Addrd(req.try_into_bytes().unwrap(), addr))),
                  &mut effects)
        .unwrap()
        .unwrap();

    let mut resp = Addrd(Message::new(Type::Ack,
                                      Code::CONTENT,
                                      Id(7),
                                      Token(tinyvec::array_vec!([u8; 8] => 1))),
                         addr);
    step.before_message_sent(&snapshot_at(100, None), &mut effects, &mut resp)
        .unwrap();

    assert_eq!(resp.data().ty, Type::Ack);
    assert_eq!(resp.data().id, Id(7));
  }

  #[test]
  fn slow_response_promotes_to_separate_con() {
    let addr = test::dummy_addr();
    let mut step = Chain::default();
    let mut effects = vec![];

    let req = con_get(7, 1);
    step.poll_req(&snapshot_at(0, Some(Addrd(req.try_into_bytes().unwrap(), addr))),
                  &mut effects)
        .unwrap()
        .unwrap();

    // 1.5s later (> ACK_TIMEOUT / 2) the sweep emits an empty ACK
    effects.clear();
    assert!(step.poll_req(&snapshot_at(1500, None), &mut effects).is_none());
    let ack = effects.iter().find_map(|e| e.get_send()).unwrap();
    assert_eq!((ack.data().ty, ack.data().code, ack.data().id),
               (Type::Ack, Code::EMPTY, Id(7)));

    // the eventual response goes out as its own CON
    let mut resp = Addrd(Message::new(Type::Ack,
                                      Code::CONTENT,
                                      Id(7),
                                      Token(tinyvec::array_vec!([u8; 8] => 1))),
                         addr);
    step.before_message_sent(&snapshot_at(2000, None), &mut effects, &mut resp)
        .unwrap();

    assert_eq!(resp.data().ty, Type::Con);
    assert_eq!(resp.data().id, Id(0));
  }

  #[test]
  fn response_to_non_goes_non() {
    let addr = test::dummy_addr();
    let mut step = Chain::default();
    let mut effects = vec![];

    let mut req = con_get(9, 2);
    req.ty = Type::Non;
    step.poll_req(&snapshot_at(0, Some(Addrd(req.try_into_bytes().unwrap(), addr))),
                  &mut effects)
        .unwrap()
        .unwrap();

    let mut resp = Addrd(Message::new(Type::Ack,
                                      Code::CONTENT,
                                      Id(9),
                                      Token(tinyvec::array_vec!([u8; 8] => 2))),
                         addr);
    step.before_message_sent(&snapshot_at(10, None), &mut effects, &mut resp)
        .unwrap();

    assert_eq!(resp.data().ty, Type::Non);
    assert_eq!(resp.data().id, Id(0));
  }

  #[test]
  fn inbound_separate_con_response_is_acked() {
    let addr = test::dummy_addr();
    let mut step = Chain::default();
    let mut effects = vec![];

    let token = Token(tinyvec::array_vec!([u8; 8] => 3));
    let mut resp = Message::new(Type::Con, Code::CONTENT, Id(44), token);
    resp.payload = newt_msg::Payload(b"late".to_vec());

    step.poll_resp(&snapshot_at(0, Some(Addrd(resp.try_into_bytes().unwrap(), addr))),
                   &mut effects,
                   token,
                   addr)
        .unwrap()
        .unwrap();

    let ack = effects.iter().find_map(|e| e.get_send()).unwrap();
    assert_eq!((ack.data().ty, ack.data().id), (Type::Ack, Id(44)));
  }
}
