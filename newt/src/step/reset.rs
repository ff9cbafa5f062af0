use std::net::SocketAddr;

use newt_msg::{CodeKind, Token, Type};

use super::{Step, StepOutput};
use crate::exec_inner_step;
use crate::log_effect;
use crate::net::Addrd;
use crate::platform::{Effect, Message, PlatformTypes, Snapshot};
use crate::req::Req;
use crate::resp::Resp;

/// Answers CoAP pings (empty CON elicits RST, RFC7252 §4.3) and lets
/// inbound RSTs flow up the chain so the exchanges and observations
/// they refer to get torn down by the layers that own them.
#[derive(Debug)]
pub struct Reset<P, Inner> {
  inner: Inner,
  __p: core::marker::PhantomData<P>,
}

impl<P, Inner: Default> Default for Reset<P, Inner> {
  fn default() -> Self {
    Self { inner: Inner::default(),
           __p: core::marker::PhantomData }
  }
}

impl<P: PlatformTypes, Inner> Step<P> for Reset<P, Inner>
  where Inner: Step<P, PollReq = Addrd<Req>, PollResp = Addrd<Resp>>
{
  type PollReq = Addrd<Req>;
  type PollResp = Addrd<Resp>;
  type Error = Inner::Error;

  fn poll_req(&mut self,
              snap: &Snapshot<P>,
              effects: &mut Vec<Effect>)
              -> StepOutput<Self::PollReq, Self::Error> {
    let req = exec_inner_step!(self.inner.poll_req(snap, effects), core::convert::identity)?;

    if req.data().msg().ty == Type::Con && req.data().msg().code.kind() == CodeKind::Empty {
      log_effect!(effects,
                  log::Level::Debug,
                  "ping from {}, answering with reset",
                  req.addr());
      effects.push(Effect::Send(req.as_ref().map(|r| r.msg().reset())));
      return None;
    }

    Some(Ok(req))
  }

  fn poll_resp(&mut self,
               snap: &Snapshot<P>,
               effects: &mut Vec<Effect>,
               token: Token,
               addr: SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error> {
    self.inner.poll_resp(snap, effects, token, addr)
  }

  fn before_message_sent(&mut self,
                         snap: &Snapshot<P>,
                         effects: &mut Vec<Effect>,
                         msg: &mut Addrd<Message>)
                         -> Result<(), Self::Error> {
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
  use newt_msg::{Code, Id, TryIntoBytes};

  use super::*;
  use crate::step::dedup::Dedup;
  use crate::step::parse::Parse;
  use crate::test::{self, ClockMock};

  type Chain = Reset<test::Platform, Dedup<test::Platform, Parse<test::Platform>>>;

  #[test]
  fn ping_elicits_reset() {
    let addr = test::dummy_addr();
    let mut step = Chain::default();
    let mut effects = vec![];

    let ping = Message::new(Type::Con, Code::EMPTY, Id(3), Token(Default::default()));
    let snap = Snapshot::<test::Platform> { time: ClockMock::instant(0),
                                            recvd_dgram:
                                              Some(Addrd(ping.try_into_bytes().unwrap(), addr)),
                                            config: Default::default() };

    assert!(step.poll_req(&snap, &mut effects).is_none());

    let rst = effects.iter().find_map(|e| e.get_send()).unwrap();
    assert_eq!(rst.data().ty, Type::Reset);
    assert_eq!(rst.data().id, Id(3));
    assert_eq!(rst.addr(), addr);
  }
}
