use core::convert::Infallible;
use core::marker::PhantomData;
use std::collections::VecDeque;
use std::net::SocketAddr;

use newt_msg::{CodeKind, Token, TryFromBytes, Type};

use super::{Step, StepOutput};
use crate::log_effect;
use crate::net::Addrd;
use crate::platform::{Effect, Message, PlatformTypes, Snapshot};
use crate::req::Req;
use crate::resp::Resp;

/// The bottom of the step pipe: parse the datagram in the snapshot
/// (if any) and classify it as request or response.
///
/// A datagram may arrive while we are polling for the other kind of
/// message, so both kinds are queued here and handed out by whichever
/// poll comes asking; symmetric endpoints lose nothing by serving
/// both roles off one socket.
///
/// Malformed datagrams are logged and dropped; a peer that sends us
/// garbage does not get to fail an unrelated exchange.
#[derive(Debug)]
pub struct Parse<P> {
  reqs: VecDeque<Addrd<Req>>,
  resps: VecDeque<Addrd<Resp>>,
  __p: PhantomData<P>,
}

impl<P> Default for Parse<P> {
  fn default() -> Self {
    Self { reqs: VecDeque::new(),
           resps: VecDeque::new(),
           __p: PhantomData }
  }
}

impl<P: PlatformTypes> Parse<P> {
  fn ingest(&mut self, snap: &Snapshot<P>, effects: &mut Vec<Effect>) {
    let Some(Addrd(dgram, addr)) = &snap.recvd_dgram else {
      return;
    };

    match Message::try_from_bytes(dgram) {
      | Err(e) => {
        log_effect!(effects,
                    log::Level::Warn,
                    "dropping malformed datagram from {}: {:?}",
                    addr,
                    e);
      },
      | Ok(msg) => match (msg.ty, msg.code.kind()) {
        // a ping is an empty CON; it flows to the request side so
        // the reset step can answer it
        | (Type::Con, CodeKind::Empty) | (_, CodeKind::Request) => {
          self.reqs.push_back(Addrd(Req::from(msg), *addr))
        },
        | _ => self.resps.push_back(Addrd(Resp::from(msg), *addr)),
      },
    }
  }
}

impl<P: PlatformTypes> Step<P> for Parse<P> {
  type PollReq = Addrd<Req>;
  type PollResp = Addrd<Resp>;
  type Error = Infallible;

  fn poll_req(&mut self,
              snap: &Snapshot<P>,
              effects: &mut Vec<Effect>)
              -> StepOutput<Self::PollReq, Self::Error> {
    self.ingest(snap, effects);
    self.reqs.pop_front().map(Ok)
  }

  fn poll_resp(&mut self,
               snap: &Snapshot<P>,
               effects: &mut Vec<Effect>,
               _: Token,
               _: SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error> {
    self.ingest(snap, effects);
    self.resps.pop_front().map(Ok)
  }
}

#[cfg(test)]
mod tests {
  use newt_msg::{Code, Id, TryIntoBytes};

  use super::*;
  use crate::test::{self, ClockMock};

  fn snapshot(dgram: Option<Addrd<Vec<u8>>>) -> Snapshot<test::Platform> {
    use embedded_time::Clock;

    Snapshot { time: ClockMock::new().try_now().unwrap(),
               recvd_dgram: dgram,
               config: Default::default() }
  }

  #[test]
  fn classifies_request_and_response() {
    let addr = test::dummy_addr();
    let mut step = Parse::<test::Platform>::default();
    let mut effects = vec![];

    let req = Message::new(Type::Con, Code::GET, Id(1), Token(Default::default()));
    let snap = snapshot(Some(Addrd(req.try_into_bytes().unwrap(), addr)));

    // the request is queued regardless of which poll saw the dgram
    assert!(step.poll_resp(&snap, &mut effects, Token(Default::default()), addr)
                .is_none());
    let polled = step.poll_req(&snapshot(None), &mut effects).unwrap().unwrap();
    assert_eq!(polled.data().msg().code, Code::GET);
  }

  #[test]
  fn drops_malformed_with_a_log() {
    let addr = test::dummy_addr();
    let mut step = Parse::<test::Platform>::default();
    let mut effects = vec![];

    // token length 15 is never valid
    let snap = snapshot(Some(Addrd(vec![0b0100_1111, 0x01, 0x00, 0x01], addr)));
    assert!(step.poll_req(&snap, &mut effects).is_none());
    assert!(matches!(effects[0], Effect::Log(log::Level::Warn, _)));
  }

  #[test]
  fn ping_goes_to_the_request_side() {
    let addr = test::dummy_addr();
    let mut step = Parse::<test::Platform>::default();
    let mut effects = vec![];

    let ping = Message::new(Type::Con, Code::EMPTY, Id(9), Token(Default::default()));
    let snap = snapshot(Some(Addrd(ping.try_into_bytes().unwrap(), addr)));

    let polled = step.poll_req(&snap, &mut effects).unwrap().unwrap();
    assert_eq!(polled.data().msg().code.kind(), CodeKind::Empty);
  }
}
