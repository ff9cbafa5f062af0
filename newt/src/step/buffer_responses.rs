use std::collections::HashMap;
use std::net::SocketAddr;

use newt_msg::{CodeKind, Token};

use super::{Step, StepOutput};
use crate::exec_inner_step;
use crate::net::Addrd;
use crate::platform::{Effect, Message, PlatformTypes, Snapshot};
use crate::req::Req;
use crate::resp::Resp;

/// How many out-of-order responses we are willing to hold
const CAPACITY: usize = 16;

/// Handles responses received while polling for a different token:
/// the mismatched response is parked, `WouldBlock` is yielded, and
/// the parked response comes back out when someone polls for *its*
/// token.
///
/// Empty ACKs and RSTs are not responses and pass through untouched
/// (the retry layer above consumes them).
#[derive(Debug)]
pub struct BufferResponses<P, Inner> {
  buffer: HashMap<(SocketAddr, Token), Addrd<Resp>>,
  inner: Inner,
  __p: core::marker::PhantomData<P>,
}

impl<P, Inner: Default> Default for BufferResponses<P, Inner> {
  fn default() -> Self {
    Self { buffer: HashMap::new(),
           inner: Inner::default(),
           __p: core::marker::PhantomData }
  }
}

impl<P: PlatformTypes, Inner: super::oscore::Security> super::oscore::Security
  for BufferResponses<P, Inner>
{
  fn security_mut(&mut self) -> &mut crate::oscore::SecurityStore {
    self.inner.security_mut()
  }
}

impl<P: PlatformTypes, Inner> Step<P> for BufferResponses<P, Inner>
  where Inner: Step<P, PollReq = Addrd<Req>, PollResp = Addrd<Resp>>
{
  type PollReq = Addrd<Req>;
  type PollResp = Addrd<Resp>;
  type Error = Inner::Error;

  fn poll_req(&mut self,
              snap: &Snapshot<P>,
              effects: &mut Vec<Effect>)
              -> StepOutput<Self::PollReq, Self::Error> {
    self.inner.poll_req(snap, effects)
  }

  fn poll_resp(&mut self,
               snap: &Snapshot<P>,
               effects: &mut Vec<Effect>,
               token: Token,
               addr: SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error> {
    let resp = exec_inner_step!(run_anyway_when_would_block = false,
                                self.inner.poll_resp(snap, effects, token, addr),
                                core::convert::identity);

    match resp {
      | Some(resp) => {
        if resp.addr() == addr && resp.data().msg().token == token {
          return Some(Ok(resp));
        }

        if resp.data().msg().code.kind() != CodeKind::Response {
          // not ours and not a response: let it flow for whoever
          // correlates by id
          return Some(Ok(resp));
        }

        if self.buffer.len() >= CAPACITY {
          let oldest = self.buffer.keys().next().copied();
          if let Some(key) = oldest {
            self.buffer.remove(&key);
          }
        }

        self.buffer
            .insert((resp.addr(), resp.data().msg().token), resp);

        match self.buffer.remove(&(addr, token)) {
          | Some(ours) => Some(Ok(ours)),
          | None => Some(Err(nb::Error::WouldBlock)),
        }
      },
      | None => self.buffer.remove(&(addr, token)).map(Ok),
    }
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
  use newt_msg::{Code, Id, TryIntoBytes, Type};

  use super::*;
  use crate::step::block::Block;
  use crate::step::dedup::Dedup;
  use crate::step::observe::Observe;
  use crate::step::oscore::Oscore;
  use crate::step::parse::Parse;
  use crate::step::reset::Reset;
  use crate::test::{self, ClockMock};

  type Chain =
    BufferResponses<test::Platform,
                    Observe<test::Platform,
                            Block<test::Platform,
                                  Oscore<test::Platform,
                                         Reset<test::Platform,
                                               Dedup<test::Platform,
                                                     Parse<test::Platform>>>>>>>;

  fn snapshot_with(dgram: Option<Addrd<Vec<u8>>>) -> Snapshot<test::Platform> {
    Snapshot { time: ClockMock::instant(0),
               recvd_dgram: dgram,
               config: Default::default() }
  }

  #[test]
  fn mismatched_response_is_parked_until_polled_for() {
    let addr = test::dummy_addr();
    let ours = Token(tinyvec::array_vec!([u8; 8] => 1));
    let theirs = Token(tinyvec::array_vec!([u8; 8] => 2));
    let mut step = Chain::default();
    let mut effects = vec![];

    let resp = Message::new(Type::Non, Code::CONTENT, Id(5), theirs);
    let snap = snapshot_with(Some(Addrd(resp.try_into_bytes().unwrap(), addr)));

    // polling for `ours` parks `theirs`
    assert!(matches!(step.poll_resp(&snap, &mut effects, ours, addr),
                     Some(Err(nb::Error::WouldBlock))));

    // polling for `theirs` finds it
    let polled = step.poll_resp(&snapshot_with(None), &mut effects, theirs, addr)
                     .unwrap()
                     .unwrap();
    assert_eq!(polled.data().msg().token, theirs);
  }
}
