use std::collections::HashMap;
use std::net::SocketAddr;

use embedded_time::Instant;
use newt_msg::{Id, Token};
use rand::{Rng, SeedableRng};

use super::{Step, StepOutput};
use crate::net::Addrd;
use crate::platform::{Effect, Message, PlatformTypes, Snapshot};
use crate::req::Req;
use crate::resp::Resp;
use crate::time::millis_since;

/// Stamps outbound messages carrying the unassigned sentinel `Id(0)`
/// with the next value of a per-remote 16-bit counter, wrapping at
/// the boundary.
///
/// Counters start at a random offset (seeded from the clock the
/// first time an id is needed) so that a rebooted endpoint does not
/// land on ids its peer still remembers from the previous life.
#[derive(Debug)]
pub struct ProvisionIds<P, Inner> {
  next: HashMap<SocketAddr, u16>,
  rand: Option<rand_chacha::ChaCha8Rng>,
  inner: Inner,
  __p: core::marker::PhantomData<P>,
}

impl<P, Inner: Default> Default for ProvisionIds<P, Inner> {
  fn default() -> Self {
    Self { next: HashMap::new(),
           rand: None,
           inner: Inner::default(),
           __p: core::marker::PhantomData }
  }
}

impl<P: PlatformTypes, Inner: super::oscore::Security> super::oscore::Security
  for ProvisionIds<P, Inner>
{
  fn security_mut(&mut self) -> &mut crate::oscore::SecurityStore {
    self.inner.security_mut()
  }
}

impl<P: PlatformTypes, Inner> Step<P> for ProvisionIds<P, Inner>
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
    self.inner.poll_resp(snap, effects, token, addr)
  }

  fn before_message_sent(&mut self,
                         snap: &Snapshot<P>,
                         effects: &mut Vec<Effect>,
                         msg: &mut Addrd<Message>)
                         -> Result<(), Self::Error> {
    if msg.data().id == Id(0) {
      let seed = millis_since::<P::Clock>(snap.time, Instant::new(0));
      let rand = self.rand
                     .get_or_insert_with(|| rand_chacha::ChaCha8Rng::seed_from_u64(seed));

      let next = self.next
                     .entry(msg.addr())
                     .or_insert_with(|| rand.gen::<u16>().max(1));

      msg.data_mut().id = Id(*next);
      *next = next.wrapping_add(1);
      // 0 stays the sentinel
      if *next == 0 {
        *next = 1;
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
  use newt_msg::{Code, Type};

  use super::*;
  use crate::step::parse::Parse;
  use crate::test::{self, ClockMock};

  #[test]
  fn assigns_distinct_wrapping_ids_per_remote() {
    let mut step = ProvisionIds::<test::Platform, Parse<test::Platform>>::default();
    let snap = Snapshot { time: ClockMock::instant(1234),
                          recvd_dgram: None,
                          config: Default::default() };

    let mut ids = vec![];
    for _ in 0..3 {
      let mut msg = Addrd(Message::new(Type::Con,
                                       Code::GET,
                                       Id(0),
                                       Token(Default::default())),
                          test::dummy_addr());
      step.before_message_sent(&snap, &mut vec![], &mut msg).unwrap();
      ids.push(msg.data().id.0);
    }

    assert_ne!(ids[0], 0);
    assert_ne!(ids[1], ids[0]);
    assert_ne!(ids[2], ids[1]);
    assert_ne!(ids[2], ids[0]);

    // a different remote gets its own sequence start
    let mut other = Addrd(Message::new(Type::Con,
                                       Code::GET,
                                       Id(0),
                                       Token(Default::default())),
                          test::dummy_addr_2());
    step.before_message_sent(&snap, &mut vec![], &mut other).unwrap();
    assert_ne!(other.data().id.0, ids[2].wrapping_add(1));
  }

  #[test]
  fn leaves_assigned_ids_alone() {
    let mut step = ProvisionIds::<test::Platform, Parse<test::Platform>>::default();
    let snap = Snapshot { time: ClockMock::instant(0),
                          recvd_dgram: None,
                          config: Default::default() };

    let mut msg = Addrd(Message::new(Type::Ack,
                                     Code::CONTENT,
                                     Id(77),
                                     Token(Default::default())),
                        test::dummy_addr());
    step.before_message_sent(&snap, &mut vec![], &mut msg).unwrap();
    assert_eq!(msg.data().id, Id(77));
  }
}
