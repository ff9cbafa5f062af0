use std::collections::HashMap;
use std::net::SocketAddr;

use embedded_time::Instant;
use newt_msg::{CodeKind, Token, Type};

use super::{Step, StepOutput};
use crate::exec_inner_step;
use crate::net::Addrd;
use crate::platform::{Effect, Message, PlatformTypes, Snapshot};
use crate::req::Req;
use crate::resp::Resp;
use crate::time::millis_since;

/// Stamps outbound requests that carry an empty token with an opaque
/// one.
///
/// Tokens are hashes of (seed, counter, remote), truncated to the
/// shortest length (at least 1 byte) that no outstanding request to
/// the same remote is using, so correlation stays unambiguous while
/// tokens stay small and unguessable.
pub struct ProvisionTokens<P: PlatformTypes, Inner> {
  counter: u64,
  outstanding: HashMap<SocketAddr, Vec<(Token, Instant<P::Clock>)>>,
  inner: Inner,
}

impl<P: PlatformTypes, Inner: core::fmt::Debug> core::fmt::Debug for ProvisionTokens<P, Inner> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("ProvisionTokens")
     .field("counter", &self.counter)
     .field("inner", &self.inner)
     .finish()
  }
}

impl<P: PlatformTypes, Inner: Default> Default for ProvisionTokens<P, Inner> {
  fn default() -> Self {
    Self { counter: 0,
           outstanding: HashMap::new(),
           inner: Inner::default() }
  }
}

impl<P: PlatformTypes, Inner: super::oscore::Security> super::oscore::Security
  for ProvisionTokens<P, Inner>
{
  fn security_mut(&mut self) -> &mut crate::oscore::SecurityStore {
    self.inner.security_mut()
  }
}

impl<P: PlatformTypes, Inner> ProvisionTokens<P, Inner> {
  fn generate(&mut self, addr: SocketAddr, seed: u16, now: Instant<P::Clock>) -> Token {
    let outstanding = self.outstanding.entry(addr).or_default();

    loop {
      self.counter += 1;

      let mut material = Vec::with_capacity(32);
      material.extend(seed.to_be_bytes());
      material.extend(self.counter.to_be_bytes());
      material.extend(addr.to_string().as_bytes());
      let full = Token::opaque(&material);

      let found = (1..=8).map(|len| full.truncate(len))
                         .find(|t| outstanding.iter().all(|(o, _)| o != t));

      if let Some(token) = found {
        outstanding.push((token, now));
        return token;
      }
    }
  }

  fn forget(&mut self, addr: SocketAddr, token: Token) {
    if let Some(outstanding) = self.outstanding.get_mut(&addr) {
      outstanding.retain(|(t, _)| *t != token);
    }
  }

  fn prune(&mut self, snap: &Snapshot<P>) {
    let lifetime = snap.config.exchange_lifetime_millis();
    let now = snap.time;
    self.outstanding.values_mut().for_each(|v| {
                                   v.retain(|(_, at)| {
                                      millis_since::<P::Clock>(now, *at) < lifetime
                                    })
                                 });
  }
}

impl<P: PlatformTypes, Inner> Step<P> for ProvisionTokens<P, Inner>
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
    self.prune(snap);

    let resp = exec_inner_step!(self.inner.poll_resp(snap, effects, token, addr),
                                core::convert::identity)?;

    // a response (final or error) releases the token, unless it is a
    // notification stream that will keep using it
    if resp.data().msg().code.kind() == CodeKind::Response
       && resp.data().msg().observe().is_none()
    {
      self.forget(resp.addr(), resp.data().msg().token);
    }

    Some(Ok(resp))
  }

  fn before_message_sent(&mut self,
                         snap: &Snapshot<P>,
                         effects: &mut Vec<Effect>,
                         msg: &mut Addrd<Message>)
                         -> Result<(), Self::Error> {
    let needs_token = msg.data().code.kind() == CodeKind::Request
                      && msg.data().token.0.is_empty()
                      && matches!(msg.data().ty, Type::Con | Type::Non);

    if needs_token {
      let token = self.generate(msg.addr(), snap.config.msg.token_seed, snap.time);
      msg.data_mut().token = token;
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
  use newt_msg::{Code, Id};

  use super::*;
  use crate::step::parse::Parse;
  use crate::test::{self, ClockMock};

  type Chain = ProvisionTokens<test::Platform, Parse<test::Platform>>;

  fn snap() -> Snapshot<test::Platform> {
    Snapshot { time: ClockMock::instant(0),
               recvd_dgram: None,
               config: Default::default() }
  }

  fn request() -> Addrd<Message> {
    Addrd(Message::new(Type::Con, Code::GET, Id(0), Token(Default::default())),
          test::dummy_addr())
  }

  #[test]
  fn no_two_outstanding_requests_share_a_token() {
    let mut step = Chain::default();

    let mut seen = std::collections::HashSet::new();
    for _ in 0..100 {
      let mut msg = request();
      step.before_message_sent(&snap(), &mut vec![], &mut msg).unwrap();
      let token = msg.data().token;
      assert!(!token.0.is_empty());
      assert!(seen.insert(token), "duplicate token {:?}", token);
    }
  }

  #[test]
  fn tokens_start_at_the_shortest_length() {
    let mut step = Chain::default();

    let mut msg = request();
    step.before_message_sent(&snap(), &mut vec![], &mut msg).unwrap();
    assert_eq!(msg.data().token.0.len(), 1);
  }

  #[test]
  fn responses_are_never_stamped() {
    let mut step = Chain::default();

    let mut msg = Addrd(Message::new(Type::Ack,
                                     Code::CONTENT,
                                     Id(1),
                                     Token(Default::default())),
                        test::dummy_addr());
    step.before_message_sent(&snap(), &mut vec![], &mut msg).unwrap();
    assert!(msg.data().token.0.is_empty());
  }
}
