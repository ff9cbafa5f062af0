use std::collections::HashMap;
use std::net::SocketAddr;

use embedded_time::Instant;
use newt_msg::{Id, Token, Type};

use super::{Step, StepOutput};
use crate::exec_inner_step;
use crate::log_effect;
use crate::net::Addrd;
use crate::platform::{Effect, Message, PlatformTypes, Snapshot};
use crate::req::Req;
use crate::resp::Resp;
use crate::time::millis_since;

struct Seen<P: PlatformTypes> {
  at: Instant<P::Clock>,
  reply: Option<Addrd<Message>>,
}

impl<P: PlatformTypes> core::fmt::Debug for Seen<P> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Seen").field("reply", &self.reply).finish()
  }
}

/// At-most-once delivery per (remote, message ID): remembers every
/// CON and NON seen for EXCHANGE_LIFETIME and suppresses duplicates.
///
/// When we already replied to the original (an ACK or RST cached via
/// `before_message_sent`), a duplicate causes the cached reply to be
/// re-emitted verbatim; when the original is still being processed
/// the duplicate is dropped silently.
#[derive(Debug)]
pub struct Dedup<P: PlatformTypes, Inner> {
  seen: HashMap<(SocketAddr, Id), Seen<P>>,
  inner: Inner,
}

impl<P: PlatformTypes, Inner: Default> Default for Dedup<P, Inner> {
  fn default() -> Self {
    Self { seen: HashMap::new(),
           inner: Inner::default() }
  }
}

impl<P: PlatformTypes, Inner> Dedup<P, Inner> {
  fn prune(&mut self, snap: &Snapshot<P>) {
    let lifetime = snap.config.exchange_lifetime_millis();
    let now = snap.time;
    self.seen
        .retain(|_, entry| millis_since::<P::Clock>(now, entry.at) < lifetime);
  }

  /// `Some(msg)` when the message should keep flowing up the chain,
  /// `None` when it was a suppressed duplicate.
  fn filter(&mut self,
            msg: Addrd<Message>,
            snap: &Snapshot<P>,
            effects: &mut Vec<Effect>)
            -> Option<Addrd<Message>> {
    if !matches!(msg.data().ty, Type::Con | Type::Non) {
      return Some(msg);
    }

    let key = (msg.addr(), msg.data().id);
    match self.seen.get(&key) {
      | Some(Seen { reply: Some(reply), .. }) => {
        log_effect!(effects,
                    log::Level::Debug,
                    "duplicate {:?} from {}: replaying cached reply",
                    msg.data().id,
                    msg.addr());
        effects.push(Effect::Resend(reply.clone()));
        None
      },
      | Some(Seen { reply: None, .. }) => {
        log_effect!(effects,
                    log::Level::Debug,
                    "duplicate {:?} from {}: still processing, dropped",
                    msg.data().id,
                    msg.addr());
        None
      },
      | None => {
        self.seen.insert(key,
                         Seen { at: snap.time,
                                reply: None });
        Some(msg)
      },
    }
  }
}

impl<P: PlatformTypes, Inner> Step<P> for Dedup<P, Inner>
  where Inner: Step<P, PollReq = Addrd<Req>, PollResp = Addrd<Resp>>
{
  type PollReq = Addrd<Req>;
  type PollResp = Addrd<Resp>;
  type Error = Inner::Error;

  fn poll_req(&mut self,
              snap: &Snapshot<P>,
              effects: &mut Vec<Effect>)
              -> StepOutput<Self::PollReq, Self::Error> {
    self.prune(snap);

    let req = exec_inner_step!(self.inner.poll_req(snap, effects), core::convert::identity)?;
    self.filter(req.map(Message::from), snap, effects)
        .map(|m| Ok(m.map(Req::from)))
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
    self.filter(resp.map(Message::from), snap, effects)
        .map(|m| Ok(m.map(Resp::from)))
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
    // cache our ACKs & RSTs (including piggybacked responses) so a
    // retransmitted peer message gets the same reply back
    if matches!(msg.data().ty, Type::Ack | Type::Reset) {
      if let Some(entry) = self.seen.get_mut(&(msg.addr(), msg.data().id)) {
        entry.reply = Some(msg.clone());
      }
    }

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
  use newt_msg::Code;

  use super::*;
  use crate::step::parse::Parse;
  use crate::test::{self, msg, ClockMock};

  type Chain = Dedup<test::Platform, Parse<test::Platform>>;

  fn snapshot_at(millis: u64,
                 dgram: Option<Addrd<Vec<u8>>>)
                 -> Snapshot<test::Platform> {
    Snapshot { time: ClockMock::instant(millis),
               recvd_dgram: dgram,
               config: Default::default() }
  }

  fn dgram(msg: &Addrd<Message>) -> Addrd<Vec<u8>> {
    use newt_msg::TryIntoBytes;
    msg.clone().map(|m| m.try_into_bytes().unwrap())
  }

  #[test]
  fn duplicate_con_without_reply_is_dropped() {
    let mut step = Chain::default();
    let mut effects = vec![];

    let mut con = msg!(CON GET x.x.x.x:1111);
    con.data_mut().id = Id(77);

    assert!(step.poll_req(&snapshot_at(0, Some(dgram(&con))), &mut effects)
                .is_some());
    effects.clear();

    assert!(step.poll_req(&snapshot_at(10, Some(dgram(&con))), &mut effects)
                .is_none());
    assert!(effects.iter().all(|e| !matches!(e, Effect::Resend(_))));
  }

  #[test]
  fn duplicate_con_with_cached_reply_replays_it() {
    let mut step = Chain::default();
    let mut effects = vec![];

    let mut con = msg!(CON GET x.x.x.x:1111);
    con.data_mut().id = Id(77);

    assert!(step.poll_req(&snapshot_at(0, Some(dgram(&con))), &mut effects)
                .is_some());

    // we ACK it
    let ack = con.as_ref().map(|m| m.ack());
    step.on_message_sent(&snapshot_at(1, None), &ack).unwrap();

    effects.clear();
    assert!(step.poll_req(&snapshot_at(10, Some(dgram(&con))), &mut effects)
                .is_none());
    assert!(effects.iter().any(|e| matches!(e, Effect::Resend(m) if m.data().ty == Type::Ack)));
  }

  #[test]
  fn memory_expires_after_exchange_lifetime() {
    let mut step = Chain::default();
    let mut effects = vec![];

    let mut con = msg!(CON GET x.x.x.x:1111);
    con.data_mut().id = Id(77);
    con.data_mut().code = Code::GET;

    assert!(step.poll_req(&snapshot_at(0, Some(dgram(&con))), &mut effects)
                .is_some());

    // 248s later the id is fair game again
    assert!(step.poll_req(&snapshot_at(248_000, Some(dgram(&con))), &mut effects)
                .is_some());
  }
}
