use std::collections::HashMap;
use std::net::SocketAddr;

use embedded_time::Instant;
use newt_msg::{observe, Code, CodeKind, Id, Token, Type};

use super::{Step, StepOutput};
use crate::exec_inner_step;
use crate::log_effect;
use crate::net::Addrd;
use crate::platform::{Effect, Message, PlatformTypes, Snapshot};
use crate::req::Req;
use crate::resp::Resp;
use crate::time::millis_since;

struct Sub<P: PlatformTypes> {
  req: Addrd<Message>,
  path: String,
  counter: u32,
  dirty: bool,
  notifications: u32,
  last_id: Option<Id>,
  awaiting_ack: Option<(Id, Instant<P::Clock>)>,
}

impl<P: PlatformTypes> Sub<P> {
  fn matches(&self, addr: SocketAddr, token: Token) -> bool {
    self.req.addr() == addr && self.req.data().token == token
  }
}

/// Observation (RFC7641).
///
/// Server side: Observe=0 GETs register the sender; when the
/// application announces a new representation
/// ([`notify`](crate::platform::Platform::notify)), the stored
/// request is re-dispatched to the application and its response goes
/// out as a notification with the next Observe sequence number.
/// Every 8th notification goes confirmable, and a subscriber that
/// neither ACKs that nor answers at all within MAX_TRANSMIT_SPAN is
/// dropped, as is one that RSTs a notification.
///
/// Client side: notifications whose Observe value is not fresher
/// (RFC7641 §3.4) than the last accepted one are dropped.
pub struct Observe<P: PlatformTypes, Inner> {
  subs: Vec<Sub<P>>,
  last_seen: HashMap<(SocketAddr, Token), (u32, Instant<P::Clock>)>,
  inner: Inner,
}

impl<P: PlatformTypes, Inner: core::fmt::Debug> core::fmt::Debug for Observe<P, Inner> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Observe")
     .field("subs", &self.subs.len())
     .field("inner", &self.inner)
     .finish()
  }
}

impl<P: PlatformTypes, Inner: Default> Default for Observe<P, Inner> {
  fn default() -> Self {
    Self { subs: Vec::new(),
           last_seen: HashMap::new(),
           inner: Inner::default() }
  }
}

impl<P: PlatformTypes, Inner: super::oscore::Security> super::oscore::Security
  for Observe<P, Inner>
{
  fn security_mut(&mut self) -> &mut crate::oscore::SecurityStore {
    self.inner.security_mut()
  }
}

fn norm(path: &str) -> &str {
  path.trim_matches('/')
}

impl<P: PlatformTypes, Inner> Step<P> for Observe<P, Inner>
  where Inner: Step<P, PollReq = Addrd<Req>, PollResp = Addrd<Resp>>
{
  type PollReq = Addrd<Req>;
  type PollResp = Addrd<Resp>;
  type Error = Inner::Error;

  fn poll_req(&mut self,
              snap: &Snapshot<P>,
              effects: &mut Vec<Effect>)
              -> StepOutput<Self::PollReq, Self::Error> {
    // a subscriber that never acknowledged its last confirmable
    // notification is gone
    let span = snap.config.max_transmit_span_millis();
    let now = snap.time;
    self.subs.retain(|s| match s.awaiting_ack {
                 | Some((_, at)) => millis_since::<P::Clock>(now, at) <= span,
                 | None => true,
               });

    let req = exec_inner_step!(self.inner.poll_req(snap, effects), core::convert::identity);

    match req {
      | Some(req) => {
        match req.data().msg().observe_action() {
          | Some(observe::Action::Register) if req.data().method() == Code::GET => {
            let path = req.data().path().unwrap_or_default();
            log_effect!(effects,
                        log::Level::Info,
                        "{} observing {:?}",
                        req.addr(),
                        path);

            self.subs
                .retain(|s| !s.matches(req.addr(), req.data().msg().token));
            self.subs.push(Sub { req: req.as_ref().map(|r| r.msg().clone()),
                                 path,
                                 counter: 1,
                                 dirty: false,
                                 notifications: 0,
                                 last_id: None,
                                 awaiting_ack: None });
          },
          | Some(observe::Action::Deregister) => {
            self.subs
                .retain(|s| !s.matches(req.addr(), req.data().msg().token));
          },
          | _ => (),
        }

        Some(Ok(req))
      },
      | None => {
        // no inbound request: maybe a resource changed and a stored
        // registration wants re-rendering
        self.subs
            .iter_mut()
            .find(|s| s.dirty)
            .map(|sub| {
              sub.dirty = false;
              // never ACKed: this re-dispatch did not come off the wire
              Ok(sub.req.clone().map(|mut m| {
                                       m.ty = Type::Non;
                                       Req::from(m)
                                     }))
            })
      },
    }
  }

  fn poll_resp(&mut self,
               snap: &Snapshot<P>,
               effects: &mut Vec<Effect>,
               token: Token,
               addr: SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error> {
    let resp = exec_inner_step!(self.inner.poll_resp(snap, effects, token, addr),
                                core::convert::identity)?;

    match (resp.data().msg().ty, resp.data().msg().code.kind()) {
      // a subscriber reset one of our notifications: drop it
      | (Type::Reset, _) => {
        let id = resp.data().msg().id;
        let from = resp.addr();
        self.subs
            .retain(|s| !(s.req.addr() == from && s.last_id == Some(id)));
        Some(Ok(resp))
      },
      | (Type::Ack, CodeKind::Empty) => {
        let id = resp.data().msg().id;
        let from = resp.addr();
        self.subs
            .iter_mut()
            .filter(|s| s.req.addr() == from && matches!(s.awaiting_ack, Some((i, _)) if i == id))
            .for_each(|s| s.awaiting_ack = None);
        Some(Ok(resp))
      },
      | _ => match resp.data().msg().observe() {
        | Some(v2) => {
          let key = (resp.addr(), resp.data().msg().token);
          let v2 = (v2 & 0xFF_FF_FF) as u32;
          let fresh = match self.last_seen.get(&key) {
            | None => true,
            | Some(&(v1, t1)) => {
              observe::fresher(v1, v2, millis_since::<P::Clock>(snap.time, t1))
            },
          };

          if fresh {
            self.last_seen.insert(key, (v2, snap.time));
            Some(Ok(resp))
          } else {
            log_effect!(effects,
                        log::Level::Debug,
                        "stale notification ({}) from {} dropped",
                        v2,
                        resp.addr());
            None
          }
        },
        | None => Some(Ok(resp)),
      },
    }
  }

  fn before_message_sent(&mut self,
                         snap: &Snapshot<P>,
                         effects: &mut Vec<Effect>,
                         msg: &mut Addrd<Message>)
                         -> Result<(), Self::Error> {
    if msg.data().code.kind() == CodeKind::Response {
      let (addr, token) = (msg.addr(), msg.data().token);
      if let Some(sub) = self.subs.iter_mut().find(|s| s.matches(addr, token)) {
        msg.data_mut().set_observe(sub.counter as u64);
        sub.counter = (sub.counter + 1) & 0xFF_FF_FF;
        sub.notifications += 1;

        // every 8th notification goes confirmable so dead
        // subscribers eventually fall off
        if msg.data().ty == Type::Non && sub.notifications % 8 == 0 {
          msg.data_mut().ty = Type::Con;
        }
      }
    }

    self.inner.before_message_sent(snap, effects, msg)
  }

  fn on_message_sent(&mut self,
                     snap: &Snapshot<P>,
                     msg: &Addrd<Message>)
                     -> Result<(), Self::Error> {
    if msg.data().code.kind() == CodeKind::Response {
      let (addr, token) = (msg.addr(), msg.data().token);
      if let Some(sub) = self.subs.iter_mut().find(|s| s.matches(addr, token)) {
        sub.last_id = Some(msg.data().id);
        if msg.data().ty == Type::Con {
          sub.awaiting_ack = Some((msg.data().id, snap.time));
        }
      }
    }

    self.inner.on_message_sent(snap, msg)
  }

  fn notify(&mut self, path: &str, effects: &mut Vec<Effect>) -> Result<(), Self::Error> {
    self.subs
        .iter_mut()
        .filter(|s| norm(&s.path) == norm(path))
        .for_each(|s| s.dirty = true);

    self.inner.notify(path, effects)
  }

  fn resource_removed(&mut self,
                      path: &str,
                      effects: &mut Vec<Effect>)
                      -> Result<(), Self::Error> {
    // terminal notification: the resource is gone, and so is the
    // registration
    for sub in self.subs.iter().filter(|s| norm(&s.path) == norm(path)) {
      let mut terminal = Message::new(Type::Con,
                                      Code::NOT_FOUND,
                                      Id(0),
                                      sub.req.data().token);
      terminal.set_observe(sub.counter as u64);
      effects.push(Effect::Send(Addrd(terminal, sub.req.addr())));
    }

    self.subs.retain(|s| norm(&s.path) != norm(path));
    self.inner.resource_removed(path, effects)
  }
}

#[cfg(test)]
mod tests {
  use newt_msg::TryIntoBytes;

  use super::*;
  use crate::step::block::Block;
  use crate::step::dedup::Dedup;
  use crate::step::oscore::Oscore;
  use crate::step::parse::Parse;
  use crate::step::reset::Reset;
  use crate::test::{self, ClockMock};

  type Chain =
    Observe<test::Platform,
            Block<test::Platform,
                  Oscore<test::Platform,
                         Reset<test::Platform,
                               Dedup<test::Platform, Parse<test::Platform>>>>>>;

  fn snapshot_at(millis: u64, dgram: Option<Addrd<Vec<u8>>>) -> Snapshot<test::Platform> {
    Snapshot { time: ClockMock::instant(millis),
               recvd_dgram: dgram,
               config: Default::default() }
  }

  fn notification(addr: SocketAddr, token: Token, id: u16, observe: u64) -> Addrd<Vec<u8>> {
    let mut msg = Message::new(Type::Non, Code::CONTENT, Id(id), token);
    msg.set_observe(observe);
    Addrd(msg.try_into_bytes().unwrap(), addr)
  }

  #[test]
  fn client_accepts_only_fresher_notifications() {
    let addr = test::dummy_addr();
    let token = Token(tinyvec::array_vec!([u8; 8] => 9));
    let mut step = Chain::default();
    let mut effects = vec![];

    let mut seen = vec![];
    for (ix, v) in [5u64, 6, 4, 7].into_iter().enumerate() {
      let polled = step.poll_resp(&snapshot_at(ix as u64,
                                               Some(notification(addr, token, ix as u16, v))),
                                  &mut effects,
                                  token,
                                  addr);
      if let Some(Ok(resp)) = polled {
        seen.push(resp.data().msg().observe().unwrap());
      }
    }

    assert_eq!(seen, vec![5, 6, 7]);
  }

  #[test]
  fn stale_value_accepted_after_128s() {
    let addr = test::dummy_addr();
    let token = Token(tinyvec::array_vec!([u8; 8] => 9));
    let mut step = Chain::default();
    let mut effects = vec![];

    assert!(step.poll_resp(&snapshot_at(0, Some(notification(addr, token, 1, 6))),
                           &mut effects,
                           token,
                           addr)
                .is_some());

    // 4 < 6 but 129 seconds have passed
    assert!(step.poll_resp(&snapshot_at(129_000, Some(notification(addr, token, 2, 4))),
                           &mut effects,
                           token,
                           addr)
                .is_some());
  }

  #[test]
  fn register_notify_redispatch() {
    let addr = test::dummy_addr();
    let token = Token(tinyvec::array_vec!([u8; 8] => 1));
    let mut step = Chain::default();
    let mut effects = vec![];

    let mut reg = Message::new(Type::Con, Code::GET, Id(1), token);
    reg.set_path("sensors/temp");
    reg.set_observe(0);

    let polled = step.poll_req(&snapshot_at(0,
                                            Some(Addrd(reg.try_into_bytes().unwrap(), addr))),
                               &mut effects);
    assert!(polled.is_some());

    // nothing dirty yet
    assert!(step.poll_req(&snapshot_at(1, None), &mut effects).is_none());

    // resource changes: the stored GET comes back out for re-rendering
    step.notify("sensors/temp", &mut effects).unwrap();
    let redispatch = step.poll_req(&snapshot_at(2, None), &mut effects)
                         .unwrap()
                         .unwrap();
    assert_eq!(redispatch.data().path().unwrap(), "sensors/temp");
    assert_eq!(redispatch.data().msg().ty, Type::Non);

    // and only once per notify
    assert!(step.poll_req(&snapshot_at(3, None), &mut effects).is_none());
  }

  #[test]
  fn notifications_get_ascending_observe_values() {
    let addr = test::dummy_addr();
    let token = Token(tinyvec::array_vec!([u8; 8] => 1));
    let mut step = Chain::default();
    let mut effects = vec![];

    let mut reg = Message::new(Type::Con, Code::GET, Id(1), token);
    reg.set_path("sensors/temp");
    reg.set_observe(0);
    step.poll_req(&snapshot_at(0, Some(Addrd(reg.try_into_bytes().unwrap(), addr))),
                  &mut effects)
        .unwrap()
        .unwrap();

    let mut values = vec![];
    for i in 0..3 {
      let mut resp = Message::new(Type::Non, Code::CONTENT, Id(100 + i), token);
      resp.payload = newt_msg::Payload(vec![i as u8]);
      let mut addrd = Addrd(resp, addr);
      step.before_message_sent(&snapshot_at(10 + i as u64, None), &mut effects, &mut addrd)
          .unwrap();
      values.push(addrd.data().observe().unwrap());
    }

    assert_eq!(values, vec![1, 2, 3]);
  }

  #[test]
  fn reset_tears_down_subscription() {
    let addr = test::dummy_addr();
    let token = Token(tinyvec::array_vec!([u8; 8] => 1));
    let mut step = Chain::default();
    let mut effects = vec![];

    let mut reg = Message::new(Type::Con, Code::GET, Id(1), token);
    reg.set_path("sensors/temp");
    reg.set_observe(0);
    step.poll_req(&snapshot_at(0, Some(Addrd(reg.try_into_bytes().unwrap(), addr))),
                  &mut effects)
        .unwrap()
        .unwrap();

    // a notification goes out with id 50
    let mut notif = Message::new(Type::Non, Code::CONTENT, Id(50), token);
    notif.payload = newt_msg::Payload(vec![1]);
    let addrd = Addrd(notif, addr);
    step.on_message_sent(&snapshot_at(1, None), &addrd).unwrap();

    // the subscriber resets it
    let rst = Message::new(Type::Reset, Code::EMPTY, Id(50), Token(Default::default()));
    step.poll_resp(&snapshot_at(2, Some(Addrd(rst.try_into_bytes().unwrap(), addr))),
                   &mut effects,
                   token,
                   addr);

    // the sub is gone: notify dirties nothing
    step.notify("sensors/temp", &mut effects).unwrap();
    assert!(step.poll_req(&snapshot_at(3, None), &mut effects).is_none());
  }

  #[test]
  fn removal_sends_terminal_not_found() {
    let addr = test::dummy_addr();
    let token = Token(tinyvec::array_vec!([u8; 8] => 1));
    let mut step = Chain::default();
    let mut effects = vec![];

    let mut reg = Message::new(Type::Con, Code::GET, Id(1), token);
    reg.set_path("sensors/temp");
    reg.set_observe(0);
    step.poll_req(&snapshot_at(0, Some(Addrd(reg.try_into_bytes().unwrap(), addr))),
                  &mut effects)
        .unwrap()
        .unwrap();

    effects.clear();
    step.resource_removed("sensors/temp", &mut effects).unwrap();

    let terminal = effects.iter().find_map(|e| e.get_send()).unwrap();
    assert_eq!(terminal.data().code, Code::NOT_FOUND);
    assert_eq!(terminal.data().token, token);
  }
}
