use std::collections::HashMap;
use std::net::SocketAddr;

use embedded_time::Instant;
use newt_msg::{no_repeat, Code, CodeKind, Id, Token, Type};

use super::{Step, StepOutput};
use crate::exec_inner_step;
use crate::log_effect;
use crate::net::Addrd;
use crate::platform::{Effect, Message, PlatformTypes, Snapshot};
use crate::req::Req;
use crate::resp::Resp;
use crate::time::millis_since;

/// Reassembled uploads are capped; larger bodies get 4.13
const MAX_ASSEMBLED: usize = 1 << 20;

/// Errors raised by the blockwise step
#[derive(Debug)]
pub enum Error<E> {
  /// The inner step failed
  Inner(E),
  /// A Block1 option appeared where the transfer state does not
  /// allow one
  UnexpectedBlock1,
  /// A Block2 option appeared where the transfer state does not
  /// allow one
  UnexpectedBlock2,
}

impl<E: super::Error> super::Error for Error<E> {}

impl<E> From<E> for Error<E> {
  fn from(e: E) -> Self {
    Error::Inner(e)
  }
}

struct Upload<P: PlatformTypes> {
  body: Vec<u8>,
  offset: usize,
  size: u16,
  template: Message,
  at: Instant<P::Clock>,
}

struct Download<P: PlatformTypes> {
  body: Vec<u8>,
  next: u32,
  at: Instant<P::Clock>,
}

struct Assembly<P: PlatformTypes> {
  body: Vec<u8>,
  next: u32,
  at: Instant<P::Clock>,
}

/// Blockwise transfers (RFC7959), both directions of both roles:
///
/// * client Block1: oversized outbound request bodies are split and
///   fed to the server block by block on each 2.31 Continue
/// * client Block2: chunked responses are fetched NUM-by-NUM and
///   reassembled before the application sees them
/// * server Block1: uploads are reassembled per (remote, path),
///   answering 2.31 until the final block arrives
/// * server Block2: oversized outbound response bodies are sliced to
///   the block the client asked for, never enlarging the client's
///   size
pub struct Block<P: PlatformTypes, Inner> {
  uploads: HashMap<(SocketAddr, Token), Upload<P>>,
  downloads: HashMap<(SocketAddr, Token), Download<P>>,
  assembly: HashMap<(SocketAddr, String), Assembly<P>>,
  /// client's Block2 request window: (num, size) per exchange
  requested: HashMap<(SocketAddr, Token), (u32, u16)>,
  /// requests we sent, kept to build continuation requests from
  templates: HashMap<(SocketAddr, Token), (Message, Instant<P::Clock>)>,
  inner: Inner,
}

impl<P: PlatformTypes, Inner> core::fmt::Debug for Block<P, Inner> where Inner: core::fmt::Debug
{
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Block").field("inner", &self.inner).finish()
  }
}

impl<P: PlatformTypes, Inner: Default> Default for Block<P, Inner> {
  fn default() -> Self {
    Self { uploads: HashMap::new(),
           downloads: HashMap::new(),
           assembly: HashMap::new(),
           requested: HashMap::new(),
           templates: HashMap::new(),
           inner: Inner::default() }
  }
}

impl<P: PlatformTypes, Inner: super::oscore::Security> super::oscore::Security
  for Block<P, Inner>
{
  fn security_mut(&mut self) -> &mut crate::oscore::SecurityStore {
    self.inner.security_mut()
  }
}

fn reply(req: &Message, code: Code) -> Message {
  let mut msg = Message::new(Type::Ack, code, req.id, req.token);
  msg.ver = req.ver;
  msg
}

impl<P: PlatformTypes, Inner> Block<P, Inner> {
  fn prune(&mut self, snap: &Snapshot<P>) {
    let lifetime = snap.config.exchange_lifetime_millis();
    let now = snap.time;

    self.uploads
        .retain(|_, u| millis_since::<P::Clock>(now, u.at) < lifetime);
    self.downloads
        .retain(|_, d| millis_since::<P::Clock>(now, d.at) < lifetime);
    self.assembly
        .retain(|_, a| millis_since::<P::Clock>(now, a.at) < lifetime);
    self.templates
        .retain(|_, (_, at)| millis_since::<P::Clock>(now, *at) < lifetime);
  }

  /// Server side of Block1: `Some(req)` when the request is ready for
  /// the application, `None` while blocks are still arriving.
  fn reassemble(&mut self,
                req: Addrd<Message>,
                snap: &Snapshot<P>,
                effects: &mut Vec<Effect>)
                -> Option<Addrd<Message>> {
    let b = match req.data().block1() {
      | Some(b) => b,
      | None => return Some(req),
    };

    // a whole body in a single block needs no state
    if b.num() == 0 && !b.more() {
      return Some(req);
    }

    let key = (req.addr(), req.data().path_string().unwrap_or_default());

    if b.num() == 0 {
      self.assembly.insert(key,
                           Assembly { body: req.data().payload.as_bytes().to_vec(),
                                      next: 1,
                                      at: snap.time });
      effects.push(Effect::Send(req.as_ref().map(|m| {
                                                  let mut r = reply(m, Code::CONTINUE);
                                                  r.set_block1(b.size(), b.num(), true);
                                                  r
                                                })));
      return None;
    }

    let Some(assembly) = self.assembly.get_mut(&key) else {
      effects.push(Effect::Send(req.as_ref()
                                   .map(|m| reply(m, Code::REQUEST_ENTITY_INCOMPLETE))));
      return None;
    };

    if b.num() != assembly.next {
      log_effect!(effects,
                  log::Level::Warn,
                  "block1 gap from {}: got {}, expected {}",
                  req.addr(),
                  b.num(),
                  assembly.next);
      self.assembly.remove(&key);
      effects.push(Effect::Send(req.as_ref()
                                   .map(|m| reply(m, Code::REQUEST_ENTITY_INCOMPLETE))));
      return None;
    }

    if assembly.body.len() + req.data().payload.0.len() > MAX_ASSEMBLED {
      self.assembly.remove(&key);
      effects.push(Effect::Send(req.as_ref()
                                   .map(|m| reply(m, Code::REQUEST_ENTITY_TOO_LARGE))));
      return None;
    }

    assembly.body.extend(req.data().payload.as_bytes());
    assembly.next += 1;

    if b.more() {
      effects.push(Effect::Send(req.as_ref().map(|m| {
                                                  let mut r = reply(m, Code::CONTINUE);
                                                  r.set_block1(b.size(), b.num(), true);
                                                  r
                                                })));
      return None;
    }

    // final block: hand the application the whole body
    let body = self.assembly.remove(&key).map(|a| a.body).unwrap_or_default();
    Some(req.map(|mut m| {
                   m.payload = newt_msg::Payload(body);
                   m.remove(no_repeat::BLOCK1);
                   m.remove(no_repeat::SIZE1);
                   m
                 }))
  }

  fn continue_upload(&mut self,
                     key: (SocketAddr, Token),
                     acked: newt_msg::Block,
                     effects: &mut Vec<Effect>)
                     -> Result<(), Error<Inner::Error>>
    where Inner: Step<P, PollReq = Addrd<Req>, PollResp = Addrd<Resp>>
  {
    let up = self.uploads.get_mut(&key).ok_or(Error::UnexpectedBlock1)?;

    // never enlarge past what the server acked
    up.size = up.size.min(acked.size());
    up.offset = (acked.num() as usize + 1) * up.size as usize;

    if up.offset >= up.body.len() {
      return Err(Error::UnexpectedBlock1);
    }

    let num = (up.offset / up.size as usize) as u32;
    let end = (up.offset + up.size as usize).min(up.body.len());
    let more = end < up.body.len();

    let mut msg = up.template.clone();
    msg.id = Id(0);
    msg.payload = newt_msg::Payload(up.body[up.offset..end].to_vec());
    msg.set_block1(up.size, num, more);
    msg.set_size1(up.body.len() as u64);

    effects.push(Effect::Send(Addrd(msg, key.0)));
    Ok(())
  }

  fn continue_download(&mut self,
                       key: (SocketAddr, Token),
                       size: u16,
                       next: u32,
                       effects: &mut Vec<Effect>)
                       -> Result<(), Error<Inner::Error>>
    where Inner: Step<P, PollReq = Addrd<Req>, PollResp = Addrd<Resp>>
  {
    let (template, _) = self.templates.get(&key).ok_or(Error::UnexpectedBlock2)?;

    let mut msg = template.clone();
    msg.id = Id(0);
    msg.payload = newt_msg::Payload(vec![]);
    msg.remove(no_repeat::BLOCK1);
    msg.remove(no_repeat::SIZE1);
    msg.set_block2(size, next, false);

    effects.push(Effect::Send(Addrd(msg, key.0)));
    Ok(())
  }
}

impl<P: PlatformTypes, Inner> Step<P> for Block<P, Inner>
  where Inner: Step<P, PollReq = Addrd<Req>, PollResp = Addrd<Resp>>
{
  type PollReq = Addrd<Req>;
  type PollResp = Addrd<Resp>;
  type Error = Error<Inner::Error>;

  fn poll_req(&mut self,
              snap: &Snapshot<P>,
              effects: &mut Vec<Effect>)
              -> StepOutput<Self::PollReq, Self::Error> {
    self.prune(snap);

    let req = exec_inner_step!(self.inner.poll_req(snap, effects), Error::Inner)?;
    let req = req.map(Message::from);

    // a client fetching a specific response window
    if let Some(b) = req.data().block2() {
      self.requested.insert((req.addr(), req.data().token),
                            (b.num(), b.size().min(snap.config.block_size)));
    }

    self.reassemble(req, snap, effects)
        .map(|m| Ok(m.map(Req::from)))
  }

  fn poll_resp(&mut self,
               snap: &Snapshot<P>,
               effects: &mut Vec<Effect>,
               token: Token,
               addr: SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error> {
    self.prune(snap);

    let resp = exec_inner_step!(self.inner.poll_resp(snap, effects, token, addr), Error::Inner)?;
    let key = (resp.addr(), resp.data().msg().token);

    // ongoing Block1 upload?
    if self.uploads.contains_key(&key) {
      if resp.data().code() == Code::CONTINUE {
        let acked = match resp.data().msg().block1() {
          | Some(b) => b,
          | None => return Some(Err(nb::Error::Other(Error::UnexpectedBlock1))),
        };

        return match self.continue_upload(key, acked, effects) {
          | Ok(()) => Some(Err(nb::Error::WouldBlock)),
          | Err(e) => Some(Err(nb::Error::Other(e))),
        };
      }

      // any terminal code ends the upload
      self.uploads.remove(&key);
    }

    // chunked response?
    let resp = match resp.data().msg().block2() {
      | Some(b) if resp.data().code().class == 2 => {
        let download = self.downloads
                           .entry(key)
                           .or_insert(Download { body: vec![],
                                                 next: 0,
                                                 at: snap.time });

        if b.num() != download.next {
          // the client drives NUMs sequentially; anything else is a
          // stale duplicate. Re-request the block we actually want.
          let next = download.next;
          return match self.continue_download(key, b.size().min(snap.config.block_size),
                                              next, effects)
          {
            | Ok(()) => Some(Err(nb::Error::WouldBlock)),
            | Err(e) => Some(Err(nb::Error::Other(e))),
          };
        }

        download.body.extend(resp.data().payload());
        download.next += 1;

        if b.more() {
          let next = download.next;
          return match self.continue_download(key, b.size().min(snap.config.block_size),
                                              next, effects)
          {
            | Ok(()) => Some(Err(nb::Error::WouldBlock)),
            | Err(e) => Some(Err(nb::Error::Other(e))),
          };
        }

        let body = self.downloads.remove(&key).map(|d| d.body).unwrap_or_default();
        resp.map(|r| {
              let mut m = Message::from(r);
              m.payload = newt_msg::Payload(body);
              m.remove(no_repeat::BLOCK2);
              m.remove(no_repeat::SIZE2);
              Resp::from(m)
            })
      },
      | _ => resp,
    };

    Some(Ok(resp))
  }

  fn before_message_sent(&mut self,
                         snap: &Snapshot<P>,
                         effects: &mut Vec<Effect>,
                         msg: &mut Addrd<Message>)
                         -> Result<(), Self::Error> {
    let key = (msg.addr(), msg.data().token);
    let block_size = snap.config.block_size;

    match msg.data().code.kind() {
      | CodeKind::Request => {
        // keep the request around for continuation requests
        self.templates
            .insert(key, (msg.data().clone(), snap.time));

        if msg.data().payload.0.len() > block_size as usize && msg.data().block1().is_none() {
          let body = std::mem::take(&mut msg.data_mut().payload).0;

          msg.data_mut().payload = newt_msg::Payload(body[..block_size as usize].to_vec());
          msg.data_mut().set_block1(block_size, 0, true);
          msg.data_mut().set_size1(body.len() as u64);

          self.uploads.insert(key,
                              Upload { template: msg.data().clone(),
                                       body,
                                       offset: 0,
                                       size: block_size,
                                       at: snap.time });
        }
      },
      | CodeKind::Response => {
        let window = self.requested.remove(&key);
        let needs_slicing =
          window.map(|(num, _)| num > 0).unwrap_or(false)
          || msg.data().payload.0.len() > window.map(|(_, s)| s).unwrap_or(block_size) as usize;

        if needs_slicing && msg.data().block2().is_none() {
          let (num, size) = window.unwrap_or((0, block_size));
          let body = std::mem::take(&mut msg.data_mut().payload).0;

          let start = (num as usize) * (size as usize);
          let end = (start + size as usize).min(body.len());
          let slice = body.get(start..end).unwrap_or(&[]).to_vec();

          msg.data_mut().payload = newt_msg::Payload(slice);
          msg.data_mut().set_block2(size, num, end < body.len());
          msg.data_mut().set_size2(body.len() as u64);
        }
      },
      | CodeKind::Empty => (),
    }

    self.inner.before_message_sent(snap, effects, msg).map_err(Error::Inner)
  }

  fn on_message_sent(&mut self,
                     snap: &Snapshot<P>,
                     msg: &Addrd<Message>)
                     -> Result<(), Self::Error> {
    self.inner.on_message_sent(snap, msg).map_err(Error::Inner)
  }

  fn notify(&mut self, path: &str, effects: &mut Vec<Effect>) -> Result<(), Self::Error> {
    self.inner.notify(path, effects).map_err(Error::Inner)
  }

  fn resource_removed(&mut self,
                      path: &str,
                      effects: &mut Vec<Effect>)
                      -> Result<(), Self::Error> {
    self.inner.resource_removed(path, effects).map_err(Error::Inner)
  }
}

#[cfg(test)]
mod tests {
  use newt_msg::TryIntoBytes;

  use super::*;
  use crate::step::dedup::Dedup;
  use crate::step::oscore::Oscore;
  use crate::step::parse::Parse;
  use crate::step::reset::Reset;
  use crate::test::{self, ClockMock};

  type Chain =
    Block<test::Platform,
          Oscore<test::Platform,
                 Reset<test::Platform, Dedup<test::Platform, Parse<test::Platform>>>>>;

  fn snapshot_at(millis: u64, dgram: Option<Addrd<Vec<u8>>>) -> Snapshot<test::Platform> {
    Snapshot { time: ClockMock::instant(millis),
               recvd_dgram: dgram,
               config: Default::default() }
  }

  fn wire(msg: Message, addr: SocketAddr) -> Addrd<Vec<u8>> {
    Addrd(msg.try_into_bytes().unwrap(), addr)
  }

  #[test]
  fn upload_reassembles_in_order() {
    let addr = test::dummy_addr();
    let mut step = Chain::default();

    let body: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
    let blocks: Vec<&[u8]> = body.chunks(64).collect();
    let token = Token(tinyvec::array_vec!([u8; 8] => 1));

    for (num, block) in blocks.iter().enumerate() {
      let mut req = Message::new(Type::Con,
                                 Code::PUT,
                                 Id(num as u16 + 1),
                                 token);
      req.set_path("file");
      req.payload = newt_msg::Payload(block.to_vec());
      req.set_block1(64, num as u32, num + 1 < blocks.len());

      let mut effects = vec![];
      let polled = step.poll_req(&snapshot_at(num as u64, Some(wire(req, addr))), &mut effects);

      if num + 1 < blocks.len() {
        assert!(polled.is_none(), "block {} should be swallowed", num);
        let continue_resp = effects.iter().find_map(|e| e.get_send()).unwrap();
        assert_eq!(continue_resp.data().code, Code::CONTINUE);
      } else {
        let req = polled.unwrap().unwrap();
        assert_eq!(req.data().payload(), &body[..]);
        assert!(req.data().msg().block1().is_none());
      }
    }
  }

  #[test]
  fn upload_gap_aborts_with_4_08() {
    let addr = test::dummy_addr();
    let mut step = Chain::default();
    let token = Token(tinyvec::array_vec!([u8; 8] => 2));

    let mut first = Message::new(Type::Con, Code::PUT, Id(1), token);
    first.set_path("file");
    first.payload = newt_msg::Payload(vec![0; 64]);
    first.set_block1(64, 0, true);

    let mut effects = vec![];
    assert!(step.poll_req(&snapshot_at(0, Some(wire(first, addr))), &mut effects)
                .is_none());

    // skip block 1, send block 2
    let mut third = Message::new(Type::Con, Code::PUT, Id(3), token);
    third.set_path("file");
    third.payload = newt_msg::Payload(vec![0; 64]);
    third.set_block1(64, 2, true);

    effects.clear();
    assert!(step.poll_req(&snapshot_at(1, Some(wire(third, addr))), &mut effects)
                .is_none());

    let resp = effects.iter().find_map(|e| e.get_send()).unwrap();
    assert_eq!(resp.data().code, Code::REQUEST_ENTITY_INCOMPLETE);
  }

  #[test]
  fn outbound_request_is_split() {
    let addr = test::dummy_addr();
    let mut step = Chain::default();

    let mut msg = Message::new(Type::Con,
                               Code::PUT,
                               Id(1),
                               Token(tinyvec::array_vec!([u8; 8] => 3)));
    msg.set_path("file");
    msg.payload = newt_msg::Payload(vec![7; 4096]);

    let mut addrd = Addrd(msg, addr);
    let mut effects = vec![];
    step.before_message_sent(&snapshot_at(0, None), &mut effects, &mut addrd)
        .unwrap();

    assert_eq!(addrd.data().payload.0.len(), 1024);
    let b = addrd.data().block1().unwrap();
    assert_eq!((b.num(), b.more(), b.size()), (0, true, 1024));
    assert_eq!(addrd.data().size1(), Some(4096));
  }

  #[test]
  fn continue_drives_the_next_block() {
    let addr = test::dummy_addr();
    let mut step = Chain::default();
    let token = Token(tinyvec::array_vec!([u8; 8] => 4));

    let mut msg = Message::new(Type::Con, Code::PUT, Id(1), token);
    msg.set_path("file");
    msg.payload = newt_msg::Payload((0u8..=255).cycle().take(4096).collect());

    let mut addrd = Addrd(msg, addr);
    let mut effects = vec![];
    step.before_message_sent(&snapshot_at(0, None), &mut effects, &mut addrd)
        .unwrap();

    // server acks block 0
    let mut cont = Message::new(Type::Ack, Code::CONTINUE, Id(1), token);
    cont.set_block1(1024, 0, true);

    effects.clear();
    let polled = step.poll_resp(&snapshot_at(1, Some(wire(cont, addr))),
                                &mut effects,
                                token,
                                addr);
    assert!(matches!(polled, Some(Err(nb::Error::WouldBlock))));

    let next = effects.iter().find_map(|e| e.get_send()).unwrap();
    let b = next.data().block1().unwrap();
    assert_eq!((b.num(), b.more()), (1, true));
    assert_eq!(next.data().payload.as_bytes(), &(0u8..=255).cycle().take(4096).collect::<Vec<_>>()[1024..2048]);
  }

  #[test]
  fn download_reassembles_and_requests_sequentially() {
    let addr = test::dummy_addr();
    let mut step = Chain::default();
    let token = Token(tinyvec::array_vec!([u8; 8] => 5));

    // the original GET, so the step has a template for continuations
    let mut get = Message::new(Type::Con, Code::GET, Id(1), token);
    get.set_path("big");
    let mut addrd = Addrd(get, addr);
    let mut effects = vec![];
    step.before_message_sent(&snapshot_at(0, None), &mut effects, &mut addrd)
        .unwrap();

    // first chunk arrives
    let mut chunk0 = Message::new(Type::Ack, Code::CONTENT, Id(1), token);
    chunk0.payload = newt_msg::Payload(vec![0xAA; 1024]);
    chunk0.set_block2(1024, 0, true);

    effects.clear();
    let polled = step.poll_resp(&snapshot_at(1, Some(wire(chunk0, addr))),
                                &mut effects,
                                token,
                                addr);
    assert!(matches!(polled, Some(Err(nb::Error::WouldBlock))));

    let cont = effects.iter().find_map(|e| e.get_send()).unwrap();
    let b = cont.data().block2().unwrap();
    assert_eq!(b.num(), 1);
    assert!(cont.data().payload.is_empty());

    // final chunk
    let mut chunk1 = Message::new(Type::Con, Code::CONTENT, Id(2), token);
    chunk1.payload = newt_msg::Payload(vec![0xBB; 100]);
    chunk1.set_block2(1024, 1, false);

    effects.clear();
    let polled = step.poll_resp(&snapshot_at(2, Some(wire(chunk1, addr))),
                                &mut effects,
                                token,
                                addr);

    let resp = polled.unwrap().unwrap();
    assert_eq!(resp.data().payload().len(), 1124);
    assert!(resp.data().msg().block2().is_none());
  }

  #[test]
  fn server_slices_response_to_requested_window() {
    let addr = test::dummy_addr();
    let mut step = Chain::default();
    let token = Token(tinyvec::array_vec!([u8; 8] => 6));

    // client asks for block 1 at 256 bytes
    let mut req = Message::new(Type::Con, Code::GET, Id(1), token);
    req.set_path("big");
    req.set_block2(256, 1, false);

    let mut effects = vec![];
    let polled = step.poll_req(&snapshot_at(0, Some(wire(req, addr))), &mut effects);
    assert!(polled.is_some());

    // the app responds with the whole body; we slice it
    let mut resp = Message::new(Type::Ack, Code::CONTENT, Id(1), token);
    resp.payload = newt_msg::Payload((0u8..=255).cycle().take(1000).collect());

    let mut addrd = Addrd(resp, addr);
    step.before_message_sent(&snapshot_at(1, None), &mut effects, &mut addrd)
        .unwrap();

    let b = addrd.data().block2().unwrap();
    assert_eq!((b.num(), b.size(), b.more()), (1, 256, true));
    assert_eq!(addrd.data().payload.0.len(), 256);
    assert_eq!(addrd.data().payload.0[0], (256 % 256) as u8);
  }
}
