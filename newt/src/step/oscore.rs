use std::net::SocketAddr;

use newt_msg::{Code, CodeKind, Token};

use super::{Step, StepOutput};
use crate::exec_inner_step;
use crate::log_effect;
use crate::net::Addrd;
use crate::oscore::{self, CompressedHeader, SecurityStore};
use crate::platform::{Effect, Message, PlatformTypes, Snapshot};
use crate::req::Req;
use crate::resp::Resp;

/// Access to the [`SecurityStore`] buried in a step chain.
///
/// Every step outside [`Oscore`] forwards this to its inner step, so
/// the endpoint façade can install contexts without knowing where in
/// the chain they live.
pub trait Security {
  /// The store of security contexts
  fn security_mut(&mut self) -> &mut SecurityStore;
}

/// Errors raised by the OSCORE step
#[derive(Debug)]
pub enum Error<E> {
  /// The inner step failed
  Inner(E),
  /// Protection or unprotection failed
  Oscore(oscore::Error),
  /// We required a protected response on this exchange but got a
  /// plain one; carries the plain message
  NotAProtectedMessage(Box<Addrd<Message>>),
}

impl<E: super::Error> super::Error for Error<E> {}

impl<E> From<E> for Error<E> {
  fn from(e: E) -> Self {
    Error::Inner(e)
  }
}

/// Unprotects inbound messages on their way up the chain and
/// protects outbound ones on their way to the wire (RFC8613 §8).
///
/// Sits directly above parsing & deduplication: the message layer
/// correlates on the outer message, while everything above
/// (blockwise, observation, the application) sees plaintext.
/// How many responses the B.1 hold-back will keep at once
const HELD_CAP: usize = 16;

#[derive(Debug)]
pub struct Oscore<P, Inner> {
  store: SecurityStore,
  /// Responses carrying a fresh PIV, held while the peer still owes
  /// us an Echo (RFC8613 appendix B.1): our replay window is gone,
  /// so nothing vouches for their freshness yet
  held: Vec<Addrd<Message>>,
  inner: Inner,
  __p: core::marker::PhantomData<P>,
}

impl<P, Inner: Default> Default for Oscore<P, Inner> {
  fn default() -> Self {
    Self { store: SecurityStore::default(),
           held: Vec::new(),
           inner: Inner::default(),
           __p: core::marker::PhantomData }
  }
}

impl<P, Inner> Security for Oscore<P, Inner> {
  fn security_mut(&mut self) -> &mut SecurityStore {
    &mut self.store
  }
}

impl<P: PlatformTypes, Inner> Oscore<P, Inner> {
  fn unauthorized(req: &Message, addr: SocketAddr, diagnostic: &str) -> Addrd<Message> {
    let mut resp = Message::new(newt_msg::Type::Ack, Code::UNAUTHORIZED, req.id, req.token);
    resp.set_payload(newt_msg::Payload(diagnostic.as_bytes().to_vec()));
    Addrd(resp, addr)
  }

  /// The response half of the receive path: unprotect (or pass
  /// through) one response-shaped message.
  ///
  /// Factored out of `poll_resp` so responses released from the B.1
  /// hold go through exactly the same checks as fresh arrivals.
  fn accept_response(&mut self,
                     mut msg: Message,
                     from: SocketAddr,
                     effects: &mut Vec<Effect>)
                     -> StepOutput<Addrd<Resp>, Error<Inner::Error>>
    where Inner: Step<P, PollReq = Addrd<Req>, PollResp = Addrd<Resp>>
  {
    let crypto = self.store.exchange(&from, &msg.token).cloned();

    match (msg.oscore().cloned(), crypto) {
      | (None, None) => Some(Ok(Addrd(Resp::from(msg), from))),
      | (None, Some(_)) => {
        Some(Err(nb::Error::Other(Error::NotAProtectedMessage(Box::new(Addrd(msg, from))))))
      },
      | (Some(_), None) => {
        log_effect!(effects,
                    log::Level::Warn,
                    "unsolicited protected response from {} dropped",
                    from);
        None
      },
      | (Some(value), Some(crypto)) => {
        let header = match CompressedHeader::from_bytes(value.as_bytes()) {
          | Ok(h) => h,
          | Err(e) => return Some(Err(nb::Error::Other(Error::Oscore(e)))),
        };

        let Some(ctx) = self.store.get_mut(&from) else {
          return Some(Err(nb::Error::Other(Error::Oscore(oscore::Error::NoContextForKid(vec![])))));
        };

        // B.1: a response with its own PIV cannot be replay-checked
        // against a window we no longer trust; it waits until the
        // peer has echoed our challenge
        if !header.piv.is_empty() && ctx.needs_echo() {
          log_effect!(effects,
                      log::Level::Warn,
                      "holding response with fresh piv from {} until echo validates",
                      from);
          if self.held.len() >= HELD_CAP {
            self.held.remove(0);
          }
          self.held.push(Addrd(msg, from));
          return None;
        }

        match ctx.unprotect_response(&mut msg, &header, &crypto) {
          | Err(oscore::Error::Replay) => {
            log_effect!(effects,
                        log::Level::Warn,
                        "replayed response from {} dropped",
                        from);
            None
          },
          | Err(e) => Some(Err(nb::Error::Other(Error::Oscore(e)))),
          | Ok(()) => {
            // notification streams keep the exchange alive for the
            // next response; single responses are done with it
            if msg.observe().is_none() {
              self.store.forget_exchange(&from, &msg.token);
            }
            Some(Ok(Addrd(Resp::from(msg), from)))
          },
        }
      },
    }
  }
}

impl<P: PlatformTypes, Inner> Step<P> for Oscore<P, Inner>
  where Inner: Step<P, PollReq = Addrd<Req>, PollResp = Addrd<Resp>>
{
  type PollReq = Addrd<Req>;
  type PollResp = Addrd<Resp>;
  type Error = Error<Inner::Error>;

  fn poll_req(&mut self,
              snap: &Snapshot<P>,
              effects: &mut Vec<Effect>)
              -> StepOutput<Self::PollReq, Self::Error> {
    let req = exec_inner_step!(self.inner.poll_req(snap, effects), Error::Inner)?;
    let addr = req.addr();
    let mut msg = Message::from(req.unwrap());

    let Some(value) = msg.oscore().cloned() else {
      if self.store.protects(&addr) && msg.code.kind() == CodeKind::Request {
        log_effect!(effects,
                    log::Level::Warn,
                    "unprotected request from protected peer {}",
                    addr);
        effects.push(Effect::Send(Self::unauthorized(&msg, addr, "oscore required")));
        return None;
      }

      return Some(Ok(Addrd(Req::from(msg), addr)));
    };

    let header = match CompressedHeader::from_bytes(value.as_bytes()) {
      | Ok(h) => h,
      | Err(_) => {
        let mut resp = Self::unauthorized(&msg, addr, "malformed oscore option");
        resp.data_mut().code = Code::BAD_OPTION;
        effects.push(Effect::Send(resp));
        return None;
      },
    };

    let kid = header.kid.clone().unwrap_or_default();
    let ctx = match self.store.context_for_kid(&addr, &kid) {
      | Ok(ctx) => ctx,
      | Err(_) => {
        log_effect!(effects,
                    log::Level::Warn,
                    "no security context for kid {:?} from {}",
                    kid,
                    addr);
        effects.push(Effect::Send(Self::unauthorized(&msg, addr, "security context not found")));
        return None;
      },
    };

    match ctx.unprotect_request(&mut msg, &header) {
      | Err(oscore::Error::Replay) => {
        log_effect!(effects,
                    log::Level::Warn,
                    "replayed request from {} rejected",
                    addr);
        effects.push(Effect::Send(Self::unauthorized(&msg, addr, "replay detected")));
        None
      },
      | Err(_) => {
        effects.push(Effect::Send(Self::unauthorized(&msg, addr, "decryption failed")));
        None
      },
      | Ok(crypto) => {
        let token = msg.token;
        self.store.remember_exchange(addr, token, crypto);

        if self.store
               .get_mut(&addr)
               .map(|c| c.needs_echo())
               .unwrap_or(false)
        {
          let verified = match msg.echo().cloned() {
            | Some(v) => self.store
                             .get_mut(&addr)
                             .map(|c| c.verify_echo(v.as_bytes()))
                             .unwrap_or(false),
            | None => false,
          };

          if !verified {
            // the 4.01 goes out through the pipe, which protects it
            // using the exchange we just remembered
            let challenge = self.store
                                .get_mut(&addr)
                                .and_then(|c| c.echo_challenge())
                                .unwrap_or_default();
            let mut resp = Self::unauthorized(&msg, addr, "");
            resp.data_mut().set_echo(challenge);
            effects.push(Effect::Send(resp));
            return None;
          }
        }

        Some(Ok(Addrd(Req::from(msg), addr)))
      },
    }
  }

  fn poll_resp(&mut self,
               snap: &Snapshot<P>,
               effects: &mut Vec<Effect>,
               token: Token,
               addr: SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error> {
    // a response held for B.1 may be releasable now that the peer
    // echoed our challenge
    if let Some(ix) = self.held
                          .iter()
                          .position(|m| m.addr() == addr && m.data().token == token)
    {
      let gated = self.store
                      .get_mut(&addr)
                      .map(|c| c.needs_echo())
                      .unwrap_or(false);

      if !gated {
        let held = self.held.remove(ix);
        return self.accept_response(held.unwrap(), addr, effects);
      }
    }

    let resp = exec_inner_step!(self.inner.poll_resp(snap, effects, token, addr), Error::Inner)?;

    if resp.data().msg().code.kind() == CodeKind::Empty {
      return Some(Ok(resp));
    }

    let from = resp.addr();
    self.accept_response(Message::from(resp.unwrap()), from, effects)
  }

  fn before_message_sent(&mut self,
                         snap: &Snapshot<P>,
                         effects: &mut Vec<Effect>,
                         msg: &mut Addrd<Message>)
                         -> Result<(), Self::Error> {
    let addr = msg.addr();

    if self.store.protects(&addr) && msg.data().oscore().is_none() {
      match msg.data().code.kind() {
        | CodeKind::Empty => (),
        | CodeKind::Request => {
          let token = msg.data().token;
          let crypto = self.store
                           .get_mut(&addr)
                           .expect("protects() implies presence")
                           .protect_request(msg.data_mut())
                           .map_err(Error::Oscore)?;
          self.store.remember_exchange(addr, token, crypto);
        },
        | CodeKind::Response => {
          if let Some(crypto) = self.store.exchange(&addr, &msg.data().token).cloned() {
            let ctx = self.store.get_mut(&addr).expect("protects() implies presence");
            let own_piv = msg.data().observe().is_some() || ctx.needs_echo();
            ctx.protect_response(msg.data_mut(), &crypto, own_piv)
               .map_err(Error::Oscore)?;
          }
        },
      }
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
