//! The endpoint façade: one [`Core`] owns the socket, the clock, the
//! step pipeline and the client-side bookkeeping, and exposes the
//! operations an application actually calls.
//!
//! `Core` is symmetric: the same instance can fire requests
//! ([`Core::get`], [`Core::send_req`]) and serve a [`Site`]
//! ([`Core::serve`]) off one socket.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;

use embedded_time::Instant;
use newt_msg::{characteristics, observe, Token, Type};
use rand::{Rng, SeedableRng};

mod error;
#[doc(inline)]
pub use error::*;

use crate::config::Config;
use crate::net::Addrd;
use crate::oscore::SecurityContext;
use crate::platform::{Effect, Message, Platform, PlatformTypes};
use crate::req::Req;
use crate::resp::Resp;
use crate::server::Site;
use crate::step::oscore::Security;
use crate::step::Runtime;
use crate::time::millis_since;

/// A CoAP endpoint: client and server over one socket.
///
/// The heavy lifting lives in the [`Runtime`] step chain; `Core` adds
/// what must be coordinated *across* exchanges: NSTART queueing,
/// cancellation, multicast response leisure, and shutdown.
#[allow(missing_debug_implementations)]
pub struct Core<P: PlatformTypes> {
  config: Config,
  steps: Runtime<P>,
  sock: P::Socket,
  clock: P::Clock,

  /// Outbound CONs waiting for the in-flight exchange to their
  /// remote to settle (NSTART)
  queued: HashMap<SocketAddr, VecDeque<Addrd<Message>>>,
  /// Exchanges the caller abandoned; a late response gets a RST
  cancelled: HashSet<(SocketAddr, Token)>,
  /// Observations we registered, by token, so cancel() can
  /// deregister instead of just dropping
  observing: HashMap<(SocketAddr, Token), String>,
  /// Responses being held for the multicast leisure period
  /// (millis-since-epoch due time)
  delayed: Vec<(u64, Addrd<Message>)>,
  /// Bytes of NON traffic sent per remote in the current
  /// one-second window (PROBING_RATE)
  non_budget: HashMap<SocketAddr, (u64, u32)>,
  multicast: bool,
  rand: rand_chacha::ChaCha8Rng,
  queue_token_counter: u64,
  stopped: bool,
}

impl<P: PlatformTypes> Platform<Runtime<P>> for Core<P> {
  type Types = P;
  type Error = Error<P>;

  fn log(&mut self, level: log::Level, msg: &str) -> Result<(), Self::Error> {
    log::log!(target: "newt", level, "{}", msg);
    Ok(())
  }

  fn config(&self) -> Config {
    self.config
  }

  fn steps_mut(&mut self) -> &mut Runtime<P> {
    &mut self.steps
  }

  fn socket(&self) -> &P::Socket {
    &self.sock
  }

  fn clock(&self) -> &P::Clock {
    &self.clock
  }
}

impl<P: PlatformTypes> Core<P> {
  /// Creates a new Core with the default runtime behavior
  pub fn new(clock: P::Clock, sock: P::Socket) -> Self {
    Self::new_config(Config::default(), clock, sock)
  }

  /// Create a new core with custom runtime behavior
  pub fn new_config(config: Config, clock: P::Clock, sock: P::Socket) -> Self {
    Self { rand: rand_chacha::ChaCha8Rng::seed_from_u64(config.msg.token_seed as u64),
           config,
           steps: Runtime::<P>::default(),
           sock,
           clock,
           queued: HashMap::new(),
           cancelled: HashSet::new(),
           observing: HashMap::new(),
           delayed: Vec::new(),
           non_budget: HashMap::new(),
           multicast: false,
           queue_token_counter: 0,
           stopped: false }
  }

  /// Protect all traffic with `remote` using `ctx`
  pub fn set_security_context(&mut self, remote: SocketAddr, ctx: SecurityContext) {
    self.steps.security_mut().insert(remote, ctx);
  }

  /// Treat this endpoint as a multicast responder: responses are
  /// delayed by a random leisure period (RFC7252 §8.2)
  pub fn set_multicast(&mut self, multicast: bool) {
    self.multicast = multicast;
  }

  fn now_millis(&self) -> Result<u64, Error<P>> {
    use embedded_time::Clock;

    self.clock
        .try_now()
        .map(|now| millis_since::<P::Clock>(now, Instant::new(0)))
        .map_err(|_| When::None.what(What::ClockError))
  }

  /// Would `size` more bytes of NON traffic to `addr` stay under
  /// PROBING_RATE for the current one-second window? Charges the
  /// budget when it does.
  fn non_budget_ok(&mut self, addr: SocketAddr, size: usize) -> Result<bool, Error<P>> {
    let now = self.now_millis()?;
    let rate = self.config.msg.probing_rate.0 as u32;
    let (window, spent) = self.non_budget.entry(addr).or_insert((now, 0));

    if now.saturating_sub(*window) >= 1_000 {
      *window = now;
      *spent = 0;
    }

    if *spent + size as u32 > rate {
      return Ok(false);
    }

    *spent += size as u32;
    Ok(true)
  }

  /// Park a message behind the traffic limits, pre-assigning a token
  /// so the caller can poll while it waits.
  fn park(&mut self, mut msg: Message, addr: SocketAddr) -> Token {
    if msg.token.0.is_empty() {
      // full-length, so it can't collide with the short tokens the
      // pipeline hands out
      self.queue_token_counter += 1;
      let mut material = Vec::with_capacity(16);
      material.extend(self.config.msg.token_seed.to_be_bytes());
      material.extend(self.queue_token_counter.to_be_bytes());
      msg.token = Token::opaque(&material);
    }

    let token = msg.token;
    self.queued.entry(addr).or_default().push_back(Addrd(msg, addr));
    token
  }

  /// Send a request, yielding the token to
  /// [`poll_resp`](Core::poll_resp) for.
  ///
  /// CONs beyond NSTART per remote queue behind the in-flight
  /// exchange; NONs beyond PROBING_RATE queue behind the byte
  /// budget. Queued requests get their token immediately.
  pub fn send_req(&mut self, req: Addrd<Req>) -> nb::Result<Token, Error<P>> {
    if self.stopped {
      return Err(nb::Error::Other(When::None.what(What::Shutdown)));
    }

    let addr = req.addr();

    let must_queue = match req.data().msg().ty {
      | Type::Con => self.steps.in_flight(&addr) >= self.config.nstart as usize,
      | Type::Non => {
        let size = req.data().msg().size();
        !self.non_budget_ok(addr, size).map_err(nb::Error::Other)?
      },
      | _ => false,
    };

    if must_queue {
      return Ok(self.park(Message::from(req.unwrap()), addr));
    }

    self.send_msg(req.map(Message::from)).map(|(_, token)| token)
  }

  /// Send a confirmable GET
  pub fn get(&mut self, addr: SocketAddr, path: &str) -> nb::Result<Token, Error<P>> {
    self.send_req(Addrd(Req::get(path), addr))
  }

  /// Send an observing GET; notifications arrive via
  /// [`poll_resp`](Core::poll_resp) on the yielded token until
  /// [`cancel`](Core::cancel)led.
  pub fn observe(&mut self, addr: SocketAddr, path: &str) -> nb::Result<Token, Error<P>> {
    let token = self.send_req(Addrd(Req::get(path).observing(), addr))?;
    self.observing.insert((addr, token), path.to_string());
    Ok(token)
  }

  fn flush_queue(&mut self, addr: SocketAddr) {
    loop {
      let Some(front) = self.queued.get(&addr).and_then(|q| q.front()) else {
        break;
      };

      let clear = match front.data().ty {
        | Type::Con => self.steps.in_flight(&addr) < self.config.nstart as usize,
        | _ => {
          let size = front.data().size();
          self.non_budget_ok(addr, size).unwrap_or(false)
        },
      };

      if !clear {
        break;
      }

      let Some(msg) = self.queued.get_mut(&addr).and_then(|q| q.pop_front()) else {
        break;
      };

      if let Err(e) = nb::block!(self.send_msg(msg.clone())) {
        log::warn!(target: "newt", "flushing queued request failed: {:?}", e);
      }
    }
  }

  /// Poll for the response to a previously sent request.
  pub fn poll_resp(&mut self, token: Token, addr: SocketAddr) -> nb::Result<Addrd<Resp>, Error<P>> {
    if self.stopped {
      return Err(nb::Error::Other(When::Polling.what(What::Shutdown)));
    }

    self.tick_delayed().map_err(nb::Error::Other)?;

    let polled = Platform::poll_resp(self, token, addr);
    if !matches!(&polled, Err(nb::Error::WouldBlock)) {
      // the exchange settled one way or the other
      self.flush_queue(addr);
    }
    let resp = polled?;

    if self.cancelled.remove(&(addr, token)) {
      let rst = resp.data().msg().reset();
      nb::block!(self.send_msg_raw(&Addrd(rst.clone(), addr)))?;
      return Err(nb::Error::Other(When::Polling.what(What::Cancelled)));
    }

    // a response with a critical option we don't understand fails
    // the exchange
    let unknown_critical = resp.data()
                               .msg()
                               .opts
                               .keys()
                               .find(|n| n.is_critical() && characteristics(**n).is_none())
                               .copied();
    if let Some(number) = unknown_critical {
      let rst = resp.data().msg().reset();
      nb::block!(self.send_msg_raw(&Addrd(rst.clone(), addr)))?;
      return Err(nb::Error::Other(When::Polling.what(What::BadOption(number))));
    }

    Ok(resp)
  }

  /// Abandon an exchange.
  ///
  /// For observations this deregisters (Observe=1 on the same
  /// token); for in-flight requests it stops retransmission and a
  /// late response will be met with a RST.
  pub fn cancel(&mut self, token: Token, addr: SocketAddr) -> nb::Result<(), Error<P>> {
    match self.observing.remove(&(addr, token)) {
      | Some(path) => {
        let mut msg = Message::from(Req::get(&path));
        msg.token = token;
        msg.set_observe(u64::from(observe::Action::Deregister));
        self.send_msg(Addrd(msg, addr)).map(|_| ())
      },
      | None => {
        self.steps.forget_token(addr, token);
        self.cancelled.insert((addr, token));
        Ok(())
      },
    }
  }

  /// Poll for one inbound request and answer it from `site`.
  ///
  /// `Ok(())` when a request was handled, `WouldBlock` when there was
  /// nothing to do (timers still tick).
  pub fn serve(&mut self, site: &mut Site) -> nb::Result<(), Error<P>> {
    if self.stopped {
      return Err(nb::Error::Other(When::Polling.what(What::Shutdown)));
    }

    self.tick_delayed().map_err(nb::Error::Other)?;

    let req = Platform::poll_req(self)?;
    let resp = site.dispatch(&req);

    if self.multicast {
      let leisure = self.config.msg.multicast_response_leisure.0;
      let due = self.now_millis().map_err(nb::Error::Other)? + self.rand.gen_range(0..=leisure);
      self.delayed.push((due, resp));
      Ok(())
    } else {
      self.send_msg(resp).map(|_| ())
    }
  }

  fn tick_delayed(&mut self) -> Result<(), Error<P>> {
    if self.delayed.is_empty() {
      return Ok(());
    }

    let now = self.now_millis()?;
    let due: Vec<Addrd<Message>> = {
      let (due, waiting) = std::mem::take(&mut self.delayed)
                             .into_iter()
                             .partition(|(at, _)| *at <= now);
      self.delayed = waiting;
      due.into_iter().map(|(_, msg)| msg).collect()
    };

    for msg in due {
      nb::block!(self.send_msg(msg.clone()))?;
    }

    Ok(())
  }

  /// Announce a new representation of `path` to its observers
  pub fn notify(&mut self, path: &str) -> Result<(), Error<P>> {
    Platform::notify(self, path)
  }

  /// Announce that `path` is gone, tearing observations down with a
  /// terminal notification
  pub fn notify_removed(&mut self, path: &str) -> Result<(), Error<P>> {
    Platform::notify_removed(self, path)
  }

  /// Tear the endpoint down: drain responses still being held back,
  /// fail everything still pending, stop accepting work, and persist
  /// every OSCORE sender sequence number.
  pub fn shutdown(&mut self) -> Result<(), Error<P>> {
    // held-back responses go out now rather than never
    for (_, msg) in std::mem::take(&mut self.delayed) {
      if let Err(e) = nb::block!(self.send_msg(msg.clone())) {
        log::warn!(target: "newt", "draining response at shutdown failed: {:?}", e);
      }
    }

    self.stopped = true;
    self.queued.clear();

    self.steps
        .security_mut()
        .shutdown()
        .map_err(|e| When::None.what(What::Oscore(e)))
  }

  /// Push a prebuilt effect through the executor (mostly useful in
  /// tests and tools)
  pub fn exec(&mut self, effect: Effect) -> nb::Result<(), Error<P>> {
    self.exec_1(&effect)
  }
}
