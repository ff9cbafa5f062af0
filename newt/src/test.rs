#![allow(dead_code)]

use core::cell::Cell;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex};

use embedded_time::rate::Fraction;
use embedded_time::Instant;

use crate::net::{Addrd, Socket};

/// Build an [`Addrd<crate::platform::Message>`] with very little typing.
#[macro_export]
macro_rules! msg {
  (CON GET x.x.x.x:$port:literal) => { $crate::test::msg!(CON {0 . 1} x.x.x.x:$port) };
  (CON PUT x.x.x.x:$port:literal) => { $crate::test::msg!(CON {0 . 2} x.x.x.x:$port) };
  (CON POST x.x.x.x:$port:literal) => { $crate::test::msg!(CON {0 . 3} x.x.x.x:$port) };
  (CON DELETE x.x.x.x:$port:literal) => { $crate::test::msg!(CON {0 . 4} x.x.x.x:$port) };
  (NON GET x.x.x.x:$port:literal) => { $crate::test::msg!(NON {0 . 1} x.x.x.x:$port) };

  (CON {$c:literal . $d:literal} x.x.x.x:$port:literal) => {{
    $crate::test::msg!({newt_msg::Type::Con} {newt_msg::Code::new($c, $d)} x.x.x.x:$port)
  }};
  (NON {$c:literal . $d:literal} x.x.x.x:$port:literal) => {{
    $crate::test::msg!({newt_msg::Type::Non} {newt_msg::Code::new($c, $d)} x.x.x.x:$port)
  }};
  (ACK {$c:literal . $d:literal} x.x.x.x:$port:literal) => {{
    $crate::test::msg!({newt_msg::Type::Ack} {newt_msg::Code::new($c, $d)} x.x.x.x:$port)
  }};

  ({$ty:expr} {$code:expr} x.x.x.x:$port:literal) => {{
    use std::net::*;

    use newt_msg::*;

    use $crate::net::Addrd;

    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 1), $port));

    Addrd(Message { ver: Default::default(),
                    ty: $ty,
                    token: Token(Default::default()),
                    code: $code,
                    id: Id(0),
                    opts: Default::default(),
                    payload: Payload(Default::default()) },
          addr)
  }};
}

pub use msg;

pub fn dummy_addr() -> SocketAddr {
  SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 1), 8080))
}

pub fn dummy_addr_2() -> SocketAddr {
  SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 2), 8080))
}

pub fn dummy_addr_3() -> SocketAddr {
  SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 3), 8080))
}

/// [`crate::platform::PlatformTypes`] implementor using mocks for
/// clock and sock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform;

impl crate::platform::PlatformTypes for Platform {
  type Clock = ClockMock;
  type Socket = SockMock;
}

/// A clock that is always at whatever millisecond you last set it to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockMock(pub Cell<u64>);

impl Default for ClockMock {
  fn default() -> Self {
    Self::new()
  }
}

impl ClockMock {
  pub fn new() -> Self {
    Self(Cell::new(0))
  }

  pub fn set(&self, to_millis: u64) {
    self.0.set(to_millis);
  }

  pub fn instant(millis: u64) -> Instant<Self> {
    Instant::new(millis)
  }
}

impl embedded_time::Clock for ClockMock {
  type T = u64;

  // 1 tick == 1 millisecond
  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000);

  fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
    Ok(Instant::new(self.0.get()))
  }
}

/// A mocked socket
#[derive(Debug, Default)]
pub struct SockMock {
  /// Inbound bytes from remote sockets. Address represents the sender
  pub rx: Arc<Mutex<Vec<Addrd<Vec<u8>>>>>,
  /// Outbound bytes to remote sockets. Address represents the destination
  pub tx: Arc<Mutex<Vec<Addrd<Vec<u8>>>>>,
}

impl SockMock {
  pub fn new() -> Self {
    Self::default()
  }

  /// Move everything `from` has sent into `to`'s receive queue,
  /// restamping the address with the sender's (`from_addr`).
  ///
  /// Returns how many datagrams moved.
  pub fn transfer(from: &SockMock, to: &SockMock, from_addr: SocketAddr) -> usize {
    let mut out = from.tx.lock().unwrap();
    let moved = out.len();

    to.rx
      .lock()
      .unwrap()
      .extend(out.drain(..).map(|Addrd(bytes, _)| Addrd(bytes, from_addr)));

    moved
  }

  /// Drop everything `from` has sent on the floor (a lossy network)
  pub fn drop_outbound(from: &SockMock) -> usize {
    let mut out = from.tx.lock().unwrap();
    let dropped = out.len();
    out.clear();
    dropped
  }
}

impl Socket for SockMock {
  type Error = Option<()>;

  fn bind_raw<A: std::net::ToSocketAddrs>(_: A) -> Result<Self, Self::Error> {
    Ok(Self::new())
  }

  fn recv(&self, buf: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error> {
    let mut rx = self.rx.lock().unwrap();

    if rx.is_empty() {
      return Err(nb::Error::WouldBlock);
    }

    let dgram = rx.remove(0);

    dgram.data()
         .iter()
         .take(buf.len())
         .enumerate()
         .for_each(|(ix, byte)| buf[ix] = *byte);

    Ok(dgram.map(|bytes| bytes.len()))
  }

  fn peek(&self, buf: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error> {
    let rx = self.rx.lock().unwrap();

    match rx.first() {
      | None => Err(nb::Error::WouldBlock),
      | Some(dgram) => {
        dgram.data()
             .iter()
             .take(buf.len())
             .enumerate()
             .for_each(|(ix, byte)| buf[ix] = *byte);
        Ok(dgram.as_ref().map(|bytes| bytes.len()))
      },
    }
  }

  fn send(&self, buf: Addrd<&[u8]>) -> nb::Result<(), Self::Error> {
    self.tx.lock().unwrap().push(buf.map(Vec::from));
    Ok(())
  }

  fn join_multicast(&self, _: std::net::IpAddr) -> Result<(), Self::Error> {
    Ok(())
  }

  fn local_addr(&self) -> Result<SocketAddr, Self::Error> {
    Ok(dummy_addr())
  }
}
