use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

/// The registered `coap` port
pub const DEFAULT_PORT: u16 = 5683;

/// The registered `coaps` port
pub const DEFAULT_SECURE_PORT: u16 = 5684;

/// Data that came from (or is headed to) a network socket
#[derive(PartialEq, PartialOrd, Eq, Ord, Hash, Debug, Clone, Copy)]
pub struct Addrd<T>(pub T, pub SocketAddr);

impl<T> Addrd<T> {
  /// Borrow the contents of this Addressed
  pub fn as_ref(&self) -> Addrd<&T> {
    Addrd(self.data(), self.addr())
  }

  /// Discard the socket and get the data in this Addressed
  pub fn unwrap(self) -> T {
    self.0
  }

  /// Map the data contained in this Addressed
  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Addrd<R> {
    Addrd(f(self.0), self.1)
  }

  /// Map the data contained in this Addressed (with a copy of the address)
  pub fn map_with_addr<R>(self, f: impl FnOnce(T, SocketAddr) -> R) -> Addrd<R> {
    Addrd(f(self.0, self.1), self.1)
  }

  /// Borrow the contents of the addressed item
  pub fn data(&self) -> &T {
    &self.0
  }

  /// Mutably borrow the contents of the addressed item
  pub fn data_mut(&mut self) -> &mut T {
    &mut self.0
  }

  /// Copy the socket address for the data
  pub fn addr(&self) -> SocketAddr {
    self.1
  }

  /// Turn the entire structure into something else
  pub fn fold<R>(self, f: impl FnOnce(T, SocketAddr) -> R) -> R {
    f(self.0, self.1)
  }
}

impl<T> AsMut<T> for Addrd<T> {
  fn as_mut(&mut self) -> &mut T {
    &mut self.0
  }
}

/// A CoAP network socket
///
/// This mirrors `std::net::UdpSocket`, phrased non-blockingly so
/// that mock sockets and exotic transports can implement it too.
pub trait Socket: Sized {
  /// The error yielded by socket operations
  type Error: core::fmt::Debug;

  /// Bind the socket to an address, without any spooky magic things like
  /// auto-detecting and joining multicast groups.
  ///
  /// Implementors of `bind_raw` should:
  ///  - yield a socket in a non-blocking state
  ///  - bind to the first address if `addr` yields multiple addresses
  fn bind_raw<A: ToSocketAddrs>(addr: A) -> Result<Self, Self::Error>;

  /// Binds the socket to a local address.
  ///
  /// This will automatically invoke [`Socket::join_multicast`] if the
  /// address is a multicast address, and should yield a non-blocking
  /// socket.
  fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, Self::Error> {
    let addr = addr.to_socket_addrs()
                   .ok()
                   .and_then(|mut a| a.next())
                   .expect("bind address resolves");

    let sock = Self::bind_raw(addr)?;

    match addr.ip() {
      | ip if ip.is_multicast() => sock.join_multicast(ip)?,
      | _ => (),
    }

    Ok(sock)
  }

  /// Send a message to a remote address
  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), Self::Error>;

  /// Pull a buffered datagram from the socket, along with the address of
  /// the sender.
  ///
  /// It is expected that (like [`std::net::UdpSocket`]) if the message is
  /// larger than the buffer, the extra bytes are dropped and not
  /// considered an error condition.
  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error>;

  /// Look at a buffered datagram without clearing the receive queue.
  fn peek(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error>;

  /// Join a multicast group
  fn join_multicast(&self, addr: IpAddr) -> Result<(), Self::Error>;

  /// Get the local address this socket was bound to
  fn local_addr(&self) -> Result<SocketAddr, Self::Error>;

  /// Poll the socket for a datagram, `None` meaning "nothing to read
  /// right now"
  fn poll(&self) -> Result<Option<Addrd<Vec<u8>>>, Self::Error> {
    let mut buf = vec![0u8; 1152];

    match self.recv(&mut buf) {
      | Ok(Addrd(n, addr)) => {
        buf.truncate(n);
        Ok(Some(Addrd(buf, addr)))
      },
      | Err(nb::Error::WouldBlock) => Ok(None),
      | Err(nb::Error::Other(e)) => Err(e),
    }
  }
}

/// Helper constants and functions for creating multicast addresses
pub mod multicast {
  use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4};

  /// IPv4 "All CoAP devices" multicast address.
  pub const ALL_COAP_DEVICES_IP: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 187);

  /// IPv6 link-local "All CoAP nodes" multicast group (ff02::fd).
  pub const ALL_COAP_NODES_LINK_LOCAL: Ipv6Addr =
    Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfd);

  /// IPv6 site-local "All CoAP nodes" multicast group (ff05::fd).
  pub const ALL_COAP_NODES_SITE_LOCAL: Ipv6Addr =
    Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 0, 0xfd);

  /// Create a SocketAddr (IP + port) with the [`ALL_COAP_DEVICES_IP`] address
  pub const fn all_coap_devices(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(ALL_COAP_DEVICES_IP, port))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn addrd_combinators() {
    let addr: SocketAddr = "192.168.0.1:5683".parse().unwrap();
    let a = Addrd(21u32, addr);
    assert_eq!(a.map(|n| n * 2), Addrd(42, addr));
    assert_eq!(a.fold(|n, addr| (n, addr.port())), (21, 5683));
    assert_eq!(a.as_ref().data(), &&21);
  }
}
