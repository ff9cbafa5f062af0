use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};

use crate::net::{multicast, Addrd, Socket};

fn io_to_nb(err: io::Error) -> nb::Error<io::Error> {
  match err.kind() {
    | io::ErrorKind::WouldBlock => nb::Error::WouldBlock,
    | _ => nb::Error::Other(err),
  }
}

impl Socket for UdpSocket {
  type Error = io::Error;

  fn bind_raw<A: ToSocketAddrs>(addr: A) -> Result<Self, Self::Error> {
    let sock = UdpSocket::bind(addr)?;
    sock.set_nonblocking(true)?;
    Ok(sock)
  }

  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), Self::Error> {
    self.send_to(msg.data(), msg.addr())
        .map(|_| ())
        .map_err(io_to_nb)
  }

  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error> {
    self.recv_from(buffer)
        .map(|(n, addr)| Addrd(n, addr))
        .map_err(io_to_nb)
  }

  fn peek(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error> {
    self.peek_from(buffer)
        .map(|(n, addr)| Addrd(n, addr))
        .map_err(io_to_nb)
  }

  fn join_multicast(&self, addr: IpAddr) -> Result<(), Self::Error> {
    match addr {
      | IpAddr::V4(addr) => self.join_multicast_v4(&addr, &std::net::Ipv4Addr::UNSPECIFIED),
      | IpAddr::V6(addr) => self.join_multicast_v6(&addr, 0),
    }
  }

  fn local_addr(&self) -> Result<SocketAddr, Self::Error> {
    UdpSocket::local_addr(self)
  }
}

/// Bind a server socket that also receives the "All CoAP Nodes"
/// multicast traffic on suitable interfaces: ff02::fd and ff05::fd
/// for IPv6 sockets, 224.0.1.187 for IPv4.
///
/// Link-local destinations accept a zone in the destination address;
/// joining with interface 0 leaves the zone selection to the kernel.
pub fn bind_multicast<A: ToSocketAddrs>(addr: A) -> io::Result<UdpSocket> {
  let addr = addr.to_socket_addrs()?
                 .next()
                 .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address"))?;

  let sock = <UdpSocket as Socket>::bind_raw(addr)?;

  match addr {
    | SocketAddr::V4(_) => {
      sock.join_multicast_v4(&multicast::ALL_COAP_DEVICES_IP,
                             &std::net::Ipv4Addr::UNSPECIFIED)?;
    },
    | SocketAddr::V6(_) => {
      sock.join_multicast_v6(&multicast::ALL_COAP_NODES_LINK_LOCAL, 0)?;
      sock.join_multicast_v6(&multicast::ALL_COAP_NODES_SITE_LOCAL, 0)?;
    },
  }

  Ok(sock)
}
