//! Transport selection: a declared priority list of carriers, with
//! environment overrides.
//!
//! An outgoing URI is dispatched to the first transport in the list
//! that claims its scheme; the server side binds every transport in
//! its list. The lists come from `NEWT_CLIENT_TRANSPORT` /
//! `NEWT_SERVER_TRANSPORT` (colon-separated names, e.g.
//! `oscore:udp6:udp4`) when set.

use std::net::SocketAddr;

/// DTLS posture of a transport.
///
/// Only a tag: this build carries no DTLS itself, but call sites
/// that must refuse to fall back to plaintext can say so.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Secure {
  /// Opt in to DTLS, if a transport supports it
  IfSupported,
  /// Explicitly opt out of DTLS
  No,
}

/// A carrier of encoded datagrams this build knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
  /// OSCORE-protected CoAP over UDP (`coap` URIs with a configured
  /// security context)
  Oscore,
  /// CoAP over UDP/IPv6
  Udp6,
  /// CoAP over UDP/IPv4
  Udp4,
}

impl Transport {
  fn parse(name: &str) -> Option<Transport> {
    match name {
      | "oscore" => Some(Transport::Oscore),
      | "udp6" | "simple6" => Some(Transport::Udp6),
      | "udp4" | "simple4" => Some(Transport::Udp4),
      | _ => None,
    }
  }

  /// Does this transport carry `scheme` traffic to `remote`?
  pub fn claims(&self, scheme: &str, remote: &SocketAddr) -> bool {
    match self {
      | Transport::Oscore => scheme == "coap",
      | Transport::Udp6 => scheme == "coap" && remote.is_ipv6(),
      | Transport::Udp4 => scheme == "coap" && remote.is_ipv4(),
    }
  }
}

/// An ordered preference list of transports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transports(Vec<Transport>);

impl Default for Transports {
  fn default() -> Self {
    Self(vec![Transport::Oscore, Transport::Udp6, Transport::Udp4])
  }
}

impl Transports {
  /// Parse a colon-separated list, skipping (and reporting) names
  /// this build does not carry
  pub fn parse(list: &str) -> (Transports, Vec<String>) {
    let mut known = vec![];
    let mut unknown = vec![];

    for name in list.split(':').filter(|n| !n.is_empty()) {
      match Transport::parse(name) {
        | Some(t) => known.push(t),
        | None => unknown.push(name.to_string()),
      }
    }

    (Transports(known), unknown)
  }

  /// The client-side list: `NEWT_CLIENT_TRANSPORT` or the default
  pub fn client_from_env() -> Transports {
    Self::from_env("NEWT_CLIENT_TRANSPORT")
  }

  /// The server-side list: `NEWT_SERVER_TRANSPORT` or the default
  pub fn server_from_env() -> Transports {
    Self::from_env("NEWT_SERVER_TRANSPORT")
  }

  fn from_env(var: &str) -> Transports {
    match std::env::var(var) {
      | Ok(list) => {
        let (transports, unknown) = Self::parse(&list);
        for name in unknown {
          log::warn!(target: "newt", "{}: unknown transport {:?} skipped", var, name);
        }
        transports
      },
      | Err(_) => Transports::default(),
    }
  }

  /// The first transport claiming this scheme + remote
  pub fn dispatch(&self, scheme: &str, remote: &SocketAddr) -> Option<Transport> {
    self.0.iter().find(|t| t.claims(scheme, remote)).copied()
  }

  /// The list, in priority order
  pub fn list(&self) -> &[Transport] {
    &self.0
  }
}

/// Verify that the transports the default configuration names are
/// actually available in this build.
///
/// Missing pieces are warnings, unless `NEWT_DEFAULTS_EXPECT_ALL` is
/// set, in which case they are hard errors.
pub fn defaults_self_check() -> Result<(), Vec<String>> {
  let expect_all = std::env::var_os("NEWT_DEFAULTS_EXPECT_ALL").is_some();
  let mut missing = vec![];

  for (var, list) in [("NEWT_CLIENT_TRANSPORT", std::env::var("NEWT_CLIENT_TRANSPORT")),
                      ("NEWT_SERVER_TRANSPORT", std::env::var("NEWT_SERVER_TRANSPORT"))]
  {
    if let Ok(list) = list {
      let (_, unknown) = Transports::parse(&list);
      missing.extend(unknown.into_iter().map(|name| format!("{}: {}", var, name)));
    }
  }

  match (missing.is_empty(), expect_all) {
    | (true, _) => Ok(()),
    | (false, true) => Err(missing),
    | (false, false) => {
      for m in &missing {
        log::warn!(target: "newt", "defaults self-check: {} not available", m);
      }
      Ok(())
    },
  }
}
