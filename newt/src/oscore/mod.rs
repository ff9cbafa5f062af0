//! Object Security for Constrained RESTful Environments
//! ([RFC8613](https://datatracker.ietf.org/doc/html/rfc8613)).
//!
//! This module owns the cryptography and state: key derivation,
//! nonce construction, AEAD sealing, replay windows, and the
//! persistence of sender sequence numbers. The
//! [`step::oscore`](crate::step::oscore) step wires it into the
//! message pipeline.

use std::collections::HashMap;
use std::net::SocketAddr;

use newt_msg::{no_repeat, opt, OptMap, Payload, Token};

/// COSE structures & the compressed OSCORE option header
pub mod cose;

/// The security context and its key schedule
pub mod ctx;

/// State file layout
pub mod persist;

/// Anti-replay window
pub mod replay;

pub use cose::CompressedHeader;
pub use ctx::{RequestCrypto, SecurityContext};
pub use persist::{ContextStore, SecretFile, SequenceFile};
pub use replay::ReplayWindow;

/// Things that can go wrong protecting or unprotecting a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
  /// AEAD verification (or encryption) failed
  ProtectionInvalid,
  /// A protected message was expected but this one isn't
  NotAProtectedMessage,
  /// The Partial IV was already seen, or fell off the replay window
  Replay,
  /// An incoming message referenced a kid we have no context for
  NoContextForKid(Vec<u8>),
  /// The OSCORE option value does not parse
  MalformedOscoreOption,
  /// The decrypted inner message does not parse
  MalformedInnerMessage,
  /// Sender/Recipient ID too long for the nonce layout
  IdTooLong,
  /// The 40-bit sender sequence number space is used up
  SequenceExhausted,
  /// HKDF refused the requested output length
  KeyDerivation,
  /// Only AES-CCM-16-64-128 / HKDF-SHA256 are implemented
  UnsupportedAlgorithm,
  /// Reading or writing the state files failed
  Persistence(std::io::ErrorKind),
}

/// Is this option Class U (unprotected, stays on the outer message)?
///
/// Everything else is Class E and moves into the encrypted inner
/// message; Observe is special-cased in [`inner_plaintext`] because
/// it lives in both.
pub fn is_class_u(n: newt_msg::OptNumber) -> bool {
  matches!(n,
           no_repeat::HOST
           | no_repeat::PORT
           | no_repeat::PROXY_URI
           | no_repeat::PROXY_SCHEME
           | no_repeat::OSCORE)
}

/// Strip a message down to its outer half, returning the serialized
/// inner message (code ‖ Class E options ‖ 0xFF ‖ payload) that the
/// AEAD will seal.
pub(crate) fn inner_plaintext(msg: &mut newt_msg::Message) -> Vec<u8> {
  let opts = std::mem::take(&mut msg.opts);
  let mut inner = OptMap::new();
  let mut outer = OptMap::new();

  for (n, vs) in opts {
    if n == no_repeat::OBSERVE {
      // Observe rides on both: outer for the message layer,
      // inner under integrity protection
      outer.insert(n, vs.clone());
      inner.insert(n, vs);
    } else if is_class_u(n) {
      outer.insert(n, vs);
    } else {
      inner.insert(n, vs);
    }
  }

  msg.opts = outer;

  let mut plaintext = vec![u8::from(msg.code)];
  opt::extend_opts_bytes(&inner, &mut plaintext);

  let payload = std::mem::take(&mut msg.payload);
  if !payload.is_empty() {
    plaintext.push(0xFF);
    plaintext.extend(payload.0);
  }

  plaintext
}

/// Inverse of [`inner_plaintext`]: overlay the decrypted inner
/// message back onto the outer shell.
pub(crate) fn restore_inner(msg: &mut newt_msg::Message, plaintext: &[u8]) -> Result<(), Error> {
  let (code, rest) = plaintext.split_first().ok_or(Error::MalformedInnerMessage)?;

  let mut cursor = newt_msg::Cursor::new(rest);
  let (inner_opts, saw_marker) =
    opt::try_consume_opts(&mut cursor).map_err(|_| Error::MalformedInnerMessage)?;
  let payload = cursor.take_until_end().to_vec();

  if saw_marker && payload.is_empty() {
    return Err(Error::MalformedInnerMessage);
  }

  msg.code = newt_msg::Code::from(*code);
  msg.remove(no_repeat::OSCORE);
  // inner options win over any outer leftovers (notably Observe)
  for (n, vs) in inner_opts {
    msg.opts.insert(n, vs);
  }
  msg.payload = Payload(payload);

  Ok(())
}

/// The registry of security contexts an endpoint holds, keyed by the
/// remote they protect traffic with, plus the per-exchange nonce
/// bookkeeping responses need.
///
/// This is deliberately explicit state threaded through the step
/// chain, not an ambient process-wide table.
#[derive(Debug, Default)]
pub struct SecurityStore {
  by_remote: HashMap<SocketAddr, SecurityContext>,
  exchanges: HashMap<(SocketAddr, Token), RequestCrypto>,
}

impl SecurityStore {
  /// Protect traffic with `remote` using `ctx`
  pub fn insert(&mut self, remote: SocketAddr, ctx: SecurityContext) {
    self.by_remote.insert(remote, ctx);
  }

  /// Stop protecting traffic with `remote`, yielding the context
  pub fn remove(&mut self, remote: &SocketAddr) -> Option<SecurityContext> {
    self.by_remote.remove(remote)
  }

  /// The context for a remote, if any
  pub fn get_mut(&mut self, remote: &SocketAddr) -> Option<&mut SecurityContext> {
    self.by_remote.get_mut(remote)
  }

  /// Is there a context for this remote?
  pub fn protects(&self, remote: &SocketAddr) -> bool {
    self.by_remote.contains_key(remote)
  }

  /// The context for an inbound message: the remote's context when
  /// its Recipient ID matches the presented kid, otherwise any
  /// context that recognizes the kid.
  pub fn context_for_kid(&mut self,
                         remote: &SocketAddr,
                         kid: &[u8])
                         -> Result<&mut SecurityContext, Error> {
    let direct = self.by_remote
                     .get(remote)
                     .map(|c| c.recipient_id() == kid)
                     .unwrap_or(false);

    if direct {
      return Ok(self.by_remote.get_mut(remote).unwrap());
    }

    self.by_remote
        .values_mut()
        .find(|c| c.recipient_id() == kid)
        .ok_or_else(|| Error::NoContextForKid(kid.to_vec()))
  }

  /// Remember the nonce material a request established
  pub fn remember_exchange(&mut self, remote: SocketAddr, token: Token, crypto: RequestCrypto) {
    self.exchanges.insert((remote, token), crypto);
  }

  /// The nonce material for an exchange, if we are part of one
  pub fn exchange(&self, remote: &SocketAddr, token: &Token) -> Option<&RequestCrypto> {
    self.exchanges.get(&(*remote, *token))
  }

  /// Drop the bookkeeping for an exchange
  pub fn forget_exchange(&mut self, remote: &SocketAddr, token: &Token) {
    self.exchanges.remove(&(*remote, *token));
  }

  /// Persist every context that has a store, marking them cleanly
  /// shut down
  pub fn shutdown(&self) -> Result<(), Error> {
    self.by_remote.values().try_for_each(|c| c.shutdown())
  }
}
