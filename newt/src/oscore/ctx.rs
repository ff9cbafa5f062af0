use aes::Aes128;
use ccm::aead::generic_array::GenericArray;
use ccm::aead::{Aead, KeyInit, Payload as AeadPayload};
use ccm::consts::{U13, U8};
use ccm::Ccm;
use hkdf::Hkdf;
use sha2::Sha256;

use super::cose::{enc_structure, kdf_info, CompressedHeader};
use super::persist::{ContextStore, SecretFile, SequenceFile};
use super::replay::ReplayWindow;
use super::Error;

/// AES-CCM-16-64-128: 128-bit key
pub const KEY_LEN: usize = 16;

/// AES-CCM-16-64-128: 13-byte nonce
pub const NONCE_LEN: usize = 13;

/// Partial IVs are 1-5 bytes on the wire, bounding the sender
/// sequence number to 2^40 - 1
pub const MAX_PIV_LEN: usize = 5;

/// Sender/Recipient IDs must fit the nonce layout
pub const MAX_ID_LEN: usize = NONCE_LEN - 6;

#[allow(non_camel_case_types)]
type AesCcm16_64_128 = Ccm<Aes128, U8, U13>;

/// Encode a sequence number as a Partial IV: minimum-length
/// big-endian, with zero encoding as a single zero byte.
pub fn encode_piv(n: u64) -> Vec<u8> {
  let bytes = n.to_be_bytes();
  let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
  bytes[skip..].to_vec()
}

/// Decode a Partial IV back to a sequence number
pub fn decode_piv(bytes: &[u8]) -> Result<u64, Error> {
  if bytes.is_empty() || bytes.len() > MAX_PIV_LEN {
    return Err(Error::MalformedOscoreOption);
  }

  Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
}

fn next_power_of_two_above(n: u64) -> u64 {
  (n + 1).next_power_of_two()
}

/// The AEAD nonce of RFC8613 §5.2:
/// `(len(id_piv) ‖ pad ‖ id_piv ‖ pad ‖ piv) XOR common_iv`
fn nonce(id_piv: &[u8], piv: &[u8], common_iv: &[u8; NONCE_LEN]) -> Result<[u8; NONCE_LEN], Error> {
  if id_piv.len() > MAX_ID_LEN {
    return Err(Error::IdTooLong);
  }
  if piv.is_empty() || piv.len() > MAX_PIV_LEN {
    return Err(Error::MalformedOscoreOption);
  }

  let mut n = [0u8; NONCE_LEN];
  n[0] = id_piv.len() as u8;
  n[8 - id_piv.len()..8].copy_from_slice(id_piv);
  n[NONCE_LEN - piv.len()..].copy_from_slice(piv);

  n.iter_mut().zip(common_iv).for_each(|(b, iv)| *b ^= iv);
  Ok(n)
}

fn seal(key: &[u8; KEY_LEN],
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        plaintext: &[u8])
        -> Result<Vec<u8>, Error> {
  AesCcm16_64_128::new(GenericArray::from_slice(key))
    .encrypt(GenericArray::from_slice(nonce),
             AeadPayload { msg: plaintext,
                           aad })
    .map_err(|_| Error::ProtectionInvalid)
}

fn open(key: &[u8; KEY_LEN],
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        ciphertext: &[u8])
        -> Result<Vec<u8>, Error> {
  AesCcm16_64_128::new(GenericArray::from_slice(key))
    .decrypt(GenericArray::from_slice(nonce),
             AeadPayload { msg: ciphertext,
                           aad })
    .map_err(|_| Error::ProtectionInvalid)
}

/// The nonce inputs a request established, which its responses
/// reuse: the request's kid and Partial IV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestCrypto {
  /// The kid of the request sender
  pub kid: Vec<u8>,
  /// The request's Partial IV
  pub piv: Vec<u8>,
}

/// Whether the peer has proven freshness since we lost our replay
/// window (RFC8613 appendix B.1.2, via the RFC9175 Echo option).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EchoState {
  /// Normal operation
  Verified,
  /// Requests are only accepted when they echo this challenge
  Pending([u8; 8]),
}

/// A complete OSCORE security context: the derived keys, the sender
/// sequence number, and the recipient's replay window
/// ([RFC8613 §3.1](https://datatracker.ietf.org/doc/html/rfc8613#section-3.1)).
///
/// The sequence number discipline is the load-bearing part: a
/// sequence number is only ever handed out after the persisted
/// high water mark has moved past it, so no value can be reused
/// across a crash, at the price of burning a batch of numbers per
/// flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityContext {
  secret: SecretFile,
  sender_key: [u8; KEY_LEN],
  recipient_key: [u8; KEY_LEN],
  common_iv: [u8; NONCE_LEN],
  next_seq: u64,
  persisted_until: u64,
  replay: ReplayWindow,
  store: Option<ContextStore>,
  echo: EchoState,
}

impl SecurityContext {
  /// Derive a fresh, ephemeral context from its pre-shared inputs.
  ///
  /// Nothing is persisted; see [`SecurityContext::load`] for the
  /// durable variant.
  pub fn new(secret: SecretFile) -> Result<Self, Error> {
    if secret.sender_id.len() > MAX_ID_LEN || secret.recipient_id.len() > MAX_ID_LEN {
      return Err(Error::IdTooLong);
    }
    if secret.aead != "AES-CCM-16-64-128" || secret.hkdf != "HKDF-SHA256" {
      return Err(Error::UnsupportedAlgorithm);
    }

    let derive = |id: &[u8], kind: &str, len: usize| -> Result<Vec<u8>, Error> {
      let hk = Hkdf::<Sha256>::new(Some(&secret.master_salt), &secret.master_secret);
      let info = kdf_info(id, secret.id_context.as_deref(), kind, len);
      let mut okm = vec![0u8; len];
      hk.expand(&info, &mut okm).map_err(|_| Error::KeyDerivation)?;
      Ok(okm)
    };

    let mut sender_key = [0u8; KEY_LEN];
    sender_key.copy_from_slice(&derive(&secret.sender_id, "Key", KEY_LEN)?);

    let mut recipient_key = [0u8; KEY_LEN];
    recipient_key.copy_from_slice(&derive(&secret.recipient_id, "Key", KEY_LEN)?);

    let mut common_iv = [0u8; NONCE_LEN];
    common_iv.copy_from_slice(&derive(&[], "IV", NONCE_LEN)?);

    Ok(Self { secret,
              sender_key,
              recipient_key,
              common_iv,
              next_seq: 0,
              persisted_until: 0,
              replay: ReplayWindow::new(),
              store: None,
              echo: EchoState::Verified })
  }

  /// Load a context from its persistence directory.
  ///
  /// The stored next-sequence-number is advanced by the store's
  /// batch size (numbers reserved by the last flush may have been
  /// used without further writes). A context that did not shut
  /// down cleanly additionally skips ahead to the next power of
  /// two and demands an Echo round trip before accepting traffic.
  pub fn load(store: ContextStore) -> Result<Self, Error> {
    let secret = store.read_secret().map_err(|e| Error::Persistence(e.kind()))?;
    let mut ctx = Self::new(secret)?;

    match store.read_sequence() {
      | Ok(seq) => {
        ctx.next_seq = seq.next + store.batch;
        ctx.replay = ReplayWindow::from_parts(seq.high, seq.bitmask);

        if !seq.clean {
          ctx.next_seq = next_power_of_two_above(ctx.next_seq);
          ctx.replay = ReplayWindow::new();
          ctx.echo = EchoState::Pending(rand::random());
        }
      },
      // no sequence file yet: a brand-new context
      | Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
      | Err(e) => return Err(Error::Persistence(e.kind())),
    }

    ctx.persisted_until = ctx.next_seq;
    ctx.store = Some(store);
    Ok(ctx)
  }

  /// Our Sender ID
  pub fn sender_id(&self) -> &[u8] {
    &self.secret.sender_id
  }

  /// Our Recipient ID (the peer's Sender ID)
  pub fn recipient_id(&self) -> &[u8] {
    &self.secret.recipient_id
  }

  /// The ID Context, if any
  pub fn id_context(&self) -> Option<&[u8]> {
    self.secret.id_context.as_deref()
  }

  /// Is this context refusing traffic until the peer echoes our
  /// freshness challenge?
  pub fn needs_echo(&self) -> bool {
    matches!(self.echo, EchoState::Pending(_))
  }

  /// The challenge the peer must echo, if one is pending
  pub fn echo_challenge(&self) -> Option<[u8; 8]> {
    match self.echo {
      | EchoState::Pending(c) => Some(c),
      | EchoState::Verified => None,
    }
  }

  /// Check an Echo option value against the pending challenge,
  /// unlocking the context when it matches
  pub fn verify_echo(&mut self, value: &[u8]) -> bool {
    match self.echo {
      | EchoState::Pending(c) if c == *value => {
        self.echo = EchoState::Verified;
        true
      },
      | EchoState::Pending(_) => false,
      | EchoState::Verified => true,
    }
  }

  /// Claim the next sender sequence number, flushing the persisted
  /// high water mark first whenever the current reservation is used
  /// up.
  fn next_piv(&mut self) -> Result<Vec<u8>, Error> {
    if self.next_seq >= (1 << 40) {
      return Err(Error::SequenceExhausted);
    }

    if self.next_seq >= self.persisted_until {
      let batch = self.store.as_ref().map(|s| s.batch).unwrap_or(1);
      self.flush_sequence(self.next_seq + batch, false)?;
      self.persisted_until = self.next_seq + batch;
    }

    let piv = encode_piv(self.next_seq);
    self.next_seq += 1;
    Ok(piv)
  }

  fn flush_sequence(&self, next: u64, clean: bool) -> Result<(), Error> {
    let (high, bitmask) = self.replay.parts();
    match &self.store {
      | Some(store) => store.write_sequence(&SequenceFile { next,
                                                            bitmask,
                                                            high,
                                                            clean })
                            .map_err(|e| Error::Persistence(e.kind())),
      | None => Ok(()),
    }
  }

  /// Persist the exact current state, marking the shutdown clean.
  ///
  /// Call when tearing the endpoint down; a context loaded from the
  /// result resumes without the B.1 detour.
  pub fn shutdown(&self) -> Result<(), Error> {
    self.flush_sequence(self.next_seq, true)
  }

  /// Protect a request in place (RFC8613 §8.1).
  ///
  /// The message's Class E options and payload move into the
  /// encrypted inner message; the outer message keeps the Class U
  /// options and gains the OSCORE option.
  pub fn protect_request(&mut self, msg: &mut newt_msg::Message) -> Result<RequestCrypto, Error> {
    let piv = self.next_piv()?;
    let observing = msg.observe().is_some();

    let plaintext = super::inner_plaintext(msg);
    let nonce = nonce(self.sender_id(), &piv, &self.common_iv)?;
    let aad = enc_structure(self.sender_id(), &piv);

    let ciphertext = seal(&self.sender_key, &nonce, &aad, &plaintext)?;

    msg.code = if observing {
      newt_msg::Code::FETCH
    } else {
      newt_msg::Code::POST
    };

    let header = CompressedHeader { piv: piv.clone(),
                                    kid: Some(self.secret.sender_id.clone()),
                                    kid_context: self.secret.id_context.clone() };
    msg.set_oscore(header.to_bytes());
    msg.payload = newt_msg::Payload(ciphertext);

    Ok(RequestCrypto { kid: self.secret.sender_id.clone(),
                       piv })
  }

  /// Protect a response in place (RFC8613 §8.3).
  ///
  /// `own_piv` selects whether the response consumes a sequence
  /// number of its own (required for every notification after the
  /// first, and while an Echo exchange is pending) or reuses the
  /// request's nonce.
  pub fn protect_response(&mut self,
                          msg: &mut newt_msg::Message,
                          req: &RequestCrypto,
                          own_piv: bool)
                          -> Result<(), Error> {
    let observing = msg.observe().is_some();
    let plaintext = super::inner_plaintext(msg);
    let aad = enc_structure(&req.kid, &req.piv);

    let (nonce, header) = if own_piv {
      let piv = self.next_piv()?;
      (nonce(self.sender_id(), &piv, &self.common_iv)?,
       CompressedHeader { piv,
                          kid: None,
                          kid_context: None })
    } else {
      (nonce(&req.kid, &req.piv, &self.common_iv)?, CompressedHeader::default())
    };

    let ciphertext = seal(&self.sender_key, &nonce, &aad, &plaintext)?;

    msg.code = if observing {
      newt_msg::Code::CONTENT
    } else {
      newt_msg::Code::CHANGED
    };
    msg.set_oscore(header.to_bytes());
    msg.payload = newt_msg::Payload(ciphertext);

    Ok(())
  }

  /// Unprotect a request in place (RFC8613 §8.2).
  ///
  /// The replay window only advances after the AEAD verifies.
  pub fn unprotect_request(&mut self,
                           msg: &mut newt_msg::Message,
                           header: &CompressedHeader)
                           -> Result<RequestCrypto, Error> {
    let kid = header.kid.as_deref().ok_or(Error::MalformedOscoreOption)?;
    let seq = decode_piv(&header.piv)?;

    self.replay.check(seq)?;

    let nonce = nonce(kid, &header.piv, &self.common_iv)?;
    let aad = enc_structure(kid, &header.piv);
    let plaintext = open(&self.recipient_key, &nonce, &aad, msg.payload.as_bytes())?;

    self.replay.observe(seq);
    super::restore_inner(msg, &plaintext)?;

    Ok(RequestCrypto { kid: kid.to_vec(),
                       piv: header.piv.clone() })
  }

  /// Unprotect a response in place (RFC8613 §8.4).
  pub fn unprotect_response(&mut self,
                            msg: &mut newt_msg::Message,
                            header: &CompressedHeader,
                            req: &RequestCrypto)
                            -> Result<(), Error> {
    let aad = enc_structure(&req.kid, &req.piv);

    let (nonce, own_seq) = if header.piv.is_empty() {
      (nonce(&req.kid, &req.piv, &self.common_iv)?, None)
    } else {
      let seq = decode_piv(&header.piv)?;
      self.replay.check(seq)?;
      (nonce(self.recipient_id(), &header.piv, &self.common_iv)?, Some(seq))
    };

    let plaintext = open(&self.recipient_key, &nonce, &aad, msg.payload.as_bytes())?;

    if let Some(seq) = own_seq {
      self.replay.observe(seq);
    }

    super::restore_inner(msg, &plaintext)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  pub(crate) fn test_secret() -> SecretFile {
    SecretFile { master_secret: vec![0u8; 16],
                 master_salt: vec![],
                 id_context: None,
                 sender_id: vec![0x01],
                 recipient_id: vec![],
                 aead: "AES-CCM-16-64-128".into(),
                 hkdf: "HKDF-SHA256".into() }
  }

  fn mirror(secret: &SecretFile) -> SecretFile {
    SecretFile { sender_id: secret.recipient_id.clone(),
                 recipient_id: secret.sender_id.clone(),
                 ..secret.clone() }
  }

  #[test]
  fn piv_encoding() {
    assert_eq!(encode_piv(0), vec![0x00]);
    assert_eq!(encode_piv(1), vec![0x01]);
    assert_eq!(encode_piv(256), vec![0x01, 0x00]);
    assert_eq!(decode_piv(&[0x01, 0x00]).unwrap(), 256);
    assert!(decode_piv(&[]).is_err());
    assert!(decode_piv(&[0; 6]).is_err());
  }

  #[test]
  fn skip_ahead() {
    assert_eq!(next_power_of_two_above(0), 1);
    assert_eq!(next_power_of_two_above(1), 2);
    assert_eq!(next_power_of_two_above(5), 8);
    assert_eq!(next_power_of_two_above(64), 128);
  }

  #[test]
  fn keys_are_asymmetric_and_mirrored() {
    let a = SecurityContext::new(test_secret()).unwrap();
    let b = SecurityContext::new(mirror(&test_secret())).unwrap();

    assert_eq!(a.sender_key, b.recipient_key);
    assert_eq!(a.recipient_key, b.sender_key);
    assert_eq!(a.common_iv, b.common_iv);
    assert_ne!(a.sender_key, a.recipient_key);
  }

  #[test]
  fn request_round_trip() {
    use newt_msg::{Code, Id, Message, Token, Type};

    let mut client = SecurityContext::new(test_secret()).unwrap();
    let mut server = SecurityContext::new(mirror(&test_secret())).unwrap();

    let mut msg = Message::new(Type::Con, Code::GET, Id(7), Token(Default::default()));
    msg.set_path("oscore/hello/1");
    let original = msg.clone();

    let crypto = client.protect_request(&mut msg).unwrap();

    // outer: code rewritten, path gone, OSCORE option present
    assert_eq!(msg.code, Code::POST);
    assert!(msg.path().unwrap().is_empty());
    assert!(msg.oscore().is_some());
    assert!(!msg.payload.is_empty());

    let header = CompressedHeader::from_bytes(msg.oscore().unwrap().as_bytes()).unwrap();
    let server_crypto = server.unprotect_request(&mut msg, &header).unwrap();

    assert_eq!(msg.code, Code::GET);
    assert_eq!(msg.path_string().unwrap(), "oscore/hello/1");
    assert_eq!(server_crypto, crypto);
    assert_eq!(original.id, msg.id);
  }

  #[test]
  fn response_round_trip_without_own_piv() {
    use newt_msg::{Code, Id, Message, Payload, Token, Type};

    let mut client = SecurityContext::new(test_secret()).unwrap();
    let mut server = SecurityContext::new(mirror(&test_secret())).unwrap();

    let mut req = Message::new(Type::Con, Code::GET, Id(7), Token(Default::default()));
    let req_crypto = client.protect_request(&mut req).unwrap();
    let header = CompressedHeader::from_bytes(req.oscore().unwrap().as_bytes()).unwrap();
    let server_crypto = server.unprotect_request(&mut req, &header).unwrap();

    let mut resp = Message::new(Type::Ack, Code::CONTENT, Id(7), Token(Default::default()));
    resp.payload = Payload(b"Hello World!".to_vec());
    server.protect_response(&mut resp, &server_crypto, false).unwrap();

    assert_eq!(resp.code, Code::CHANGED);
    // no own PIV: empty option value
    assert!(resp.oscore().unwrap().is_empty());

    let resp_header = CompressedHeader::from_bytes(resp.oscore().unwrap().as_bytes()).unwrap();
    client.unprotect_response(&mut resp, &resp_header, &req_crypto)
          .unwrap();

    assert_eq!(resp.code, Code::CONTENT);
    assert_eq!(resp.payload.as_bytes(), b"Hello World!");
  }

  #[test]
  fn tampered_ciphertext_is_rejected() {
    use newt_msg::{Code, Id, Message, Token, Type};

    let mut client = SecurityContext::new(test_secret()).unwrap();
    let mut server = SecurityContext::new(mirror(&test_secret())).unwrap();

    let mut msg = Message::new(Type::Con, Code::GET, Id(7), Token(Default::default()));
    client.protect_request(&mut msg).unwrap();

    let last = msg.payload.0.len() - 1;
    msg.payload.0[last] ^= 0xFF;

    let header = CompressedHeader::from_bytes(msg.oscore().unwrap().as_bytes()).unwrap();
    assert_eq!(server.unprotect_request(&mut msg, &header),
               Err(Error::ProtectionInvalid));
  }

  #[test]
  fn replayed_request_is_rejected_without_decrypting() {
    use newt_msg::{Code, Id, Message, Token, Type};

    let mut client = SecurityContext::new(test_secret()).unwrap();
    let mut server = SecurityContext::new(mirror(&test_secret())).unwrap();

    let mut msg = Message::new(Type::Con, Code::GET, Id(7), Token(Default::default()));
    client.protect_request(&mut msg).unwrap();
    let captured = msg.clone();

    let header = CompressedHeader::from_bytes(msg.oscore().unwrap().as_bytes()).unwrap();
    server.unprotect_request(&mut msg, &header).unwrap();

    // wire-identical second delivery
    let mut replay = captured;
    assert_eq!(server.unprotect_request(&mut replay, &header),
               Err(Error::Replay));
  }

  #[test]
  fn echo_gate() {
    let mut ctx = SecurityContext::new(test_secret()).unwrap();
    assert!(!ctx.needs_echo());

    ctx.echo = EchoState::Pending([7; 8]);
    assert!(ctx.needs_echo());
    assert!(!ctx.verify_echo(&[0; 8]));
    assert!(ctx.needs_echo());
    assert!(ctx.verify_echo(&[7; 8]));
    assert!(!ctx.needs_echo());
  }

  #[test]
  fn sequence_persistence_never_reuses() {
    use super::super::persist::ContextStore;

    let dir = std::env::temp_dir().join(format!("newt-seq-reuse-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();

    let store = ContextStore::new(&dir);
    store.write_secret(&test_secret()).unwrap();
    store.write_sequence(&SequenceFile { next: 0,
                                         bitmask: 0,
                                         high: 0,
                                         clean: true })
         .unwrap();

    // first life: file holds 0, loading reserves 0 + batch = 1
    let mut ctx = SecurityContext::load(store.clone()).unwrap();
    let first = ctx.next_piv().unwrap();
    assert_eq!(first, vec![0x01]);

    // crash without clean shutdown: reload must never hand out 1 again,
    // and must skip ahead to a power of two
    let mut reborn = SecurityContext::load(store.clone()).unwrap();
    assert!(reborn.needs_echo());
    let next = decode_piv(&reborn.next_piv().unwrap()).unwrap();
    assert!(next > 1);
    assert_eq!(next, 4); // (persisted 2 + batch 1) rounded up to 4

    // clean shutdown: reload resumes with just the batch gap
    reborn.shutdown().unwrap();
    let mut after = SecurityContext::load(store).unwrap();
    assert!(!after.needs_echo());
    assert_eq!(decode_piv(&after.next_piv().unwrap()).unwrap(), next + 2);
  }
}
