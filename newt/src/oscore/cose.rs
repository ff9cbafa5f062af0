//! The COSE-shaped byte strings OSCORE feeds its KDF and AEAD:
//! the HKDF `info` structure, the `Enc_structure` AAD, and the
//! compressed COSE header carried in the OSCORE option
//! ([RFC8613 §3.2.1, §5.4, §6.1](https://datatracker.ietf.org/doc/html/rfc8613)).
//!
//! Both structures are small, fixed-shape CBOR; the writer below
//! covers exactly the major types they use and nothing else.

use super::Error;

/// COSE algorithm identifier for AES-CCM-16-64-128
pub const ALG_AES_CCM_16_64_128: u64 = 10;

/// Minimal deterministic CBOR writer
#[derive(Debug, Default)]
pub(crate) struct CborWriter(pub Vec<u8>);

impl CborWriter {
  fn type_and_len(&mut self, major: u8, len: u64) {
    let major = major << 5;
    match len {
      | n if n < 24 => self.0.push(major | n as u8),
      | n if n <= u8::MAX as u64 => {
        self.0.push(major | 24);
        self.0.push(n as u8);
      },
      | n if n <= u16::MAX as u64 => {
        self.0.push(major | 25);
        self.0.extend((n as u16).to_be_bytes());
      },
      | n if n <= u32::MAX as u64 => {
        self.0.push(major | 26);
        self.0.extend((n as u32).to_be_bytes());
      },
      | n => {
        self.0.push(major | 27);
        self.0.extend(n.to_be_bytes());
      },
    }
  }

  pub fn uint(&mut self, n: u64) -> &mut Self {
    self.type_and_len(0, n);
    self
  }

  pub fn bytes(&mut self, bs: &[u8]) -> &mut Self {
    self.type_and_len(2, bs.len() as u64);
    self.0.extend(bs);
    self
  }

  pub fn text(&mut self, s: &str) -> &mut Self {
    self.type_and_len(3, s.len() as u64);
    self.0.extend(s.as_bytes());
    self
  }

  pub fn array(&mut self, len: u64) -> &mut Self {
    self.type_and_len(4, len);
    self
  }

  pub fn null(&mut self) -> &mut Self {
    self.0.push(0xF6);
    self
  }
}

/// The `info` parameter for one HKDF-Expand invocation:
/// `[ id, id_context, alg_aead, type, L ]`
pub(crate) fn kdf_info(id: &[u8],
                       id_context: Option<&[u8]>,
                       derivation: &str,
                       len: usize)
                       -> Vec<u8> {
  let mut w = CborWriter::default();
  w.array(5).bytes(id);
  match id_context {
    | Some(ctx) => w.bytes(ctx),
    | None => w.null(),
  };
  w.uint(ALG_AES_CCM_16_64_128)
   .text(derivation)
   .uint(len as u64);
  w.0
}

/// The `external_aad`:
/// `[ oscore_version, [alg_aead], request_kid, request_piv, options_I ]`
///
/// Class I options are always empty here; no option this library
/// knows of is integrity-protected-only.
fn external_aad(request_kid: &[u8], request_piv: &[u8]) -> Vec<u8> {
  let mut w = CborWriter::default();
  w.array(5)
   .uint(1)
   .array(1)
   .uint(ALG_AES_CCM_16_64_128)
   .bytes(request_kid)
   .bytes(request_piv)
   .bytes(&[]);
  w.0
}

/// The AEAD's associated data: the COSE `Enc_structure`
/// `[ "Encrypt0", h'', external_aad ]`
pub(crate) fn enc_structure(request_kid: &[u8], request_piv: &[u8]) -> Vec<u8> {
  let mut w = CborWriter::default();
  w.array(3)
   .text("Encrypt0")
   .bytes(&[])
   .bytes(&external_aad(request_kid, request_piv));
  w.0
}

/// The decoded value of the OSCORE option: the compressed COSE
/// header of [RFC8613 §6.1](https://datatracker.ietf.org/doc/html/rfc8613#section-6.1).
///
/// ```text
///  0 1 2 3 4 5 6 7    <-------- n bytes ------->
/// +-+-+-+-+-+-+-+-+  +--------------------------+
/// |0 0 0|h|k|  n  |  |      Partial IV          |
/// +-+-+-+-+-+-+-+-+  +--------------------------+
///  <- 1 byte ->       <----- s bytes ------>
/// +------------+----------------------+-----------+
/// | s (if any) | kid context (if any) | kid ...   |
/// +------------+----------------------+-----------+
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompressedHeader {
  /// The sender's partial IV (1-5 bytes), empty when absent
  pub piv: Vec<u8>,
  /// The sender's key identifier, `None` when the k flag is unset
  pub kid: Option<Vec<u8>>,
  /// The ID context, `None` when the h flag is unset
  pub kid_context: Option<Vec<u8>>,
}

impl CompressedHeader {
  /// Serialize to the OSCORE option value.
  ///
  /// A header with nothing in it (a response reusing the request's
  /// nonce) encodes as the empty string.
  pub fn to_bytes(&self) -> Vec<u8> {
    if self.piv.is_empty() && self.kid.is_none() && self.kid_context.is_none() {
      return vec![];
    }

    let mut flags = self.piv.len() as u8;
    if self.kid.is_some() {
      flags |= 0b0000_1000;
    }
    if self.kid_context.is_some() {
      flags |= 0b0001_0000;
    }

    let mut bytes = vec![flags];
    bytes.extend(&self.piv);

    if let Some(ctx) = &self.kid_context {
      bytes.push(ctx.len() as u8);
      bytes.extend(ctx);
    }

    if let Some(kid) = &self.kid {
      bytes.extend(kid);
    }

    bytes
  }

  /// Parse from the OSCORE option value
  pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
    if bytes.is_empty() {
      return Ok(Self::default());
    }

    let flags = bytes[0];
    if flags & 0b1110_0000 != 0 {
      return Err(Error::MalformedOscoreOption);
    }

    let n = (flags & 0b111) as usize;
    if n > 5 {
      return Err(Error::MalformedOscoreOption);
    }

    let mut ix = 1;
    let take = |ix: &mut usize, n: usize| -> Result<Vec<u8>, Error> {
      let end = *ix + n;
      let slice = bytes.get(*ix..end).ok_or(Error::MalformedOscoreOption)?;
      *ix = end;
      Ok(slice.to_vec())
    };

    let piv = take(&mut ix, n)?;

    let kid_context = if flags & 0b0001_0000 != 0 {
      let len = take(&mut ix, 1)?[0] as usize;
      Some(take(&mut ix, len)?)
    } else {
      None
    };

    let kid = if flags & 0b0000_1000 != 0 {
      Some(bytes[ix..].to_vec())
    } else if ix != bytes.len() {
      return Err(Error::MalformedOscoreOption);
    } else {
      None
    };

    Ok(Self { piv,
              kid,
              kid_context })
  }
}
