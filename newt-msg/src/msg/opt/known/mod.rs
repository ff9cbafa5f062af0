use super::OptNumber;

/// Content-Format values
pub mod content_format;
pub use content_format::*;

/// Observe
pub mod observe;
pub use observe::*;

/// Block
pub mod block;
pub use block::*;

macro_rules! opt {
  (#[doc = $doc:expr] $name:ident = $n:literal) => {
    #[doc = $doc]
    #[allow(clippy::zero_prefixed_literal)]
    pub const $name: crate::OptNumber = crate::OptNumber($n);
  };
}

pub(crate) use opt;

/// Non-repeatable options
pub mod no_repeat {
  use super::opt;

  opt!(#[doc = "Uri-Host (RFC7252 §5.10.1)"]
       HOST = 3);
  opt!(#[doc = "If-None-Match (RFC7252 §5.10.8.2)"]
       IF_NONE_MATCH = 5);
  opt!(#[doc = "Observe (RFC7641 §2)"]
       OBSERVE = 6);
  opt!(#[doc = "Uri-Port (RFC7252 §5.10.1)"]
       PORT = 7);
  opt!(#[doc = "OSCORE (RFC8613 §2): carries the compressed COSE header of a protected message"]
       OSCORE = 9);
  opt!(#[doc = "Content-Format (RFC7252 §5.10.3)"]
       CONTENT_FORMAT = 12);
  opt!(#[doc = "Max-Age (RFC7252 §5.10.5)"]
       MAX_AGE = 14);
  opt!(#[doc = "Accept (RFC7252 §5.10.4)"]
       ACCEPT = 17);
  opt!(#[doc = "Block2 (RFC7959 §2.2): descriptor of one block of a chunked response body"]
       BLOCK2 = 23);
  opt!(#[doc = "Block1 (RFC7959 §2.2): descriptor of one block of a chunked request body"]
       BLOCK1 = 27);
  opt!(#[doc = "Size2 (RFC7959 §4)"]
       SIZE2 = 28);
  opt!(#[doc = "Proxy-Uri (RFC7252 §5.10.2)"]
       PROXY_URI = 35);
  opt!(#[doc = "Proxy-Scheme (RFC7252 §5.10.2)"]
       PROXY_SCHEME = 39);
  opt!(#[doc = "Size1 (RFC7252 §5.10.9)"]
       SIZE1 = 60);
  opt!(#[doc = "Echo (RFC9175 §2.2): freshness challenge, used by the OSCORE reboot recovery"]
       ECHO = 252);
}

/// Repeatable options
pub mod repeat {
  use super::opt;

  opt!(#[doc = "If-Match (RFC7252 §5.10.8.1)"]
       IF_MATCH = 1);
  opt!(#[doc = "ETag (RFC7252 §5.10.6)"]
       ETAG = 4);
  opt!(#[doc = "Location-Path (RFC7252 §5.10.7)"]
       LOCATION_PATH = 8);
  opt!(#[doc = "Uri-Path (RFC7252 §5.10.1)"]
       PATH = 11);
  opt!(#[doc = "Uri-Query (RFC7252 §5.10.1)"]
       QUERY = 15);
  opt!(#[doc = "Location-Query (RFC7252 §5.10.7)"]
       LOCATION_QUERY = 20);
  opt!(#[doc = "Request-Tag (RFC9175 §3.2): correlates blockwise request bodies"]
       REQUEST_TAG = 292);
}

/// The shape of a known option's value
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueFormat {
  /// Zero-length; presence is the whole message
  Empty,
  /// Arbitrary bytes
  Opaque,
  /// Canonical big-endian unsigned integer (no leading zero bytes)
  Uint,
  /// UTF-8 string
  String,
}

/// Static metadata for an option known to this library: its wire
/// format, length bounds, and repeatability.
///
/// Classification (critical / unsafe / cache-key) is *not* listed
/// here; it lives in the number's bit pattern ([`OptNumber`]).
#[derive(Copy, Clone, Debug)]
pub struct Characteristics {
  /// Human name, as the RFCs spell it
  pub name: &'static str,
  /// See [`ValueFormat`]
  pub format: ValueFormat,
  /// Smallest legal value length in bytes
  pub min_len: usize,
  /// Largest legal value length in bytes
  pub max_len: usize,
  /// May the option appear more than once?
  pub repeatable: bool,
}

macro_rules! characteristics {
  ($($n:pat => ($name:literal, $format:ident, $min:literal..=$max:literal, $repeatable:literal)),+ $(,)?) => {
    /// Look up the [`Characteristics`] of a known option number.
    ///
    /// Unknown numbers yield `None` and are carried verbatim.
    pub fn characteristics(n: OptNumber) -> Option<Characteristics> {
      match n {
        $(| $n => Some(Characteristics { name: $name,
                                         format: ValueFormat::$format,
                                         min_len: $min,
                                         max_len: $max,
                                         repeatable: $repeatable }),)+
        | _ => None,
      }
    }
  };
}

characteristics! {
  repeat::IF_MATCH => ("If-Match", Opaque, 0..=8, true),
  no_repeat::HOST => ("Uri-Host", String, 1..=255, false),
  repeat::ETAG => ("ETag", Opaque, 1..=8, true),
  no_repeat::IF_NONE_MATCH => ("If-None-Match", Empty, 0..=0, false),
  no_repeat::OBSERVE => ("Observe", Uint, 0..=3, false),
  no_repeat::PORT => ("Uri-Port", Uint, 0..=2, false),
  no_repeat::OSCORE => ("OSCORE", Opaque, 0..=255, false),
  repeat::LOCATION_PATH => ("Location-Path", String, 0..=255, true),
  repeat::PATH => ("Uri-Path", String, 0..=255, true),
  no_repeat::CONTENT_FORMAT => ("Content-Format", Uint, 0..=2, false),
  no_repeat::MAX_AGE => ("Max-Age", Uint, 0..=4, false),
  repeat::QUERY => ("Uri-Query", String, 0..=255, true),
  no_repeat::ACCEPT => ("Accept", Uint, 0..=2, false),
  repeat::LOCATION_QUERY => ("Location-Query", String, 0..=255, true),
  no_repeat::BLOCK2 => ("Block2", Uint, 0..=3, false),
  no_repeat::BLOCK1 => ("Block1", Uint, 0..=3, false),
  no_repeat::SIZE2 => ("Size2", Uint, 0..=4, false),
  no_repeat::PROXY_URI => ("Proxy-Uri", String, 1..=1034, false),
  no_repeat::PROXY_SCHEME => ("Proxy-Scheme", String, 1..=255, false),
  no_repeat::SIZE1 => ("Size1", Uint, 0..=4, false),
  no_repeat::ECHO => ("Echo", Opaque, 1..=40, false),
  repeat::REQUEST_TAG => ("Request-Tag", Opaque, 0..=8, true),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn known_lookup() {
    let path = characteristics(repeat::PATH).unwrap();
    assert_eq!(path.name, "Uri-Path");
    assert!(path.repeatable);

    let cf = characteristics(no_repeat::CONTENT_FORMAT).unwrap();
    assert_eq!(cf.format, ValueFormat::Uint);
    assert_eq!(cf.max_len, 2);

    assert!(characteristics(OptNumber(65_000)).is_none());
  }
}
