//! Low-level representation of CoAP messages.
//!
//! The most notable item in `newt_msg` is [`Message`];
//! a CoAP message very close to the actual byte layout
//! ([RFC7252 §3](https://datatracker.ietf.org/doc/html/rfc7252#section-3)).
//!
//! This crate explicitly does **not** know or care about how messages
//! are sent and received; it is **just** concerned with the data
//! structures involved on the machines having a CoAP conversation.
//! For the runtime that drives them, see the `newt` crate.
//!
//! ## What lives here
//! - the byte codec ([`TryFromBytes`] / [`TryIntoBytes`]), including
//!   the 4-byte header, token, option delta/length nibble format and
//!   the payload marker
//! - the option registry: known numbers ([`repeat`] / [`no_repeat`]),
//!   their [`Characteristics`], and the classification bits carried by
//!   every [`OptNumber`]
//! - the packed option value types: [`Block`], [`observe::Action`],
//!   [`ContentFormat`]

#![cfg_attr(not(test), forbid(missing_debug_implementations, unreachable_pub))]
#![cfg_attr(not(test), deny(unsafe_code))]
#![deny(missing_docs)]

pub(crate) mod cursor;

#[doc(hidden)]
pub mod from_bytes;

/// Message structs
pub mod msg;

#[doc(hidden)]
pub mod to_bytes;

pub use cursor::Cursor;
#[doc(inline)]
pub use from_bytes::{TryConsumeBytes, TryFromBytes};
#[doc(inline)]
pub use msg::*;
#[doc(inline)]
pub use to_bytes::{MessageToBytesError, TryIntoBytes};

#[cfg(test)]
pub(crate) fn test_msg() -> (Message, Vec<u8>) {
  let header: [u8; 4] = 0b0100_0001_0100_0101_0000_0000_0000_0001_u32.to_be_bytes();
  let token: [u8; 1] = [254u8];
  let content_format: &[u8] = b"application/json";
  let options: [&[u8]; 2] = [&[0b_1100_1101u8, 0b00000011u8], content_format];
  let payload: [&[u8]; 2] = [&[0b1111_1111_u8], b"hello, world!"];
  let bytes = [header.as_ref(),
               token.as_ref(),
               options.concat().as_ref(),
               payload.concat().as_ref()].concat();

  let msg = Message { id: Id(1),
                      ty: Type::Con,
                      ver: Version(1),
                      token: Token(tinyvec::array_vec!([u8; 8] => 254)),
                      opts: OptMap::from([(OptNumber(12),
                                           vec![OptValue(content_format.to_vec())])]),
                      code: Code { class: 2,
                                   detail: 5 },
                      payload: Payload(b"hello, world!".to_vec()) };
  (msg, bytes)
}
