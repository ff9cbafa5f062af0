//! `newt` is a CoAP endpoint runtime: the message layer
//! (retransmission, deduplication, id & token provisioning), the
//! request/response layer (matching, blockwise transfers,
//! observation), and OSCORE message protection, over pluggable
//! clocks and sockets.
//!
//! ## CoAP
//! CoAP ([RFC7252](https://datatracker.ietf.org/doc/html/rfc7252))
//! copies the semantics of HTTP to an environment conducive to
//! **constrained** devices: the verbs and status codes you know,
//! over UDP, with the reliability machinery (ACKs, retransmission,
//! deduplication) built into the protocol instead of the transport.
//! Because UDP is connectionless, CoAP machines are expected to
//! perform both client and server roles off one socket, and this
//! crate's [`core::Core`] does exactly that.
//!
//! ## OSCORE
//! OSCORE ([RFC8613](https://datatracker.ietf.org/doc/html/rfc8613))
//! protects CoAP end-to-end: the interesting parts of each message
//! are AEAD-sealed into an inner message, while the routing-relevant
//! parts stay visible. Install a [`oscore::SecurityContext`] for a
//! remote and the runtime protects and unprotects transparently,
//! with replay protection and crash-safe sequence number
//! persistence.
//!
//! ## Architecture
//! The runtime is a chain of [`step::Step`]s, each owning one
//! protocol concern, polled cooperatively by the
//! [`platform::Platform`] it is mounted on; there are no threads and
//! no locks in the protocol path. [`core::Core`] is the batteries-
//! included assembly of the whole chain; the pieces compose
//! separately when something custom is called for.

// docs
#![cfg_attr(any(docsrs, feature = "docs"), feature(doc_cfg))]
// -
// style
#![allow(clippy::unused_unit)]
// -
// deny
#![deny(missing_debug_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]
// -
// warnings
#![warn(missing_docs)]
#![cfg_attr(not(test), warn(unreachable_pub))]

#[cfg(test)]
pub(crate) mod test;

pub(crate) mod logging;

/// customizable retrying of fallible operations
pub mod retry;

/// responses
pub mod resp;

/// requests
pub mod req;

/// the endpoint façade
pub mod core;

/// low-level coap behavior
pub mod step;

/// platform configuration
pub mod platform;

/// network abstractions
pub mod net;

/// time abstractions
pub mod time;

/// configuring runtime behavior
pub mod config;

/// OSCORE security contexts & state
pub mod oscore;

/// the site tree served to inbound requests
pub mod server;

/// `std` bindings: system clock, UDP sockets, env configuration
pub mod std;
