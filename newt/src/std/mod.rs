//! `std` bindings: the system clock, `std::net::UdpSocket` as a
//! [`Socket`](crate::net::Socket), and the environment-driven
//! transport selection.

use embedded_time::rate::Fraction;

/// Networking
pub mod net;

/// Transport priority lists & the defaults self-check
pub mod transport;

pub use transport::{defaults_self_check, Transports};

use crate::platform::PlatformTypes;

/// [`PlatformTypes`] for std platforms
#[derive(Debug, Clone, Copy)]
pub struct Std;

impl PlatformTypes for Std {
  type Clock = Clock;
  type Socket = std::net::UdpSocket;
}

/// A [`Core`](crate::core::Core) over the system clock and a UDP
/// socket
pub type Core = crate::core::Core<Std>;

/// Implement [`embedded_time::Clock`] using [`std::time`] primitives
#[derive(Debug, Clone, Copy)]
pub struct Clock(std::time::Instant);

impl Default for Clock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock {
  /// Create a new clock
  pub fn new() -> Self {
    Self(std::time::Instant::now())
  }
}

impl embedded_time::Clock for Clock {
  type T = u64;

  // milliseconds
  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000);

  fn try_now(&self) -> Result<embedded_time::Instant<Self>, embedded_time::clock::Error> {
    let elapsed = std::time::Instant::now().duration_since(self.0);
    Ok(embedded_time::Instant::new(elapsed.as_millis() as u64))
  }
}
