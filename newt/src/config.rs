use embedded_time::duration::Milliseconds;

use crate::retry::{Attempts, Strategy};
use crate::time::Millis;

/// Bytes / Second
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BytesPerSecond(pub u16);

/// Configuration options related to parsing & handling outbound CON requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Con {
  /// Retry strategy for CON messages that
  /// have not yet been ACKed.
  ///
  /// Defaults to the RFC7252 §4.2 schedule: an initial timeout drawn
  /// uniformly from `[ACK_TIMEOUT, ACK_TIMEOUT * ACK_RANDOM_FACTOR]`
  /// (2..=3 seconds), doubled on every retransmission.
  ///
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use newt::config::Con;
  /// use newt::retry::Strategy;
  ///
  /// assert_eq!(Con::default().retry_strategy,
  ///            Strategy::Exponential { init_min: Milliseconds(2_000),
  ///                                    init_max: Milliseconds(3_000) });
  /// ```
  pub retry_strategy: Strategy,

  /// Number of times we are allowed to resend a CON message
  /// before the exchange fails (MAX_RETRANSMIT).
  ///
  /// Defaults to 4 retransmissions.
  /// ```
  /// use newt::config::Con;
  /// use newt::retry::Attempts;
  ///
  /// assert_eq!(Con::default().max_retransmits, Attempts(4));
  /// ```
  pub max_retransmits: Attempts,
}

impl Default for Con {
  fn default() -> Self {
    Con { retry_strategy: Strategy::Exponential { init_min: Milliseconds(2_000),
                                                  init_max: Milliseconds(3_000) },
          max_retransmits: Attempts(4) }
  }
}

/// Configuration options related to parsing & handling messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Msg {
  /// Seed used to generate message [`Token`](newt_msg::Token)s,
  /// customizable to allow for your application to generate tokens
  /// less guessably.
  ///
  /// The default value is 0, although it is
  /// best practice to set this to something else.
  /// (random integer, machine identifier)
  pub token_seed: u16,

  /// The transmission rate that we should do our best not to
  /// exceed when sending non-confirmable messages (PROBING_RATE).
  ///
  /// Defaults to `BytesPerSecond(1000)`.
  pub probing_rate: BytesPerSecond,

  /// See [`Con`]
  pub con: Con,

  /// The maximum amount of time we should delay
  /// our response to multicast requests.
  ///
  /// The actual delay will be random between zero
  /// and this value. Defaults to 5000 milliseconds.
  pub multicast_response_leisure: Millis,
}

impl Default for Msg {
  fn default() -> Self {
    Msg { token_seed: 0,
          probing_rate: BytesPerSecond(1000),
          con: Con::default(),
          multicast_response_leisure: Milliseconds(5000) }
  }
}

/// Runtime config
///
/// The RFC7252 §4.8 transmission parameters plus this library's own
/// knobs, with the derived protocol constants (`EXCHANGE_LIFETIME`,
/// `MAX_TRANSMIT_SPAN`) computed from whatever values are configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// See [`Msg`]
  pub msg: Msg,

  /// Maximum number of outstanding CON messages per remote
  /// endpoint (NSTART).
  ///
  /// Outbound CONs beyond this are queued behind the in-flight one.
  ///
  /// ```
  /// use newt::config::Config;
  ///
  /// assert_eq!(Config::default().nstart, 1);
  /// ```
  pub nstart: u8,

  /// Preferred block size for blockwise transfers, in bytes.
  ///
  /// Must be a power of two in `16..=1024`; the actual size used on
  /// an exchange never exceeds what the remote asks for.
  ///
  /// ```
  /// use newt::config::Config;
  ///
  /// assert_eq!(Config::default().block_size, 1024);
  /// ```
  pub block_size: u16,
}

impl Default for Config {
  fn default() -> Self {
    Config { msg: Msg::default(),
             nstart: 1,
             block_size: 1024 }
  }
}

impl Config {
  /// `MAX_TRANSMIT_SPAN`: the worst-case time from the first
  /// transmission of a CON to its last retransmission.
  ///
  /// With the default parameters this is 45 seconds.
  pub fn max_transmit_span_millis(&self) -> u64 {
    self.msg
        .con
        .retry_strategy
        .max_time(self.msg.con.max_retransmits)
        .0
  }

  /// `MAX_TRANSMIT_WAIT`: the worst-case time from the first
  /// transmission of a CON to the moment the sender gives up.
  pub fn max_transmit_wait_millis(&self) -> u64 {
    self.msg
        .con
        .retry_strategy
        .max_time(Attempts(self.msg.con.max_retransmits.0 + 1))
        .0
  }

  /// `MAX_LATENCY` (RFC7252 §4.8.2): 100 seconds.
  pub fn max_latency_millis(&self) -> u64 {
    100_000
  }

  /// `PROCESSING_DELAY`: the time a node takes to turn around a
  /// CON into an ACK; per RFC7252 §4.8.2 set to ACK_TIMEOUT.
  pub fn expected_processing_delay_millis(&self) -> u64 {
    *self.msg.con.retry_strategy.range().start()
  }

  /// `EXCHANGE_LIFETIME`: how long a message ID must not be reused
  /// for, and thus how long the deduplication cache remembers.
  ///
  /// ```
  /// use newt::config::Config;
  ///
  /// // 45s span + 2 * 100s latency + 2s processing = 247s
  /// assert_eq!(Config::default().exchange_lifetime_millis(), 247_000);
  /// ```
  pub fn exchange_lifetime_millis(&self) -> u64 {
    self.max_transmit_span_millis()
    + (2 * self.max_latency_millis())
    + self.expected_processing_delay_millis()
  }

  /// Half of ACK_TIMEOUT: how long the server-side may sit on a CON
  /// request before an empty ACK is emitted and the response is
  /// promoted to the separate (CON) pattern.
  pub fn piggyback_window_millis(&self) -> u64 {
    *self.msg.con.retry_strategy.range().start() / 2
  }
}
