use core::ops::RangeInclusive;

use embedded_time::duration::Milliseconds;
use embedded_time::Instant;
use rand::{Rng, SeedableRng};

use crate::time::{millis_since, Clock, Millis};

/// A non-blocking timer that drives the retransmission of a
/// confirmable message, as well as any other fixed-delay or
/// exponential-backoff retrying.
///
/// It does not _contain_ the work to be done; it just answers
/// "should I do it again yet?".
///
/// The initial delay is drawn uniformly from the strategy's range
/// once, at creation; exponential strategies then double it on every
/// attempt, which together produce exactly the
/// `[ACK_TIMEOUT, ACK_TIMEOUT * ACK_RANDOM_FACTOR]`-then-double
/// behavior of RFC7252 §4.2.
#[derive(Debug, Clone, Copy)]
pub struct RetryTimer<C: Clock> {
  start: Instant<C>,
  init: Millis,
  strategy: Strategy,
  attempts: Attempts,
  max_attempts: Attempts,
}

/// A number of attempts (for confirmable messages: retransmissions,
/// not counting the initial send)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attempts(pub u16);

/// Result of [`RetryTimer::what_should_i_do`].
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum YouShould {
  /// Attempts have been exhausted and the work that is
  /// being retried should be considered poisoned.
  Cry,
  /// A retry should be performed
  Retry,
}

impl<C: Clock> RetryTimer<C> {
  /// Create a new retrier
  pub fn new(start: Instant<C>, strategy: Strategy, max_attempts: Attempts) -> Self {
    Self { start,
           strategy,
           init: if strategy.has_jitter() {
             let seed = millis_since(start, Instant::new(0));
             let mut rand = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
             Milliseconds(rand.gen_range(strategy.range()))
           } else {
             Milliseconds(*strategy.range().start())
           },
           max_attempts,
           attempts: Attempts(0) }
  }

  /// When the thing we keep trying has not succeeded yet, invoke this
  /// to ask "should I send it again?"
  ///
  /// Returns `nb::Error::WouldBlock` when we have not yet
  /// waited the appropriate amount of time to retry.
  pub fn what_should_i_do(&mut self,
                          now: Instant<C>)
                          -> nb::Result<YouShould, core::convert::Infallible> {
    if self.attempts >= self.max_attempts {
      Ok(YouShould::Cry)
    } else if self.is_ready(Milliseconds(millis_since(now, self.start)), self.attempts.0) {
      self.attempts.0 += 1;
      Ok(YouShould::Retry)
    } else {
      Err(nb::Error::WouldBlock)
    }
  }

  /// Check whether the strategy says the next attempt is due, given
  /// the time passed since creation and the attempts made so far
  pub fn is_ready(&self, Milliseconds(time_passed): Millis, attempts: u16) -> bool {
    time_passed >= self.strategy.cumulative_delay(self.init, attempts + 1).0
  }

  /// How many attempts have been made so far
  pub fn attempts(&self) -> Attempts {
    self.attempts
  }
}

/// Strategy to employ when retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Draw an initial delay between `init_min` and `init_max` once,
  /// then double the delay after each attempt.
  Exponential {
    /// Minimum (inclusive) delay for the first retry
    init_min: Millis,
    /// Maximum (inclusive) delay for the first retry
    init_max: Millis,
  },
  /// Draw a delay between `min` and `max` once, and wait that long
  /// between every pair of attempts.
  Delay {
    /// Minimum (inclusive) delay between attempts
    min: Millis,
    /// Maximum (inclusive) delay between attempts
    max: Millis,
  },
}

impl Strategy {
  /// Are min & max delays the same? if so, we skip the random number generation.
  pub fn has_jitter(&self) -> bool {
    let rng = self.range();
    rng.start() != rng.end()
  }

  /// Get the min & max durations as an inclusive range
  pub fn range(&self) -> RangeInclusive<u64> {
    match self {
      | &Self::Delay { min: Milliseconds(min),
                       max: Milliseconds(max), } => (min..=max),

      | &Self::Exponential { init_min: Milliseconds(min),
                             init_max: Milliseconds(max), } => (min..=max),
    }
  }

  /// Time from the initial attempt until attempt number `attempt` is
  /// due, given the drawn initial delay.
  ///
  /// ```text
  /// | attempt | due at (exponential) | due at (delay) |
  /// | 1       | init                 | init           |
  /// | 2       | init * 3             | init * 2       |
  /// | 3       | init * 7             | init * 3       |
  /// | n       | init * (2^n - 1)     | init * n       |
  /// ```
  pub(crate) fn cumulative_delay(&self, Milliseconds(init): Millis, attempt: u16) -> Millis {
    Milliseconds(match self {
                   | Self::Exponential { .. } => init * (2u64.pow(attempt as u32) - 1),
                   | Self::Delay { .. } => init * attempt as u64,
                 })
  }

  /// Get the amount of time this strategy spans if all attempts are used
  pub fn max_time(&self, max_attempts: Attempts) -> Millis {
    self.cumulative_delay(Milliseconds(*self.range().end()), max_attempts.0)
  }
}
