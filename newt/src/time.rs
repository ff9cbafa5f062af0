use embedded_time::Instant;

/// A duration, in milliseconds
pub type Millis = embedded_time::duration::Milliseconds<u64>;

/// Supertrait of [`embedded_time::Clock`] pinning the
/// type of "ticks" to u64
pub trait Clock: embedded_time::Clock<T = u64> {}
impl<C: embedded_time::Clock<T = u64>> Clock for C {}

/// Milliseconds elapsed between two instants, saturating at zero
/// when `then` is in the future.
pub fn millis_since<C: Clock>(now: Instant<C>, then: Instant<C>) -> u64 {
  now.checked_duration_since(&then)
     .and_then(|dur| Millis::try_from(dur).ok())
     .map(|ms| ms.0)
     .unwrap_or(0)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test::ClockMock;

  #[test]
  fn millis_saturate_backwards() {
    let early = ClockMock::instant(100);
    let late = ClockMock::instant(400);

    assert_eq!(millis_since::<ClockMock>(late, early), 300);
    assert_eq!(millis_since::<ClockMock>(early, late), 0);
  }
}
