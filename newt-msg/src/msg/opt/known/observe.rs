/// When included in a GET request, the Observe Option extends the GET
/// method so it does not only retrieve a current representation of the
/// target resource, but also requests the server to add or remove an
/// entry in the list of observers of the resource
/// ([RFC7641 §2](https://datatracker.ietf.org/doc/html/rfc7641#section-2)).
///
/// The list entry consists of the client endpoint and the token
/// specified by the client in the request.
#[derive(Hash, Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Action {
  /// Adds the entry to the list, if not present (value 0)
  Register,
  /// Removes the entry from the list, if present (value 1)
  Deregister,
}

impl Action {
  /// Try to parse from an option value's uint
  pub fn from_uint(n: u64) -> Option<Self> {
    match n {
      | 0 => Some(Action::Register),
      | 1 => Some(Action::Deregister),
      | _ => None,
    }
  }
}

impl From<Action> for u64 {
  fn from(a: Action) -> Self {
    match a {
      | Action::Register => 0,
      | Action::Deregister => 1,
    }
  }
}

/// In notifications the Observe option carries a 24-bit sequence
/// number instead of an [`Action`]; [`fresher`] implements the
/// reordering detection of
/// [RFC7641 §3.4](https://datatracker.ietf.org/doc/html/rfc7641#section-3.4).
///
/// `v2` is fresher than `v1` when it is ahead of it by less than half
/// the 24-bit space (in wrapping arithmetic), or when more than 128
/// seconds passed between their arrivals.
pub fn fresher(v1: u32, v2: u32, arrival_gap_millis: u64) -> bool {
  (v1 < v2 && v2 - v1 < (1 << 23))
  || (v1 > v2 && v1 - v2 > (1 << 23))
  || arrival_gap_millis > 128_000
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn freshness_rule() {
    // plain ascent
    assert!(fresher(5, 6, 0));
    // out of order
    assert!(!fresher(6, 4, 0));
    // wraparound: 2^24 - 1 rolls over to 0
    assert!(fresher((1 << 24) - 1, 0, 0));
    // stale value accepted anyway after 128s
    assert!(fresher(6, 4, 129_000));
    assert!(!fresher(6, 4, 128_000));
    // equal is never fresher (deduplicates)
    assert!(!fresher(5, 5, 0));
  }
}
