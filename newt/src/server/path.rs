/// Split a path string into its segments, ignoring empty ones
/// (leading/trailing/double slashes).
pub fn segments(path: &str) -> Vec<String> {
  path.split('/')
      .filter(|s| !s.is_empty())
      .map(String::from)
      .collect()
}

/// If `path` starts with `prefix`, yield the remaining suffix.
pub fn strip_prefix<'a>(path: &'a [String], prefix: &[String]) -> Option<&'a [String]> {
  if path.len() < prefix.len() {
    return None;
  }

  match path.iter().zip(prefix).all(|(a, b)| a == b) {
    | true => Some(&path[prefix.len()..]),
    | false => None,
  }
}

/// Render segments back to a `/`-joined string (no leading slash)
pub fn join(segments: &[String]) -> String {
  segments.join("/")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn segmentation() {
    assert_eq!(segments("a/b/c"), vec!["a", "b", "c"]);
    assert_eq!(segments("/a//b/"), vec!["a", "b"]);
    assert_eq!(segments(""), Vec::<String>::new());
  }

  #[test]
  fn prefixes() {
    let path = segments("sensors/temp/history");

    assert_eq!(strip_prefix(&path, &segments("sensors/temp")),
               Some(&segments("history")[..]));
    assert_eq!(strip_prefix(&path, &segments("sensors/temp/history")),
               Some(&[][..]));
    assert_eq!(strip_prefix(&path, &segments("actuators")), None);
    assert_eq!(strip_prefix(&segments("a"), &segments("a/b")), None);
  }
}
