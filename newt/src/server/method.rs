use newt_msg::Code;

/// A request method, i.e. a request's [`Code`] by name.
///
/// The RFC8132 methods (FETCH / PATCH / iPATCH) are included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
  Fetch,
  Patch,
  IPatch,
}

impl Method {
  /// The method's message code
  pub fn code(&self) -> Code {
    use Method::*;
    match self {
      | Get => Code::GET,
      | Post => Code::POST,
      | Put => Code::PUT,
      | Delete => Code::DELETE,
      | Fetch => Code::FETCH,
      | Patch => Code::PATCH,
      | IPatch => Code::IPATCH,
    }
  }

  /// Interpret a message code as a method
  pub fn from_code(code: Code) -> Option<Method> {
    use Method::*;
    match (code.class, code.detail) {
      | (0, 1) => Some(Get),
      | (0, 2) => Some(Put),
      | (0, 3) => Some(Post),
      | (0, 4) => Some(Delete),
      | (0, 5) => Some(Fetch),
      | (0, 6) => Some(Patch),
      | (0, 7) => Some(IPatch),
      | _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trip() {
    for m in [Method::Get,
              Method::Post,
              Method::Put,
              Method::Delete,
              Method::Fetch,
              Method::Patch,
              Method::IPatch]
    {
      assert_eq!(Method::from_code(m.code()), Some(m));
    }

    assert_eq!(Method::from_code(Code::CONTENT), None);
    assert_eq!(Method::from_code(Code::EMPTY), None);
  }
}
