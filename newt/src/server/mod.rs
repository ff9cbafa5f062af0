//! The site tree: resources registered by path, dispatched to by
//! longest-prefix match.
//!
//! The tree holds no networking state; it turns one decoded request
//! into one response. The [`Core`](crate::core::Core) owns a `Site`
//! and feeds it inbound requests.

use std::collections::HashMap;

use newt_msg::{characteristics, Code, ContentFormat};

use crate::net::Addrd;
use crate::platform::Message;
use crate::req::Req;
use crate::resp::Resp;

/// Request methods
pub mod method;

/// Path segment helpers
pub mod path;

/// `/.well-known/core` rendering (RFC6690)
pub mod link_format;

pub use method::Method;

/// The RFC6690 link attributes a resource advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
  /// Resource type (`rt`)
  pub rt: Option<String>,
  /// Interface description (`if`)
  pub interface: Option<String>,
  /// Content format (`ct`)
  pub ct: Option<u16>,
  /// Estimated size (`sz`)
  pub sz: Option<u64>,
  /// Observable (`obs`)
  pub obs: bool,
}

/// A request handler: the matched request plus the path suffix below
/// the resource's registration point.
///
/// A handler that cannot build its intended representation fails
/// with [`Error::Renderable`], which still carries the CoAP response
/// that should go out.
pub type Handler = Box<dyn FnMut(&Addrd<Req>, &[String]) -> Result<Resp, Error> + 'static>;

/// One registered resource: a path, its link attributes, and a
/// handler per allowed method.
pub struct Resource {
  path: Vec<String>,
  attrs: Attributes,
  etag: Option<Vec<u8>>,
  handlers: HashMap<Method, Handler>,
}

impl core::fmt::Debug for Resource {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Resource")
     .field("path", &self.path)
     .field("attrs", &self.attrs)
     .field("methods", &self.handlers.keys().collect::<Vec<_>>())
     .finish()
  }
}

impl Resource {
  /// A resource at `path` with no handlers (every method yields
  /// 4.05 until [`Resource::on`] adds some)
  pub fn new(path: &str) -> Self {
    Self { path: path::segments(path),
           attrs: Attributes::default(),
           etag: None,
           handlers: HashMap::new() }
  }

  /// Replace the link attributes
  pub fn attributes(mut self, attrs: Attributes) -> Self {
    self.attrs = attrs;
    self
  }

  /// Set the entity tag preconditions compare against
  pub fn etag(mut self, etag: impl Into<Vec<u8>>) -> Self {
    self.etag = Some(etag.into());
    self
  }

  /// Attach a handler for a method
  pub fn on<F>(mut self, method: Method, handler: F) -> Self
    where F: FnMut(&Addrd<Req>, &[String]) -> Result<Resp, Error> + 'static
  {
    self.handlers.insert(method, Box::new(handler));
    self
  }

  /// Shorthand for a GET handler that renders a fixed string with a
  /// content format
  pub fn get_string(self, body: impl Into<String>, format: ContentFormat) -> Self {
    let body = body.into();
    self.on(Method::Get, move |req, _| {
          let mut resp = Resp::for_request(req.data());
          resp.set_payload(body.as_bytes().to_vec());
          resp.msg_mut().set_content_format(format);
          Ok(resp)
        })
  }

  /// The registration path
  pub fn path(&self) -> &[String] {
    &self.path
  }

  /// The link attributes
  pub fn attrs(&self) -> &Attributes {
    &self.attrs
  }
}

/// Why dispatch could not produce a 2.xx
#[derive(Debug)]
pub enum Error {
  /// A handler panicked or refused; carries the CoAP response to
  /// send anyway
  Renderable(Resp),
}

/// The tree of resources an endpoint serves.
///
/// Dispatch walks registrations longest-prefix-first; the suffix
/// below the registration point is handed to the handler. The
/// `/.well-known/core` listing is built in.
#[derive(Debug, Default)]
pub struct Site {
  resources: Vec<Resource>,
}

impl Site {
  /// An empty site
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a resource, replacing any previous registration at the
  /// same path
  pub fn register(&mut self, resource: Resource) {
    self.resources.retain(|r| r.path != resource.path);
    self.resources.push(resource);
  }

  /// Remove the resource at `path`, yielding it if it was there.
  ///
  /// Call [`notify_removed`](crate::platform::Platform::notify_removed)
  /// afterwards so outstanding observations get their terminal
  /// notification.
  pub fn remove(&mut self, path: &str) -> Option<Resource> {
    let segments = path::segments(path);
    let ix = self.resources.iter().position(|r| r.path == segments)?;
    Some(self.resources.remove(ix))
  }

  /// The registered resources
  pub fn resources(&self) -> &[Resource] {
    &self.resources
  }

  /// Produce the response for a request.
  pub fn dispatch(&mut self, req: &Addrd<Req>) -> Addrd<Message> {
    let resp = self.dispatch_inner(req);
    Addrd(resp.into(), req.addr())
  }

  fn error(req: &Req, code: Code, diagnostic: &str) -> Resp {
    let mut resp = Resp::for_request(req);
    resp.set_code(code);
    resp.set_payload(diagnostic.as_bytes().to_vec());
    resp
  }

  fn dispatch_inner(&mut self, req: &Addrd<Req>) -> Resp {
    // unknown critical options must not be silently ignored
    if let Some(err) = Self::validate_options(req.data()) {
      return err;
    }

    let path = match req.data().path() {
      | Ok(p) => path::segments(&p),
      | Err(_) => return Self::error(req.data(), Code::BAD_REQUEST, "path is not utf8"),
    };

    if path == path::segments(".well-known/core") {
      let queries = req.data().msg().query().unwrap_or_default();
      let body = link_format::render(&self.resources, &queries);

      let mut resp = Resp::for_request(req.data());
      resp.set_payload(body.into_bytes());
      resp.msg_mut().set_content_format(ContentFormat::LinkFormat);
      return resp;
    }

    // longest matching prefix wins
    let found = self.resources
                    .iter_mut()
                    .filter_map(|r| {
                      path::strip_prefix(&path, &r.path).map(|suffix| (suffix.to_vec(), r))
                    })
                    .max_by_key(|(_, r)| r.path.len());

    let Some((suffix, resource)) = found else {
      return Self::error(req.data(), Code::NOT_FOUND, "");
    };

    let Some(method) = Method::from_code(req.data().method()) else {
      return Self::error(req.data(), Code::METHOD_NOT_ALLOWED, "");
    };

    if let Some(err) = Self::check_preconditions(req.data(), resource) {
      return err;
    }

    match resource.handlers.get_mut(&method) {
      | Some(handler) => match handler(req, &suffix) {
        | Ok(resp) => resp,
        // the handler failed but still knows what to say
        | Err(Error::Renderable(resp)) => resp,
      },
      | None => Self::error(req.data(), Code::METHOD_NOT_ALLOWED, ""),
    }
  }

  fn validate_options(req: &Req) -> Option<Resp> {
    for (number, values) in &req.msg().opts {
      match characteristics(*number) {
        | None if number.is_critical() => {
          return Some(Self::error(req,
                                  Code::BAD_OPTION,
                                  &format!("unknown critical option {}", number.0)));
        },
        | None => (),
        | Some(c) => {
          let lengths_ok = values.iter()
                                 .all(|v| v.len() >= c.min_len && v.len() <= c.max_len);
          let repeat_ok = c.repeatable || values.len() <= 1;

          if !(lengths_ok && repeat_ok) && number.is_critical() {
            return Some(Self::error(req,
                                    Code::BAD_OPTION,
                                    &format!("malformed option {}", number.0)));
          }
        },
      }
    }

    None
  }

  fn check_preconditions(req: &Req, resource: &Resource) -> Option<Resp> {
    // If-None-Match: only proceed when the target does NOT exist.
    // Every registered resource exists.
    if req.msg().if_not_exists_flag_enabled() {
      return Some(Self::error(req, Code::PRECONDITION_FAILED, ""));
    }

    // If-Match with tags: one of them must name our current state
    if let Some(tags) = req.msg().if_match() {
      let tagged: Vec<_> = tags.iter().filter(|t| !t.is_empty()).collect();
      if !tagged.is_empty() {
        let matched = resource.etag
                              .as_ref()
                              .map(|etag| tagged.iter().any(|t| t.as_bytes() == &etag[..]))
                              .unwrap_or(false);
        if !matched {
          return Some(Self::error(req, Code::PRECONDITION_FAILED, ""));
        }
      }
    }

    None
  }
}
