//! CoRE Link Format (RFC6690) rendering of the site tree, served at
//! `/.well-known/core`.

use super::{Resource, path};

/// One `name=value` (or bare flag) query filter from the request,
/// matched per RFC6690 §4.1: an attribute value filter may end in
/// `*` for prefix matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Filter {
  name: String,
  value: String,
}

impl Filter {
  pub(crate) fn parse(query: &str) -> Option<Filter> {
    let (name, value) = query.split_once('=')?;
    Some(Filter { name: name.to_string(),
                  value: value.to_string() })
  }

  fn value_matches(&self, actual: Option<&str>) -> bool {
    let Some(actual) = actual else { return false };

    match self.value.strip_suffix('*') {
      | Some(prefix) => actual.starts_with(prefix),
      | None => actual == self.value,
    }
  }

  pub(crate) fn matches(&self, resource: &Resource) -> bool {
    match self.name.as_str() {
      | "href" => {
        let href = format!("/{}", path::join(resource.path()));
        match self.value.strip_suffix('*') {
          | Some(prefix) => href.starts_with(prefix),
          | None => href == self.value,
        }
      },
      | "rt" => self.value_matches(resource.attrs().rt.as_deref()),
      | "if" => self.value_matches(resource.attrs().interface.as_deref()),
      | _ => true,
    }
  }
}

/// Render the resources that survive the query filters in link
/// format: `</path>;rt="...";if="...";ct=40;sz=1234;obs` joined
/// with commas.
pub(crate) fn render(resources: &[Resource], queries: &[&str]) -> String {
  let filters: Vec<Filter> = queries.iter().filter_map(|q| Filter::parse(q)).collect();

  resources.iter()
           .filter(|r| filters.iter().all(|f| f.matches(r)))
           .map(|r| {
             let attrs = r.attrs();
             let mut link = format!("</{}>", path::join(r.path()));

             if let Some(rt) = &attrs.rt {
               link.push_str(&format!(";rt=\"{}\"", rt));
             }
             if let Some(interface) = &attrs.interface {
               link.push_str(&format!(";if=\"{}\"", interface));
             }
             if let Some(ct) = attrs.ct {
               link.push_str(&format!(";ct={}", ct));
             }
             if let Some(sz) = attrs.sz {
               link.push_str(&format!(";sz={}", sz));
             }
             if attrs.obs {
               link.push_str(";obs");
             }

             link
           })
           .collect::<Vec<_>>()
           .join(",")
}

#[cfg(test)]
mod tests {
  use super::super::Attributes;
  use super::*;

  fn site() -> Vec<Resource> {
    vec![Resource::new("sensors/temp").attributes(Attributes { rt:
                                                                 Some("temperature".into()),
                                                               interface: Some("core.s".into()),
                                                               ct: Some(0),
                                                               sz: None,
                                                               obs: true }),
         Resource::new("actuators/led").attributes(Attributes { rt: Some("light".into()),
                                                                ..Default::default() })]
  }

  #[test]
  fn renders_attributes() {
    let out = render(&site(), &[]);
    assert_eq!(out,
               "</sensors/temp>;rt=\"temperature\";if=\"core.s\";ct=0;obs,\
                </actuators/led>;rt=\"light\"");
  }

  #[test]
  fn filters_by_rt() {
    let out = render(&site(), &["rt=light"]);
    assert_eq!(out, "</actuators/led>;rt=\"light\"");
  }

  #[test]
  fn filters_by_href_prefix() {
    let out = render(&site(), &["href=/sensors*"]);
    assert!(out.starts_with("</sensors/temp>"));
    assert!(!out.contains("led"));
  }

  #[test]
  fn wildcard_attribute_match() {
    let out = render(&site(), &["rt=temp*"]);
    assert!(out.contains("sensors/temp"));
    assert!(!out.contains("led"));
  }
}
