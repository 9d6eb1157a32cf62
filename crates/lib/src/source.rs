//! `url#ref` source locations.

use std::fmt;

use crate::consts::DEFAULT_SOURCE_REF;

/// A repository URL with an optional ref after `#`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Source {
  pub url: String,
  pub reference: Option<String>,
}

impl Source {
  /// Split `url#ref`. An empty or missing ref is `None`.
  pub fn parse(source: &str) -> Self {
    match source.split_once('#') {
      Some((url, reference)) if !reference.is_empty() => Self {
        url: url.to_string(),
        reference: Some(reference.to_string()),
      },
      Some((url, _)) => Self {
        url: url.to_string(),
        reference: None,
      },
      None => Self {
        url: source.to_string(),
        reference: None,
      },
    }
  }

  /// The ref, falling back to `master`.
  pub fn reference_or_default(&self) -> &str {
    self.reference.as_deref().unwrap_or(DEFAULT_SOURCE_REF)
  }

  /// The same URL pinned to `revision`.
  pub fn with_revision(&self, revision: &str) -> Self {
    Self {
      url: self.url.clone(),
      reference: Some(revision.to_string()),
    }
  }
}

impl fmt::Display for Source {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.reference {
      Some(reference) => write!(f, "{}#{}", self.url, reference),
      None => write!(f, "{}", self.url),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn splits_url_and_ref() {
    let source = Source::parse("https://example.test/svc#main");
    assert_eq!(source.url, "https://example.test/svc");
    assert_eq!(source.reference.as_deref(), Some("main"));
    assert_eq!(source.to_string(), "https://example.test/svc#main");
  }

  #[test]
  fn missing_ref_defaults_to_master() {
    let source = Source::parse("https://github.com/heroku/heroku-buildpack-nodejs");
    assert_eq!(source.reference, None);
    assert_eq!(source.reference_or_default(), "master");

    assert_eq!(Source::parse("https://example.test/svc#").reference, None);
  }

  #[test]
  fn pins_revision() {
    let exact = Source::parse("https://example.test/svc#main").with_revision("abcd123");
    assert_eq!(exact.to_string(), "https://example.test/svc#abcd123");
  }
}
