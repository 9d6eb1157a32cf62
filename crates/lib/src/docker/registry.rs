//! Registry tag queries.

use serde::Deserialize;
use tracing::debug;

use super::{DockerError, ImageRef};
use crate::consts::DEFAULT_REGISTRY_URL;

/// Response shapes of the tag-listing endpoint.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TagList {
  /// Docker Hub v1: `[{"layer": "", "name": "latest"}, ...]`
  V1(Vec<NamedTag>),
  /// Registry v2: `{"name": "repo", "tags": ["latest", ...]}`
  V2 { tags: Option<Vec<String>> },
}

#[derive(Debug, Deserialize)]
struct NamedTag {
  name: String,
}

impl TagList {
  fn contains(&self, tag: &str) -> bool {
    match self {
      TagList::V1(entries) => entries.iter().any(|entry| entry.name == tag),
      TagList::V2 { tags } => tags.iter().flatten().any(|t| t == tag),
    }
  }
}

/// Client for checking whether a tag was already published.
#[derive(Debug, Clone)]
pub struct RegistryClient {
  http: reqwest::Client,
  url_template: String,
}

impl Default for RegistryClient {
  fn default() -> Self {
    Self::new(DEFAULT_REGISTRY_URL)
  }
}

impl RegistryClient {
  /// `url_template` must contain `{repository}`.
  pub fn new(url_template: impl Into<String>) -> Self {
    Self {
      http: reqwest::Client::new(),
      url_template: url_template.into(),
    }
  }

  pub fn tags_url(&self, repository: &str) -> String {
    self.url_template.replace("{repository}", repository)
  }

  /// Whether `image` (`repository:tag`) is listed by the registry.
  ///
  /// A 404 means the repository does not exist yet, which is not an error.
  pub async fn has_tag(&self, image: &str) -> Result<bool, DockerError> {
    let image = ImageRef::parse(image);
    let url = self.tags_url(&image.repository);
    debug!(url = %url, tag = %image.tag, "querying registry");

    let response = self.http.get(&url).send().await.map_err(|e| DockerError::Registry {
      url: url.clone(),
      message: e.to_string(),
    })?;

    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
      return Ok(false);
    }
    if !status.is_success() {
      return Err(DockerError::RegistryStatus {
        url,
        status: status.as_u16(),
      });
    }

    let tags: TagList = response.json().await.map_err(|e| DockerError::Registry {
      url: url.clone(),
      message: e.to_string(),
    })?;
    Ok(tags.contains(&image.tag))
  }
}
