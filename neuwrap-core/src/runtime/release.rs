//! Runtime release tag resolution.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::net::Fetcher;

/// Latest-release metadata for the runtime repository.
pub const RELEASE_METADATA_URL: &str =
    "https://api.github.com/repos/neutralinojs/neutralinojs/releases/latest";

/// Used when the metadata endpoint is unreachable or unusable.
pub const DEFAULT_RELEASE_TAG: &str = "v6.4.0";

const RELEASE_DOWNLOAD_BASE: &str = "https://github.com/neutralinojs/neutralinojs/releases/download";

/// Where the release tag came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagSource {
    /// `NEUWRAP_RUNTIME_TAG`.
    Override,
    /// The metadata endpoint.
    Live,
    /// [`DEFAULT_RELEASE_TAG`].
    Fallback,
}

impl fmt::Display for TagSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Override => "override",
            Self::Live => "live",
            Self::Fallback => "fallback",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Deserialize)]
struct ReleaseMetadata {
    tag_name: Option<String>,
}

/// Parses the tag out of a metadata response body.
fn parse_tag(body: &[u8]) -> Option<String> {
    let metadata: ReleaseMetadata = serde_json::from_slice(body).ok()?;
    metadata
        .tag_name
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Picks the release tag. Never fails; lookup problems fall back.
pub async fn resolve_tag(fetcher: &dyn Fetcher, override_tag: Option<&str>) -> (String, TagSource) {
    if let Some(tag) = override_tag {
        info!(tag, source = %TagSource::Override, "Using pinned runtime release");
        return (tag.to_string(), TagSource::Override);
    }

    match fetcher.fetch(RELEASE_METADATA_URL).await {
        Ok(body) => match parse_tag(&body) {
            Some(tag) => {
                info!(tag = %tag, source = %TagSource::Live, "Resolved latest runtime release");
                return (tag, TagSource::Live);
            }
            None => warn!("Release metadata had no usable tag_name"),
        },
        Err(e) => warn!("Release metadata lookup failed: {}", e),
    }

    warn!(
        tag = DEFAULT_RELEASE_TAG,
        source = %TagSource::Fallback,
        "Falling back to built-in runtime release"
    );
    (DEFAULT_RELEASE_TAG.to_string(), TagSource::Fallback)
}

/// Download URL of the release bundle for `tag`.
pub fn archive_url(tag: &str) -> String {
    format!("{}/{}/neutralinojs-{}.zip", RELEASE_DOWNLOAD_BASE, tag, tag)
}
