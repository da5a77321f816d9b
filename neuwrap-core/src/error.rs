//! Error type shared by every neuwrap component.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("command `{command}` exited with code {code}")]
    CommandFailed {
        command: String,
        code: i32,
        output: String,
    },
    #[error("command `{command}` timed out after {timeout:?}")]
    CommandTimedOut {
        command: String,
        timeout: Duration,
        output: String,
    },
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("request to {url} timed out")]
    NetworkTimeout { url: String },
    #[error("unexpected HTTP status {code} from {url}")]
    UnexpectedStatus { code: u16, url: String },
    #[error("too many redirects while fetching {url}")]
    TooManyRedirects { url: String },
    #[error("network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("neu CLI not found (install it with `npm install -g @neutralinojs/neu` or set NEUWRAP_NEU_PATH)")]
    ToolNotFound,
    #[error("runtime download incomplete, missing: {}", missing.join(", "))]
    IncompleteRuntimeDownload { missing: Vec<String> },
    #[error("build produced no executables or archives in {}", dir.display())]
    NoOutputsProduced { dir: PathBuf },

    #[error("archive extraction failed: {0:#}")]
    Extraction(anyhow::Error),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Captured process output, for the variants that carry it.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { output, .. } | Self::CommandTimedOut { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
