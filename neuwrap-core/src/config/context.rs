//! Per-invocation context threaded through locator, provisioner and build driver.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::env_keys;
use super::paths;

// ============================================================================
// Environment Overrides
// ============================================================================

/// Values read from `NEUWRAP_*` environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvOverrides {
    /// Explicit `neu` executable or shim.
    pub neu_path: Option<PathBuf>,
    /// Skip `neu update` and go straight to the archive download.
    pub force_direct_download: bool,
    /// Pinned runtime release tag.
    pub runtime_tag: Option<String>,
    /// Shared cache root override.
    pub cache_dir: Option<PathBuf>,
}

impl EnvOverrides {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads overrides through an arbitrary lookup (used by tests).
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            neu_path: get(env_keys::NEU_PATH).map(PathBuf::from),
            force_direct_download: get(env_keys::FORCE_DIRECT_DOWNLOAD)
                .map(|v| env_keys::TRUTHY.contains(&v.to_lowercase().as_str()))
                .unwrap_or(false),
            runtime_tag: get(env_keys::RUNTIME_TAG),
            cache_dir: get(env_keys::CACHE_DIR).map(PathBuf::from),
        }
    }
}

// ============================================================================
// Cache Location
// ============================================================================

/// Where the runtime binary set is cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheLocation {
    /// `<project>/bin`, consumed directly by `neu build`.
    ProjectLocal,
    /// A host-wide directory reused across projects and runs.
    Shared(PathBuf),
}

// ============================================================================
// Build Context
// ============================================================================

/// Everything a run needs to know about its surroundings.
///
/// Components never consult the process working directory; they receive
/// paths from here.
#[derive(Debug, Clone)]
pub struct BuildContext {
    project_dir: PathBuf,
    cache: CacheLocation,
    overrides: EnvOverrides,
}

impl BuildContext {
    pub fn new(project_dir: impl Into<PathBuf>, overrides: EnvOverrides) -> Self {
        Self {
            project_dir: project_dir.into(),
            cache: CacheLocation::ProjectLocal,
            overrides,
        }
    }

    /// Switches to a shared cache, honouring `NEUWRAP_CACHE_DIR` when set.
    pub fn with_shared_cache(mut self) -> Self {
        let dir = self
            .overrides
            .cache_dir
            .clone()
            .unwrap_or_else(paths::get_shared_runtime_dir);
        self.cache = CacheLocation::Shared(dir);
        self
    }

    pub fn with_cache(mut self, cache: CacheLocation) -> Self {
        self.cache = cache;
        self
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn overrides(&self) -> &EnvOverrides {
        &self.overrides
    }

    pub fn overrides_mut(&mut self) -> &mut EnvOverrides {
        &mut self.overrides
    }

    pub fn cache(&self) -> &CacheLocation {
        &self.cache
    }

    pub fn is_shared_cache(&self) -> bool {
        matches!(self.cache, CacheLocation::Shared(_))
    }

    /// Directory `neu` reads runtime binaries from.
    pub fn project_runtime_dir(&self) -> PathBuf {
        paths::project_runtime_dir(&self.project_dir)
    }

    /// Directory the provisioner fills.
    pub fn cache_dir(&self) -> PathBuf {
        match &self.cache {
            CacheLocation::ProjectLocal => self.project_runtime_dir(),
            CacheLocation::Shared(dir) => dir.clone(),
        }
    }
}
