//! Path resolution for caches and project-relative build locations.
//!
//! The shared runtime cache lives under the user cache directory:
//!
//! - Linux: `~/.cache/neuwrap/runtime/`
//! - macOS: `~/Library/Caches/neuwrap/runtime/`
//! - Windows: `C:\Users\<User>\AppData\Local\neuwrap\runtime\`
//!
//! When the platform has no cache directory, the OS temp folder is used.

use std::path::{Path, PathBuf};

/// Subdirectory name under the user cache folder.
const NEUWRAP_DIR: &str = "neuwrap";

/// Directory `neu update` populates inside a project, and that `neu build` reads.
pub const PROJECT_RUNTIME_DIR: &str = "bin";

/// Web resources staged for embedding.
pub const PROJECT_RESOURCES_DIR: &str = "resources";

/// Root of `neu build` output.
pub const PROJECT_DIST_DIR: &str = "dist";

/// Scratch directory name for direct runtime downloads.
const DOWNLOAD_SCRATCH_DIR: &str = ".neuwrap-download";

// ============================================================================
// Shared Locations
// ============================================================================

/// Returns the base neuwrap directory inside the user cache folder.
pub fn get_neuwrap_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(NEUWRAP_DIR)
}

/// Returns the default shared runtime cache directory.
///
/// Path: `{cache}/neuwrap/runtime/`
pub fn get_shared_runtime_dir() -> PathBuf {
    get_neuwrap_cache_dir().join("runtime")
}

// ============================================================================
// Project Locations
// ============================================================================

/// `<project>/bin`
pub fn project_runtime_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(PROJECT_RUNTIME_DIR)
}

/// `<project>/resources`
pub fn project_resources_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(PROJECT_RESOURCES_DIR)
}

/// `<project>/dist`
pub fn project_dist_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(PROJECT_DIST_DIR)
}

/// `<project>/dist/<binary_name>`, the canonical output directory.
pub fn build_output_dir(project_dir: &Path, binary_name: &str) -> PathBuf {
    project_dist_dir(project_dir).join(binary_name)
}

/// `<project>/dist/<binary_name>-release.zip`
pub fn release_archive_path(project_dir: &Path, binary_name: &str) -> PathBuf {
    project_dist_dir(project_dir).join(format!("{}-release.zip", binary_name))
}

/// Scratch directory used while downloading a runtime archive for `cache_dir`.
///
/// Placed next to the cache so the final copy stays on one filesystem.
pub fn download_scratch_dir(cache_dir: &Path) -> PathBuf {
    cache_dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(std::env::temp_dir)
        .join(DOWNLOAD_SCRATCH_DIR)
}
