//! Runtime binary provisioning.
//!
//! `neu build` packages the seven platform runtimes from `<project>/bin`.
//! [`RuntimeProvisioner::ensure`] makes sure a cache directory holds all of
//! them, first by letting `neu update` fetch them and, when that does not
//! deliver, by downloading the release bundle directly.

pub mod binaries;
pub mod extractor;
pub mod release;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{paths, BuildContext};
use crate::error::{Error, Result};
use crate::locator::ResolvedTool;
use crate::net::Fetcher;
use crate::process::{CommandRunner, RunOptions, CONFIRM_TOKEN};

pub use binaries::{missing_binaries, RUNTIME_BINARIES};
pub use release::{archive_url, resolve_tag, TagSource, DEFAULT_RELEASE_TAG};

/// `neu update` may download for a while on slow links.
pub const UPDATE_TIMEOUT: Duration = Duration::from_secs(180);

// ============================================================================
// Provision Report
// ============================================================================

/// How the cache ended up complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Acquisition {
    /// Everything was already present.
    CacheHit,
    /// `neu update` delivered the missing binaries.
    Primary,
    /// The release bundle was downloaded directly.
    Direct { tag: String, tag_source: TagSource },
}

/// Outcome of a successful [`RuntimeProvisioner::ensure`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    pub cache_dir: PathBuf,
    pub acquisition: Acquisition,
    /// Binaries that were missing before and are present now.
    pub installed: Vec<String>,
    /// Binaries copied from a shared cache into the project.
    pub fanned_out: Vec<String>,
}

// ============================================================================
// Scratch Directory
// ============================================================================

/// Download workspace, emptied on creation and removed on drop.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(path: PathBuf) -> Result<Self> {
        if path.exists() {
            debug!("Clearing stale scratch directory {}", path.display());
            fs::remove_dir_all(&path)
                .map_err(|e| Error::io(format!("failed to clear {}", path.display()), e))?;
        }
        fs::create_dir_all(&path)
            .map_err(|e| Error::io(format!("failed to create {}", path.display()), e))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            warn!(
                "Failed to remove scratch directory {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

// ============================================================================
// Runtime Provisioner
// ============================================================================

pub struct RuntimeProvisioner<'a> {
    ctx: &'a BuildContext,
    runner: &'a dyn CommandRunner,
    fetcher: &'a dyn Fetcher,
}

impl<'a> RuntimeProvisioner<'a> {
    pub fn new(
        ctx: &'a BuildContext,
        runner: &'a dyn CommandRunner,
        fetcher: &'a dyn Fetcher,
    ) -> Self {
        Self {
            ctx,
            runner,
            fetcher,
        }
    }

    /// Provisions the context's cache and, for a shared cache, copies the
    /// binaries into `<project>/bin` where `neu build` expects them.
    pub async fn ensure_for_project(&self, tool: &ResolvedTool) -> Result<ProvisionReport> {
        let cache_dir = self.ctx.cache_dir();
        let mut report = self.ensure(tool, &cache_dir).await?;

        if self.ctx.is_shared_cache() {
            let project_bin = self.ctx.project_runtime_dir();
            report.fanned_out =
                binaries::copy_binaries(&cache_dir, &project_bin, RUNTIME_BINARIES, true)?;
            debug!(
                "Copied {} runtime binaries into {}",
                report.fanned_out.len(),
                project_bin.display()
            );
        }

        Ok(report)
    }

    /// Makes `cache_dir` hold every runtime binary.
    ///
    /// Idempotent: a complete cache returns immediately without spawning a
    /// process or touching the network.
    pub async fn ensure(&self, tool: &ResolvedTool, cache_dir: &Path) -> Result<ProvisionReport> {
        let initially_missing = missing_binaries(cache_dir);
        if initially_missing.is_empty() {
            info!("Runtime binaries already present in {}", cache_dir.display());
            return Ok(self.report(cache_dir, Acquisition::CacheHit, &[]));
        }

        info!(
            "{} of {} runtime binaries missing from {}",
            initially_missing.len(),
            RUNTIME_BINARIES.len(),
            cache_dir.display()
        );

        if self.ctx.overrides().force_direct_download {
            info!("Direct download forced, skipping neu update");
        } else {
            self.try_primary(tool, cache_dir).await;

            if missing_binaries(cache_dir).is_empty() {
                info!("neu update provided all runtime binaries");
                return Ok(self.report(cache_dir, Acquisition::Primary, &initially_missing));
            }
        }

        let missing = missing_binaries(cache_dir);
        warn!(
            "Still missing {} runtime binaries, downloading release bundle: {}",
            missing.len(),
            missing.join(", ")
        );
        let (tag, tag_source) = self.download_direct(cache_dir, &missing).await?;

        let still_missing = missing_binaries(cache_dir);
        if !still_missing.is_empty() {
            return Err(Error::IncompleteRuntimeDownload {
                missing: still_missing.iter().map(|s| s.to_string()).collect(),
            });
        }

        info!(tag = %tag, "Runtime binaries ready in {}", cache_dir.display());
        Ok(self.report(
            cache_dir,
            Acquisition::Direct { tag, tag_source },
            &initially_missing,
        ))
    }

    /// Runs `neu update`. Failures here are logged, never returned.
    async fn try_primary(&self, tool: &ResolvedTool, cache_dir: &Path) {
        let project_bin = self.ctx.project_runtime_dir();
        let command = tool.command_line(&["update"]);
        let options = RunOptions::default()
            .input(CONFIRM_TOKEN)
            .timeout(UPDATE_TIMEOUT)
            .working_dir(self.ctx.project_dir());

        info!("Fetching runtime binaries with `{}`", command);
        if let Err(e) = self.runner.run(&command, options).await {
            warn!("neu update failed: {}", e);
            if let Some(output) = e.output() {
                debug!("neu update output:\n{}", output);
            }
        }

        if project_bin != cache_dir {
            match binaries::copy_binaries(&project_bin, cache_dir, RUNTIME_BINARIES, false) {
                Ok(copied) if !copied.is_empty() => debug!(
                    "Copied {} binaries from {} into the shared cache",
                    copied.len(),
                    project_bin.display()
                ),
                Ok(_) => {}
                Err(e) => warn!("Could not collect neu update output into the cache: {}", e),
            }
        }
    }

    /// Downloads the release bundle and installs the `missing` binaries.
    async fn download_direct(
        &self,
        cache_dir: &Path,
        missing: &[&str],
    ) -> Result<(String, TagSource)> {
        let (tag, tag_source) =
            resolve_tag(self.fetcher, self.ctx.overrides().runtime_tag.as_deref()).await;
        let url = archive_url(&tag);

        let scratch = ScratchDir::create(paths::download_scratch_dir(cache_dir))?;
        let archive_path = scratch.path().join(format!("neutralinojs-{}.zip", tag));
        let extract_dir = scratch.path().join("extracted");

        debug!(tag = %tag, source = %tag_source, "Fetching runtime bundle {}", url);
        let bytes = self.fetcher.download(&url, &archive_path).await?;
        debug!("Downloaded {} bytes", bytes);

        extractor::extract_zip(&archive_path, &extract_dir).map_err(Error::Extraction)?;

        let installed = binaries::install_from_tree(&extract_dir, cache_dir, missing)?;
        debug!("Installed from release bundle: {}", installed.join(", "));

        Ok((tag, tag_source))
    }

    fn report(
        &self,
        cache_dir: &Path,
        acquisition: Acquisition,
        initially_missing: &[&str],
    ) -> ProvisionReport {
        let now_missing = missing_binaries(cache_dir);
        let installed = initially_missing
            .iter()
            .filter(|name| !now_missing.iter().any(|m| m == *name))
            .map(|name| name.to_string())
            .collect();

        ProvisionReport {
            cache_dir: cache_dir.to_path_buf(),
            acquisition,
            installed,
            fanned_out: Vec::new(),
        }
    }
}
