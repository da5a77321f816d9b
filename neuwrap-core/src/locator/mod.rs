//! Finds an installed `neu` CLI.
//!
//! The common case (`neu` on `PATH`) is answered by a single probe. Only
//! when that fails are the slower sources consulted: the explicit override,
//! the project's `node_modules`, npm's global prefix, Windows shim folders
//! and the OS locator.

pub mod candidates;
pub mod probe;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::BuildContext;
use crate::error::{Error, Result};
use crate::process::{CommandRunner, RunOptions};

pub use candidates::{
    build_candidates, CandidateInputs, CandidateSource, Invocation, ToolCandidate, TOOL_NAME,
};
pub use probe::{parse_version, ProbeHit, SystemProbe, VersionProbe, DETECTED_VERSION};

const NPM_PREFIX_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Resolved Tool
// ============================================================================

/// A verified, invocable `neu`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTool {
    pub program: PathBuf,
    pub invocation: Invocation,
    pub source: CandidateSource,
    /// Parsed version, or [`DETECTED_VERSION`].
    pub version: String,
}

impl ResolvedTool {
    fn from_hit(candidate: &ToolCandidate, hit: ProbeHit) -> Self {
        Self {
            program: candidate.program.clone(),
            invocation: hit.invocation,
            source: candidate.source,
            version: hit.version,
        }
    }

    /// Shell command line running this tool with `args`.
    pub fn command_line(&self, args: &[&str]) -> String {
        let program = probe::shell_quote(&self.program.to_string_lossy());
        let mut line = match self.invocation {
            Invocation::Direct | Invocation::Shell => program,
            Invocation::PowerShell => format!(
                "powershell -NoProfile -ExecutionPolicy Bypass -File {}",
                program
            ),
        };
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Returns the first candidate whose probe succeeds, in list order.
pub async fn resolve_first(
    candidates: &[ToolCandidate],
    probe: &dyn VersionProbe,
) -> Option<ResolvedTool> {
    for candidate in candidates {
        debug!(
            source = %candidate.source,
            program = %candidate.program.display(),
            "Probing candidate"
        );
        if let Some(hit) = probe.probe(candidate).await {
            return Some(ResolvedTool::from_hit(candidate, hit));
        }
    }
    None
}

// ============================================================================
// Tool Locator
// ============================================================================

pub struct ToolLocator<'a> {
    ctx: &'a BuildContext,
    runner: &'a dyn CommandRunner,
    probe: &'a dyn VersionProbe,
}

impl<'a> ToolLocator<'a> {
    pub fn new(
        ctx: &'a BuildContext,
        runner: &'a dyn CommandRunner,
        probe: &'a dyn VersionProbe,
    ) -> Self {
        Self { ctx, runner, probe }
    }

    /// Locates `neu`, or fails with [`Error::ToolNotFound`].
    pub async fn locate(&self) -> Result<ResolvedTool> {
        let fast = ToolCandidate::bare(
            CandidateSource::PathLookup,
            vec![Invocation::Direct, Invocation::Shell],
        );
        if let Some(hit) = self.probe.probe(&fast).await {
            let tool = ResolvedTool::from_hit(&fast, hit);
            info!(version = %tool.version, "Found neu on PATH");
            return Ok(tool);
        }

        debug!("neu not directly on PATH, scanning candidate locations");
        let inputs = self.gather_inputs().await;
        let candidates = build_candidates(&inputs);

        match resolve_first(&candidates, self.probe).await {
            Some(tool) => {
                info!(
                    source = %tool.source,
                    program = %tool.program.display(),
                    version = %tool.version,
                    "Found neu"
                );
                Ok(tool)
            }
            None => {
                warn!(
                    "neu not found after probing {} candidate(s)",
                    candidates.len()
                );
                Err(Error::ToolNotFound)
            }
        }
    }

    async fn gather_inputs(&self) -> CandidateInputs {
        let windows = cfg!(windows);
        let names = candidates::shim_names(windows);

        let bin_dir = self.ctx.project_dir().join("node_modules").join(".bin");
        let local_install = names
            .iter()
            .map(|name| bin_dir.join(name))
            .filter(|p| p.is_file())
            .collect();

        let located = which::which_all(TOOL_NAME)
            .map(|paths| paths.collect())
            .unwrap_or_default();

        let path_scan = if windows {
            scan_path_dirs(std::env::var_os("PATH"), names)
        } else {
            Vec::new()
        };

        CandidateInputs {
            windows,
            explicit_override: self.ctx.overrides().neu_path.clone(),
            local_install,
            npm_prefix: self.npm_prefix().await,
            app_data: std::env::var_os("APPDATA").map(PathBuf::from),
            located,
            path_scan,
        }
    }

    /// Asks npm for its global prefix.
    async fn npm_prefix(&self) -> Option<PathBuf> {
        let options = RunOptions::default()
            .quiet()
            .allow_failure()
            .timeout(NPM_PREFIX_TIMEOUT);

        match self.runner.run("npm prefix -g", options).await {
            Ok(out) if out.success() => {
                let prefix = out.output.lines().map(str::trim).find(|l| !l.is_empty())?;
                debug!(prefix, "npm global prefix");
                Some(PathBuf::from(prefix))
            }
            Ok(_) => None,
            Err(e) => {
                debug!("npm prefix lookup failed: {}", e);
                None
            }
        }
    }
}

/// Finds shim files in every directory of a `PATH`-style value.
fn scan_path_dirs(path_var: Option<std::ffi::OsString>, names: &[&str]) -> Vec<PathBuf> {
    let Some(path_var) = path_var else {
        return Vec::new();
    };

    std::env::split_paths(&path_var)
        .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
        .filter(|p| Path::new(p).is_file())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvOverrides;
    use crate::process::RunOutput;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Succeeds for the listed programs, recording every probe.
    #[derive(Default)]
    struct FakeProbe {
        versions: HashMap<PathBuf, String>,
        probed: Mutex<Vec<PathBuf>>,
    }

    impl FakeProbe {
        fn with(pairs: &[(&str, &str)]) -> Self {
            Self {
                versions: pairs
                    .iter()
                    .map(|(p, v)| (PathBuf::from(p), v.to_string()))
                    .collect(),
                probed: Mutex::new(Vec::new()),
            }
        }

        fn probed(&self) -> Vec<PathBuf> {
            self.probed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VersionProbe for FakeProbe {
        async fn probe(&self, candidate: &ToolCandidate) -> Option<ProbeHit> {
            self.probed.lock().unwrap().push(candidate.program.clone());
            self.versions.get(&candidate.program).map(|v| ProbeHit {
                invocation: candidate.invocations[0],
                version: v.clone(),
            })
        }
    }

    /// Counts commands; answers everything with a failure.
    #[derive(Default)]
    struct CountingRunner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CommandRunner for CountingRunner {
        async fn run(&self, _command: &str, _options: RunOptions) -> Result<RunOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RunOutput {
                exit_code: Some(1),
                output: String::new(),
                truncated: false,
                timed_out: false,
            })
        }
    }

    fn candidate(path: &str) -> ToolCandidate {
        ToolCandidate::from_path(CandidateSource::OsLocator, path)
    }

    #[tokio::test]
    async fn test_resolve_first_prefers_earliest_success() {
        let probe = FakeProbe::with(&[("/b/neu", "1.0.0"), ("/c/neu", "2.0.0")]);
        let list = vec![candidate("/a/neu"), candidate("/b/neu"), candidate("/c/neu")];

        let tool = resolve_first(&list, &probe).await.unwrap();
        assert_eq!(tool.program, PathBuf::from("/b/neu"));
        assert_eq!(tool.version, "1.0.0");
        // Never probes past the winner
        assert_eq!(
            probe.probed(),
            vec![PathBuf::from("/a/neu"), PathBuf::from("/b/neu")]
        );
    }

    #[tokio::test]
    async fn test_resolve_first_none() {
        let probe = FakeProbe::default();
        let list = vec![candidate("/a/neu")];
        assert!(resolve_first(&list, &probe).await.is_none());
    }

    #[tokio::test]
    async fn test_fast_path_skips_scanning() {
        let ctx = BuildContext::new("/nonexistent/project", EnvOverrides::default());
        let runner = CountingRunner::default();
        let probe = FakeProbe::with(&[("neu", "6.4.0")]);

        let tool = ToolLocator::new(&ctx, &runner, &probe).locate().await.unwrap();
        assert_eq!(tool.version, "6.4.0");
        assert_eq!(tool.source, CandidateSource::PathLookup);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
        assert_eq!(probe.probed().len(), 1);
    }

    #[tokio::test]
    async fn test_explicit_override_used_when_path_lookup_fails() {
        let overrides = EnvOverrides {
            neu_path: Some(PathBuf::from("/custom/neu")),
            ..Default::default()
        };
        let ctx = BuildContext::new("/nonexistent/project", overrides);
        let runner = CountingRunner::default();
        let probe = FakeProbe::with(&[("/custom/neu", "detected")]);

        let tool = ToolLocator::new(&ctx, &runner, &probe).locate().await.unwrap();
        assert_eq!(tool.source, CandidateSource::ExplicitOverride);
        assert_eq!(tool.version, DETECTED_VERSION);
        // npm prefix was consulted while gathering candidates
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_not_found() {
        let ctx = BuildContext::new("/nonexistent/project", EnvOverrides::default());
        let runner = CountingRunner::default();
        let probe = FakeProbe::default();

        let err = ToolLocator::new(&ctx, &runner, &probe)
            .locate()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ToolNotFound));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_install_found_on_disk() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::TempDir::new().unwrap();
        let bin = temp.path().join("node_modules").join(".bin");
        std::fs::create_dir_all(&bin).unwrap();
        let script = bin.join("neu");
        std::fs::write(&script, "#!/bin/sh\necho 'neu cli: 6.4.0'\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let ctx = BuildContext::new(temp.path(), EnvOverrides::default());
        let runner = CountingRunner::default();
        let probe = FakeProbe::with(&[(script.to_str().unwrap(), "6.4.0")]);

        let tool = ToolLocator::new(&ctx, &runner, &probe).locate().await.unwrap();
        assert_eq!(tool.source, CandidateSource::LocalInstall);
        assert_eq!(tool.program, script);
    }

    #[test]
    fn test_command_line() {
        let tool = ResolvedTool {
            program: PathBuf::from("neu"),
            invocation: Invocation::Shell,
            source: CandidateSource::PathLookup,
            version: "6.4.0".into(),
        };
        assert_eq!(
            tool.command_line(&["build", "--release"]),
            "neu build --release"
        );

        let ps = ResolvedTool {
            program: PathBuf::from("C:/Program Files/npm/neu.ps1"),
            invocation: Invocation::PowerShell,
            ..tool
        };
        let expected_path = if cfg!(windows) {
            "\"C:/Program Files/npm/neu.ps1\""
        } else {
            "'C:/Program Files/npm/neu.ps1'"
        };
        assert_eq!(
            ps.command_line(&["update"]),
            format!(
                "powershell -NoProfile -ExecutionPolicy Bypass -File {} update",
                expected_path
            )
        );

        let odd = ResolvedTool {
            program: PathBuf::from("/opt/R&D ($team)/neu"),
            invocation: Invocation::Shell,
            ..ps
        };
        let line = odd.command_line(&["build"]);
        if cfg!(windows) {
            assert_eq!(line, "\"/opt/R&D ($team)/neu\" build");
        } else {
            assert_eq!(line, "'/opt/R&D ($team)/neu' build");
        }
    }

    #[test]
    fn test_scan_path_dirs() {
        let temp = tempfile::TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        std::fs::write(b.join("neu.cmd"), "@echo off").unwrap();

        let path_var = std::env::join_paths([&a, &b]).unwrap();
        let found = scan_path_dirs(Some(path_var), &["neu.cmd", "neu.ps1"]);
        assert_eq!(found, vec![b.join("neu.cmd")]);
        assert!(scan_path_dirs(None, &["neu.cmd"]).is_empty());
    }
}
