//! Candidate locations for the `neu` executable, in priority order.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Bare command name of the CLI.
pub const TOOL_NAME: &str = "neu";

/// Where a candidate came from. Declaration order is priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateSource {
    /// `NEUWRAP_NEU_PATH`.
    ExplicitOverride,
    /// `<project>/node_modules/.bin`.
    LocalInstall,
    /// Bare name resolved by the shell.
    PathLookup,
    /// `npm prefix -g` bin directory.
    PackageManagerBin,
    /// `%APPDATA%\npm` shims.
    OsShim,
    /// `which`/`where` style lookup.
    OsLocator,
    /// Direct scan of `PATH` entries for shim variants.
    PathScan,
}

impl CandidateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExplicitOverride => "explicit-override",
            Self::LocalInstall => "local-install",
            Self::PathLookup => "path-lookup",
            Self::PackageManagerBin => "package-manager-bin",
            Self::OsShim => "os-shim",
            Self::OsLocator => "os-locator",
            Self::PathScan => "path-scan",
        }
    }
}

impl fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a candidate is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Invocation {
    /// Spawn the program with arguments, no shell.
    Direct,
    /// Pass a command string to the platform shell.
    Shell,
    /// Run a PowerShell script through `powershell -File`.
    PowerShell,
}

/// A path or bare command that might be the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCandidate {
    pub source: CandidateSource,
    pub program: PathBuf,
    /// Strategies tried in order during the version probe.
    pub invocations: Vec<Invocation>,
}

impl ToolCandidate {
    /// The bare command name, resolved through the search path.
    pub fn bare(source: CandidateSource, invocations: Vec<Invocation>) -> Self {
        Self {
            source,
            program: PathBuf::from(TOOL_NAME),
            invocations,
        }
    }

    /// A filesystem path; the invocation strategy follows the file type.
    pub fn from_path(source: CandidateSource, path: impl Into<PathBuf>) -> Self {
        let program = path.into();
        let invocations = invocations_for(&program);
        Self {
            source,
            program,
            invocations,
        }
    }

    pub fn requires_shell(&self) -> bool {
        !self.invocations.contains(&Invocation::Direct)
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn invocations_for(path: &Path) -> Vec<Invocation> {
    match extension(path).as_deref() {
        Some("ps1") => vec![Invocation::PowerShell, Invocation::Shell],
        Some("cmd") | Some("bat") => vec![Invocation::Shell],
        _ => vec![Invocation::Direct, Invocation::Shell],
    }
}

/// Executable names worth looking for on the current platform.
pub fn shim_names(windows: bool) -> &'static [&'static str] {
    if windows {
        &["neu.cmd", "neu.ps1", "neu.exe", "neu"]
    } else {
        &["neu"]
    }
}

// ============================================================================
// Candidate Inputs
// ============================================================================

/// Everything discovered about the host, gathered before ordering.
#[derive(Debug, Clone, Default)]
pub struct CandidateInputs {
    pub windows: bool,
    pub explicit_override: Option<PathBuf>,
    /// Existing executables under `node_modules/.bin`.
    pub local_install: Vec<PathBuf>,
    /// Output of `npm prefix -g`.
    pub npm_prefix: Option<PathBuf>,
    /// `%APPDATA%`.
    pub app_data: Option<PathBuf>,
    /// Results of the OS locator.
    pub located: Vec<PathBuf>,
    /// Shim files found by scanning `PATH` directly.
    pub path_scan: Vec<PathBuf>,
}

/// Orders and deduplicates candidates. Earlier entries win.
pub fn build_candidates(inputs: &CandidateInputs) -> Vec<ToolCandidate> {
    let mut list = CandidateList::new(inputs.windows);

    if let Some(path) = &inputs.explicit_override {
        list.push(ToolCandidate::from_path(
            CandidateSource::ExplicitOverride,
            path,
        ));
    }

    for path in &inputs.local_install {
        list.push(ToolCandidate::from_path(CandidateSource::LocalInstall, path));
    }

    list.push(ToolCandidate::bare(
        CandidateSource::PathLookup,
        vec![Invocation::Shell],
    ));

    if let Some(prefix) = &inputs.npm_prefix {
        // npm puts shims directly in the prefix on Windows, under bin/ elsewhere
        let bin_dir = if inputs.windows {
            prefix.clone()
        } else {
            prefix.join("bin")
        };
        for name in shim_names(inputs.windows) {
            list.push(ToolCandidate::from_path(
                CandidateSource::PackageManagerBin,
                bin_dir.join(name),
            ));
        }
    }

    if inputs.windows {
        if let Some(app_data) = &inputs.app_data {
            let npm_dir = app_data.join("npm");
            for name in ["neu.cmd", "neu.ps1"] {
                list.push(ToolCandidate::from_path(
                    CandidateSource::OsShim,
                    npm_dir.join(name),
                ));
            }
        }
    }

    for path in &inputs.located {
        list.push(ToolCandidate::from_path(CandidateSource::OsLocator, path));
    }

    if inputs.windows {
        for path in &inputs.path_scan {
            list.push(ToolCandidate::from_path(CandidateSource::PathScan, path));
        }
    }

    list.into_vec()
}

/// Insertion-ordered candidate set keyed by program path.
struct CandidateList {
    case_insensitive: bool,
    seen: HashSet<String>,
    items: Vec<ToolCandidate>,
}

impl CandidateList {
    fn new(case_insensitive: bool) -> Self {
        Self {
            case_insensitive,
            seen: HashSet::new(),
            items: Vec::new(),
        }
    }

    fn push(&mut self, candidate: ToolCandidate) {
        let mut key = candidate.program.to_string_lossy().to_string();
        if self.case_insensitive {
            key = key.to_lowercase().replace('\\', "/");
        }
        if self.seen.insert(key) {
            self.items.push(candidate);
        }
    }

    fn into_vec(self) -> Vec<ToolCandidate> {
        self.items
    }
}
