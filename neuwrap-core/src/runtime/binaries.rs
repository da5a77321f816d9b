//! The runtime binary set and cache directory bookkeeping.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::extractor::make_executable;
use crate::error::{Error, Result};

/// Every platform runtime `neu build` packages, one per OS/architecture.
pub const RUNTIME_BINARIES: &[&str] = &[
    "neutralino-linux_x64",
    "neutralino-linux_arm64",
    "neutralino-linux_armhf",
    "neutralino-mac_x64",
    "neutralino-mac_arm64",
    "neutralino-mac_universal",
    "neutralino-win_x64.exe",
];

/// Windows binaries never get Unix permission bits.
pub fn is_windows_binary(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".exe")
}

/// Required binaries not present in `dir`. Presence is the only check.
pub fn missing_binaries(dir: &Path) -> Vec<&'static str> {
    RUNTIME_BINARIES
        .iter()
        .copied()
        .filter(|name| !dir.join(name).is_file())
        .collect()
}

/// Copies one binary, marking it executable where that applies.
fn install_binary(source: &Path, dest_dir: &Path, name: &str) -> Result<()> {
    let dest = dest_dir.join(name);
    fs::copy(source, &dest).map_err(|e| {
        Error::io(
            format!("failed to copy {} to {}", source.display(), dest.display()),
            e,
        )
    })?;

    if !is_windows_binary(name) {
        make_executable(&dest).map_err(Error::Extraction)?;
    }

    debug!("Installed {}", dest.display());
    Ok(())
}

/// Copies the listed binaries from `from` into `to` wherever `from` has them.
///
/// With `overwrite` unset, files already in `to` are left alone.
/// Returns the names actually copied.
pub fn copy_binaries(
    from: &Path,
    to: &Path,
    names: &[&str],
    overwrite: bool,
) -> Result<Vec<String>> {
    let mut copied = Vec::new();
    if !from.is_dir() {
        return Ok(copied);
    }

    fs::create_dir_all(to)
        .map_err(|e| Error::io(format!("failed to create {}", to.display()), e))?;

    for name in names {
        let source = from.join(name);
        if !source.is_file() || (!overwrite && to.join(name).is_file()) {
            continue;
        }
        install_binary(&source, to, name)?;
        copied.push(name.to_string());
    }

    Ok(copied)
}

/// Depth-first search for a file called `name` under `root`.
pub fn find_in_tree(root: &Path, name: &str) -> Option<PathBuf> {
    let mut stack = vec![root.to_path_buf()];

    while let Some(current) = stack.pop() {
        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.file_name().and_then(|s| s.to_str()) == Some(name) {
                return Some(path);
            }
        }
    }

    None
}

/// Copies each of `names` found anywhere under `tree` into `dest_dir`.
pub fn install_from_tree(tree: &Path, dest_dir: &Path, names: &[&str]) -> Result<Vec<String>> {
    fs::create_dir_all(dest_dir)
        .map_err(|e| Error::io(format!("failed to create {}", dest_dir.display()), e))?;

    let mut copied = Vec::new();
    for name in names {
        match find_in_tree(tree, name) {
            Some(source) => {
                install_binary(&source, dest_dir, name)?;
                copied.push(name.to_string());
            }
            None => debug!("{} not present in extracted archive", name),
        }
    }
    Ok(copied)
}
