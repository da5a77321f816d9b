//! Normalizes nested `neu build` output into `dist/<name>`.
//!
//! Some `neu` releases place the packaged files one level deeper than the
//! canonical `dist/<name>` directory. Each known layout is a [`FlattenRule`].
//! Rules are checked in priority order and the first whose source directory
//! exists is applied; checking then restarts from the top until no rule
//! matches. A directory that is already flat matches nothing.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::paths::PROJECT_RUNTIME_DIR;
use crate::error::{Error, Result};

/// One known nesting pattern.
#[derive(Debug, Clone, Copy)]
pub struct FlattenRule {
    pub name: &'static str,
    /// Nested directory relative to `dist`, given the binary name.
    source: fn(dist: &Path, binary_name: &str) -> PathBuf,
}

impl FlattenRule {
    pub fn source_dir(&self, dist_dir: &Path, binary_name: &str) -> PathBuf {
        (self.source)(dist_dir, binary_name)
    }
}

/// Rules in priority order.
pub const FLATTEN_RULES: &[FlattenRule] = &[
    FlattenRule {
        name: "duplicated-inner-dir",
        source: |dist, name| dist.join(name).join(name),
    },
    FlattenRule {
        name: "runtime-cache-inside-output",
        source: |dist, name| dist.join(name).join(PROJECT_RUNTIME_DIR),
    },
    FlattenRule {
        name: "runtime-cache-above-output",
        source: |dist, name| dist.join(PROJECT_RUNTIME_DIR).join(name),
    },
];

/// Applies rules until the output is flat. Returns the names of the rules
/// applied, in order; empty when the output was already flat.
pub fn flatten_output(dist_dir: &Path, binary_name: &str) -> Result<Vec<&'static str>> {
    flatten_with(FLATTEN_RULES, dist_dir, binary_name)
}

pub fn flatten_with(
    rules: &[FlattenRule],
    dist_dir: &Path,
    binary_name: &str,
) -> Result<Vec<&'static str>> {
    let target = dist_dir.join(binary_name);
    let mut applied = Vec::new();

    // Every hoist removes one directory level, so this terminates.
    while let Some(rule) = rules
        .iter()
        .find(|rule| rule.source_dir(dist_dir, binary_name).is_dir())
    {
        let source = rule.source_dir(dist_dir, binary_name);
        info!(
            rule = rule.name,
            "Flattening {} into {}",
            source.display(),
            target.display()
        );
        hoist(&source, &target)?;
        applied.push(rule.name);
    }

    if applied.is_empty() {
        debug!("Build output in {} is already flat", target.display());
    }
    Ok(applied)
}

/// Moves every entry of `source` into `target`, then removes `source`.
///
/// The nested copy is the fresh build output, so it replaces any entry of
/// the same name already in `target`.
fn hoist(source: &Path, target: &Path) -> Result<()> {
    // Moved aside first: `source` may sit inside `target` under a name one
    // of its own entries is about to take.
    let staging = staging_path(source);
    fs::rename(source, &staging).map_err(|e| {
        Error::io(
            format!("failed to move {} to {}", source.display(), staging.display()),
            e,
        )
    })?;

    fs::create_dir_all(target)
        .map_err(|e| Error::io(format!("failed to create {}", target.display()), e))?;

    let entries = fs::read_dir(&staging)
        .map_err(|e| Error::io(format!("failed to read {}", staging.display()), e))?;

    for entry in entries {
        let entry =
            entry.map_err(|e| Error::io(format!("failed to read {}", staging.display()), e))?;
        let from = entry.path();
        let to = target.join(entry.file_name());

        if to.symlink_metadata().is_ok() {
            debug!("Replacing {} with nested copy", to.display());
            remove_entry(&to)?;
        }

        fs::rename(&from, &to).map_err(|e| {
            Error::io(
                format!("failed to move {} to {}", from.display(), to.display()),
                e,
            )
        })?;
    }

    fs::remove_dir_all(&staging)
        .map_err(|e| Error::io(format!("failed to remove {}", staging.display()), e))?;

    // dist/bin is left empty once its only child has been hoisted
    if let Some(parent) = source.parent().filter(|p| *p != target) {
        if fs::remove_dir(parent).is_ok() {
            debug!("Removed empty {}", parent.display());
        }
    }

    Ok(())
}

fn staging_path(source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    source.with_file_name(format!(".{}.flatten", name))
}

fn remove_entry(path: &Path) -> Result<()> {
    let result = if path.is_dir() && !path.is_symlink() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| Error::io(format!("failed to remove {}", path.display()), e))
}
