//! Runs `neu build` and normalizes what it produces.

pub mod flatten;

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{paths, BuildContext};
use crate::error::{Error, Result};
use crate::locator::ResolvedTool;
use crate::process::{CommandRunner, RunOptions};

pub use flatten::{flatten_output, FlattenRule, FLATTEN_RULES};

/// Arguments passed to `neu`.
pub const BUILD_ARGS: &[&str] = &["build", "--release", "--embed-resources"];

/// Packed resources, not an executable despite sharing the output directory.
pub const RESOURCE_BUNDLE: &str = "resources.neu";

const ARCHIVE_SUFFIX: &str = ".zip";

/// Final artifacts in `dist/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildOutput {
    pub dir: PathBuf,
    pub executables: Vec<PathBuf>,
    pub archives: Vec<PathBuf>,
}

impl BuildOutput {
    pub fn is_empty(&self) -> bool {
        self.executables.is_empty() && self.archives.is_empty()
    }

    /// All artifacts, executables first.
    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.executables.iter().chain(self.archives.iter())
    }
}

/// Sorts the files of `dir` into executables and archives.
pub fn inventory(dir: &Path, binary_name: &str) -> Result<BuildOutput> {
    let mut output = BuildOutput {
        dir: dir.to_path_buf(),
        executables: Vec::new(),
        archives: Vec::new(),
    };

    if !dir.is_dir() {
        return Ok(output);
    }

    let entries =
        fs::read_dir(dir).map_err(|e| Error::io(format!("failed to read {}", dir.display()), e))?;

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if name.to_ascii_lowercase().ends_with(ARCHIVE_SUFFIX) {
            output.archives.push(path);
        } else if name.starts_with(binary_name) && name != RESOURCE_BUNDLE {
            output.executables.push(path);
        }
    }

    output.executables.sort();
    output.archives.sort();
    Ok(output)
}

pub struct BuildDriver<'a> {
    ctx: &'a BuildContext,
    runner: &'a dyn CommandRunner,
}

impl<'a> BuildDriver<'a> {
    pub fn new(ctx: &'a BuildContext, runner: &'a dyn CommandRunner) -> Self {
        Self { ctx, runner }
    }

    /// Builds the project and returns the normalized output for `binary_name`.
    pub async fn build(&self, tool: &ResolvedTool, binary_name: &str) -> Result<BuildOutput> {
        let project_dir = self.ctx.project_dir();
        let command = tool.command_line(BUILD_ARGS);
        let options = RunOptions::default().quiet().working_dir(project_dir);

        info!("Building {} with `{}`", binary_name, command);
        if let Err(e) = self.runner.run(&command, options).await {
            if let Some(output) = e.output() {
                error!("neu build output:\n{}", output);
            }
            return Err(e);
        }

        let dist_dir = paths::project_dist_dir(project_dir);
        flatten_output(&dist_dir, binary_name)?;

        let output = inventory(&paths::build_output_dir(project_dir, binary_name), binary_name)?;
        if output.is_empty() {
            return Err(Error::NoOutputsProduced { dir: output.dir });
        }

        info!(
            executables = output.executables.len(),
            archives = output.archives.len(),
            "Build output ready in {}",
            output.dir.display()
        );

        self.cleanup(binary_name);
        Ok(output)
    }

    /// Removes the release archive, staged resources and runtime cache.
    fn cleanup(&self, binary_name: &str) {
        let project_dir = self.ctx.project_dir();
        let transient = [
            paths::release_archive_path(project_dir, binary_name),
            paths::project_resources_dir(project_dir),
            paths::project_runtime_dir(project_dir),
        ];

        for path in transient {
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else if path.exists() {
                fs::remove_file(&path)
            } else {
                continue;
            };

            match result {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvOverrides;
    use crate::locator::{CandidateSource, Invocation};
    use crate::process::RunOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const NAME: &str = "myapp";

    /// Writes the given files (relative to the working dir) and exits with `code`.
    struct FakeBuild {
        files: Vec<&'static str>,
        code: i32,
        seen: Mutex<Vec<(String, RunOptions)>>,
    }

    impl FakeBuild {
        fn new(files: &[&'static str], code: i32) -> Self {
            Self {
                files: files.to_vec(),
                code,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for FakeBuild {
        async fn run(&self, command: &str, options: RunOptions) -> Result<RunOutput> {
            let dir = options.working_dir.clone().unwrap();
            for file in &self.files {
                let path = dir.join(file);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(path, b"artifact").unwrap();
            }
            self.seen
                .lock()
                .unwrap()
                .push((command.to_string(), options));

            if self.code != 0 {
                return Err(Error::CommandFailed {
                    command: command.to_string(),
                    code: self.code,
                    output: "neu: missing neutralino.config.json".into(),
                });
            }
            Ok(RunOutput {
                exit_code: Some(0),
                output: String::new(),
                truncated: false,
                timed_out: false,
            })
        }
    }

    fn tool() -> ResolvedTool {
        ResolvedTool {
            program: PathBuf::from("neu"),
            invocation: Invocation::Shell,
            source: CandidateSource::PathLookup,
            version: "11.3.1".into(),
        }
    }

    fn file_names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_inventory_classifies_files() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        for name in [
            "myapp-linux_x64",
            "myapp-win_x64.exe",
            "resources.neu",
            "myapp-release.zip",
            "README.txt",
        ] {
            fs::write(dir.join(name), b"x").unwrap();
        }
        fs::create_dir_all(dir.join("myapp-dir")).unwrap();

        let output = inventory(dir, NAME).unwrap();
        assert_eq!(
            file_names(&output.executables),
            vec!["myapp-linux_x64", "myapp-win_x64.exe"]
        );
        assert_eq!(file_names(&output.archives), vec!["myapp-release.zip"]);
        assert_eq!(output.files().count(), 3);
    }

    #[test]
    fn test_inventory_missing_dir_is_empty() {
        let output = inventory(Path::new("/no/such/dist/myapp"), NAME).unwrap();
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_build_flattens_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        let project = temp.path();
        fs::create_dir_all(project.join("resources")).unwrap();
        fs::create_dir_all(project.join("bin")).unwrap();
        fs::write(project.join("bin/neutralino-linux_x64"), b"rt").unwrap();

        let ctx = BuildContext::new(project, EnvOverrides::default());
        let runner = FakeBuild::new(
            &[
                "dist/myapp/myapp/myapp-linux_x64",
                "dist/myapp/myapp/myapp-win_x64.exe",
                "dist/myapp/myapp/resources.neu",
                "dist/myapp-release.zip",
            ],
            0,
        );

        let output = BuildDriver::new(&ctx, &runner)
            .build(&tool(), NAME)
            .await
            .unwrap();

        assert_eq!(output.dir, project.join("dist/myapp"));
        assert_eq!(
            file_names(&output.executables),
            vec!["myapp-linux_x64", "myapp-win_x64.exe"]
        );
        assert!(project.join("dist/myapp/resources.neu").is_file());
        assert!(!project.join("dist/myapp-release.zip").exists());
        assert!(!project.join("resources").exists());
        assert!(!project.join("bin").exists());

        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen[0].0, "neu build --release --embed-resources");
        assert!(seen[0].1.quiet);
    }

    #[tokio::test]
    async fn test_build_failure_propagates_without_cleanup() {
        let temp = TempDir::new().unwrap();
        let project = temp.path();
        fs::create_dir_all(project.join("resources")).unwrap();

        let ctx = BuildContext::new(project, EnvOverrides::default());
        let runner = FakeBuild::new(&[], 2);

        let err = BuildDriver::new(&ctx, &runner)
            .build(&tool(), NAME)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CommandFailed { code: 2, .. }));
        assert!(project.join("resources").is_dir());
    }

    #[tokio::test]
    async fn test_empty_output_is_an_error() {
        let temp = TempDir::new().unwrap();
        let project = temp.path();
        let ctx = BuildContext::new(project, EnvOverrides::default());
        let runner = FakeBuild::new(&["dist/myapp/resources.neu"], 0);

        let err = BuildDriver::new(&ctx, &runner)
            .build(&tool(), NAME)
            .await
            .unwrap_err();

        match err {
            Error::NoOutputsProduced { dir } => assert_eq!(dir, project.join("dist/myapp")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_archives_alone_count_as_output() {
        let temp = TempDir::new().unwrap();
        let project = temp.path();
        let ctx = BuildContext::new(project, EnvOverrides::default());
        let runner = FakeBuild::new(&["dist/bin/myapp/myapp-bundle.zip"], 0);

        let output = BuildDriver::new(&ctx, &runner)
            .build(&tool(), NAME)
            .await
            .unwrap();

        assert!(output.executables.is_empty());
        assert_eq!(file_names(&output.archives), vec!["myapp-bundle.zip"]);
        assert!(!project.join("dist/bin").exists());
    }
}
