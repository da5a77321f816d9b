//! The full locate → provision → build sequence.

use serde::Serialize;
use tracing::info;

use crate::build::{BuildDriver, BuildOutput};
use crate::config::BuildContext;
use crate::error::Result;
use crate::locator::{ResolvedTool, ToolLocator, VersionProbe};
use crate::net::Fetcher;
use crate::process::CommandRunner;
use crate::runtime::{ProvisionReport, RuntimeProvisioner};

/// Collaborators for one run.
pub struct Pipeline<'a> {
    pub ctx: &'a BuildContext,
    pub runner: &'a dyn CommandRunner,
    pub fetcher: &'a dyn Fetcher,
    pub probe: &'a dyn VersionProbe,
}

/// What each step produced.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub tool: ResolvedTool,
    pub provision: ProvisionReport,
    pub output: BuildOutput,
}

impl Pipeline<'_> {
    pub async fn locate(&self) -> Result<ResolvedTool> {
        ToolLocator::new(self.ctx, self.runner, self.probe)
            .locate()
            .await
    }

    pub async fn provision(&self, tool: &ResolvedTool) -> Result<ProvisionReport> {
        RuntimeProvisioner::new(self.ctx, self.runner, self.fetcher)
            .ensure_for_project(tool)
            .await
    }

    /// Runs every step in order, stopping at the first error.
    pub async fn run(&self, binary_name: &str) -> Result<PipelineReport> {
        info!(
            project = %self.ctx.project_dir().display(),
            binary_name,
            "Starting build"
        );

        let tool = self.locate().await?;
        let provision = self.provision(&tool).await?;
        let output = BuildDriver::new(self.ctx, self.runner)
            .build(&tool, binary_name)
            .await?;

        Ok(PipelineReport {
            tool,
            provision,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvOverrides;
    use crate::error::Error;
    use crate::locator::{Invocation, ProbeHit, ToolCandidate};
    use crate::process::{RunOptions, RunOutput};
    use crate::runtime::{Acquisition, RUNTIME_BINARIES};
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct BareNeu;

    #[async_trait]
    impl VersionProbe for BareNeu {
        async fn probe(&self, candidate: &ToolCandidate) -> Option<ProbeHit> {
            (candidate.program == Path::new("neu")).then(|| ProbeHit {
                invocation: Invocation::Direct,
                version: "11.3.1".into(),
            })
        }
    }

    struct NoNeu;

    #[async_trait]
    impl VersionProbe for NoNeu {
        async fn probe(&self, _candidate: &ToolCandidate) -> Option<ProbeHit> {
            None
        }
    }

    /// Plays `neu`: `update` fills bin/, `build` fills dist/.
    #[derive(Default)]
    struct FakeNeu {
        commands: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for FakeNeu {
        async fn run(&self, command: &str, options: RunOptions) -> Result<RunOutput> {
            self.commands.lock().unwrap().push(command.to_string());
            let mut exit_code = Some(0);

            if let Some(dir) = options.working_dir.as_deref() {
                if command.ends_with("update") {
                    fs::create_dir_all(dir.join("bin")).unwrap();
                    for name in RUNTIME_BINARIES {
                        fs::write(dir.join("bin").join(name), b"rt").unwrap();
                    }
                } else if command.contains(" build ") {
                    let out = dir.join("dist/demo");
                    fs::create_dir_all(&out).unwrap();
                    fs::write(out.join("demo-linux_x64"), b"app").unwrap();
                    fs::write(out.join("resources.neu"), b"res").unwrap();
                }
            } else {
                exit_code = Some(1);
            }

            Ok(RunOutput {
                exit_code,
                output: String::new(),
                truncated: false,
                timed_out: false,
            })
        }
    }

    struct OfflineFetcher;

    #[async_trait]
    impl Fetcher for OfflineFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            Err(Error::NetworkTimeout { url: url.into() })
        }

        async fn download(&self, url: &str, _dest: &Path) -> Result<u64> {
            Err(Error::NetworkTimeout { url: url.into() })
        }
    }

    #[tokio::test]
    async fn test_full_run() {
        let temp = TempDir::new().unwrap();
        let ctx = BuildContext::new(temp.path(), EnvOverrides::default());
        let runner = FakeNeu::default();
        let pipeline = Pipeline {
            ctx: &ctx,
            runner: &runner,
            fetcher: &OfflineFetcher,
            probe: &BareNeu,
        };

        let report = pipeline.run("demo").await.unwrap();

        assert_eq!(report.tool.version, "11.3.1");
        assert_eq!(report.provision.acquisition, Acquisition::Primary);
        assert_eq!(report.output.executables.len(), 1);
        assert!(!temp.path().join("bin").exists());
        assert_eq!(
            *runner.commands.lock().unwrap(),
            vec!["neu update", "neu build --release --embed-resources"]
        );
    }

    #[tokio::test]
    async fn test_stops_when_tool_missing() {
        let temp = TempDir::new().unwrap();
        let ctx = BuildContext::new(temp.path(), EnvOverrides::default());
        let runner = FakeNeu::default();
        let pipeline = Pipeline {
            ctx: &ctx,
            runner: &runner,
            fetcher: &OfflineFetcher,
            probe: &NoNeu,
        };

        let err = pipeline.run("demo").await.unwrap_err();
        assert!(matches!(err, Error::ToolNotFound));
        // Only the npm prefix lookup ran
        assert_eq!(*runner.commands.lock().unwrap(), vec!["npm prefix -g"]);
    }

    #[tokio::test]
    async fn test_stops_when_runtime_unavailable() {
        let temp = TempDir::new().unwrap();
        let overrides = EnvOverrides {
            force_direct_download: true,
            ..Default::default()
        };
        let ctx = BuildContext::new(temp.path(), overrides);
        let runner = FakeNeu::default();
        let pipeline = Pipeline {
            ctx: &ctx,
            runner: &runner,
            fetcher: &OfflineFetcher,
            probe: &BareNeu,
        };

        let err = pipeline.run("demo").await.unwrap_err();
        assert!(matches!(err, Error::NetworkTimeout { .. }));
        assert!(runner.commands.lock().unwrap().is_empty());
    }
}
