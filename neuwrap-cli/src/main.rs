//! Neuwrap CLI
//!
//! Entry point for the `neuwrap` command-line tool.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use neuwrap_core::config::env_keys;
use neuwrap_core::{
    BuildContext, EnvOverrides, HttpFetcher, Mirror, Pipeline, ShellRunner, SystemProbe,
};

#[derive(Parser)]
#[command(name = "neuwrap")]
#[command(about = "Build Neutralinojs apps with the neu CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Locate neu, provision runtimes and build release executables
    Build {
        #[command(flatten)]
        project: ProjectArgs,

        /// Binary name configured in neutralino.config.json
        #[arg(long, short = 'n')]
        name: String,

        #[command(flatten)]
        runtime: RuntimeArgs,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Find a working neu CLI and report how it will be invoked
    Locate {
        #[command(flatten)]
        project: ProjectArgs,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Make sure every runtime binary is present without building
    Provision {
        #[command(flatten)]
        project: ProjectArgs,

        #[command(flatten)]
        runtime: RuntimeArgs,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct ProjectArgs {
    /// Project directory (contains neutralino.config.json)
    #[arg(long, short = 'p', default_value = ".")]
    project: PathBuf,
}

#[derive(Args)]
struct RuntimeArgs {
    /// Keep runtime binaries in a host-wide cache reused across projects
    #[arg(long)]
    shared_cache: bool,

    /// Skip `neu update` and download the runtime bundle directly
    #[arg(long)]
    force_direct_download: bool,

    /// Pin the runtime release tag (e.g. v6.4.0)
    #[arg(long)]
    runtime_tag: Option<String>,
}

fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to create tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(env_keys::LOG)
        .unwrap_or_else(|_| EnvFilter::new("neuwrap=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Builds the context from the environment plus command-line flags.
fn context(project: ProjectArgs, runtime: Option<RuntimeArgs>) -> BuildContext {
    let mut overrides = EnvOverrides::from_env();
    let mut shared = false;

    if let Some(args) = runtime {
        overrides.force_direct_download |= args.force_direct_download;
        if args.runtime_tag.is_some() {
            overrides.runtime_tag = args.runtime_tag;
        }
        shared = args.shared_cache;
    }

    let ctx = BuildContext::new(project.project, overrides);
    if shared {
        ctx.with_shared_cache()
    } else {
        ctx
    }
}

fn fetcher() -> Result<HttpFetcher> {
    Ok(HttpFetcher::new()?.with_progress(|progress| {
        if let Some(percent) = progress.percent {
            tracing::debug!("Runtime download progress: {:.1}%", percent);
        }
    }))
}

/// With `--json`, stdout carries only the report; `neu` output goes to stderr.
fn shell_runner(json: bool) -> ShellRunner {
    let mirror = if json { Mirror::Stderr } else { Mirror::Inherit };
    ShellRunner::new().with_mirror(mirror)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(command: Commands) -> Result<()> {
    let probe = SystemProbe;

    match command {
        Commands::Build {
            project,
            name,
            runtime,
            json,
        } => {
            let ctx = context(project, Some(runtime));
            let runner = shell_runner(json);
            let fetcher = fetcher()?;
            let pipeline = Pipeline {
                ctx: &ctx,
                runner: &runner,
                fetcher: &fetcher,
                probe: &probe,
            };

            let report = pipeline.run(&name).await?;
            if json {
                return print_json(&report);
            }

            println!("{}", report.output.dir.display());
            for file in report.output.files() {
                if let Some(file_name) = file.file_name() {
                    println!("  {}", file_name.to_string_lossy());
                }
            }
        }

        Commands::Locate { project, json } => {
            let ctx = context(project, None);
            let runner = shell_runner(json);
            let fetcher = fetcher()?;
            let pipeline = Pipeline {
                ctx: &ctx,
                runner: &runner,
                fetcher: &fetcher,
                probe: &probe,
            };

            let tool = pipeline.locate().await?;
            if json {
                return print_json(&tool);
            }
            println!(
                "{} ({}, version {})",
                tool.command_line(&[]),
                tool.source,
                tool.version
            );
        }

        Commands::Provision {
            project,
            runtime,
            json,
        } => {
            let ctx = context(project, Some(runtime));
            let runner = shell_runner(json);
            let fetcher = fetcher()?;
            let pipeline = Pipeline {
                ctx: &ctx,
                runner: &runner,
                fetcher: &fetcher,
                probe: &probe,
            };

            let tool = pipeline.locate().await?;
            let report = pipeline.provision(&tool).await?;
            if json {
                return print_json(&report);
            }
            println!("{}", report.cache_dir.display());
            println!("  acquisition: {:?}", report.acquisition);
            if !report.installed.is_empty() {
                println!("  installed: {}", report.installed.join(", "));
            }
        }
    }

    Ok(())
}
