//! Neuwrap Core Library
//!
//! Build orchestration around the Neutralinojs `neu` CLI. It includes:
//!
//! - A subprocess runner with bounded capture, timeouts and prompt auto-confirm
//! - An HTTP fetcher with manual redirect handling
//! - A locator that finds a working `neu` across npm, shim and PATH layouts
//! - A provisioner that fills the runtime binary cache
//! - A build driver that runs `neu build` and normalizes its output

pub mod build;
pub mod config;
pub mod error;
pub mod locator;
pub mod net;
pub mod pipeline;
pub mod process;
pub mod runtime;

// Re-exports for convenience
pub use config::{BuildContext, CacheLocation, EnvOverrides};
pub use error::{Error, Result};

// Re-export components
pub use build::{BuildDriver, BuildOutput};
pub use locator::{ResolvedTool, SystemProbe, ToolLocator, VersionProbe};
pub use net::{Fetcher, HttpFetcher};
pub use pipeline::{Pipeline, PipelineReport};
pub use process::{CommandRunner, Mirror, RunOptions, RunOutput, ShellRunner};
pub use runtime::{Acquisition, ProvisionReport, RuntimeProvisioner, TagSource};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
