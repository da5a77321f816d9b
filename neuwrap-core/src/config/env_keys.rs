//! Environment variable names read by neuwrap.

/// Explicit path to the `neu` executable (or shim script).
pub const NEU_PATH: &str = "NEUWRAP_NEU_PATH";

/// When truthy, skip `neu update` and download the runtime archive directly.
pub const FORCE_DIRECT_DOWNLOAD: &str = "NEUWRAP_FORCE_DIRECT_DOWNLOAD";

/// Pins the runtime release tag (e.g. `v6.4.0`), bypassing the metadata lookup.
pub const RUNTIME_TAG: &str = "NEUWRAP_RUNTIME_TAG";

/// Overrides the shared runtime cache root.
pub const CACHE_DIR: &str = "NEUWRAP_CACHE_DIR";

/// Log filter for the CLI (tracing `EnvFilter` syntax).
pub const LOG: &str = "NEUWRAP_LOG";

/// Values treated as "on" for boolean flags.
pub(crate) const TRUTHY: &[&str] = &["1", "true", "yes", "on"];
