//! Run configuration: environment overrides, cache locations and the
//! per-invocation [`BuildContext`].

pub mod context;
pub mod env_keys;
pub mod paths;

pub use context::{BuildContext, CacheLocation, EnvOverrides};
