//! GOEWS Forge
//!
//! On-demand generation of parametric 3D-printable parts:
//! - Canonical parameter keys and deterministic generator command lines
//! - Memoized builds with coalescing of concurrent duplicate requests
//! - A global budget on concurrently running generator processes
//! - A thin HTTP surface for downloading the resulting models

pub mod build;
pub mod config;
pub mod server;
pub mod utils;

// Re-exports for convenience
pub use build::{Artifact, BuildError, BuildPipeline, BuildResult, ParamKey, ParamValue, Part};
pub use config::ForgeConfig;
