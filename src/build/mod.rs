//! Build Pipeline Module
//!
//! Turns a validated (part, parameters) pair into a cached model by running
//! the external generator under a global concurrency budget.

mod artifact;
mod cache;
mod command;
mod error;
mod key;
mod limiter;
mod pipeline;
mod runner;

pub use artifact::{content_type_for, Artifact, STL_CONTENT_TYPE};
pub use cache::{BuildCache, CacheStats, EntryState, DEFAULT_CACHE_CAPACITY};
pub use command::{CommandBuilder, GeneratorCommand};
pub use error::{BuildError, BuildResult};
pub use key::{ParamKey, ParamMap, ParamValue, Part, Variant};
pub use limiter::{BuildPermit, ConcurrencyLimiter, DEFAULT_MAX_CONCURRENT_BUILDS};
pub use pipeline::BuildPipeline;
pub use runner::{ProcessRunner, SubprocessRunner};
