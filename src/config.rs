//! Runtime configuration, read from the environment (and `.env`).

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::build::{
    BuildCache, BuildPipeline, CommandBuilder, ConcurrencyLimiter, SubprocessRunner,
    DEFAULT_CACHE_CAPACITY, DEFAULT_MAX_CONCURRENT_BUILDS,
};

#[derive(Debug, Clone)]
pub struct ForgeConfig {
    /// Generator executable.
    pub openscad_bin: PathBuf,
    /// Extra leading arguments when the generator runs through a wrapper.
    pub openscad_args: Vec<String>,
    /// Model file handed to the generator.
    pub model_file: PathBuf,
    pub backend: String,
    pub export_format: String,
    pub max_concurrent_builds: usize,
    pub cache_capacity: usize,
    /// `None` disables the per-build timeout.
    pub build_timeout: Option<Duration>,
    pub bind_addr: String,
    /// Include generator stderr in HTTP error bodies.
    pub expose_diagnostics: bool,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            openscad_bin: PathBuf::from("openscad"),
            openscad_args: Vec::new(),
            model_file: PathBuf::from("GOEWS.scad"),
            backend: "manifold".to_string(),
            export_format: "stl".to_string(),
            max_concurrent_builds: DEFAULT_MAX_CONCURRENT_BUILDS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            build_timeout: Some(Duration::from_secs(300)),
            bind_addr: "[::1]:8000".to_string(),
            expose_diagnostics: false,
        }
    }
}

impl ForgeConfig {
    /// Reads `FORGE_*` variables, falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let timeout_secs: u64 = parse_or(&get, "FORGE_BUILD_TIMEOUT_SECS", 300)?;
        let config = Self {
            openscad_bin: get("FORGE_OPENSCAD_BIN").map(PathBuf::from).unwrap_or(defaults.openscad_bin),
            openscad_args: get("FORGE_OPENSCAD_ARGS")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or(defaults.openscad_args),
            model_file: get("FORGE_MODEL_FILE").map(PathBuf::from).unwrap_or(defaults.model_file),
            backend: get("FORGE_BACKEND").unwrap_or(defaults.backend),
            export_format: get("FORGE_EXPORT_FORMAT").unwrap_or(defaults.export_format),
            max_concurrent_builds: parse_or(&get, "FORGE_MAX_CONCURRENT_BUILDS", defaults.max_concurrent_builds)?,
            cache_capacity: parse_or(&get, "FORGE_CACHE_CAPACITY", defaults.cache_capacity)?,
            build_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            bind_addr: get("FORGE_BIND_ADDR").unwrap_or(defaults.bind_addr),
            expose_diagnostics: parse_or(&get, "FORGE_EXPOSE_DIAGNOSTICS", defaults.expose_diagnostics)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_builds == 0 {
            bail!("FORGE_MAX_CONCURRENT_BUILDS must be at least 1");
        }
        if self.cache_capacity == 0 {
            bail!("FORGE_CACHE_CAPACITY must be at least 1");
        }
        Ok(())
    }

    pub fn command_builder(&self) -> CommandBuilder {
        CommandBuilder::new(&self.openscad_bin, &self.model_file)
            .with_launcher_args(&self.openscad_args)
            .with_backend(&self.backend)
            .with_export_format(&self.export_format)
    }

    /// Wires a pipeline that runs the real generator.
    pub fn build_pipeline(&self) -> BuildPipeline {
        let runner = SubprocessRunner::new().with_timeout(self.build_timeout);
        BuildPipeline::new(self.command_builder(), Arc::new(runner))
            .with_cache(BuildCache::new(self.cache_capacity))
            .with_limiter(ConcurrencyLimiter::new(self.max_concurrent_builds))
    }
}

fn parse_or<T, G>(get: &G, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: '{}'", name, raw)),
        None => Ok(default),
    }
}
