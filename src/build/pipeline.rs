//! The build pipeline: key → cache → limiter → command → process.

use std::sync::Arc;

use super::artifact::{content_type_for, Artifact};
use super::cache::{BuildCache, CacheStats};
use super::command::CommandBuilder;
use super::error::BuildResult;
use super::key::{ParamKey, ParamValue, Part};
use super::limiter::ConcurrencyLimiter;
use super::runner::ProcessRunner;

/// Entry point used by the API layer.
///
/// Constructed once at startup. Clones share the cache and the limiter.
#[derive(Clone)]
pub struct BuildPipeline {
    cache: BuildCache,
    limiter: ConcurrencyLimiter,
    builder: Arc<CommandBuilder>,
    runner: Arc<dyn ProcessRunner>,
}

impl BuildPipeline {
    pub fn new(builder: CommandBuilder, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            cache: BuildCache::default(),
            limiter: ConcurrencyLimiter::default(),
            builder: Arc::new(builder),
            runner,
        }
    }

    pub fn with_cache(mut self, cache: BuildCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_limiter(mut self, limiter: ConcurrencyLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Builds (or fetches) the model for `part` with the given parameters.
    pub async fn build<I, K, V>(&self, part: Part, params: I) -> BuildResult<Artifact>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ParamValue>,
    {
        let key = ParamKey::new(part, params)?;
        self.get_or_build(key).await
    }

    pub async fn get_or_build(&self, key: ParamKey) -> BuildResult<Artifact> {
        let limiter = self.limiter.clone();
        let builder = self.builder.clone();
        let runner = self.runner.clone();

        self.cache
            .get_or_build(key, move |key| async move {
                let _permit = limiter.acquire().await?;
                let command = builder.build(&key);
                let data = runner.run(&command).await?;
                Ok(Artifact::new(data, content_type_for(builder.export_format())))
            })
            .await
    }

    pub fn cache(&self) -> &BuildCache {
        &self.cache
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn command_builder(&self) -> &CommandBuilder {
        &self.builder
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
