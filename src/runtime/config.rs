//! Pipeline and cache configuration.
//!
//! Configuration is consumed, never produced, by the core: descriptors, pool
//! size, and timeout defaults arrive as static data from the embedding
//! application, either programmatically or from the environment.

use std::str::FromStr;
use std::time::Duration;

/// Execution settings for a [`Pipeline`](crate::pipeline::Pipeline).
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Maximum number of modules executing concurrently within a wave.
    pub worker_pool_size: usize,
    /// Run-level budget; once exceeded no further waves are dispatched.
    pub run_timeout: Option<Duration>,
    /// Default per-module budget, overridable per descriptor.
    pub module_timeout: Option<Duration>,
    /// Emit `[module <id> unavailable]` placeholders for failed modules
    /// instead of silently excluding them from the artifact.
    pub include_failure_placeholders: bool,
    pub cache: CacheConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: Self::DEFAULT_WORKER_POOL_SIZE,
            run_timeout: None,
            module_timeout: None,
            include_failure_placeholders: false,
            cache: CacheConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;

    /// Resolve configuration from the environment (after loading `.env` if
    /// present), falling back to defaults for anything unset or unparsable.
    ///
    /// Recognized variables: `PROMPTLOOM_WORKERS`,
    /// `PROMPTLOOM_RUN_TIMEOUT_MS`, `PROMPTLOOM_MODULE_TIMEOUT_MS`,
    /// `PROMPTLOOM_CACHE_MAX_ENTRIES`.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Self {
            worker_pool_size: parse_env("PROMPTLOOM_WORKERS")
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.worker_pool_size),
            run_timeout: parse_env("PROMPTLOOM_RUN_TIMEOUT_MS").map(Duration::from_millis),
            module_timeout: parse_env("PROMPTLOOM_MODULE_TIMEOUT_MS").map(Duration::from_millis),
            include_failure_placeholders: false,
            cache: CacheConfig {
                max_entries: parse_env("PROMPTLOOM_CACHE_MAX_ENTRIES"),
            },
        }
    }

    #[must_use]
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_module_timeout(mut self, timeout: Duration) -> Self {
        self.module_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_failure_placeholders(mut self) -> Self {
        self.include_failure_placeholders = true;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}

/// Settings for the process-wide [`CacheLayer`](crate::cache::CacheLayer).
#[derive(Clone, Debug, Default)]
pub struct CacheConfig {
    /// Optional bound on stored entries; least-recently-used beyond it.
    pub max_entries: Option<usize>,
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}
