//! Immutable engine configuration.
//!
//! Versions, remote URL templates, the cache directory and per-kind binary
//! overrides are gathered into one [`EngineConfig`] value. It is built once,
//! either from defaults or from the environment, and handed to the fetcher
//! and the engines. Nothing here is process-global, so tests can substitute
//! their own versions and hosts freely.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::binaries::cache::global_cache_dir;
use crate::binaries::kind::EngineKind;
use crate::defaults;

/// Overrides the query engine URL template.
pub const ENGINE_URL_VAR: &str = "PRISMA_ENGINE_URL";
/// Overrides the schema and introspection engine URL template.
pub const SCHEMA_ENGINE_URL_VAR: &str = "PRISMA_SCHEMA_ENGINE_URL";
/// Non-empty value turns on verbose engine logging.
pub const CLIENT_LOG_VAR: &str = "PRISMA_CLIENT_LOG";
/// Overrides the artifact cache base directory.
pub const CACHE_DIR_VAR: &str = "PRISMA_ENGINES_CACHE_DIR";

/// Version identifiers, one per engine kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineVersions {
    #[serde(default = "defaults::query_engine_version")]
    pub query: String,
    #[serde(default = "defaults::schema_engine_version")]
    pub schema: String,
    #[serde(default = "defaults::introspection_engine_version")]
    pub introspection: String,
}

impl EngineVersions {
    /// Use the same version for every kind.
    pub fn uniform(version: &str) -> Self {
        Self {
            query: version.to_string(),
            schema: version.to_string(),
            introspection: version.to_string(),
        }
    }

    pub fn get(&self, kind: EngineKind) -> &str {
        match kind {
            EngineKind::Query => &self.query,
            EngineKind::Schema => &self.schema,
            EngineKind::Introspection => &self.introspection,
        }
    }
}

impl Default for EngineVersions {
    fn default() -> Self {
        Self {
            query: defaults::query_engine_version(),
            schema: defaults::schema_engine_version(),
            introspection: defaults::introspection_engine_version(),
        }
    }
}

/// Retry budget of the query engine readiness handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default = "defaults::readiness_attempts")]
    pub attempts: u32,
    #[serde(default = "defaults::readiness_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "defaults::readiness_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Deadline of each probe; a probe that runs out counts as a failed attempt.
    #[serde(default = "defaults::readiness_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            attempts: defaults::readiness_attempts(),
            initial_delay_ms: defaults::readiness_initial_delay_ms(),
            max_delay_ms: defaults::readiness_max_delay_ms(),
            probe_timeout_ms: defaults::readiness_probe_timeout_ms(),
        }
    }
}

/// Configuration shared by the fetcher and the engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base directory of the artifact cache. Must be absolute.
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub versions: EngineVersions,
    /// Template with `{version}`, `{platform}` and `{engine}` placeholders.
    #[serde(default = "defaults::query_engine_url")]
    pub query_engine_url: String,
    /// Template used for the schema and introspection engines.
    #[serde(default = "defaults::schema_engine_url")]
    pub schema_engine_url: String,
    /// Template with `{version}` and `{binary}` placeholders, used for
    /// pinned engine sets.
    #[serde(default = "defaults::pinned_engine_url")]
    pub pinned_engine_url: String,
    /// Operator-supplied binaries; these bypass the cache and the network.
    #[serde(default)]
    pub overrides: BTreeMap<EngineKind, PathBuf>,
    /// Ask spawned engines to log queries at info level.
    #[serde(default)]
    pub log_queries: bool,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    /// Hard deadline of one introspection exchange.
    #[serde(default = "defaults::introspection_timeout_ms")]
    pub introspection_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: global_cache_dir(defaults::CLI_VERSION),
            versions: EngineVersions::default(),
            query_engine_url: defaults::query_engine_url(),
            schema_engine_url: defaults::schema_engine_url(),
            pinned_engine_url: defaults::pinned_engine_url(),
            overrides: BTreeMap::new(),
            log_queries: false,
            readiness: ReadinessConfig::default(),
            introspection_timeout_ms: defaults::introspection_timeout_ms(),
        }
    }
}

impl EngineConfig {
    /// Defaults layered with whatever the environment sets.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`EngineConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mut config = Self::default();

        if let Some(dir) = non_empty(CACHE_DIR_VAR) {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(url) = non_empty(ENGINE_URL_VAR) {
            log::debug!("{} is set, using {}", ENGINE_URL_VAR, url);
            config.query_engine_url = url;
        }
        if let Some(url) = non_empty(SCHEMA_ENGINE_URL_VAR) {
            log::debug!("{} is set, using {}", SCHEMA_ENGINE_URL_VAR, url);
            config.schema_engine_url = url;
        }
        for kind in EngineKind::ALL {
            if let Some(path) = non_empty(kind.override_var()) {
                log::debug!("{} is defined, using {}", kind.override_var(), path);
                config.overrides.insert(kind, PathBuf::from(path));
            }
        }
        config.log_queries = non_empty(CLIENT_LOG_VAR).is_some();

        config
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_versions(mut self, versions: EngineVersions) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_query_engine_url(mut self, template: impl Into<String>) -> Self {
        self.query_engine_url = template.into();
        self
    }

    pub fn with_schema_engine_url(mut self, template: impl Into<String>) -> Self {
        self.schema_engine_url = template.into();
        self
    }

    pub fn with_pinned_engine_url(mut self, template: impl Into<String>) -> Self {
        self.pinned_engine_url = template.into();
        self
    }

    pub fn with_override(mut self, kind: EngineKind, path: impl Into<PathBuf>) -> Self {
        self.overrides.insert(kind, path.into());
        self
    }

    pub fn with_log_queries(mut self, enabled: bool) -> Self {
        self.log_queries = enabled;
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessConfig) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_introspection_timeout(mut self, timeout: Duration) -> Self {
        self.introspection_timeout_ms = duration_millis(timeout);
        self
    }

    pub fn version(&self, kind: EngineKind) -> &str {
        self.versions.get(kind)
    }

    pub fn url_template(&self, kind: EngineKind) -> &str {
        match kind {
            EngineKind::Query => &self.query_engine_url,
            EngineKind::Schema | EngineKind::Introspection => &self.schema_engine_url,
        }
    }

    pub fn override_path(&self, kind: EngineKind) -> Option<&Path> {
        self.overrides.get(&kind).map(PathBuf::as_path)
    }

    pub fn introspection_timeout(&self) -> Duration {
        Duration::from_millis(self.introspection_timeout_ms)
    }
}

impl ReadinessConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
