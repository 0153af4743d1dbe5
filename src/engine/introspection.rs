//! Introspection engine: derive a data model from a schema.
//!
//! Each `pull` runs the introspection binary once, exchanging a single
//! JSON-RPC line over its stdio. The exchange, process teardown included, is
//! bounded by a hard timeout.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::json;
use thiserror::Error;

use crate::binaries::fetch::{EngineFetcher, FetchError};
use crate::binaries::kind::EngineKind;
use crate::config::EngineConfig;
use crate::engine::channel::{ChannelError, EngineChannel, StdioChannel};
use crate::engine::protocol::IntrospectResult;

const INTROSPECT_METHOD: &str = "introspect";
/// `compositeTypeDepth` value meaning "unbounded".
const UNBOUNDED_DEPTH: i64 = -1;

#[derive(Error, Debug)]
pub enum IntrospectionError {
    #[error("introspection engine is not installed, expected it at {}", .0.display())]
    NotInstalled(PathBuf),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("introspect timed out after {0:?}")]
    Timeout(Duration),

    #[error("introspect error: {0}")]
    Introspect(String),

    #[error("introspect response has no data model: {0}")]
    MissingDataModel(#[source] serde_json::Error),

    #[error(transparent)]
    Channel(ChannelError),
}

impl From<ChannelError> for IntrospectionError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Engine(message) => Self::Introspect(message),
            ChannelError::Timeout(after) => Self::Timeout(after),
            other => Self::Channel(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, IntrospectionError>;

/// Runs introspection against an installed engine binary.
#[derive(Debug)]
pub struct IntrospectionEngine {
    channel: StdioChannel,
}

impl IntrospectionEngine {
    /// Locate an already installed engine (override or cache); never
    /// downloads.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let fetcher = EngineFetcher::new(config.clone());
        match fetcher.locate(EngineKind::Introspection)? {
            Some(path) => {
                log::debug!("using introspection engine at {}", path.display());
                Ok(Self::with_binary(path, config.introspection_timeout()))
            }
            None => Err(IntrospectionError::NotInstalled(fetcher.artifact_path(
                EngineKind::Introspection,
                &config.cache_dir,
                config.version(EngineKind::Introspection),
            ))),
        }
    }

    /// Make sure the engine is installed, downloading it if needed.
    pub async fn ensure(config: &EngineConfig) -> Result<Self> {
        let path = EngineFetcher::new(config.clone())
            .ensure(EngineKind::Introspection)
            .await?;
        Ok(Self::with_binary(path, config.introspection_timeout()))
    }

    pub fn with_binary(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            channel: StdioChannel::new(path, timeout),
        }
    }

    pub fn path(&self) -> &Path {
        self.channel.program()
    }

    /// Introspect `schema` and return the resulting data model.
    pub async fn pull(&self, schema: &str) -> Result<String> {
        let started = Instant::now();

        let params = json!({
            "schema": schema,
            "compositeTypeDepth": UNBOUNDED_DEPTH,
        });
        let result = self.channel.request(INTROSPECT_METHOD, params).await?;
        let result: IntrospectResult =
            serde_json::from_value(result).map_err(IntrospectionError::MissingDataModel)?;

        log::debug!("introspect took {:?}", started.elapsed());
        Ok(result.data_model)
    }
}
