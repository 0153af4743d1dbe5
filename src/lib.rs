//! Engine host - acquire, cache and drive native database engine binaries.
//!
//! The crate guarantees an engine binary is present for the host platform
//! ([`EngineFetcher`]), runs a query engine and talks HTTP to it
//! ([`QueryEngine`]), and runs one-shot introspection over stdio JSON-RPC
//! ([`IntrospectionEngine`]).

mod defaults;
pub mod error;

pub mod binaries;
pub mod config;
pub mod engine;

pub use error::{Error, Result};

pub use config::{EngineConfig, EngineVersions, ReadinessConfig};

pub use binaries::cache::{
    exists, global_cache_dir, global_temp_dir, resolve_path, ArtifactLocation,
};
pub use binaries::fetch::{build_pinned_url, build_url, EngineFetcher, FetchError, NativeEngines};
pub use binaries::kind::EngineKind;
pub use binaries::platform::{LibcFlavor, LinuxDistro, PlatformDescriptor};

pub use engine::channel::{ChannelError, EngineChannel, HttpChannel, StdioChannel};
pub use engine::introspection::{IntrospectionEngine, IntrospectionError};
pub use engine::lifecycle::{EngineState, LifecycleError, QueryEngine};
pub use engine::retry::{Retry, RetryError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
