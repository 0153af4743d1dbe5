//! Default versions, endpoints and timing values.

/// Version of the CLI bundle; used to segregate the global cache directory.
pub const CLI_VERSION: &str = "3.13.0";

pub const QUERY_ENGINE_VERSION: &str = "58b76d24c10d06ee3aba2c8f1e5cbe75db073d3c";
pub const SCHEMA_ENGINE_VERSION: &str = "58b76d24c10d06ee3aba2c8f1e5cbe75db073d3c";
pub const INTROSPECTION_ENGINE_VERSION: &str = "58b76d24c10d06ee3aba2c8f1e5cbe75db073d3c";

pub const QUERY_ENGINE_URL: &str =
    "https://binaries.prisma.sh/all_commits/{version}/{platform}/{engine}.gz";
pub const SCHEMA_ENGINE_URL: &str =
    "https://prisma-bin.fireboom.io/{version}/{platform}/{engine}.gz";
/// Flat layout used when installing an explicitly pinned engine set.
pub const PINNED_ENGINE_URL: &str = "https://prisma-bin.fireboom.io/{version}/{binary}.gz";

/// File name prefix of every cached engine artifact.
pub const ENGINE_FILE_PREFIX: &str = "prisma";

pub const READINESS_ATTEMPTS: u32 = 100;
pub const READINESS_INITIAL_DELAY_MS: u64 = 50;
pub const READINESS_MAX_DELAY_MS: u64 = 100;
pub const READINESS_BACKOFF: f64 = 1.5;
/// Deadline of a single `/status` probe.
pub const READINESS_PROBE_TIMEOUT_MS: u64 = 1_000;

pub const INTROSPECTION_TIMEOUT_MS: u64 = 60_000;

pub fn query_engine_version() -> String { QUERY_ENGINE_VERSION.to_string() }
pub fn schema_engine_version() -> String { SCHEMA_ENGINE_VERSION.to_string() }
pub fn introspection_engine_version() -> String { INTROSPECTION_ENGINE_VERSION.to_string() }
pub fn query_engine_url() -> String { QUERY_ENGINE_URL.to_string() }
pub fn schema_engine_url() -> String { SCHEMA_ENGINE_URL.to_string() }
pub fn pinned_engine_url() -> String { PINNED_ENGINE_URL.to_string() }
pub fn readiness_attempts() -> u32 { READINESS_ATTEMPTS }
pub fn readiness_initial_delay_ms() -> u64 { READINESS_INITIAL_DELAY_MS }
pub fn readiness_max_delay_ms() -> u64 { READINESS_MAX_DELAY_MS }
pub fn readiness_probe_timeout_ms() -> u64 { READINESS_PROBE_TIMEOUT_MS }
pub fn introspection_timeout_ms() -> u64 { INTROSPECTION_TIMEOUT_MS }
