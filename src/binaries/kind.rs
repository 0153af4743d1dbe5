//! Engine roles and their per-kind constants.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which role an engine binary plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    /// Answers data-access queries over HTTP.
    Query,
    /// Answers data-definition (migration) operations.
    Schema,
    /// Derives a data model from a schema over stdio JSON-RPC.
    Introspection,
}

impl EngineKind {
    /// Every kind, in acquisition order.
    pub const ALL: [EngineKind; 3] = [Self::Query, Self::Schema, Self::Introspection];

    /// Kinds that are fetched from a remote host by `fetch_native`.
    pub const DOWNLOADABLE: [EngineKind; 2] = [Self::Query, Self::Schema];

    /// Canonical engine name, used in URLs and cache file names.
    pub fn name(self) -> &'static str {
        match self {
            Self::Query => "query-engine",
            Self::Schema => "schema-engine",
            Self::Introspection => "introspection-engine",
        }
    }

    /// Environment variable that points at an operator-supplied binary.
    pub fn override_var(self) -> &'static str {
        match self {
            Self::Query => "PRISMA_QUERY_ENGINE_BINARY",
            Self::Schema => "PRISMA_SCHEMA_ENGINE_BINARY",
            Self::Introspection => "PRISMA_INTROSPECTION_ENGINE_BINARY",
        }
    }

    /// Remote platform substituted when the host reports a `debian-openssl-*`
    /// platform, which has no dedicated artifact on the remote hosts.
    pub fn openssl_fallback_platform(self) -> &'static str {
        match self {
            Self::Query => "linux-musl",
            Self::Schema | Self::Introspection => "linux-static-x64",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
