//! Engine binary management.
//!
//! This module provides:
//! - Host platform detection (`platform`)
//! - Artifact cache layout (`cache`)
//! - Download and atomic install (`download`)
//! - Override/cache/download resolution (`fetch`)

pub mod cache;
pub mod download;
pub mod fetch;
pub mod kind;
pub mod platform;

pub use fetch::{EngineFetcher, FetchError, NativeEngines};
pub use kind::EngineKind;
pub use platform::PlatformDescriptor;
