//! Engine process management.
//!
//! This module provides:
//! - Query engine process lifecycle (`lifecycle`)
//! - One-shot introspection over stdio (`introspection`)
//! - HTTP and stdio request channels (`channel`)
//! - Wire envelopes (`protocol`)
//! - Port reservation, signalling and reaping (`process`)
//! - Bounded retry with backoff (`retry`)

pub mod channel;
pub mod introspection;
pub mod lifecycle;
pub mod process;
pub mod protocol;
pub mod retry;

pub use channel::{ChannelError, EngineChannel, HttpChannel, StdioChannel};
pub use introspection::{IntrospectionEngine, IntrospectionError};
pub use lifecycle::{EngineState, LifecycleError, QueryEngine};
pub use retry::{Retry, RetryError};
