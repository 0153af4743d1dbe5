//! Query engine process lifecycle management.
//!
//! Provides the `QueryEngine` struct which manages:
//! - Binary resolution and engine process spawning
//! - The `/status` readiness handshake
//! - HTTP requests against the running engine
//! - Graceful shutdown with proper reaping

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::binaries::fetch::{EngineFetcher, FetchError};
use crate::binaries::kind::EngineKind;
use crate::config::EngineConfig;
use crate::engine::channel::{ChannelError, EngineChannel, HttpChannel};
use crate::engine::process::{is_graceful_exit, reserve_port, Reaper};
use crate::engine::protocol::GqlResponse;
use crate::engine::retry::{Retry, RetryError};

const STATUS_PATH: &str = "/status";

/// Errors that can occur during engine lifecycle management.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("engine is not connected")]
    NotConnected,

    #[error("engine was already connected")]
    AlreadyConnected,

    #[error("engine has been disconnected")]
    Disconnected,

    #[error("no query engine binary at {}", .0.display())]
    BinaryNotFound(PathBuf),

    #[error("ensure: {0}")]
    Fetch(#[from] FetchError),

    #[error("get free port: {0}")]
    Port(#[source] std::io::Error),

    #[error("start command: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("engine process exited before signaling readiness")]
    ExitedDuringStartup,

    #[error("readiness query failed after {attempts} attempts: {last}")]
    NotReady { attempts: u32, last: String },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("wait for process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("engine exited abnormally: {0}")]
    AbnormalExit(std::process::ExitStatus),
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Lifecycle state of a [`QueryEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Uninitialized = 0,
    Spawning = 1,
    Ready = 2,
    Disconnecting = 3,
    Terminated = 4,
    Failed = 5,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Spawning,
            2 => Self::Ready,
            3 => Self::Disconnecting,
            4 => Self::Terminated,
            _ => Self::Failed,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "UNINITIALIZED"),
            Self::Spawning => write!(f, "SPAWNING"),
            Self::Ready => write!(f, "READY"),
            Self::Disconnecting => write!(f, "DISCONNECTING"),
            Self::Terminated => write!(f, "TERMINATED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Why a single readiness probe did not succeed.
#[derive(Debug)]
enum ProbeError {
    Transport(ChannelError),
    Malformed(serde_json::Error),
    Engine(String),
    Exited,
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "could not connect: {}", e),
            Self::Malformed(e) => write!(f, "could not unmarshal response: {}", e),
            Self::Engine(msg) => write!(f, "readiness gql errors: {}", msg),
            Self::Exited => write!(f, "engine process exited"),
        }
    }
}

/// Manages one query engine process.
///
/// Handles:
/// - Binary resolution through the override variable or the artifact cache
/// - Process spawning on a reserved local port
/// - The readiness handshake
/// - Graceful shutdown on `disconnect`
pub struct QueryEngine {
    schema: String,
    config: EngineConfig,
    binary: Option<PathBuf>,
    state: AtomicU8,
    disconnected: AtomicBool,
    channel: Option<HttpChannel>,
    reaper: Mutex<Option<Reaper>>,
}

impl QueryEngine {
    /// Create an engine for `schema`; the binary is resolved on `connect`.
    pub fn new(schema: impl Into<String>, config: EngineConfig) -> Self {
        Self {
            schema: schema.into(),
            config,
            binary: None,
            state: AtomicU8::new(EngineState::Uninitialized as u8),
            disconnected: AtomicBool::new(false),
            channel: None,
            reaper: Mutex::new(None),
        }
    }

    /// Create an engine that runs an explicit binary.
    pub fn with_binary(
        schema: impl Into<String>,
        config: EngineConfig,
        binary: impl Into<PathBuf>,
    ) -> Self {
        let mut engine = Self::new(schema, config);
        engine.binary = Some(binary.into());
        engine
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Base URL of the running engine, once spawned.
    pub fn url(&self) -> Option<&str> {
        self.channel.as_ref().map(HttpChannel::base_url)
    }

    /// Resolve the binary, spawn the engine and wait until it answers.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state() != EngineState::Uninitialized {
            return Err(LifecycleError::AlreadyConnected);
        }

        let started = Instant::now();
        self.set_state(EngineState::Spawning);

        match self.launch().await {
            Ok(()) => {
                self.set_state(EngineState::Ready);
                log::debug!("connecting took {:?}", started.elapsed());
                log::info!("query engine ready at {}", self.url().unwrap_or_default());
                Ok(())
            }
            Err(e) => {
                self.set_state(EngineState::Failed);
                // Dropping the reaper kills whatever was spawned.
                self.reaper.get_mut().take();
                Err(e)
            }
        }
    }

    /// Send a request to the engine and return the raw response body.
    pub async fn request(&self, method: &str, path: &str, payload: &Value) -> Result<Vec<u8>> {
        if self.is_disconnected() {
            return Err(LifecycleError::Disconnected);
        }
        let channel = self.ready_channel()?;
        Ok(channel.send(method, path, payload).await?)
    }

    /// Stop the engine process.
    ///
    /// The disconnected flag is set before anything else so concurrent
    /// callers fail fast. Calling this twice is a no-op.
    pub async fn disconnect(&self) -> Result<()> {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        log::debug!("disconnecting...");
        self.set_state(EngineState::Disconnecting);

        let reaper = self.reaper.lock().await.take();
        let result = match reaper {
            Some(reaper) => match reaper.shutdown().await {
                Ok(status) if is_graceful_exit(&status) => Ok(()),
                Ok(status) => Err(LifecycleError::AbnormalExit(status)),
                Err(e) => Err(LifecycleError::Wait(e)),
            },
            None => Ok(()),
        };

        self.set_state(EngineState::Terminated);
        if result.is_ok() {
            log::debug!("disconnected.");
        }
        result
    }

    async fn launch(&mut self) -> Result<()> {
        let binary = self.resolve_binary().await?;

        let port = reserve_port().map_err(LifecycleError::Port)?;
        let port_number = port.port();
        log::debug!("running query-engine on port {}", port_number);

        let mut command = Command::new(&binary);
        command
            .args(["-p", &port_number.to_string(), "--enable-raw-queries"])
            .envs(engine_env(&self.schema, self.config.log_queries))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        log::debug!("starting engine {}...", binary.display());
        let child = command.spawn().map_err(LifecycleError::SpawnFailed)?;

        let reaper = Reaper::spawn(child, Some(port));
        if let Some(pid) = reaper.pid() {
            log::debug!("engine process {} started", pid);
        }
        let channel = HttpChannel::new(format!("http://localhost:{}", port_number));
        let readiness = self.config.readiness;
        let retry = Retry::from(readiness);

        log::debug!("connecting to engine...");
        let ready = wait_for_ready(&channel, &retry, readiness.probe_timeout(), || {
            reaper.has_exited()
        })
        .await;

        *self.reaper.get_mut() = Some(reaper);
        self.channel = Some(channel);
        ready
    }

    async fn resolve_binary(&self) -> Result<PathBuf> {
        match &self.binary {
            Some(path) if path.exists() => Ok(path.clone()),
            Some(path) => Err(LifecycleError::BinaryNotFound(path.clone())),
            None => Ok(EngineFetcher::new(self.config.clone())
                .ensure(EngineKind::Query)
                .await?),
        }
    }

    fn ready_channel(&self) -> Result<&HttpChannel> {
        match (self.state(), &self.channel) {
            (EngineState::Ready, Some(channel)) => Ok(channel),
            _ => Err(LifecycleError::NotConnected),
        }
    }

    fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

impl EngineChannel for QueryEngine {
    async fn request(
        &self,
        method: &str,
        payload: Value,
    ) -> std::result::Result<Value, ChannelError> {
        if self.is_disconnected() {
            return Err(ChannelError::Closed);
        }
        let channel = self.ready_channel().map_err(|_| ChannelError::Closed)?;
        channel.request(method, payload).await
    }
}

/// Environment injected into a spawned query engine.
pub fn engine_env(schema: &str, log_queries: bool) -> Vec<(&'static str, String)> {
    let mut env = vec![
        ("PRISMA_DML", schema.to_string()),
        ("RUST_LOG", "error".to_string()),
        ("RUST_LOG_FORMAT", "json".to_string()),
        ("PRISMA_CLIENT_ENGINE_TYPE", "binary".to_string()),
    ];

    if log_queries {
        env.push(("PRISMA_LOG_QUERIES", "y".to_string()));
        env.push(("RUST_LOG", "info".to_string()));
    }

    env
}

/// Poll `GET /status` until the engine answers cleanly.
///
/// Transport errors, probes that outlive `probe_timeout`, malformed bodies
/// and non-empty error lists are retried within the budget of `retry`.
/// `has_exited` aborts the wait as soon as the engine process is gone.
pub async fn wait_for_ready<F>(
    channel: &HttpChannel,
    retry: &Retry,
    probe_timeout: Duration,
    has_exited: F,
) -> Result<()>
where
    F: Fn() -> bool,
{
    let has_exited = &has_exited;
    let outcome = retry
        .run(
            |attempt| async move {
                if has_exited() {
                    return Err(ProbeError::Exited);
                }
                let probe = probe_status(channel, probe_timeout).await;
                if let Err(e) = &probe {
                    log::debug!("readiness attempt {} failed; retrying... {}", attempt, e);
                }
                probe
            },
            |e| !matches!(e, ProbeError::Exited),
        )
        .await;

    match outcome {
        Ok(()) => Ok(()),
        Err(RetryError::Aborted(_)) => Err(LifecycleError::ExitedDuringStartup),
        Err(RetryError::Exhausted { attempts, last }) => {
            log::warn!("engine not ready after {} attempts: {}", attempts, last);
            Err(LifecycleError::NotReady {
                attempts,
                last: last.to_string(),
            })
        }
    }
}

async fn probe_status(
    channel: &HttpChannel,
    timeout: Duration,
) -> std::result::Result<(), ProbeError> {
    let body = channel
        .send_timeout("GET", STATUS_PATH, &Value::Object(Default::default()), timeout)
        .await
        .map_err(ProbeError::Transport)?;

    let response: GqlResponse = serde_json::from_slice(&body).map_err(ProbeError::Malformed)?;
    if response.has_errors() {
        return Err(ProbeError::Engine(response.error_message()));
    }
    Ok(())
}
