//! Request/response channels to engine processes.
//!
//! [`EngineChannel`] is the one capability callers need from an engine:
//! send a method with a JSON payload, get a JSON result or an error. The
//! query engine implements it over HTTP ([`HttpChannel`]); the introspection
//! engine over one-shot stdio JSON-RPC ([`StdioChannel`]).

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::{Client, Method};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::engine::protocol::{GqlResponse, RpcRequest, RpcResponse};

/// Errors raised by an engine channel.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("invalid HTTP method '{0}'")]
    InvalidMethod(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("engine responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed engine response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("could not start engine: {0}")]
    Spawn(#[source] io::Error),

    #[error("engine I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("engine closed its output without responding")]
    Closed,

    #[error("engine response carried neither result nor error")]
    MissingResult,

    #[error("engine did not respond within {0:?}")]
    Timeout(Duration),
}

/// A channel that carries one request and yields one result.
pub trait EngineChannel {
    fn request(
        &self,
        method: &str,
        payload: Value,
    ) -> impl Future<Output = Result<Value, ChannelError>> + Send;
}

/// HTTP/JSON channel to a running engine.
#[derive(Debug, Clone)]
pub struct HttpChannel {
    client: Client,
    base_url: String,
}

impl HttpChannel {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send `payload` as a JSON body and return the raw response body.
    ///
    /// Transport failures and non-success statuses are errors; there is no
    /// retry at this level and no deadline.
    pub async fn send(
        &self,
        method: &str,
        path: &str,
        payload: &Value,
    ) -> Result<Vec<u8>, ChannelError> {
        self.send_inner(method, path, payload, None).await
    }

    /// Like [`HttpChannel::send`], failing with a timeout error when the
    /// whole exchange takes longer than `timeout`.
    pub async fn send_timeout(
        &self,
        method: &str,
        path: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<Vec<u8>, ChannelError> {
        self.send_inner(method, path, payload, Some(timeout)).await
    }

    async fn send_inner(
        &self,
        method: &str,
        path: &str,
        payload: &Value,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, ChannelError> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ChannelError::InvalidMethod(method.to_string()))?;
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));

        let mut request = self.client.request(method, &url).json(payload);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(ChannelError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(body.to_vec())
    }
}

impl EngineChannel for HttpChannel {
    /// POST `payload` to the path named by `method` and unwrap the GraphQL
    /// envelope.
    async fn request(&self, method: &str, payload: Value) -> Result<Value, ChannelError> {
        let body = self.send("POST", method, &payload).await?;
        let response: GqlResponse = serde_json::from_slice(&body)?;
        if response.has_errors() {
            return Err(ChannelError::Engine(response.error_message()));
        }
        Ok(response.data.unwrap_or(Value::Null))
    }
}

/// One-shot JSON-RPC channel over a subprocess's stdin/stdout.
///
/// Every request spawns the program, writes one request line, reads one
/// response line and tears the process down. The whole exchange is bounded
/// by `timeout`.
#[derive(Debug)]
pub struct StdioChannel {
    program: PathBuf,
    timeout: Duration,
    next_id: AtomicU64,
}

impl StdioChannel {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn exchange(&self, method: &str, payload: Value) -> Result<Value, ChannelError> {
        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(ChannelError::Spawn)?;

        let mut stdin = child.stdin.take().ok_or(ChannelError::Closed)?;
        let stdout = child.stdout.take().ok_or(ChannelError::Closed)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_vec(&RpcRequest::new(id, method, vec![payload]))?;
        line.push(b'\n');
        stdin.write_all(&line).await?;
        stdin.flush().await?;

        let mut reader = BufReader::new(stdout);
        let mut response_line = String::new();
        let read = reader.read_line(&mut response_line).await?;

        drop(stdin);
        // One line is all we need; stop the engine and reap it off the caller's path.
        let _ = child.start_kill();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => log::debug!("engine process exited with {}", status),
                Err(e) => log::debug!("could not reap engine process: {}", e),
            }
        });

        if read == 0 {
            return Err(ChannelError::Closed);
        }

        let response: RpcResponse = serde_json::from_str(response_line.trim_end())?;
        if let Some(error) = response.error {
            return Err(ChannelError::Engine(error.detail()));
        }
        response.result.ok_or(ChannelError::MissingResult)
    }
}

impl EngineChannel for StdioChannel {
    async fn request(&self, method: &str, payload: Value) -> Result<Value, ChannelError> {
        tokio::time::timeout(self.timeout, self.exchange(method, payload))
            .await
            .map_err(|_| ChannelError::Timeout(self.timeout))?
    }
}
