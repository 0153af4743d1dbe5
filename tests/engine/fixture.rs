use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::net::TcpListener;

use prisma_engine_host::{LibcFlavor, LinuxDistro, PlatformDescriptor};

pub(crate) const ENGINE_BYTES: &[u8] = b"#!/bin/sh\necho fake engine\n";

/// Canned artifact host that records every request path.
pub(crate) struct ArtifactServer {
    pub(crate) addr: SocketAddr,
    state: Arc<ServerState>,
    _handle: tokio::task::JoinHandle<()>,
}

struct ServerState {
    hits: AtomicUsize,
    paths: Mutex<Vec<String>>,
    status: StatusCode,
    body: Vec<u8>,
}

impl ArtifactServer {
    pub(crate) async fn start(status: StatusCode, body: Vec<u8>) -> Self {
        let state = Arc::new(ServerState {
            hits: AtomicUsize::new(0),
            paths: Mutex::new(Vec::new()),
            status,
            body,
        });
        let app = Router::new()
            .fallback(serve_artifact)
            .with_state(Arc::clone(&state));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            addr,
            state,
            _handle: handle,
        }
    }

    pub(crate) async fn serving_engine() -> Self {
        Self::start(StatusCode::OK, gzip(ENGINE_BYTES)).await
    }

    /// URL template pointing at this server.
    pub(crate) fn template(&self) -> String {
        format!("http://{}/{{version}}/{{platform}}/{{engine}}.gz", self.addr)
    }

    /// Flat `{version}/{binary}` template pointing at this server.
    pub(crate) fn pinned_template(&self) -> String {
        format!("http://{}/{{version}}/{{binary}}.gz", self.addr)
    }

    pub(crate) fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub(crate) fn paths(&self) -> Vec<String> {
        self.state.paths.lock().unwrap().clone()
    }
}

async fn serve_artifact(State(state): State<Arc<ServerState>>, uri: Uri) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state.paths.lock().unwrap().push(uri.path().to_string());
    (state.status, state.body.clone()).into_response()
}

pub(crate) fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// A glibc Debian host, so remote platform names are predictable.
pub(crate) fn debian_platform() -> PlatformDescriptor {
    PlatformDescriptor::new(
        "linux",
        "x86_64",
        Some(LibcFlavor::Glibc {
            distro: LinuxDistro::Debian,
            openssl: "3.0.x".to_string(),
        }),
    )
}

/// Write an executable shell script that stands in for an engine.
#[cfg(unix)]
pub(crate) fn fake_engine(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A local port with nothing listening on it.
pub(crate) fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
