//! Artifact download: HTTP fetch, gzip decompression, atomic install.
//!
//! The response body is streamed through a single-member gzip decoder into a
//! uniquely named temporary file next to the destination. Only a fully
//! written, executable file is renamed onto the destination, so a partial
//! artifact is never visible at the final path.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use flate2::write::GzDecoder;
use fs4::fs_std::FileExt;
use reqwest::Client;
use thiserror::Error;

/// Errors raised while downloading an artifact.
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("could not get {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("received code {status} from {url}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("could not decompress {url}: {source}")]
    Decompress {
        url: String,
        #[source]
        source: io::Error,
    },

    #[error("could not write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, DownloadError>;

/// Download `url`, gunzip it and install it executable at `to`.
pub async fn fetch(client: &Client, url: &str, to: &Path) -> Result<()> {
    let parent = parent_dir(to);
    std::fs::create_dir_all(parent).map_err(|source| DownloadError::Io {
        path: parent.to_path_buf(),
        source,
    })?;

    let started = Instant::now();

    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|source| DownloadError::Http {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(DownloadError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    let file_name = to
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "engine".to_string());
    let tmp = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name))
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|source| DownloadError::Io {
            path: parent.to_path_buf(),
            source,
        })?;

    let decompress_err = |source: io::Error| DownloadError::Decompress {
        url: url.to_string(),
        source,
    };

    let mut decoder = GzDecoder::new(tmp);
    let mut received = 0usize;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|source| DownloadError::Http {
            url: url.to_string(),
            source,
        })?
    {
        received += chunk.len();
        decoder.write_all(&chunk).map_err(decompress_err)?;
    }

    if received == 0 {
        return Err(decompress_err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "empty response body, expected a gzip stream",
        )));
    }

    decoder.try_finish().map_err(decompress_err)?;
    let mut tmp = decoder.finish().map_err(decompress_err)?;

    let tmp_path = tmp.path().to_path_buf();
    let io_err = |source: io::Error| DownloadError::Io {
        path: tmp_path.clone(),
        source,
    };
    tmp.flush().map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    make_executable(tmp.as_file()).map_err(io_err)?;

    tmp.persist(to).map_err(|e| DownloadError::Io {
        path: to.to_path_buf(),
        source: e.error,
    })?;

    log::debug!(
        "downloaded {} ({} compressed bytes) in {:?}",
        url,
        received,
        started.elapsed()
    );

    Ok(())
}

/// Like [`fetch`], but serialised across processes by an advisory lock file.
///
/// The lock file `{to}.lock` only exists while a download is in flight; it is
/// removed once the artifact is installed.
///
/// Returns `false` when another process installed the artifact while this one
/// waited for the lock, in which case nothing is downloaded.
pub async fn fetch_locked(client: &Client, url: &str, to: &Path) -> Result<bool> {
    let parent = parent_dir(to);
    std::fs::create_dir_all(parent).map_err(|source| DownloadError::Io {
        path: parent.to_path_buf(),
        source,
    })?;

    let lock_path = sibling_with_suffix(to, ".lock");
    let lock = match acquire_lock(lock_path.clone()).await {
        Ok(file) => Some(file),
        Err(e) => {
            log::warn!(
                "could not lock {}, downloading without it: {}",
                lock_path.display(),
                e
            );
            None
        }
    };

    if to.is_file() {
        log::debug!("{} appeared while waiting for the lock", to.display());
        return Ok(false);
    }

    let result = fetch(client, url, to).await;
    if result.is_ok() && lock.is_some() {
        // Late waiters still hold the unlinked file and re-check `to` after locking.
        if let Err(e) = std::fs::remove_file(&lock_path) {
            log::debug!("could not remove {}: {}", lock_path.display(), e);
        }
    }
    drop(lock);
    result.map(|()| true)
}

async fn acquire_lock(path: PathBuf) -> io::Result<File> {
    tokio::task::spawn_blocking(move || {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        file.lock_exclusive()?;
        Ok(file)
    })
    .await
    .map_err(io::Error::other)?
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(unix)]
fn make_executable(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_file: &File) -> io::Result<()> {
    Ok(())
}
