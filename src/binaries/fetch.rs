//! Engine binary acquisition.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use reqwest::Client;
use thiserror::Error;

use crate::binaries::cache::{self, ArtifactLocation};
use crate::binaries::download::{self, DownloadError};
use crate::binaries::kind::EngineKind;
use crate::binaries::platform::{self, PlatformDescriptor};
use crate::config::EngineConfig;

const CONNECT_TIMEOUT_SECS: u64 = 30;
const DOWNLOAD_TIMEOUT_SECS: u64 = 600;

/// Errors that can occur while making an engine binary available.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("cache directory must be provided")]
    EmptyCacheDir,

    #[error("cache directory must be absolute, got {}", .0.display())]
    RelativeCacheDir(PathBuf),

    #[error("{var} was provided, but no engine was found at {}", path.display())]
    OverrideNotFound { var: &'static str, path: PathBuf },

    #[error("could not download {url} to {}: {source}", path.display())]
    Download {
        url: String,
        path: PathBuf,
        #[source]
        source: DownloadError,
    },
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Paths of the engines installed by [`EngineFetcher::fetch_native`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeEngines {
    pub query: PathBuf,
    pub schema: PathBuf,
}

impl NativeEngines {
    fn set(&mut self, kind: EngineKind, path: PathBuf) {
        match kind {
            EngineKind::Query => self.query = path,
            EngineKind::Schema => self.schema = path,
            EngineKind::Introspection => {}
        }
    }
}

/// Engine binary fetcher.
///
/// Resolves operator overrides, checks the artifact cache and downloads
/// missing engines for the host platform.
pub struct EngineFetcher {
    client: Client,
    config: EngineConfig,
    platform: PlatformDescriptor,
}

impl EngineFetcher {
    /// Create a fetcher for the running host.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_platform(config, platform::current().clone())
    }

    /// Create a fetcher that targets an explicit platform.
    pub fn with_platform(config: EngineConfig, platform: PlatformDescriptor) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            config,
            platform,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn platform(&self) -> &PlatformDescriptor {
        &self.platform
    }

    /// Get the path to an engine binary in the configured cache directory,
    /// downloading it if necessary.
    pub async fn ensure(&self, kind: EngineKind) -> Result<PathBuf> {
        self.ensure_in(kind, &self.config.cache_dir).await
    }

    /// Get the path to an engine binary under `cache_dir`, downloading it if
    /// necessary.
    pub async fn ensure_in(&self, kind: EngineKind, cache_dir: &Path) -> Result<PathBuf> {
        let version = self.config.version(kind).to_string();
        self.ensure_version(kind, cache_dir, &version).await
    }

    /// Ensure every downloadable engine is present under `dir`.
    pub async fn fetch_native(&self, dir: &Path) -> Result<NativeEngines> {
        let mut engines = NativeEngines::default();
        for kind in EngineKind::DOWNLOADABLE {
            engines.set(kind, self.ensure_in(kind, dir).await?);
        }
        Ok(engines)
    }

    /// Install the pinned `version` of every downloadable engine under `dir`.
    ///
    /// Pinned sets use their own flat layout: artifacts are named
    /// `{os}-{arch}-{engine}[.exe]`, stored at `{dir}/{version}/{name}` and
    /// fetched from the pinned URL template without any platform remapping.
    /// Overrides do not apply.
    pub async fn fetch_native_with_version(
        &self,
        dir: &Path,
        version: &str,
    ) -> Result<NativeEngines> {
        validate_cache_dir(dir)?;

        let mut engines = NativeEngines::default();
        for kind in EngineKind::DOWNLOADABLE {
            let started = Instant::now();
            let binary = self.pinned_binary_name(kind);
            let to = dir.join(version).join(&binary);
            if cache::exists(&to) {
                log::debug!("{} is cached", to.display());
            } else {
                let url = build_pinned_url(&self.config.pinned_engine_url, version, &binary);
                self.install(kind, &url, &to, started).await?;
            }
            engines.set(kind, to);
        }
        Ok(engines)
    }

    /// File name of `kind` in a pinned engine set for this platform.
    pub fn pinned_binary_name(&self, kind: EngineKind) -> String {
        format!(
            "{}-{}-{}{}",
            self.platform.name(),
            self.platform.arch(),
            kind.name(),
            self.platform.extension()
        )
    }

    /// Return the override or cached binary for `kind`, without any network
    /// access. `None` means the engine still has to be fetched.
    pub fn locate(&self, kind: EngineKind) -> Result<Option<PathBuf>> {
        if let Some(path) = self.override_for(kind)? {
            return Ok(Some(path));
        }
        validate_cache_dir(&self.config.cache_dir)?;

        let path = self.artifact_path(kind, &self.config.cache_dir, self.config.version(kind));
        Ok(cache::exists(&path).then_some(path))
    }

    /// Local path of an artifact, whether or not it exists yet.
    pub fn artifact_path(&self, kind: EngineKind, cache_dir: &Path, version: &str) -> PathBuf {
        ArtifactLocation::new(cache_dir, kind, version, &self.platform).path()
    }

    /// Remote URL of `kind` for the configured version and `platform_name`.
    pub fn remote_url(&self, kind: EngineKind, platform_name: &str) -> String {
        build_url(
            self.config.url_template(kind),
            kind,
            self.config.version(kind),
            platform_name,
        )
    }

    async fn ensure_version(
        &self,
        kind: EngineKind,
        cache_dir: &Path,
        version: &str,
    ) -> Result<PathBuf> {
        let started = Instant::now();
        log::debug!("checking {}...", kind);

        if let Some(path) = self.override_for(kind)? {
            return Ok(path);
        }

        validate_cache_dir(cache_dir)?;

        let to = self.artifact_path(kind, cache_dir, version);
        if cache::exists(&to) {
            log::debug!("{} is cached", to.display());
            return Ok(to);
        }

        let url = build_url(
            self.config.url_template(kind),
            kind,
            version,
            &self.platform.binary_name(),
        );
        self.install(kind, &url, &to, started).await?;
        Ok(to)
    }

    async fn install(
        &self,
        kind: EngineKind,
        url: &str,
        to: &Path,
        started: Instant,
    ) -> Result<()> {
        log::info!("{} is missing, downloading {}", kind, url);

        let downloaded = download::fetch_locked(&self.client, url, to)
            .await
            .map_err(|source| FetchError::Download {
                url: url.to_string(),
                path: to.to_path_buf(),
                source,
            })?;

        if downloaded {
            log::info!("{} done in {:?}", kind, started.elapsed());
        }
        Ok(())
    }

    fn override_for(&self, kind: EngineKind) -> Result<Option<PathBuf>> {
        let Some(path) = self.config.override_path(kind) else {
            return Ok(None);
        };

        if !path.exists() {
            return Err(FetchError::OverrideNotFound {
                var: kind.override_var(),
                path: path.to_path_buf(),
            });
        }

        log::debug!("{} is defined, using {}", kind.override_var(), path.display());
        Ok(Some(path.to_path_buf()))
    }
}

fn validate_cache_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() {
        return Err(FetchError::EmptyCacheDir);
    }
    if !dir.is_absolute() {
        return Err(FetchError::RelativeCacheDir(dir.to_path_buf()));
    }
    Ok(())
}

/// Platform name used on the remote host for a detected platform.
pub fn remote_platform(kind: EngineKind, platform_name: &str) -> &str {
    if platform_name.contains("debian-openssl-") {
        return kind.openssl_fallback_platform();
    }
    if platform_name == "linux" {
        return "linux-musl";
    }
    platform_name
}

/// Substitute a URL template for `kind`, `version` and a detected platform.
pub fn build_url(template: &str, kind: EngineKind, version: &str, platform_name: &str) -> String {
    let url = template
        .replace("{version}", version)
        .replace("{platform}", remote_platform(kind, platform_name))
        .replace("{engine}", kind.name());
    platform::check_for_extension(platform_name, &url)
}

/// Substitute the pinned URL template for `version` and a pinned binary name.
pub fn build_pinned_url(template: &str, version: &str, binary_name: &str) -> String {
    template
        .replace("{version}", version)
        .replace("{binary}", binary_name)
}
