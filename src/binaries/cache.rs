//! On-disk layout of cached engine artifacts.
//!
//! Artifacts live at `{base}/{version}/prisma-{engine}-{platform}[.exe]`.
//! The version is a directory, so bumping it never shadows an older binary.
//! A transient `{artifact}.lock` sits beside an artifact while it downloads.

use std::path::{Path, PathBuf};

use crate::binaries::kind::EngineKind;
use crate::binaries::platform::PlatformDescriptor;
use crate::defaults::ENGINE_FILE_PREFIX;

const BASE_DIR_NAME: [&str; 2] = ["prisma", "binaries"];

/// Fully qualified location of one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactLocation {
    pub base_dir: PathBuf,
    pub version: String,
    pub kind: EngineKind,
    /// Platform identifier, e.g. `debian-openssl-3.0.x`.
    pub platform: String,
    /// Executable extension including the dot, or empty.
    pub extension: String,
}

impl ArtifactLocation {
    pub fn new(
        base_dir: &Path,
        kind: EngineKind,
        version: &str,
        platform: &PlatformDescriptor,
    ) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            version: version.to_string(),
            kind,
            platform: platform.binary_name(),
            extension: platform.extension().to_string(),
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}{}",
            ENGINE_FILE_PREFIX,
            self.kind.name(),
            self.platform,
            self.extension
        )
    }

    pub fn path(&self) -> PathBuf {
        self.base_dir.join(&self.version).join(self.file_name())
    }
}

/// Path of the artifact for `kind` at `version` on `platform`.
pub fn resolve_path(
    base_dir: &Path,
    kind: EngineKind,
    version: &str,
    platform: &PlatformDescriptor,
) -> PathBuf {
    ArtifactLocation::new(base_dir, kind, version, platform).path()
}

/// Whether an artifact is already on disk.
pub fn exists(path: &Path) -> bool {
    path.is_file()
}

/// Per-user cache directory for a CLI version.
///
/// Falls back to the temp directory when the host has no cache directory.
pub fn global_cache_dir(cli_version: &str) -> PathBuf {
    let cache = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
    let mut dir = cache;
    dir.extend(BASE_DIR_NAME);
    dir.join("cli").join(cli_version)
}

/// Scratch directory for engines of a given version under the temp dir.
pub fn global_temp_dir(version: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    dir.extend(BASE_DIR_NAME);
    dir.join("engines").join(version)
}
