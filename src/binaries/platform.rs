//! Host platform detection.
//!
//! Maps the running OS, CPU architecture and (on Linux) the C library, distro
//! family and OpenSSL line to the platform identifiers used by the engine
//! artifact hosts, e.g. `darwin-arm64`, `linux-musl` or
//! `debian-openssl-3.0.x`. Detection never fails: anything unrecognised falls
//! back to a Debian/OpenSSL 1.1 style identifier.

use std::fmt;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

const DEFAULT_OPENSSL: &str = "1.1.x";
const OS_RELEASE: &str = "/etc/os-release";
const LIB_DIRS: &[&str] = &[
    "/lib",
    "/usr/lib",
    "/lib64",
    "/usr/lib64",
    "/lib/x86_64-linux-gnu",
    "/usr/lib/x86_64-linux-gnu",
    "/lib/aarch64-linux-gnu",
    "/usr/lib/aarch64-linux-gnu",
];

/// Linux distribution family, as far as artifact naming cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinuxDistro {
    Debian,
    Rhel,
    Alpine,
}

impl LinuxDistro {
    fn as_str(self) -> &'static str {
        match self {
            Self::Debian => "debian",
            Self::Rhel => "rhel",
            Self::Alpine => "alpine",
        }
    }
}

/// C library variant of a Linux host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibcFlavor {
    Musl,
    Glibc {
        distro: LinuxDistro,
        /// OpenSSL line in artifact notation, e.g. `3.0.x`.
        openssl: String,
    },
}

/// Operating system, architecture and C library of a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformDescriptor {
    os: String,
    arch: String,
    libc: Option<LibcFlavor>,
}

impl PlatformDescriptor {
    /// Build a descriptor from explicit parts, using Rust's `std::env::consts`
    /// spelling for `os` and `arch`.
    pub fn new(os: impl Into<String>, arch: impl Into<String>, libc: Option<LibcFlavor>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
            libc,
        }
    }

    /// Inspect the running host.
    pub fn detect() -> Self {
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;

        let libc = match os {
            "macos" | "windows" => None,
            "linux" => Some(detect_libc()),
            other => {
                log::warn!(
                    "unknown platform '{}', falling back to debian-openssl-{}",
                    other,
                    DEFAULT_OPENSSL
                );
                Some(LibcFlavor::Glibc {
                    distro: LinuxDistro::Debian,
                    openssl: DEFAULT_OPENSSL.to_string(),
                })
            }
        };

        Self::new(os, arch, libc)
    }

    /// Short OS family name: `darwin`, `windows`, `linux` or the raw OS name.
    pub fn name(&self) -> &str {
        match self.os.as_str() {
            "macos" => "darwin",
            other => other,
        }
    }

    /// Short architecture name: `amd64`, `arm64` or the raw architecture.
    pub fn arch(&self) -> &str {
        match self.arch.as_str() {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        }
    }

    pub fn libc(&self) -> Option<&LibcFlavor> {
        self.libc.as_ref()
    }

    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }

    /// Canonical platform identifier used by the artifact hosts.
    pub fn binary_name(&self) -> String {
        match self.os.as_str() {
            "windows" => "windows".to_string(),
            "macos" if self.arch == "aarch64" => "darwin-arm64".to_string(),
            "macos" => "darwin".to_string(),
            _ => match &self.libc {
                Some(LibcFlavor::Musl) => "linux-musl".to_string(),
                Some(LibcFlavor::Glibc { openssl, .. }) if self.arch == "aarch64" => {
                    format!("linux-arm64-openssl-{}", openssl)
                }
                Some(LibcFlavor::Glibc { distro, openssl }) => {
                    format!("{}-openssl-{}", distro.as_str(), openssl)
                }
                None => format!("debian-openssl-{}", DEFAULT_OPENSSL),
            },
        }
    }

    /// Executable extension including the dot, or an empty string.
    pub fn extension(&self) -> &'static str {
        if self.is_windows() {
            ".exe"
        } else {
            ""
        }
    }
}

impl fmt::Display for PlatformDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.binary_name())
    }
}

/// Descriptor of the running host, computed once per process.
pub fn current() -> &'static PlatformDescriptor {
    static CURRENT: OnceLock<PlatformDescriptor> = OnceLock::new();
    CURRENT.get_or_init(|| {
        let platform = PlatformDescriptor::detect();
        log::debug!("detected platform {}", platform.binary_name());
        platform
    })
}

/// Add the Windows executable extension to a path or URL.
///
/// Compressed names get `.exe` before `.gz` (`query-engine.exe.gz`); anything
/// else gets `.exe` appended. Other platforms are returned unchanged.
pub fn check_for_extension(platform: &str, path: &str) -> String {
    if platform != "windows" {
        return path.to_string();
    }
    if path.contains(".gz") {
        return path.replacen(".gz", ".exe.gz", 1);
    }
    format!("{}.exe", path)
}

fn detect_libc() -> LibcFlavor {
    let distro = std::fs::read_to_string(OS_RELEASE)
        .map(|content| parse_os_release(&content))
        .unwrap_or(LinuxDistro::Debian);

    if distro == LinuxDistro::Alpine || is_musl_loader_present() {
        return LibcFlavor::Musl;
    }

    let openssl = detect_openssl().unwrap_or_else(|| {
        log::debug!("could not determine OpenSSL version, assuming {}", DEFAULT_OPENSSL);
        DEFAULT_OPENSSL.to_string()
    });

    LibcFlavor::Glibc { distro, openssl }
}

/// Classify the `ID`/`ID_LIKE` entries of an os-release file.
pub fn parse_os_release(content: &str) -> LinuxDistro {
    let ids: Vec<String> = content
        .lines()
        .filter_map(|line| {
            line.strip_prefix("ID_LIKE=")
                .or_else(|| line.strip_prefix("ID="))
        })
        .flat_map(|value| {
            value
                .trim()
                .trim_matches('"')
                .split_whitespace()
                .map(str::to_lowercase)
                .collect::<Vec<_>>()
        })
        .collect();

    if ids.iter().any(|id| id == "alpine") {
        LinuxDistro::Alpine
    } else if ids
        .iter()
        .any(|id| matches!(id.as_str(), "rhel" | "centos" | "fedora"))
    {
        LinuxDistro::Rhel
    } else {
        LinuxDistro::Debian
    }
}

/// Turn `openssl version` output into artifact notation (`1.1.x`, `3.0.x`).
pub fn parse_openssl_version(output: &str) -> Option<String> {
    let version = output.split_whitespace().nth(1)?;
    if version.starts_with("1.0") {
        Some("1.0.x".to_string())
    } else if version.starts_with("1.1") {
        Some("1.1.x".to_string())
    } else if version.starts_with("3.") {
        Some("3.0.x".to_string())
    } else {
        None
    }
}

fn detect_openssl() -> Option<String> {
    if let Ok(output) = Command::new("openssl").args(["version", "-v"]).output() {
        if output.status.success() {
            if let Some(version) = parse_openssl_version(&String::from_utf8_lossy(&output.stdout)) {
                return Some(version);
            }
        }
    }

    // No usable CLI; look for the shared library instead.
    let candidates = [
        ("libssl.so.3", "3.0.x"),
        ("libssl.so.1.1", "1.1.x"),
        ("libssl.so.1.0.0", "1.0.x"),
    ];
    candidates.iter().find_map(|(lib, version)| {
        LIB_DIRS
            .iter()
            .any(|dir| Path::new(dir).join(lib).exists())
            .then(|| version.to_string())
    })
}

fn is_musl_loader_present() -> bool {
    ["/lib/ld-musl-x86_64.so.1", "/lib/ld-musl-aarch64.so.1"]
        .iter()
        .any(|p| Path::new(p).exists())
}
