//! host:sys - Platform descriptor for `chrome.runtime.getPlatformInfo`.
//!
//! Host OS and CPU names are mapped through fixed lookup tables onto the
//! values the extension API reports. Unknown host values map to `None`
//! instead of failing; callers decide what an absent mapping means.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// Types
// ============================================================================

/// Operating system as reported to packaged apps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformOs {
    Mac,
    Win,
    Linux,
}

impl PlatformOs {
    pub fn as_str(self) -> &'static str {
        match self {
            PlatformOs::Mac => "mac",
            PlatformOs::Win => "win",
            PlatformOs::Linux => "linux",
        }
    }
}

impl fmt::Display for PlatformOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU architecture as reported to packaged apps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformArch {
    #[serde(rename = "arm")]
    Arm,
    #[serde(rename = "x86-32")]
    X86_32,
    #[serde(rename = "x86-64")]
    X86_64,
}

impl PlatformArch {
    pub fn as_str(self) -> &'static str {
        match self {
            PlatformArch::Arm => "arm",
            PlatformArch::X86_32 => "x86-32",
            PlatformArch::X86_64 => "x86-64",
        }
    }
}

impl fmt::Display for PlatformArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of `getPlatformInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub os: Option<PlatformOs>,
    pub arch: Option<PlatformArch>,
    pub nacl_arch: Option<PlatformArch>,
}

// ============================================================================
// Lookup Tables
// ============================================================================

// Both the Node-style names and Rust's `std::env::consts` names are accepted.
const OS_TABLE: &[(&str, PlatformOs)] = &[
    ("darwin", PlatformOs::Mac),
    ("macos", PlatformOs::Mac),
    ("win32", PlatformOs::Win),
    ("windows", PlatformOs::Win),
    ("linux", PlatformOs::Linux),
];

const ARCH_TABLE: &[(&str, PlatformArch)] = &[
    ("arm", PlatformArch::Arm),
    ("arm64", PlatformArch::Arm),
    ("aarch64", PlatformArch::Arm),
    ("x86", PlatformArch::X86_32),
    ("x32", PlatformArch::X86_32),
    ("x64", PlatformArch::X86_64),
    ("x86_64", PlatformArch::X86_64),
];

/// Map a host OS identifier.
pub fn map_os(host_os: &str) -> Option<PlatformOs> {
    OS_TABLE
        .iter()
        .find(|(name, _)| *name == host_os)
        .map(|(_, os)| *os)
}

/// Map a host CPU architecture identifier.
pub fn map_arch(host_arch: &str) -> Option<PlatformArch> {
    ARCH_TABLE
        .iter()
        .find(|(name, _)| *name == host_arch)
        .map(|(_, arch)| *arch)
}

/// Build the descriptor for an explicit host OS/arch pair.
pub fn platform_info_for(host_os: &str, host_arch: &str) -> PlatformInfo {
    let arch = map_arch(host_arch);
    PlatformInfo {
        os: map_os(host_os),
        arch,
        nacl_arch: arch,
    }
}

/// Descriptor for the host this process runs on.
///
/// Computed on every call; nothing is cached.
pub fn platform_info() -> PlatformInfo {
    let info = platform_info_for(std::env::consts::OS, std::env::consts::ARCH);
    debug!(
        host_os = std::env::consts::OS,
        host_arch = std::env::consts::ARCH,
        ?info,
        "sys.platform_info"
    );
    info
}

// ============================================================================
// Tests
// ============================================================================
