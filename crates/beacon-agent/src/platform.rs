//! Host platform detection

use sysinfo::System;

use beacon_core::error::BeaconError;
use beacon_core::traits::PlatformProbe;

/// Probes the machine the agent runs on
#[derive(Debug, Clone, Copy, Default)]
pub struct HostPlatform;

impl PlatformProbe for HostPlatform {
    fn describe(&self) -> Result<String, BeaconError> {
        let os = std::env::consts::OS;
        let kind = platform_kind(os, std::env::var_os("ANDROID_ROOT").is_some())
            .ok_or_else(|| BeaconError::UnsupportedPlatform(os.to_string()))?;

        let version = System::long_os_version().unwrap_or_else(|| "unknown version".to_string());
        let kernel = System::kernel_version().unwrap_or_else(|| "unknown".to_string());
        let hostname = gethostname::gethostname().to_string_lossy().into_owned();

        Ok(format!(
            "{} ({}, kernel {}, {}) on {}",
            kind,
            version,
            kernel,
            std::env::consts::ARCH,
            hostname
        ))
    }
}

/// Map an OS name to a supported platform. Android is a Linux with `ANDROID_ROOT` set.
pub fn platform_kind(os: &str, android_root: bool) -> Option<&'static str> {
    if android_root {
        return Some("Android");
    }
    match os {
        "linux" => Some("Linux"),
        "android" => Some("Android"),
        "macos" => Some("macOS"),
        "windows" => Some("Windows"),
        _ => None,
    }
}
