//! Prebuilt PostgreSQL server builds for Linux and macOS.
//!
//! Published as `tar.gz` archives on GitHub releases, one per target triple,
//! each wrapping `bin/`, `lib/` and `share/` in a single directory.

use super::vendor::VendorRelease;
use crate::config::wrap_with_proxy;

const RELEASES_BASE: &str = "https://github.com/theseus-rs/postgresql-binaries/releases/download";

pub const DEFAULT_BINARIES_VERSION: &str = "16.4.0";

/// Target triple of the build matching `os`/`arch`, if one is published.
pub fn prebuilt_target(os: &str, arch: &str) -> Option<&'static str> {
    match (os, arch) {
        ("linux", "x86_64") => Some("x86_64-unknown-linux-gnu"),
        ("linux", "aarch64") => Some("aarch64-unknown-linux-gnu"),
        ("macos", "x86_64") => Some("x86_64-apple-darwin"),
        ("macos", "aarch64") => Some("aarch64-apple-darwin"),
        _ => None,
    }
}

pub fn host_target() -> Option<&'static str> {
    prebuilt_target(std::env::consts::OS, std::env::consts::ARCH)
}

/// Download location of `version` for `target`, through the GitHub proxy
/// when one is configured.
pub fn prebuilt_release(version: &str, target: &str, proxy: &str) -> VendorRelease {
    let url = format!(
        "{}/{}/postgresql-{}-{}.tar.gz",
        RELEASES_BASE, version, version, target
    );
    VendorRelease {
        url: wrap_with_proxy(proxy, &url),
        version: version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_hosts_map_to_triples() {
        assert_eq!(prebuilt_target("linux", "x86_64"), Some("x86_64-unknown-linux-gnu"));
        assert_eq!(prebuilt_target("macos", "aarch64"), Some("aarch64-apple-darwin"));
        assert_eq!(prebuilt_target("freebsd", "x86_64"), None);
        assert_eq!(prebuilt_target("linux", "riscv64"), None);
    }

    #[test]
    fn release_url_names_version_and_target() {
        let release = prebuilt_release("16.4.0", "x86_64-unknown-linux-gnu", "");
        assert_eq!(
            release.url,
            "https://github.com/theseus-rs/postgresql-binaries/releases/download/16.4.0/postgresql-16.4.0-x86_64-unknown-linux-gnu.tar.gz"
        );
        assert_eq!(release.version, "16.4.0");

        let proxied = prebuilt_release("16.4.0", "aarch64-apple-darwin", "https://ghproxy.example/");
        assert!(proxied.url.starts_with("https://ghproxy.example/https://github.com/"));
    }
}
