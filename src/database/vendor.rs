use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;

use crate::error::{AppError, Result};

pub(super) const VENDOR_PAGE: &str = "https://www.enterprisedb.com/download-postgresql-binaries";

/// Known-good Windows x86-64 build used when the vendor page is unusable.
pub const FALLBACK_URL: &str = "https://sbp.enterprisedb.com/getfile.jsp?fileid=1259780";
pub const FALLBACK_VERSION: &str = "18.0";

const VENDOR_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorRelease {
    pub url: String,
    pub version: String,
}

impl VendorRelease {
    fn fallback() -> Self {
        Self {
            url: FALLBACK_URL.to_string(),
            version: FALLBACK_VERSION.to_string(),
        }
    }
}

#[allow(clippy::expect_used)]
fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"https://sbp\.enterprisedb\.com/getfile\.jsp\?fileid=\d+").expect("valid link regex")
    })
}

#[allow(clippy::expect_used)]
fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)postgresql\s+(\d{2}(?:\.\d+)?)").expect("valid version regex")
    })
}

/// First binary download link on the vendor page, labelled with the
/// closest preceding "PostgreSQL NN.N" heading.
///
/// The page lists the newest release first, Windows x86-64 builds before
/// the other platforms. `None` when no link is present.
pub fn parse_vendor_page(html: &str) -> Option<VendorRelease> {
    let windows_section = html.find("Windows x86-64").unwrap_or(0);
    let link = link_re()
        .find_at(html, windows_section)
        .or_else(|| link_re().find(html))?;

    let version = version_re()
        .captures_iter(&html[..link.start()])
        .last()
        .and_then(|caps| caps.get(1))
        .map_or_else(|| FALLBACK_VERSION.to_string(), |m| m.as_str().to_string());

    Some(VendorRelease {
        url: link.as_str().to_string(),
        version,
    })
}

async fn fetch_vendor_page(client: &Client) -> Result<String> {
    let resp = client
        .get(VENDOR_PAGE)
        .header("User-Agent", "odoo-launcher")
        .timeout(VENDOR_TIMEOUT)
        .send()
        .await
        .map_err(|e| AppError::network_with_url(VENDOR_PAGE, e.to_string()))?;
    if !resp.status().is_success() {
        return Err(AppError::network_with_url(VENDOR_PAGE, resp.status().to_string()));
    }
    Ok(resp.text().await?)
}

/// Resolve the portable build to download, never failing.
pub(super) async fn resolve_vendor_release(client: &Client) -> VendorRelease {
    match fetch_vendor_page(client).await {
        Ok(html) => parse_vendor_page(&html).unwrap_or_else(|| {
            log::warn!("No download links on the vendor page, using fallback build");
            VendorRelease::fallback()
        }),
        Err(e) => {
            log::warn!(
                "Vendor lookup failed, using fallback PostgreSQL {}: {}",
                FALLBACK_VERSION,
                e
            );
            VendorRelease::fallback()
        }
    }
}
