use std::fs;
use std::io::Write as _;
use std::path::Path;

use futures_util::StreamExt as _;
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::progress::Reporter;

/// Stream `url` into `dest`, logging progress every 10 percent when the
/// server announces a length. The body goes to `<dest>.part` first so an
/// interrupted download is never mistaken for a cached one.
pub async fn download_file(client: &Client, url: &str, dest: &Path, reporter: &Reporter) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::io(e.to_string()))?;
    }

    let resp = client
        .get(url)
        .header("User-Agent", "odoo-launcher")
        .send()
        .await
        .map_err(|e| AppError::network_with_url(url, e.to_string()))?;

    if !resp.status().is_success() {
        return Err(AppError::network_with_url(url, resp.status().to_string()));
    }

    let total = resp.content_length().unwrap_or(0);
    let partial = dest.with_extension("part");
    let mut file = fs::File::create(&partial).map_err(|e| AppError::io(e.to_string()))?;
    let mut stream = resp.bytes_stream();
    let mut downloaded: u64 = 0;
    let mut last_decile = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AppError::network_with_url(url, e.to_string()))?;
        file.write_all(&chunk)
            .map_err(|e| AppError::io(e.to_string()))?;
        downloaded += chunk.len() as u64;

        if total > 0 {
            let decile = downloaded * 10 / total;
            if decile > last_decile {
                last_decile = decile;
                reporter.log(format!("  Downloaded {}%", decile * 10));
            }
        }
    }

    file.flush().map_err(|e| AppError::io(e.to_string()))?;
    drop(file);
    fs::rename(&partial, dest).map_err(|e| AppError::io(e.to_string()))?;
    Ok(())
}

/// Download `url` to `dest` unless `dest` already exists.
/// Returns `true` when the cached file was reused.
pub async fn download_cached(client: &Client, url: &str, dest: &Path, reporter: &Reporter) -> Result<bool> {
    if dest.is_file() {
        reporter.log(format!("Using cached archive: {}", dest.display()));
        return Ok(true);
    }
    reporter.log(format!("Downloading {}", url));
    download_file(client, url, dest, reporter).await?;
    reporter.log(format!("Download stored in cache: {}", dest.display()));
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cached_file_skips_network() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("pg.zip");
        fs::write(&dest, b"cached").unwrap();

        // Unroutable URL: reaching the network would fail the test.
        let reused = download_cached(&Client::new(), "http://127.0.0.1:1/pg.zip", &dest, &Reporter::silent())
            .await
            .unwrap();
        assert!(reused);
        assert_eq!(fs::read(&dest).unwrap(), b"cached");
    }
}
