//! Discovery of the Odoo release branches available upstream.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::command::tool_command;
use crate::config::{wrap_with_proxy, LauncherConfig};
use crate::error::{AppError, Result};
use crate::paths::Paths;

const GITHUB_BRANCHES_API: &str = "https://api.github.com/repos/odoo/odoo/branches?per_page=100";
const LS_REMOTE_TIMEOUT: Duration = Duration::from_secs(15);
const CACHE_TTL_SECS: i64 = 24 * 60 * 60;
const STATIC_VERSIONS: [&str; 4] = ["18.0", "17.0", "16.0", "15.0"];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionCache {
    timestamp: i64,
    versions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubBranch {
    name: String,
}

#[allow(clippy::expect_used)]
fn release_branch_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{2}\.0$").expect("valid release branch regex"))
}

/// Keep `NN.0` names, deduplicated, newest first.
pub fn filter_release_versions<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let unique: BTreeSet<String> = names
        .into_iter()
        .map(|name| name.as_ref().trim().to_string())
        .filter(|name| release_branch_re().is_match(name))
        .collect();
    let mut versions: Vec<String> = unique.into_iter().collect();
    versions.sort_by_key(|v| std::cmp::Reverse(major_of(v)));
    versions
}

fn major_of(version: &str) -> u32 {
    version
        .split('.')
        .next()
        .and_then(|major| major.parse().ok())
        .unwrap_or(0)
}

/// Extract release versions from `git ls-remote --heads` output.
pub fn parse_ls_remote(output: &str) -> Vec<String> {
    filter_release_versions(output.lines().filter_map(|line| {
        line.split_whitespace()
            .nth(1)
            .and_then(|reference| reference.strip_prefix("refs/heads/"))
    }))
}

async fn versions_from_git(config: &LauncherConfig) -> Result<Vec<String>> {
    let mut cmd = tool_command(&config.git);
    cmd.args(["ls-remote", "--heads"]).arg(config.repo_url());

    let output = tokio::time::timeout(LS_REMOTE_TIMEOUT, cmd.output())
        .await
        .map_err(|_| AppError::network("git ls-remote timed out"))?
        .map_err(|e| AppError::process(format!("Failed to run git ls-remote: {}", e)))?;

    if !output.status.success() {
        return Err(AppError::network(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(parse_ls_remote(&String::from_utf8_lossy(&output.stdout)))
}

async fn versions_from_api(client: &Client, config: &LauncherConfig) -> Result<Vec<String>> {
    let url = wrap_with_proxy(&config.github_proxy, GITHUB_BRANCHES_API);
    let resp = client
        .get(&url)
        .header("User-Agent", "odoo-launcher")
        .header("Accept", "application/vnd.github.v3+json")
        .send()
        .await
        .map_err(|e| AppError::network_with_url(&url, e.to_string()))?;

    if !resp.status().is_success() {
        return Err(AppError::network_with_url(&url, resp.status().to_string()));
    }

    let branches = resp.json::<Vec<GitHubBranch>>().await?;
    Ok(filter_release_versions(branches.iter().map(|b| b.name.as_str())))
}

/// Query upstream: `git ls-remote`, then the GitHub API, then a static list.
pub async fn fetch_versions(client: &Client, config: &LauncherConfig) -> Vec<String> {
    match versions_from_git(config).await {
        Ok(versions) if !versions.is_empty() => {
            log::info!("Detected versions via git: {:?}", versions);
            return versions;
        }
        Ok(_) => log::warn!("git ls-remote returned no release branches"),
        Err(e) => log::warn!("Could not use git ls-remote: {}", e),
    }

    match versions_from_api(client, config).await {
        Ok(versions) if !versions.is_empty() => {
            log::info!("Detected versions via GitHub API: {:?}", versions);
            versions
        }
        Ok(_) => {
            log::warn!("GitHub API returned no release branches, using built-in list");
            STATIC_VERSIONS.iter().map(|v| v.to_string()).collect()
        }
        Err(e) => {
            log::error!("Error querying the GitHub API: {}", e);
            STATIC_VERSIONS.iter().map(|v| v.to_string()).collect()
        }
    }
}

/// Cached versions if the cache is younger than 24 hours.
pub fn read_cached_versions(cache_path: &Path, now: i64) -> Option<Vec<String>> {
    let content = fs::read_to_string(cache_path).ok()?;
    let cache: VersionCache = serde_json::from_str(&content).ok()?;
    let age = now - cache.timestamp;
    if (0..CACHE_TTL_SECS).contains(&age) && !cache.versions.is_empty() {
        Some(cache.versions)
    } else {
        None
    }
}

pub fn write_cached_versions(cache_path: &Path, versions: &[String], now: i64) -> Result<()> {
    let cache = VersionCache {
        timestamp: now,
        versions: versions.to_vec(),
    };
    fs::write(cache_path, serde_json::to_string_pretty(&cache)?)
        .map_err(|e| AppError::io(format!("Failed to write {:?}: {}", cache_path, e)))
}

/// Available Odoo versions, served from `versions.json` when fresh.
pub async fn available_versions(
    client: &Client,
    paths: &Paths,
    config: &LauncherConfig,
    refresh: bool,
) -> Vec<String> {
    let cache_path = paths.version_cache_path();
    let now = chrono::Utc::now().timestamp();

    if !refresh {
        if let Some(versions) = read_cached_versions(&cache_path, now) {
            return versions;
        }
    }

    let versions = fetch_versions(client, config).await;
    if let Err(e) = write_cached_versions(&cache_path, &versions, now) {
        log::warn!("Failed to cache version list: {}", e);
    }
    versions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ls_remote_output_is_filtered_and_sorted() {
        let output = "\
abc\trefs/heads/master
def\trefs/heads/9.0
123\trefs/heads/16.0
456\trefs/heads/saas-17.2
789\trefs/heads/17.0
aaa\trefs/heads/17.0
bbb\trefs/heads/18.0
";
        assert_eq!(parse_ls_remote(output), vec!["18.0", "17.0", "16.0"]);
    }

    #[test]
    fn sort_is_numeric_not_lexicographic() {
        let versions = filter_release_versions(["10.0", "99.0", "11.0"]);
        assert_eq!(versions, vec!["99.0", "11.0", "10.0"]);
    }

    #[test]
    fn cache_is_honoured_for_a_day() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("versions.json");
        let versions = vec!["18.0".to_string(), "17.0".to_string()];
        write_cached_versions(&path, &versions, 1_000).unwrap();

        assert_eq!(read_cached_versions(&path, 1_000 + 3_600), Some(versions));
        assert_eq!(read_cached_versions(&path, 1_000 + CACHE_TTL_SECS), None);
    }

    #[test]
    fn corrupt_cache_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("versions.json");
        fs::write(&path, "not json").unwrap();
        assert_eq!(read_cached_versions(&path, 0), None);
    }
}
