//! Source catalog: discovers published dump versions and file URLs.
//!
//! The upstream bucket no longer grants anonymous `ListBucket`, so instead
//! of an S3 `ListObjectsV2` call (see the superseded approach in
//! `rustextractor`/`rust-extractor` downloader variants) this scrapes the
//! public HTML index pages Discogs publishes per year.

use crate::error::ExtractorError;
use anyhow::{Context, Result};
use regex::Regex;
use reqwest::Client;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::types::CatalogEntry;

const LINK_PATTERN: &str = r"data/(\d{4})/(discogs_(\d{8})_(artists|labels|masters|releases)\.xml\.gz)";
const CHECKSUM_PATTERN: &str = r"data/(\d{4})/(discogs_(\d{8})_CHECKSUM\.txt)";
const REQUIRED_KINDS: [&str; 4] = ["artists", "labels", "masters", "releases"];

pub struct SourceCatalog {
    client: Client,
    recent_n: usize,
    source_root: String,
}

impl SourceCatalog {
    pub fn new(recent_n: usize, source_root: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent("discogs-extractor/0.1.0")
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("failed to build catalog HTTP client")?;
        Ok(Self { client, recent_n, source_root: source_root.trim_end_matches('/').to_string() })
    }

    fn index_url(&self) -> String {
        format!("{}/index.html", self.source_root)
    }

    fn year_page_url(&self, year: &str) -> String {
        format!("{}/index.html?prefix=data/{}/", self.source_root, year)
    }

    /// List every dump file published in the most recent `recent_n` years,
    /// grouped by version (the `YYYYMMDD` embedded in the filename) and
    /// filtered down to only versions that shipped the full four-kind set
    /// plus a checksum manifest. Returns entries sorted with the newest
    /// version first.
    pub async fn list_entries(&self) -> Result<Vec<CatalogEntry>> {
        let years = self.recent_years().await?;
        let mut entries = Vec::new();
        let mut checksum_versions = std::collections::HashSet::new();
        for year in years {
            let url = self.year_page_url(&year);
            match self.fetch_page(&url).await {
                Ok(body) => {
                    entries.extend(extract_entries(&body, &self.source_root)?);
                    checksum_versions.extend(extract_checksum_versions(&body));
                }
                Err(err) => warn!(year, error = %err, "failed to fetch catalog year page"),
            }
        }
        entries.sort_by(|a, b| b.version.cmp(&a.version));
        entries.dedup_by(|a, b| a.name == b.name);
        Ok(filter_complete_versions(entries, &checksum_versions))
    }

    /// Only the entries belonging to the single most recent version.
    pub async fn latest_version_entries(&self) -> Result<Vec<CatalogEntry>> {
        let entries = self.list_entries().await?;
        let Some(latest) = entries.first().map(|e| e.version.clone()) else {
            return Ok(Vec::new());
        };
        Ok(entries.into_iter().filter(|e| e.version == latest).collect())
    }

    async fn recent_years(&self) -> Result<Vec<String>> {
        let body = self.fetch_page(&self.index_url()).await?;
        let year_pattern = Regex::new(r"data/(\d{4})/").unwrap();
        let mut years: Vec<String> = year_pattern.captures_iter(&body).map(|c| c[1].to_string()).collect();
        years.sort();
        years.dedup();
        years.reverse();
        if years.is_empty() {
            return Err(ExtractorError::CatalogShapeError("no year prefixes found on index page".to_string()).into());
        }
        years.truncate(self.recent_n.max(1));
        Ok(years)
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ExtractorError::TransientFetchError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ExtractorError::TransientFetchError(format!("status {}", response.status())).into());
        }
        response.text().await.map_err(|e| ExtractorError::TransientFetchError(e.to_string()).into())
    }
}

fn extract_entries(body: &str, source_root: &str) -> Result<Vec<CatalogEntry>> {
    let pattern = Regex::new(LINK_PATTERN).unwrap();
    let mut entries = Vec::new();
    for caps in pattern.captures_iter(body) {
        let name = caps[2].to_string();
        let version = caps[3].to_string();
        let key = format!("data/{}/{}", &caps[1], name);
        let download_url = format!("{source_root}/{key}");
        entries.push(CatalogEntry { version, name, download_url });
    }
    debug!(count = entries.len(), "extracted catalog entries from page");
    Ok(entries)
}

fn extract_checksum_versions(body: &str) -> Vec<String> {
    let pattern = Regex::new(CHECKSUM_PATTERN).unwrap();
    pattern.captures_iter(body).map(|c| c[3].to_string()).collect()
}

/// Drop any version whose kind-set isn't exactly the four data kinds, or
/// that has no `CHECKSUM.txt` manifest: a dump published mid-upload (or
/// whose year page only partially scraped) is worse than no dump at all,
/// since downstream consumers expect a complete snapshot per version.
fn filter_complete_versions(entries: Vec<CatalogEntry>, checksum_versions: &std::collections::HashSet<String>) -> Vec<CatalogEntry> {
    let mut by_version: BTreeMap<String, Vec<CatalogEntry>> = BTreeMap::new();
    for entry in entries {
        by_version.entry(entry.version.clone()).or_default().push(entry);
    }

    let mut result = Vec::new();
    for (version, group) in by_version {
        let kinds: std::collections::HashSet<&str> = group.iter().filter_map(|e| data_kind(&e.name)).collect();
        let has_all_kinds = REQUIRED_KINDS.iter().all(|k| kinds.contains(k));
        let has_checksum = checksum_versions.contains(&version);
        if has_all_kinds && has_checksum {
            result.extend(group);
        } else {
            warn!(version, has_all_kinds, has_checksum, "dropping incomplete catalog version");
        }
    }
    result.sort_by(|a, b| b.version.cmp(&a.version));
    result
}

fn data_kind(name: &str) -> Option<&'static str> {
    REQUIRED_KINDS.into_iter().find(|kind| name.contains(&format!("_{kind}.")))
}
