//! Streams catalog entries to disk with checksum validation and resumable
//! skip-if-already-valid semantics.
//!
//! Adapted from the teacher's S3-based downloader
//! (`extractor/src/extractor.rs`'s `Downloader::list_s3_files`/
//! `get_latest_monthly_files`) and the `reqwest`-streaming variant in the
//! pack (`rust-extractor/src/downloader.rs`): stream response bytes straight
//! to a file while hashing incrementally, then compare against the
//! version's checksum manifest once the stream completes.

use crate::error::ExtractorError;
use crate::types::{CatalogEntry, LocalFileInfo};
use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{info, warn};

const IDLE_READ_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_ATTEMPTS: u32 = 5;

pub struct Downloader {
    client: Client,
    output_directory: PathBuf,
    metadata: HashMap<String, LocalFileInfo>,
}

impl Downloader {
    pub fn new(output_directory: PathBuf) -> Result<Self> {
        let client = Client::builder()
            .user_agent("discogs-extractor/0.1.0")
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("failed to create downloader HTTP client")?;
        let metadata = load_metadata(&output_directory)?;
        Ok(Self { client, output_directory, metadata })
    }

    /// Fetch the version's `CHECKSUM.txt` manifest and parse it into a
    /// `filename -> hex digest` map. Format is `<hex-hash>  <filename>` per
    /// line, matching sha256sum's own output convention.
    pub async fn fetch_checksum_manifest(&self, checksum_url: &str) -> Result<HashMap<String, String>> {
        let response = self.client.get(checksum_url).send().await.map_err(|e| ExtractorError::TransientFetchError(e.to_string()))?;
        let text = response.text().await.map_err(|e| ExtractorError::TransientFetchError(e.to_string()))?;
        Ok(parse_checksum_manifest(&text))
    }

    /// Download one catalog entry to `{output_directory}/{name}`, retrying
    /// transient failures with exponential backoff and verifying the result
    /// against `expected_checksum` when provided. A file already on disk
    /// whose checksum matches is skipped entirely.
    pub async fn download_entry(&mut self, entry: &CatalogEntry, expected_checksum: Option<&str>) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_directory).await.context("failed to create data root directory")?;
        let local_path = self.output_directory.join(&entry.name);

        if local_path.exists() {
            if let Some(expected) = expected_checksum {
                let actual = calculate_file_checksum(&local_path).await?;
                if actual == expected {
                    info!(file = %entry.name, "already downloaded and checksum-valid, skipping");
                    return Ok(local_path);
                }
                warn!(file = %entry.name, "on-disk checksum stale, re-downloading");
            } else {
                return Ok(local_path);
            }
        }

        let mut last_err = None;
        let mut checksum_retry_used = false;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.try_download(entry, &local_path, expected_checksum).await {
                Ok(()) => return Ok(local_path),
                Err(err) if is_checksum_mismatch(&err) => {
                    if checksum_retry_used {
                        warn!(file = %entry.name, error = %err, "checksum mismatch again after retry, giving up");
                        return Err(err);
                    }
                    checksum_retry_used = true;
                    warn!(file = %entry.name, error = %err, "checksum mismatch, retrying once");
                    last_err = Some(err);
                }
                Err(err) if attempt < MAX_ATTEMPTS && is_retryable(&err) => {
                    let backoff = Duration::from_secs(2u64.saturating_pow(attempt));
                    warn!(file = %entry.name, attempt, error = %err, "download attempt failed, retrying");
                    tokio::time::sleep(backoff).await;
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| ExtractorError::TransientFetchError("exhausted retries".to_string()).into()))
    }

    async fn try_download(&mut self, entry: &CatalogEntry, local_path: &Path, expected_checksum: Option<&str>) -> Result<()> {
        info!(file = %entry.name, url = %entry.download_url, "downloading");
        let response = self
            .client
            .get(&entry.download_url)
            .send()
            .await
            .map_err(|e| ExtractorError::TransientFetchError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ExtractorError::TransientFetchError(format!("status {}", response.status())).into());
        }

        let mut stream = response.bytes_stream();
        let mut file = File::create(local_path).await.context("failed to create local file")?;
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;

        loop {
            let next = timeout(IDLE_READ_TIMEOUT, stream.next()).await;
            let chunk = match next {
                Ok(Some(chunk)) => chunk.map_err(|e| ExtractorError::TransientFetchError(e.to_string()))?,
                Ok(None) => break,
                Err(_) => return Err(ExtractorError::TransientFetchError("idle read timeout".to_string()).into()),
            };
            hasher.update(&chunk);
            file.write_all(&chunk).await.context("failed to write chunk")?;
            downloaded += chunk.len() as u64;
        }
        file.flush().await.context("failed to flush downloaded file")?;

        let checksum = hex::encode(hasher.finalize());
        if let Some(expected) = expected_checksum {
            if checksum != expected {
                let _ = fs::remove_file(local_path).await;
                return Err(ExtractorError::ChecksumMismatch { file: entry.name.clone(), expected: expected.to_string(), actual: checksum }.into());
            }
        }

        self.metadata.insert(
            entry.name.clone(),
            LocalFileInfo { path: local_path.to_string_lossy().to_string(), checksum, version: entry.version.clone(), size: downloaded },
        );
        self.save_metadata()?;
        Ok(())
    }

    fn save_metadata(&self) -> Result<()> {
        let metadata_file = self.output_directory.join(".discogs_metadata.json");
        let json = serde_json::to_string_pretty(&self.metadata).context("failed to serialize downloader metadata")?;
        std::fs::write(metadata_file, json).context("failed to persist downloader metadata")?;
        Ok(())
    }
}

fn is_retryable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ExtractorError>().map(ExtractorError::is_retryable).unwrap_or(false)
}

/// Checksum mismatches aren't in `ExtractorError::is_retryable`'s general
/// backoff policy (a stale URL isn't going to start matching on its own),
/// but a single corrupted download is common enough over a multi-gigabyte
/// file to deserve its own one-shot retry before giving up.
fn is_checksum_mismatch(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ExtractorError>().is_some_and(|e| matches!(e, ExtractorError::ChecksumMismatch { .. }))
}

fn load_metadata(output_directory: &Path) -> Result<HashMap<String, LocalFileInfo>> {
    let metadata_file = output_directory.join(".discogs_metadata.json");
    if !metadata_file.exists() {
        return Ok(HashMap::new());
    }
    let json = std::fs::read_to_string(metadata_file).context("failed to read downloader metadata")?;
    Ok(serde_json::from_str(&json).unwrap_or_default())
}

async fn calculate_file_checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path).await.context("failed to open file for checksum")?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let n = tokio::io::AsyncReadExt::read(&mut file, &mut buffer).await.context("failed to read file for checksum")?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn parse_checksum_manifest(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        if let (Some(hash), Some(name)) = (parts.next(), parts.next()) {
            map.insert(name.to_string(), hash.to_string());
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_checksum_manifest() {
        let text = "abc123  discogs_20241201_artists.xml.gz\ndef456  discogs_20241201_labels.xml.gz\n";
        let manifest = parse_checksum_manifest(text);
        assert_eq!(manifest.get("discogs_20241201_artists.xml.gz"), Some(&"abc123".to_string()));
        assert_eq!(manifest.len(), 2);
    }

    #[test]
    fn test_parse_checksum_manifest_ignores_blank_lines() {
        let text = "abc123  a.xml.gz\n\n\ndef456  b.xml.gz\n";
        assert_eq!(parse_checksum_manifest(text).len(), 2);
    }

    #[tokio::test]
    async fn test_download_entry_skips_when_no_expected_checksum_and_file_present() {
        let dir = tempdir().unwrap();
        let existing = dir.path().join("discogs_20241201_artists.xml.gz");
        tokio::fs::write(&existing, b"stub").await.unwrap();

        let mut downloader = Downloader::new(dir.path().to_path_buf()).unwrap();
        let entry = CatalogEntry {
            version: "20241201".to_string(),
            name: "discogs_20241201_artists.xml.gz".to_string(),
            download_url: "http://unused.invalid/file".to_string(),
        };
        let path = downloader.download_entry(&entry, None).await.unwrap();
        assert_eq!(path, existing);
    }

    #[tokio::test]
    async fn test_download_entry_streams_and_validates_checksum() {
        let mut server = mockito::Server::new_async().await;
        let body = b"hello discogs";
        let expected = hex::encode(Sha256::digest(body));
        let mock = server.mock("GET", "/discogs_20241201_labels.xml.gz").with_status(200).with_body(body).create_async().await;

        let dir = tempdir().unwrap();
        let mut downloader = Downloader::new(dir.path().to_path_buf()).unwrap();
        let entry = CatalogEntry {
            version: "20241201".to_string(),
            name: "discogs_20241201_labels.xml.gz".to_string(),
            download_url: format!("{}/discogs_20241201_labels.xml.gz", server.url()),
        };
        let path = downloader.download_entry(&entry, Some(&expected)).await.unwrap();
        let contents = tokio::fs::read(&path).await.unwrap();
        assert_eq!(contents, body);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_download_entry_checksum_mismatch_retries_once_then_fails() {
        let mut server = mockito::Server::new_async().await;
        // Both attempts serve the same wrong bytes, so the retry still
        // mismatches and download_entry gives up after exactly one retry.
        let mock = server
            .mock("GET", "/discogs_20241201_masters.xml.gz")
            .with_status(200)
            .with_body(b"wrong bytes")
            .expect(2)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let mut downloader = Downloader::new(dir.path().to_path_buf()).unwrap();
        let entry = CatalogEntry {
            version: "20241201".to_string(),
            name: "discogs_20241201_masters.xml.gz".to_string(),
            download_url: format!("{}/discogs_20241201_masters.xml.gz", server.url()),
        };
        let result = downloader.download_entry(&entry, Some("deadbeef")).await;
        assert!(result.is_err());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_download_entry_checksum_mismatch_succeeds_on_retry() {
        let mut server = mockito::Server::new_async().await;
        let good_body = b"correct bytes".to_vec();
        let expected = hex::encode(Sha256::digest(&good_body));

        // First response mismatches, second (the one-shot retry) is correct.
        let call_count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mock = server
            .mock("GET", "/discogs_20241201_releases.xml.gz")
            .with_status(200)
            .with_body_from_request(move |_req| {
                if call_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 { b"wrong bytes".to_vec() } else { good_body.clone() }
            })
            .expect(2)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let mut downloader = Downloader::new(dir.path().to_path_buf()).unwrap();
        let entry = CatalogEntry {
            version: "20241201".to_string(),
            name: "discogs_20241201_releases.xml.gz".to_string(),
            download_url: format!("{}/discogs_20241201_releases.xml.gz", server.url()),
        };

        let result = downloader.download_entry(&entry, Some(&expected)).await;
        assert!(result.is_ok());
        mock.assert_async().await;
    }
}
