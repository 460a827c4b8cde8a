//! Per-version state marker tracking download/processing/publishing phases
//! across restarts.
//!
//! Grounded on the pack's `rustextractor/src/state_marker.rs`: every
//! operation there is kept. Two gaps are closed: `save` now writes to a
//! temp file and renames into place so a crash mid-write can never leave a
//! torn JSON file on disk, and `load` treats a parse failure as "no marker"
//! (a fresh start) rather than propagating the corruption as a fatal error.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileDownloadStatus {
    pub status: PhaseStatus,
    pub bytes_downloaded: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DownloadPhase {
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub files_downloaded: u64,
    pub files_total: u64,
    pub bytes_downloaded: u64,
    pub downloads_by_file: HashMap<String, FileDownloadStatus>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileProcessingStatus {
    pub status: PhaseStatus,
    pub records_extracted: u64,
    pub messages_published: u64,
    pub batches_sent: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProcessingPhase {
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub files_processed: u64,
    pub files_total: u64,
    pub records_extracted: u64,
    pub current_file: Option<String>,
    pub progress_by_file: HashMap<String, FileProcessingStatus>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PublishingPhase {
    pub status: PhaseStatus,
    pub messages_published: u64,
    pub batches_sent: u64,
    pub errors: Vec<String>,
    pub last_amqp_heartbeat: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtractionSummary {
    pub overall_status: PhaseStatus,
    pub total_duration_seconds: Option<f64>,
    pub files_by_type: HashMap<String, PhaseStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMarker {
    pub metadata_version: String,
    pub last_updated: DateTime<Utc>,
    pub current_version: String,
    pub download_phase: DownloadPhase,
    pub processing_phase: ProcessingPhase,
    pub publishing_phase: PublishingPhase,
    pub summary: ExtractionSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingDecision {
    Reprocess,
    Continue,
    Skip,
}

impl StateMarker {
    pub fn new(version: &str) -> Self {
        Self {
            metadata_version: "1".to_string(),
            last_updated: Utc::now(),
            current_version: version.to_string(),
            download_phase: DownloadPhase::default(),
            processing_phase: ProcessingPhase::default(),
            publishing_phase: PublishingPhase::default(),
            summary: ExtractionSummary::default(),
        }
    }

    pub fn file_path(discogs_root: &Path, version: &str) -> PathBuf {
        discogs_root.join(format!(".extraction_status_{version}.json"))
    }

    /// Load a marker from disk. Returns `Ok(None)` both when the file is
    /// absent and when it fails to parse — a corrupted marker is treated as
    /// a fresh start rather than a fatal error, per the state marker
    /// corruption handling policy.
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = tokio::fs::read_to_string(path).await.context("failed to read state marker file")?;
        match serde_json::from_str(&contents) {
            Ok(marker) => Ok(Some(marker)),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "state marker corrupted, starting fresh");
                Ok(None)
            }
        }
    }

    /// Write atomically: serialize to a sibling temp file, then rename into
    /// place. A crash between the write and the rename leaves the previous
    /// marker (or nothing) on disk, never a half-written one.
    pub async fn save(&mut self, path: &Path) -> Result<()> {
        self.last_updated = Utc::now();
        let json = serde_json::to_string_pretty(self).context("failed to serialize state marker")?;
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
        let tmp_path = path.with_extension(format!("tmp-{}-{nanos:x}", std::process::id()));
        tokio::fs::write(&tmp_path, json).await.context("failed to write state marker temp file")?;
        tokio::fs::rename(&tmp_path, path).await.context("failed to rename state marker into place")?;
        Ok(())
    }

    pub fn should_process(&self) -> ProcessingDecision {
        if self.download_phase.status == PhaseStatus::Failed {
            return ProcessingDecision::Reprocess;
        }
        if self.processing_phase.status == PhaseStatus::Failed || self.processing_phase.status == PhaseStatus::InProgress {
            return ProcessingDecision::Continue;
        }
        if self.summary.overall_status == PhaseStatus::Completed {
            return ProcessingDecision::Skip;
        }
        ProcessingDecision::Continue
    }

    pub fn start_download(&mut self, files_total: u64) {
        self.download_phase.status = PhaseStatus::InProgress;
        self.download_phase.started_at = Some(Utc::now());
        self.download_phase.files_total = files_total;
    }

    pub fn start_file_download(&mut self, file: &str) {
        let entry = self.download_phase.downloads_by_file.entry(file.to_string()).or_default();
        entry.status = PhaseStatus::InProgress;
        entry.started_at = Some(Utc::now());
    }

    pub fn file_downloaded(&mut self, file: &str, bytes: u64) {
        let entry = self.download_phase.downloads_by_file.entry(file.to_string()).or_default();
        entry.status = PhaseStatus::Completed;
        entry.bytes_downloaded = bytes;
        entry.completed_at = Some(Utc::now());
        self.download_phase.files_downloaded = self.download_phase.downloads_by_file.values().filter(|f| f.status == PhaseStatus::Completed).count() as u64;
        self.download_phase.bytes_downloaded = self.download_phase.downloads_by_file.values().map(|f| f.bytes_downloaded).sum();
    }

    pub fn complete_download(&mut self) {
        self.download_phase.status = PhaseStatus::Completed;
        self.download_phase.completed_at = Some(Utc::now());
    }

    pub fn fail_download(&mut self, error: &str) {
        self.download_phase.status = PhaseStatus::Failed;
        self.download_phase.errors.push(error.to_string());
    }

    pub fn start_processing(&mut self, files_total: u64) {
        self.processing_phase.status = PhaseStatus::InProgress;
        self.processing_phase.started_at = Some(Utc::now());
        self.processing_phase.files_total = files_total;
        self.summary.overall_status = PhaseStatus::InProgress;
    }

    pub fn start_file_processing(&mut self, file: &str, data_type: &str) {
        self.processing_phase.current_file = Some(file.to_string());
        let entry = self.processing_phase.progress_by_file.entry(file.to_string()).or_default();
        entry.status = PhaseStatus::InProgress;
        entry.started_at = Some(Utc::now());
        self.summary.files_by_type.insert(data_type.to_string(), PhaseStatus::InProgress);
    }

    pub fn update_file_progress(&mut self, file: &str, records: u64, messages: u64, batches: u64) {
        if let Some(entry) = self.processing_phase.progress_by_file.get_mut(file) {
            entry.records_extracted = records;
            entry.messages_published = messages;
            entry.batches_sent = batches;
        }
        self.resum();
    }

    pub fn complete_file_processing(&mut self, file: &str, data_type: &str) {
        if let Some(entry) = self.processing_phase.progress_by_file.get_mut(file) {
            entry.status = PhaseStatus::Completed;
            entry.completed_at = Some(Utc::now());
        }
        self.processing_phase.files_processed =
            self.processing_phase.progress_by_file.values().filter(|f| f.status == PhaseStatus::Completed).count() as u64;
        self.summary.files_by_type.insert(data_type.to_string(), PhaseStatus::Completed);
        self.resum();
    }

    fn resum(&mut self) {
        self.processing_phase.records_extracted = self.processing_phase.progress_by_file.values().map(|f| f.records_extracted).sum();
        self.publishing_phase.messages_published = self.processing_phase.progress_by_file.values().map(|f| f.messages_published).sum();
        self.publishing_phase.batches_sent = self.processing_phase.progress_by_file.values().map(|f| f.batches_sent).sum();
    }

    pub fn complete_processing(&mut self) {
        self.processing_phase.status = PhaseStatus::Completed;
        self.processing_phase.completed_at = Some(Utc::now());
        self.processing_phase.current_file = None;
    }

    pub fn fail_processing(&mut self, error: &str) {
        self.processing_phase.status = PhaseStatus::Failed;
        self.processing_phase.errors.push(error.to_string());
    }

    /// Record a skipped record without failing the phase. Used for
    /// structurally invalid records that are dropped rather than aborting
    /// the whole file.
    pub fn record_processing_warning(&mut self, error: &str) {
        self.processing_phase.errors.push(error.to_string());
    }

    #[allow(dead_code)]
    pub fn update_publishing(&mut self) {
        self.publishing_phase.last_amqp_heartbeat = Some(Utc::now());
    }

    pub fn fail_publishing(&mut self, error: &str) {
        self.publishing_phase.status = PhaseStatus::Failed;
        self.publishing_phase.errors.push(error.to_string());
    }

    pub fn complete_extraction(&mut self) {
        self.publishing_phase.status = PhaseStatus::Completed;
        self.summary.overall_status = PhaseStatus::Completed;
        if let (Some(start), Some(end)) = (self.download_phase.started_at, self.processing_phase.completed_at) {
            self.summary.total_duration_seconds = Some((end - start).num_milliseconds() as f64 / 1000.0);
        }
    }

    /// Files from `all_files` whose processing status isn't `Completed`.
    pub fn pending_files(&self, all_files: &[String]) -> Vec<String> {
        all_files
            .iter()
            .filter(|f| self.processing_phase.progress_by_file.get(*f).map(|p| p.status != PhaseStatus::Completed).unwrap_or(true))
            .cloned()
            .collect()
    }
}
