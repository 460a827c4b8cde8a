use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    pub amqp_connection: String,
    pub discogs_root: PathBuf,
    pub periodic_check_days: u64,
    pub health_port: u16,
    pub max_workers: usize,
    pub batch_size: usize,
    pub flush_interval_secs: u64,
    pub queue_size: usize,
    pub progress_log_interval: usize,
    pub state_save_interval: usize,
    pub catalog_recent_years: usize,
    pub log_level: String,
    pub source_root: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            amqp_connection: "amqp://localhost:5672".to_string(),
            discogs_root: PathBuf::from("/discogs-data"),
            periodic_check_days: 15,
            health_port: 8000,
            max_workers: num_cpus::get(),
            batch_size: 100,
            flush_interval_secs: 1,
            queue_size: 5000,
            progress_log_interval: 1000,
            state_save_interval: 5000,
            catalog_recent_years: 2,
            log_level: "INFO".to_string(),
            source_root: "https://discogs-data-dumps.s3.us-west-2.amazonaws.com".to_string(),
        }
    }
}

impl ExtractorConfig {
    /// Load configuration from environment variables (drop-in replacement
    /// for the Python extractor this system grew alongside). `.env` is read
    /// first if present, silently absent in containers.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let amqp_connection = std::env::var("AMQP_CONNECTION").context("AMQP_CONNECTION environment variable is required")?;

        let discogs_root = PathBuf::from(std::env::var("DISCOGS_ROOT").unwrap_or_else(|_| "/discogs-data".to_string()));

        let periodic_check_days = std::env::var("PERIODIC_CHECK_DAYS").unwrap_or_else(|_| "15".to_string()).parse::<u64>().unwrap_or(15);

        let max_workers = std::env::var("MAX_WORKERS")
            .unwrap_or_else(|_| num_cpus::get().to_string())
            .parse::<usize>()
            .unwrap_or_else(|_| num_cpus::get());

        let batch_size = std::env::var("BATCH_SIZE").unwrap_or_else(|_| "100".to_string()).parse::<usize>().unwrap_or(100);

        let flush_interval_secs = std::env::var("FLUSH_INTERVAL_SECS").unwrap_or_else(|_| "1".to_string()).parse::<u64>().unwrap_or(1);

        let catalog_recent_years = std::env::var("CATALOG_RECENT_YEARS").unwrap_or_else(|_| "2".to_string()).parse::<usize>().unwrap_or(2);

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string());

        let health_port = std::env::var("HEALTH_PORT").unwrap_or_else(|_| "8000".to_string()).parse::<u16>().unwrap_or(8000);

        let source_root = std::env::var("SOURCE_ROOT")
            .unwrap_or_else(|_| "https://discogs-data-dumps.s3.us-west-2.amazonaws.com".to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            amqp_connection,
            discogs_root,
            periodic_check_days,
            max_workers,
            batch_size,
            flush_interval_secs,
            catalog_recent_years,
            log_level,
            health_port,
            source_root,
            ..Default::default()
        })
    }
}
