use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported data types from Discogs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Artists,
    Labels,
    Masters,
    Releases,
}

impl DataType {
    /// Get all data types
    #[allow(dead_code)]
    pub fn all() -> Vec<DataType> {
        vec![DataType::Artists, DataType::Labels, DataType::Masters, DataType::Releases]
    }

    /// Get the string representation for file names
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Artists => "artists",
            DataType::Labels => "labels",
            DataType::Masters => "masters",
            DataType::Releases => "releases",
        }
    }

    /// The singular XML element name this data type's records are nested under.
    pub fn element_name(&self) -> &'static str {
        match self {
            DataType::Artists => "artist",
            DataType::Labels => "label",
            DataType::Masters => "master",
            DataType::Releases => "release",
        }
    }

    /// Get the AMQP routing key
    pub fn routing_key(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "artists" => Ok(DataType::Artists),
            "labels" => Ok(DataType::Labels),
            "masters" => Ok(DataType::Masters),
            "releases" => Ok(DataType::Releases),
            _ => Err(format!("Unknown data type: {}", s)),
        }
    }
}

/// Progress tracking for extraction
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtractionProgress {
    pub artists: u64,
    pub labels: u64,
    pub masters: u64,
    pub releases: u64,
}

impl ExtractionProgress {
    pub fn increment(&mut self, data_type: DataType) {
        match data_type {
            DataType::Artists => self.artists += 1,
            DataType::Labels => self.labels += 1,
            DataType::Masters => self.masters += 1,
            DataType::Releases => self.releases += 1,
        }
    }

    #[allow(dead_code)]
    pub fn get(&self, data_type: DataType) -> u64 {
        match data_type {
            DataType::Artists => self.artists,
            DataType::Labels => self.labels,
            DataType::Masters => self.masters,
            DataType::Releases => self.releases,
        }
    }

    pub fn total(&self) -> u64 {
        self.artists + self.labels + self.masters + self.releases
    }
}

/// Message types for AMQP. Untagged: a data message and a sentinel carry
/// disjoint required fields (`id`/`hash`/`payload` vs. `file_complete`/
/// `count`), so there's no ambiguity deserializing without a discriminator,
/// and the wire body stays exactly what downstream consumers expect —
/// `kind` plus the message's own fields, nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Data(DataMessage),
    FileComplete(FileCompleteMessage),
}

/// Data message containing a normalized record and its content hash.
///
/// `id` is always a string: Discogs ids are numeric in the source XML but
/// the wire contract canonicalizes them to strings so downstream consumers
/// never have to special-case an `@id` attribute vs. an `id` child element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataMessage {
    pub kind: DataType,
    pub id: String,
    pub hash: String,
    pub payload: serde_json::Value,
}

/// Sentinel published once every record in a file has been published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCompleteMessage {
    pub kind: DataType,
    pub file_complete: bool,
    pub count: u64,
}

/// A `(version, filename)` entry discovered on the source catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub version: String,
    pub name: String,
    pub download_url: String,
}

/// Local file information persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalFileInfo {
    pub path: String,
    pub checksum: String,
    pub version: String,
    pub size: u64,
}
