//! Streaming XML parser over gzip-compressed Discogs dump files.
//!
//! Architecture is the teacher's: a `quick_xml::Reader` over a
//! `flate2::read::GzDecoder`, a depth counter, and a stack of element frames
//! that accumulate attributes and children until the closing tag completes a
//! record. This version stops short of building `serde_json::Value` itself —
//! it emits a `RawElement` subtree and leaves canonicalization to
//! [`crate::normalize`].

use crate::error::ExtractorError;
use crate::normalize::{NormalizedValue, extract_id, hash_record, normalize};
use crate::types::{DataMessage, DataType};
use anyhow::Result;
use flate2::read::GzDecoder;
use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::Event;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A raw, order-preserving XML subtree. Children carry their insertion index
/// so repeated siblings keep document order even after normalization groups
/// them by tag name.
#[derive(Debug, Clone, Default)]
pub struct RawElement {
    pub attributes: Vec<(String, String)>,
    pub children: Vec<(String, usize, RawElement)>,
    pub text: String,
}

impl RawElement {
    fn add_child(&mut self, name: String, child: RawElement) {
        let order = self.children.len();
        self.children.push((name, order, child));
    }
}

pub struct XmlParser {
    data_type: DataType,
    sender: mpsc::Sender<DataMessage>,
}

impl XmlParser {
    pub fn new(data_type: DataType, sender: mpsc::Sender<DataMessage>) -> Self {
        Self { data_type, sender }
    }

    /// Parse the given gzip-compressed XML file, sending one `DataMessage`
    /// per completed record on the channel. Returns the number of records
    /// sent plus a summary of any structurally invalid records that were
    /// skipped rather than sent. Records already sent remain valid even if
    /// a later error aborts the stream.
    pub async fn parse_file(&self, path: &Path) -> Result<(u64, Vec<String>)> {
        let file = File::open(path)?;
        let decoder = GzDecoder::new(file);
        let buffered = BufReader::new(decoder);
        let mut reader = Reader::from_reader(buffered);
        reader.config_mut().trim_text(true);

        let target = self.data_type.element_name();
        let mut buf = Vec::new();
        let mut depth: usize = 0;
        let mut stack: Vec<RawElement> = Vec::new();
        let mut record_count: u64 = 0;
        let mut skipped: Vec<String> = Vec::new();
        let mut line: usize = 1;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Eof) => break,
                Ok(Event::Start(e)) => {
                    depth += 1;
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    if depth == 2 && name == target {
                        stack.clear();
                        stack.push(element_from_start(&e)?);
                    } else if !stack.is_empty() {
                        stack.push(element_from_start(&e)?);
                    }
                }
                Ok(Event::Empty(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    let element = element_from_start(&e)?;
                    if depth + 1 == 2 && name == target {
                        // self-closing record element with no children/text
                        match emit_record(&self.sender, &element, self.data_type).await {
                            Ok(()) => record_count += 1,
                            Err(ExtractorError::NormalizationError(msg)) => {
                                debug!(%msg, "skipping structurally invalid record");
                                skipped.push(msg);
                            }
                            Err(err) => return Err(err.into()),
                        }
                    } else if let Some(parent) = stack.last_mut() {
                        parent.add_child(name, element);
                    }
                }
                Ok(Event::Text(e)) => {
                    if let Some(top) = stack.last_mut() {
                        let decoded = e.decode().unwrap_or_default();
                        let text = unescape(&decoded).map(|s| s.into_owned()).unwrap_or_else(|_| decoded.into_owned());
                        line += text.matches('\n').count();
                        top.text.push_str(&text);
                    }
                }
                Ok(Event::CData(e)) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(e.as_ref()));
                    }
                }
                Ok(Event::End(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    if depth == 2 && name == target && !stack.is_empty() {
                        let element = stack.pop().unwrap();
                        match emit_record(&self.sender, &element, self.data_type).await {
                            Ok(()) => {
                                record_count += 1;
                                if record_count % 100_000 == 0 {
                                    debug!(count = record_count, "parsed records");
                                }
                            }
                            Err(ExtractorError::NormalizationError(msg)) => {
                                debug!(%msg, "skipping structurally invalid record");
                                skipped.push(msg);
                            }
                            Err(err) => return Err(err.into()),
                        }
                    } else if stack.len() >= 2 {
                        let finished = stack.pop().unwrap();
                        let parent = stack.last_mut().unwrap();
                        parent.add_child(name, finished);
                    } else if !stack.is_empty() {
                        // closing the in-progress record frame's own opening
                        // tag name mismatch would be a parser bug, not a data
                        // error; nothing to do here besides leave the frame.
                    }
                    depth = depth.saturating_sub(1);
                }
                Ok(_) => {}
                Err(err) => {
                    let column = reader.buffer_position() as usize;
                    return Err(ExtractorError::XmlParseError { line, column, message: err.to_string() }.into());
                }
            }
            buf.clear();
        }

        trace!(file = %path.display(), records = record_count, skipped = skipped.len(), "finished parsing file");
        Ok((record_count, skipped))
    }
}

fn element_from_start(e: &quick_xml::events::BytesStart) -> Result<RawElement> {
    let mut attributes = Vec::new();
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr.unescape_value().unwrap_or_default().to_string();
        attributes.push((key, value));
    }
    Ok(RawElement { attributes, children: Vec::new(), text: String::new() })
}

/// A record with neither an `@id` attribute, an `id` child, nor any content
/// at all is a structural violation, not just an id-less record: it's an
/// empty element where a populated record was expected. Everything else
/// (id-less but otherwise populated records) falls back to a synthesized id
/// instead of being rejected.
fn is_structurally_invalid(normalized: &NormalizedValue, id: &str) -> bool {
    id == "unknown" && matches!(normalized, NormalizedValue::Map(map) if map.is_empty())
}

/// Emit one record, or report a [`ExtractorError::NormalizationError`] for
/// the caller to skip-and-record rather than abort the whole file.
async fn emit_record(sender: &mpsc::Sender<DataMessage>, element: &RawElement, data_type: DataType) -> Result<(), ExtractorError> {
    let normalized = normalize(element);
    let id = extract_id(&normalized);

    if is_structurally_invalid(&normalized, &id) {
        return Err(ExtractorError::NormalizationError(format!("{} record has no id and no content", data_type)));
    }

    let id = if id == "unknown" { format!("{}-{}", data_type.as_str(), uuid_like()) } else { id };
    let hash = hash_record(&normalized);
    let message = DataMessage { kind: data_type, id, hash, payload: normalized.to_canonical_json() };
    sender
        .send(message)
        .await
        .map_err(|_| ExtractorError::BrokerProtocolError("record channel closed before file finished parsing".to_string()))
}

/// A cheap, dependency-free fallback identifier for the rare record missing
/// both `@id` and an `id` child. Not cryptographically unique, only unique
/// enough to avoid colliding within a single file's id-less records.
fn uuid_like() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    format!("{nanos:x}")
}
