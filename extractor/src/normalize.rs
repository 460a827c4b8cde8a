//! Canonicalization and content hashing for parsed records.
//!
//! The teacher crate hashes the serializer's own key order
//! (`serde_json::to_string` on a freshly-built `Value`), which only happens
//! to be stable because of a cargo feature flag (`preserve_order`) nobody
//! pins explicitly. This module makes the ordering an explicit property of
//! the type instead of an accident of `serde_json`'s internal map.

use crate::parser::RawElement;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A value with a canonical, deterministic ordering: object keys are always
/// visited in lexicographic order regardless of how they were inserted.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedValue {
    #[allow(dead_code)]
    Null,
    Scalar(String),
    List(Vec<NormalizedValue>),
    Map(BTreeMap<String, NormalizedValue>),
}

impl NormalizedValue {
    /// Render canonically: objects sorted by key, arrays kept in source
    /// order (order is meaningful for repeated XML children), scalars
    /// rendered as their raw text.
    pub fn to_canonical_json(&self) -> Value {
        match self {
            NormalizedValue::Null => Value::Null,
            NormalizedValue::Scalar(s) => Value::String(s.clone()),
            NormalizedValue::List(items) => Value::Array(items.iter().map(Self::to_canonical_json).collect()),
            NormalizedValue::Map(map) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in map {
                    obj.insert(k.clone(), v.to_canonical_json());
                }
                Value::Object(obj)
            }
        }
    }

    fn canonical_string(&self) -> String {
        fn write(value: &NormalizedValue, out: &mut String) {
            match value {
                NormalizedValue::Null => out.push_str("null"),
                NormalizedValue::Scalar(s) => {
                    out.push('"');
                    out.push_str(&s.replace('\\', "\\\\").replace('"', "\\\""));
                    out.push('"');
                }
                NormalizedValue::List(items) => {
                    out.push('[');
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            out.push(',');
                        }
                        write(item, out);
                    }
                    out.push(']');
                }
                NormalizedValue::Map(map) => {
                    out.push('{');
                    for (i, (k, v)) in map.iter().enumerate() {
                        if i > 0 {
                            out.push(',');
                        }
                        out.push('"');
                        out.push_str(&k.replace('\\', "\\\\").replace('"', "\\\""));
                        out.push_str("\":");
                        write(v, out);
                    }
                    out.push('}');
                }
            }
        }
        let mut out = String::new();
        write(self, &mut out);
        out
    }
}

/// Convert a raw parsed subtree into a canonical value, xmltodict-style:
/// `@`-prefixed keys for attributes, `#text` for mixed text content when
/// attributes are also present, bare string when an element has only text.
pub fn normalize(element: &RawElement) -> NormalizedValue {
    let mut map = BTreeMap::new();
    for (key, value) in &element.attributes {
        map.insert(format!("@{key}"), NormalizedValue::Scalar(value.clone()));
    }

    if element.children.is_empty() {
        let text = element.text.trim();
        return if map.is_empty() && text.is_empty() {
            // A leaf with no attributes, no children, and no text is an
            // empty element, not an absent one: it still yields a key in
            // the parent map, so it must normalize to an empty mapping
            // rather than an empty string.
            NormalizedValue::Map(BTreeMap::new())
        } else if map.is_empty() {
            NormalizedValue::Scalar(text.to_string())
        } else if text.is_empty() {
            NormalizedValue::Map(map)
        } else {
            map.insert("#text".to_string(), NormalizedValue::Scalar(text.to_string()));
            NormalizedValue::Map(map)
        };
    }

    let mut grouped: BTreeMap<String, Vec<NormalizedValue>> = BTreeMap::new();
    for (name, order, child) in &element.children {
        grouped.entry(name.clone()).or_default().push((*order, normalize(child)).1);
    }
    for (name, mut values) in grouped {
        let collapsed = if values.len() == 1 { values.pop().unwrap() } else { NormalizedValue::List(values) };
        map.insert(name, collapsed);
    }

    NormalizedValue::Map(map)
}

/// SHA-256 hex digest of a record's canonical representation. Pure, total,
/// and independent of any map's insertion order: two `RawElement` trees that
/// are structurally equal always hash identically.
pub fn hash_record(value: &NormalizedValue) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.canonical_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Extract the record id from a normalized value, falling back to `"unknown"`
/// when neither an `@id` attribute nor an `id` child element is present.
pub fn extract_id(value: &NormalizedValue) -> String {
    if let NormalizedValue::Map(map) = value {
        if let Some(NormalizedValue::Scalar(id)) = map.get("@id") {
            return id.clone();
        }
        if let Some(NormalizedValue::Scalar(id)) = map.get("id") {
            return id.clone();
        }
    }
    "unknown".to_string()
}
