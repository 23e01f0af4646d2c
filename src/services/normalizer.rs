// src/services/normalizer.rs

//! Record decoding and normalization into [`NormalizedItem`]s.
//!
//! The `mapped` normalizer reads fields out of the decoded record with JSON
//! pointers taken from the source definition's `mapping` table:
//!
//! ```toml
//! [sources.mapping]
//! original_object_id = "/record/header/identifier"
//! "original_object_urls.html" = "/record/metadata/dc/relation"
//! title = "/record/metadata/dc/title"
//! media_urls = "/record/metadata/dc/format"
//! ```
//!
//! Keys outside the canonical field set are copied into the source document.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde_json::{Map, Value, json};

use crate::error::{AppError, Result};
use crate::models::record::{JSON, XML};
use crate::models::{MediaUrl, NormalizedItem, RawRecord, SourceDefinition, compute_object_id};
use crate::utils::{normalize_whitespace, resolve, xml};

const URL_PREFIX: &str = "original_object_urls.";

/// Mapping keys with a fixed meaning.
const CANONICAL: &[&str] = &[
    "original_object_id",
    "title",
    "description",
    "date",
    "authors",
    "media_urls",
];

/// Turns one raw record into a normalized item.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, source: &SourceDefinition, record: &RawRecord) -> Result<NormalizedItem>;
}

/// Decode a raw payload according to its content type.
pub fn decode(record: &RawRecord) -> Result<Value> {
    let media_type = record.media_type();
    match media_type.as_str() {
        JSON => serde_json::from_slice(&record.payload)
            .map_err(|e| AppError::deserialization(&record.content_type, e)),
        XML | "text/xml" => xml::to_json(&record.payload),
        t if t.ends_with("+json") => serde_json::from_slice(&record.payload)
            .map_err(|e| AppError::deserialization(&record.content_type, e)),
        t if t.ends_with("+xml") => xml::to_json(&record.payload),
        _ => Err(AppError::deserialization(
            &record.content_type,
            "no decoder registered",
        )),
    }
}

static DATE_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4})(?:-?(\d{2})(?:-?(\d{2})(?:[T ]?(\d{2})(?::?(\d{2})(?::?(\d{2}))?)?)?)?)?",
    )
    .ok()
});

/// Parse a date literal into a timestamp and its granularity.
///
/// Granularity counts the significant digits: 4 year, 6 month, 8 day,
/// 10 hour, 12 minute, 14 second.
pub fn parse_date(literal: &str) -> Option<(DateTime<Utc>, i64)> {
    let caps = DATE_PATTERN.as_ref()?.captures(literal.trim())?;
    let part = |i: usize, default: u32| -> Option<u32> {
        match caps.get(i) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(default),
        }
    };

    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    let granularity = 4 + 2 * (2..=6).take_while(|i| caps.get(*i).is_some()).count() as i64;

    let date = NaiveDate::from_ymd_opt(year, part(2, 1)?, part(3, 1)?)?;
    let datetime = date.and_hms_opt(part(4, 0)?, part(5, 0)?, part(6, 0)?)?;
    Some((datetime.and_utc(), granularity))
}

/// Text at a pointer exactly as extracted: first element of arrays, `#text`
/// of XML nodes. Identity is hashed from this form.
fn raw_text_at(doc: &Value, pointer: &str) -> Option<String> {
    let value = doc.pointer(pointer)?;
    let value = match value {
        Value::Array(items) => items.first()?,
        other => other,
    };
    let text = match value {
        Value::Number(n) => n.to_string(),
        other => xml::text_of(other)?.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// Whitespace-normalized text at a pointer.
fn text_at(doc: &Value, pointer: &str) -> Option<String> {
    let text = normalize_whitespace(&raw_text_at(doc, pointer)?);
    (!text.is_empty()).then_some(text)
}

/// Every text value at a pointer.
fn texts_at(doc: &Value, pointer: &str) -> Vec<String> {
    let values: Vec<&Value> = match doc.pointer(pointer) {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(value) => vec![value],
        None => Vec::new(),
    };
    values
        .into_iter()
        .filter_map(xml::text_of)
        .map(normalize_whitespace)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Every string leaf of a decoded record, attributes excluded.
fn collect_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_text(v, out)),
        Value::Object(fields) => fields
            .iter()
            .filter(|(key, _)| !key.starts_with('@'))
            .for_each(|(_, v)| collect_text(v, out)),
        _ => {}
    }
}

/// Normalizer driven by the source definition's `mapping` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct MappedNormalizer;

impl Normalizer for MappedNormalizer {
    fn normalize(&self, source: &SourceDefinition, record: &RawRecord) -> Result<NormalizedItem> {
        let started = Utc::now();
        let doc = decode(record)?;
        let pointer = |key: &str| source.mapping.get(key).map(String::as_str);

        let original_id = pointer("original_object_id").and_then(|p| raw_text_at(&doc, p));
        let mut urls = Map::new();
        for (key, p) in &source.mapping {
            if let Some(kind) = key.strip_prefix(URL_PREFIX) {
                if let Some(url) = raw_text_at(&doc, p) {
                    urls.insert(kind.to_string(), Value::String(url));
                }
            }
        }

        let mut item = NormalizedItem::empty();
        item.object_id = compute_object_id(&source.id, original_id.as_deref(), &urls)?;

        item.meta.set("processing_started", started)?;
        item.meta.set("source", source.id.as_str())?;
        item.meta.set("rights", source.rights.as_str())?;
        if let Some(id) = &original_id {
            item.meta.set("original_object_id", id.as_str())?;
        }
        item.meta.set("original_object_urls", urls)?;
        item.meta.set(
            "object_types",
            source
                .object_types
                .iter()
                .map(|t| Value::String(t.clone()))
                .collect::<Vec<_>>(),
        )?;

        if let Some(title) = pointer("title").and_then(|p| text_at(&doc, p)) {
            item.combined_data.set("title", title)?;
        }
        if let Some(description) = pointer("description").and_then(|p| text_at(&doc, p)) {
            item.combined_data.set("description", description)?;
        }
        if let Some(literal) = pointer("date").and_then(|p| text_at(&doc, p)) {
            match parse_date(&literal) {
                Some((date, granularity)) => {
                    item.combined_data.set("date", date)?;
                    item.combined_data.set("date_granularity", granularity)?;
                }
                None => log::debug!(
                    "[{}] {} has unparseable date '{}'",
                    source.id,
                    item.object_id,
                    literal
                ),
            }
        }
        if let Some(p) = pointer("authors") {
            let authors: Vec<Value> = texts_at(&doc, p).into_iter().map(Value::String).collect();
            if !authors.is_empty() {
                item.combined_data.set("authors", authors)?;
            }
        }
        if let Some(p) = pointer("media_urls") {
            let media: Vec<MediaUrl> = texts_at(&doc, p)
                .into_iter()
                .map(|href| resolve(&source.base_url, &href).unwrap_or(href))
                .map(|url| MediaUrl::new(url, None))
                .collect();
            if !media.is_empty() {
                item.set_media_urls(&media)?;
            }
        }

        let mut all_text = Vec::new();
        collect_text(&doc, &mut all_text);
        let all_text = normalize_whitespace(&all_text.join(" "));
        if !all_text.is_empty() {
            item.combined_data.set("all_text", all_text)?;
        }

        for (key, p) in &source.mapping {
            if CANONICAL.contains(&key.as_str()) || key.starts_with(URL_PREFIX) {
                continue;
            }
            if let Some(value) = doc.pointer(p) {
                item.source_data.insert(key.clone(), value.clone());
            }
        }
        if !source.collection.is_empty() {
            item.source_data
                .insert("collection".into(), Value::String(source.collection.clone()));
        }
        item.source_data.insert(
            "original_item".into(),
            json!({
                "content_type": record.content_type,
                "data": String::from_utf8_lossy(&record.payload),
            }),
        );

        Ok(item)
    }
}
