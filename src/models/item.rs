//! Normalized items and the two documents derived from them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, Result};
use crate::models::schema::{COMBINED_SCHEMA, META_SCHEMA, StrictMap};
use crate::utils::hash::{sha1_hex, url_hash};

/// A media reference inside `combined_data.media_urls`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaUrl {
    /// URL as published by the source
    pub original_url: String,

    /// Resolver alias, `{resolver_base_url}/{sha1(original_url)}`
    #[serde(default)]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl MediaUrl {
    pub fn new(original_url: impl Into<String>, content_type: Option<String>) -> Self {
        Self {
            original_url: original_url.into(),
            url: String::new(),
            content_type,
        }
    }

    /// Hash identifying this asset in the resolver.
    pub fn url_hash(&self) -> String {
        url_hash(&self.original_url)
    }
}

/// Compute the deterministic identity of an item.
///
/// `sha1(source_id || original_object_id || concat(sorted(url values)))`.
/// At least one of the id and the URLs must be non-empty.
pub fn compute_object_id(
    source_id: &str,
    original_object_id: Option<&str>,
    original_object_urls: &Map<String, Value>,
) -> Result<String> {
    let object_id = original_object_id.unwrap_or("");

    let mut urls: Vec<&str> = original_object_urls
        .values()
        .filter_map(Value::as_str)
        .filter(|url| !url.is_empty())
        .collect();
    urls.sort_unstable();

    if object_id.is_empty() && urls.is_empty() {
        return Err(AppError::identity(
            source_id,
            "both original_object_id and original_object_urls are empty",
        ));
    }

    let mut parts = vec![source_id, object_id];
    parts.extend(urls);
    Ok(sha1_hex(parts))
}

/// The canonical, schema-checked form of one harvested record.
#[derive(Debug, Clone)]
pub struct NormalizedItem {
    pub object_id: String,
    pub meta: StrictMap,
    pub combined_data: StrictMap,
    pub source_data: Map<String, Value>,
    pub enrichments: Map<String, Value>,
}

impl NormalizedItem {
    /// An item with empty maps and no identity yet.
    pub fn empty() -> Self {
        Self {
            object_id: String::new(),
            meta: StrictMap::new(&META_SCHEMA),
            combined_data: StrictMap::new(&COMBINED_SCHEMA),
            source_data: Map::new(),
            enrichments: Map::new(),
        }
    }

    /// Media references currently stored in `combined_data.media_urls`.
    pub fn media_urls(&self) -> Vec<MediaUrl> {
        self.combined_data
            .get("media_urls")
            .and_then(|v| v.as_list())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replace `combined_data.media_urls`.
    pub fn set_media_urls(&mut self, media: &[MediaUrl]) -> Result<()> {
        let list = media
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.combined_data.set("media_urls", list)
    }

    /// Fill in resolver aliases for every media URL. Identity is untouched.
    pub fn resolve_media_urls(&mut self, resolver_base_url: &str) -> Result<()> {
        let base = resolver_base_url.trim_end_matches('/');
        let mut media = self.media_urls();
        if media.is_empty() {
            return Ok(());
        }
        for m in &mut media {
            m.url = format!("{}/{}", base, m.url_hash());
        }
        self.set_media_urls(&media)
    }

    /// Document for the cross-source combined index.
    pub fn combined_document(&self) -> Value {
        let mut doc = self.combined_data.to_json_map();
        doc.insert("meta".into(), Value::Object(self.meta.to_json_map()));
        doc.insert("enrichments".into(), Value::Object(self.enrichments.clone()));
        Value::Object(doc)
    }

    /// Document for the per-source index: combined fields plus source extras.
    pub fn source_document(&self) -> Value {
        let mut doc = self.source_data.clone();
        for (key, value) in self.combined_data.iter() {
            doc.insert(key.to_string(), value.to_json());
        }
        doc.insert("meta".into(), Value::Object(self.meta.to_json_map()));
        doc.insert("enrichments".into(), Value::Object(self.enrichments.clone()));
        Value::Object(doc)
    }
}

/// Media references listed in a document's `media_urls` field.
pub fn document_media_urls(doc: &Value) -> Vec<MediaUrl> {
    doc.get("media_urls")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn urls(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_object_id_example() {
        let id = compute_object_id(
            "museum_x",
            Some("obj-1"),
            &urls(json!({ "html": "http://x/1" })),
        )
        .unwrap();
        assert_eq!(id, sha1_hex(["museum_xobj-1http://x/1"]));
    }

    #[test]
    fn test_object_id_is_order_independent() {
        let a = compute_object_id(
            "museum_x",
            Some("obj-1"),
            &urls(json!({ "html": "http://x/1", "json": "http://x/1.json" })),
        )
        .unwrap();
        let b = compute_object_id(
            "museum_x",
            Some("obj-1"),
            &urls(json!({ "api": "http://x/1.json", "web": "http://x/1" })),
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_object_id_keeps_whitespace() {
        let spaced = compute_object_id("museum_x", Some("obj  1"), &Map::new()).unwrap();
        let single = compute_object_id("museum_x", Some("obj 1"), &Map::new()).unwrap();
        assert_ne!(spaced, single);
    }

    #[test]
    fn test_object_id_with_only_urls() {
        let id = compute_object_id("museum_x", None, &urls(json!({ "html": "http://x/1" })));
        assert!(id.is_ok());
    }

    #[test]
    fn test_object_id_requires_some_identity() {
        let err = compute_object_id("museum_x", Some(""), &Map::new()).unwrap_err();
        assert!(matches!(err, AppError::Identity { .. }));
    }

    #[test]
    fn test_resolve_media_urls() {
        let mut item = NormalizedItem::empty();
        item.set_media_urls(&[MediaUrl::new("http://x/1.jpg", None)])
            .unwrap();
        item.resolve_media_urls("http://resolver/v0/resolve/").unwrap();

        let media = item.media_urls();
        assert_eq!(
            media[0].url,
            format!("http://resolver/v0/resolve/{}", sha1_hex(["http://x/1.jpg"]))
        );
        assert_eq!(media[0].original_url, "http://x/1.jpg");
    }

    #[test]
    fn test_documents() {
        let mut item = NormalizedItem::empty();
        item.object_id = "abc".into();
        item.meta.set("source", "museum_x").unwrap();
        item.combined_data.set("title", "Nachtwacht").unwrap();
        item.source_data.insert("inventory".into(), json!("SK-C-5"));

        let combined = item.combined_document();
        assert_eq!(combined["title"], json!("Nachtwacht"));
        assert_eq!(combined["meta"]["source"], json!("museum_x"));
        assert!(combined.get("inventory").is_none());

        let source = item.source_document();
        assert_eq!(source["title"], json!("Nachtwacht"));
        assert_eq!(source["inventory"], json!("SK-C-5"));
        assert_eq!(source["enrichments"], json!({}));
    }
}
