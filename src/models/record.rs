//! Raw records as produced by extractors.

use serde::{Deserialize, Serialize};

/// Content type of JSON payloads.
pub const JSON: &str = "application/json";

/// Content type of XML payloads.
pub const XML: &str = "application/xml";

/// One record pulled from a remote source, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Selects the decoder used by the normalizer
    pub content_type: String,

    /// Undecoded record bytes
    pub payload: Vec<u8>,
}

impl RawRecord {
    pub fn new(content_type: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: content_type.into(),
            payload: payload.into(),
        }
    }

    pub fn json(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(JSON, payload)
    }

    pub fn xml(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(XML, payload)
    }

    /// Content type without parameters, lowercased.
    pub fn media_type(&self) -> String {
        media_type(&self.content_type)
    }
}

/// Strip parameters (`; charset=...`) and lowercase a content type.
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type() {
        let record = RawRecord::new("Application/JSON; charset=utf-8", b"{}".to_vec());
        assert_eq!(record.media_type(), "application/json");
        assert_eq!(media_type("text/xml"), "text/xml");
    }
}
