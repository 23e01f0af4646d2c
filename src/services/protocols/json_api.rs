// src/services/protocols/json_api.rs

//! Paged JSON APIs: offset/limit listings and opaque continuation markers.
//!
//! Both share the same listing parameters:
//!
//! - `records_pointer`: JSON pointer to the record array (`""` = root)
//! - `total_pointer`: JSON pointer to a total-count hint
//! - `detail_url` + `id_pointer`: fetch each record by id, `{id}` is replaced

use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{RawRecord, SourceDefinition};
use crate::services::extractor::{Cursor, CursorProtocol, Entry, Page};
use crate::services::fetch::{FetchedPage, PageRequest};
use crate::utils::{resolve, with_query};

#[derive(Debug, Clone)]
struct Listing {
    base_url: String,
    records_pointer: String,
    total_pointer: Option<String>,
    id_pointer: String,
    detail_url: Option<String>,
}

impl Listing {
    fn from_source(source: &SourceDefinition) -> Result<Self> {
        if source.base_url.is_empty() {
            return Err(AppError::config(format!(
                "source {} needs a base_url for {}",
                source.id, source.extractor
            )));
        }
        Ok(Self {
            base_url: source.base_url.clone(),
            records_pointer: source.param_str("records_pointer").unwrap_or("").to_string(),
            total_pointer: source.param_str("total_pointer").map(str::to_string),
            id_pointer: source.param_str("id_pointer").unwrap_or("/id").to_string(),
            detail_url: source.param_str("detail_url").map(str::to_string),
        })
    }

    fn decode(&self, page: &FetchedPage) -> Result<Value> {
        serde_json::from_slice(&page.body)
            .map_err(|e| AppError::permanent(&self.base_url, format!("malformed JSON page: {e}")))
    }

    /// Entries on the page and the number of listed items.
    fn entries(&self, doc: &Value) -> Result<(Vec<Entry>, usize)> {
        let items = doc
            .pointer(&self.records_pointer)
            .and_then(Value::as_array)
            .ok_or_else(|| {
                AppError::permanent(
                    &self.base_url,
                    format!("no record array at '{}'", self.records_pointer),
                )
            })?;

        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            if self.detail_url.is_some() {
                match item.pointer(&self.id_pointer).and_then(scalar_string) {
                    Some(id) => entries.push(Entry::Reference(id)),
                    None => log::warn!(
                        "listed item at {} has no id at '{}'",
                        self.base_url,
                        self.id_pointer
                    ),
                }
            } else {
                entries.push(Entry::Record(RawRecord::json(serde_json::to_vec(item)?)));
            }
        }
        Ok((entries, items.len()))
    }

    fn total(&self, doc: &Value) -> Option<u64> {
        self.total_pointer
            .as_deref()
            .and_then(|p| doc.pointer(p))
            .and_then(Value::as_u64)
    }

    fn record_request(&self, id: &str) -> Result<PageRequest> {
        match &self.detail_url {
            Some(template) => Ok(PageRequest::new(template.replace("{id}", id))),
            None => Err(AppError::config(format!(
                "{} lists references but has no detail_url",
                self.base_url
            ))),
        }
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Offset/limit paging, e.g. `?offset=200&limit=100`.
#[derive(Debug, Clone)]
pub struct JsonOffset {
    listing: Listing,
    offset_param: String,
    limit_param: String,
    page_size: u64,
}

impl JsonOffset {
    pub fn from_source(source: &SourceDefinition) -> Result<Self> {
        let page_size = source.param_u64("page_size").unwrap_or(100);
        if page_size == 0 {
            return Err(AppError::config(format!(
                "source {} has page_size = 0",
                source.id
            )));
        }
        Ok(Self {
            listing: Listing::from_source(source)?,
            offset_param: source.param_str("offset_param").unwrap_or("offset").to_string(),
            limit_param: source.param_str("limit_param").unwrap_or("limit").to_string(),
            page_size,
        })
    }

    fn request(&self, offset: u64) -> Result<PageRequest> {
        let offset = offset.to_string();
        let limit = self.page_size.to_string();
        Ok(PageRequest::new(with_query(
            &self.listing.base_url,
            [
                (self.offset_param.as_str(), offset.as_str()),
                (self.limit_param.as_str(), limit.as_str()),
            ],
        )?))
    }
}

fn offset_of(cursor: Option<&Cursor>) -> u64 {
    match cursor {
        Some(Cursor::Offset(n)) => *n,
        _ => 0,
    }
}

impl CursorProtocol for JsonOffset {
    fn name(&self) -> &'static str {
        "json_offset"
    }

    fn first_page(&self) -> Result<PageRequest> {
        self.request(0)
    }

    fn next_page(&self, cursor: &Cursor) -> Result<PageRequest> {
        match cursor {
            Cursor::Offset(n) => self.request(*n),
            other => Err(AppError::validation(format!(
                "json_offset cannot page with {other:?}"
            ))),
        }
    }

    fn parse_page(&self, page: &FetchedPage, cursor: Option<&Cursor>) -> Result<Page> {
        let doc = self.listing.decode(page)?;
        let (entries, listed) = self.listing.entries(&doc)?;
        let total_hint = self.listing.total(&doc);

        let offset = offset_of(cursor);
        let reached = offset + listed as u64;
        let next = if listed == 0
            || (listed as u64) < self.page_size
            || total_hint.is_some_and(|total| reached >= total)
        {
            None
        } else {
            Some(Cursor::Offset(reached))
        };

        Ok(Page {
            entries,
            next,
            total_hint,
        })
    }

    fn skip_page(&self, cursor: Option<&Cursor>) -> Option<Cursor> {
        Some(Cursor::Offset(offset_of(cursor) + self.page_size))
    }

    fn record_request(&self, id: &str) -> Result<PageRequest> {
        self.listing.record_request(id)
    }
}

/// Continuation-marker paging: each page names the next one.
///
/// `next_pointer` locates the marker. With `cursor_param` set the marker is
/// sent back as that query parameter, otherwise it is a (relative) URL.
#[derive(Debug, Clone)]
pub struct JsonCursor {
    listing: Listing,
    next_pointer: String,
    cursor_param: Option<String>,
}

impl JsonCursor {
    pub fn from_source(source: &SourceDefinition) -> Result<Self> {
        Ok(Self {
            listing: Listing::from_source(source)?,
            next_pointer: source.require_param("next_pointer")?.to_string(),
            cursor_param: source.param_str("cursor_param").map(str::to_string),
        })
    }
}

impl CursorProtocol for JsonCursor {
    fn name(&self) -> &'static str {
        "json_cursor"
    }

    fn first_page(&self) -> Result<PageRequest> {
        Ok(PageRequest::new(&self.listing.base_url))
    }

    fn next_page(&self, cursor: &Cursor) -> Result<PageRequest> {
        match (cursor, &self.cursor_param) {
            (Cursor::Token(token), Some(param)) => Ok(PageRequest::new(with_query(
                &self.listing.base_url,
                [(param.as_str(), token.as_str())],
            )?)),
            (Cursor::Url(url), _) => Ok(PageRequest::new(url)),
            (other, _) => Err(AppError::validation(format!(
                "json_cursor cannot page with {other:?}"
            ))),
        }
    }

    fn parse_page(&self, page: &FetchedPage, _cursor: Option<&Cursor>) -> Result<Page> {
        let doc = self.listing.decode(page)?;
        let (entries, _) = self.listing.entries(&doc)?;

        let marker = doc.pointer(&self.next_pointer).and_then(scalar_string);
        let next = match (marker, &self.cursor_param) {
            (None, _) => None,
            (Some(token), Some(_)) => Some(Cursor::Token(token)),
            (Some(href), None) => match resolve(&self.listing.base_url, &href) {
                Some(url) => Some(Cursor::Url(url)),
                None => {
                    return Err(AppError::permanent(
                        &self.listing.base_url,
                        format!("invalid next link '{href}'"),
                    ));
                }
            },
        };

        Ok(Page {
            entries,
            next,
            total_hint: self.listing.total(&doc),
        })
    }

    fn record_request(&self, id: &str) -> Result<PageRequest> {
        self.listing.record_request(id)
    }
}
