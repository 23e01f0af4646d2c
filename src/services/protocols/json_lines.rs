// src/services/protocols/json_lines.rs

//! Newline-delimited JSON dumps on the local filesystem.

use crate::error::{AppError, Result};
use crate::models::{RawRecord, SourceDefinition};
use crate::services::extractor::{Cursor, CursorProtocol, Entry, Page};
use crate::services::fetch::{FetchedPage, PageRequest, Transport};

/// A whole dump is a single page with one record per non-empty line.
#[derive(Debug, Clone)]
pub struct JsonLines {
    path: String,
}

impl JsonLines {
    pub fn from_source(source: &SourceDefinition) -> Result<Self> {
        let path = source
            .param_str("path")
            .map(str::to_string)
            .or_else(|| (!source.base_url.is_empty()).then(|| source.base_url.clone()))
            .ok_or_else(|| {
                AppError::config(format!("source {} needs params.path for json_lines", source.id))
            })?;
        Ok(Self { path })
    }
}

impl CursorProtocol for JsonLines {
    fn name(&self) -> &'static str {
        "json_lines"
    }

    fn transport(&self) -> Transport {
        Transport::File
    }

    fn first_page(&self) -> Result<PageRequest> {
        Ok(PageRequest::new(&self.path))
    }

    fn next_page(&self, cursor: &Cursor) -> Result<PageRequest> {
        Err(AppError::validation(format!(
            "json_lines has a single page, got {cursor:?}"
        )))
    }

    fn parse_page(&self, page: &FetchedPage, _cursor: Option<&Cursor>) -> Result<Page> {
        let entries = page
            .body
            .split(|b| *b == b'\n')
            .map(<[u8]>::trim_ascii)
            .filter(|line| !line.is_empty())
            .map(|line| Entry::Record(RawRecord::json(line.to_vec())))
            .collect();
        Ok(Page {
            entries,
            next: None,
            total_hint: None,
        })
    }
}
