// src/services/enrichment.rs

//! Enrichment stages.
//!
//! A stage reads the item's documents and returns a new `enrichments` map.
//! [`run_stage`] is the stage boundary: a skip signal or any error leaves the
//! item exactly as it was, and the chain moves on.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Map, Value, json};
use tempfile::SpooledTempFile;

use crate::error::{AppError, Result};
use crate::models::item::document_media_urls;
use crate::models::record::media_type;
use crate::models::{EnrichmentConfig, NormalizedItem};

/// One enrichment step in a task chain.
#[async_trait]
pub trait EnrichmentStage: Send + Sync {
    fn name(&self) -> &str;

    /// Compute the item's new `enrichments`. Return
    /// [`AppError::EnrichmentSkipped`] when there is nothing to do.
    async fn enrich(
        &self,
        enrichments: &Map<String, Value>,
        object_id: &str,
        combined_doc: &Value,
        source_doc: &Value,
    ) -> Result<Map<String, Value>>;
}

/// What happened at a stage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Applied,
    Skipped,
    Failed,
}

/// Run one stage against an item. Never fails the item.
pub async fn run_stage(stage: &dyn EnrichmentStage, item: &mut NormalizedItem) -> StageOutcome {
    let combined = item.combined_document();
    let source = item.source_document();
    match stage
        .enrich(&item.enrichments, &item.object_id, &combined, &source)
        .await
    {
        Ok(enrichments) => {
            item.enrichments = enrichments;
            StageOutcome::Applied
        }
        Err(AppError::EnrichmentSkipped { reason, .. }) => {
            log::debug!("{} skipped {}: {}", stage.name(), item.object_id, reason);
            StageOutcome::Skipped
        }
        Err(e) => {
            log::warn!("{} failed for {}: {}", stage.name(), item.object_id, e);
            StageOutcome::Failed
        }
    }
}

/// A fetched media asset, spooled to memory or disk.
pub struct MediaFile {
    pub content_type: Option<String>,
    pub size: u64,
    body: SpooledTempFile,
}

impl MediaFile {
    /// Rewind and read the body from the start.
    pub fn reader(&mut self) -> io::Result<&mut SpooledTempFile> {
        self.body.seek(SeekFrom::Start(0))?;
        Ok(&mut self.body)
    }
}

/// Analysis of one media asset, selected by content type.
pub trait MediaTask: Send + Sync {
    fn name(&self) -> &'static str;

    /// Content types this task understands. Others are a no-op.
    fn supports(&self, content_type: &str) -> bool;

    fn analyze(&self, media: &mut MediaFile, out: &mut Map<String, Value>) -> Result<()>;
}

/// Content type and size of every asset.
pub struct MediaTypeTask;

impl MediaTask for MediaTypeTask {
    fn name(&self) -> &'static str {
        "media_type"
    }

    fn supports(&self, _content_type: &str) -> bool {
        true
    }

    fn analyze(&self, media: &mut MediaFile, out: &mut Map<String, Value>) -> Result<()> {
        if let Some(content_type) = &media.content_type {
            out.insert("content_type".into(), json!(content_type));
        }
        out.insert("size_in_bytes".into(), json!(media.size));
        Ok(())
    }
}

/// Width and height of PNG, GIF and JPEG images.
pub struct ImageDimensionsTask;

impl MediaTask for ImageDimensionsTask {
    fn name(&self) -> &'static str {
        "image_dimensions"
    }

    fn supports(&self, content_type: &str) -> bool {
        matches!(content_type, "image/png" | "image/gif" | "image/jpeg")
    }

    fn analyze(&self, media: &mut MediaFile, out: &mut Map<String, Value>) -> Result<()> {
        let content_type = media.content_type.clone().unwrap_or_default();
        let reader = media.reader()?;
        let dimensions = match content_type.as_str() {
            "image/png" => png_dimensions(reader)?,
            "image/gif" => gif_dimensions(reader)?,
            _ => jpeg_dimensions(reader)?,
        };
        match dimensions {
            Some((width, height)) => {
                out.insert("width".into(), json!(width));
                out.insert("height".into(), json!(height));
                Ok(())
            }
            None => Err(AppError::enrichment(
                self.name(),
                format!("cannot read {content_type} header"),
            )),
        }
    }
}

fn sniff(head: &[u8]) -> Option<&'static str> {
    if head.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else {
        None
    }
}

fn png_dimensions(reader: &mut impl Read) -> io::Result<Option<(u32, u32)>> {
    let mut header = [0u8; 24];
    reader.read_exact(&mut header)?;
    if &header[12..16] != b"IHDR" {
        return Ok(None);
    }
    let width = u32::from_be_bytes([header[16], header[17], header[18], header[19]]);
    let height = u32::from_be_bytes([header[20], header[21], header[22], header[23]]);
    Ok(Some((width, height)))
}

fn gif_dimensions(reader: &mut impl Read) -> io::Result<Option<(u32, u32)>> {
    let mut header = [0u8; 10];
    reader.read_exact(&mut header)?;
    let width = u16::from_le_bytes([header[6], header[7]]);
    let height = u16::from_le_bytes([header[8], header[9]]);
    Ok(Some((width.into(), height.into())))
}

fn jpeg_dimensions(reader: &mut impl Read) -> io::Result<Option<(u32, u32)>> {
    let mut byte = [0u8; 1];
    let mut pair = [0u8; 2];
    reader.read_exact(&mut pair)?;
    if pair != [0xFF, 0xD8] {
        return Ok(None);
    }

    loop {
        // Markers may be padded with any number of 0xFF bytes.
        reader.read_exact(&mut byte)?;
        if byte[0] != 0xFF {
            return Ok(None);
        }
        let mut marker = 0xFF;
        while marker == 0xFF {
            reader.read_exact(&mut byte)?;
            marker = byte[0];
        }
        match marker {
            0xD8 | 0x01 | 0xD0..=0xD7 => continue,
            0xD9 | 0xDA => return Ok(None),
            _ => {}
        }

        reader.read_exact(&mut pair)?;
        let length = u16::from_be_bytes(pair);
        if length < 2 {
            return Ok(None);
        }
        let is_frame = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_frame {
            let mut frame = [0u8; 5];
            reader.read_exact(&mut frame)?;
            let height = u16::from_be_bytes([frame[1], frame[2]]);
            let width = u16::from_be_bytes([frame[3], frame[4]]);
            return Ok(Some((width.into(), height.into())));
        }
        let mut segment = (&mut *reader).take(u64::from(length) - 2);
        io::copy(&mut segment, &mut io::sink())?;
    }
}

/// Fetches every media asset of an item and runs the media tasks on it.
///
/// Output is written to `enrichments.media_urls`, one entry per asset in the
/// order of `combined_data.media_urls`.
pub struct MediaEnricher {
    client: Client,
    max_bytes: u64,
    spool_threshold: usize,
    tasks: Vec<Arc<dyn MediaTask>>,
}

impl MediaEnricher {
    pub const NAME: &'static str = "media";

    pub fn new(client: Client, config: &EnrichmentConfig, tasks: Vec<Arc<dyn MediaTask>>) -> Self {
        Self {
            client,
            max_bytes: config.max_media_bytes,
            spool_threshold: config.spool_threshold_bytes,
            tasks,
        }
    }

    /// Stream an asset into a size-capped spooled buffer.
    async fn fetch(&self, url: &str) -> Result<MediaFile> {
        let fail = |message: String| AppError::enrichment(Self::NAME, format!("{url}: {message}"));

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fail(response.status().to_string()));
        }
        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(fail(format!("larger than {} bytes", self.max_bytes)));
        }
        let declared = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(media_type)
            .filter(|t| !t.is_empty() && t != "application/octet-stream");

        let mut body = SpooledTempFile::new(self.spool_threshold);
        let mut head = Vec::new();
        let mut size = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| fail(e.to_string()))? {
            size += chunk.len() as u64;
            if size > self.max_bytes {
                return Err(fail(format!("larger than {} bytes", self.max_bytes)));
            }
            if head.len() < 16 {
                head.extend(chunk.iter().take(16 - head.len()));
            }
            body.write_all(&chunk)?;
        }

        let content_type = declared.or_else(|| sniff(&head).map(str::to_string));
        Ok(MediaFile {
            content_type,
            size,
            body,
        })
    }
}

#[async_trait]
impl EnrichmentStage for MediaEnricher {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn enrich(
        &self,
        enrichments: &Map<String, Value>,
        object_id: &str,
        combined_doc: &Value,
        _source_doc: &Value,
    ) -> Result<Map<String, Value>> {
        let media = document_media_urls(combined_doc);
        if media.is_empty() {
            return Err(AppError::skip(Self::NAME, "no media urls"));
        }

        let mut analyzed = Vec::with_capacity(media.len());
        for item in &media {
            let mut file = self.fetch(&item.original_url).await?;
            let mut out = Map::new();
            out.insert("original_url".into(), json!(item.original_url));
            out.insert("url".into(), json!(item.url));

            let content_type = file.content_type.clone().unwrap_or_default();
            for task in &self.tasks {
                if !task.supports(&content_type) {
                    continue;
                }
                task.analyze(&mut file, &mut out)?;
            }
            log::debug!("{} analyzed {} ({} bytes)", object_id, item.original_url, file.size);
            analyzed.push(Value::Object(out));
        }

        let mut enrichments = enrichments.clone();
        enrichments.insert("media_urls".into(), Value::Array(analyzed));
        Ok(enrichments)
    }
}
