// src/services/fetch.rs

//! Page transports used by extractors.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;

use crate::error::{AppError, Result};
use crate::utils::http::{classify_status, classify_transport};

/// Location of one page or record, as understood by a [`PageFetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub location: String,
}

impl PageRequest {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }
}

/// Body and declared content type of a fetched page.
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Which transport a cursor protocol reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Http,
    File,
}

/// Fetches one page. Errors must be classified as transient or permanent.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, request: &PageRequest) -> Result<FetchedPage>;
}

/// Fetches pages over HTTP GET.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, request: &PageRequest) -> Result<FetchedPage> {
        let url = request.location.as_str();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_transport(url, e))?;
        classify_status(url, response.status())?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| classify_transport(url, e))?
            .to_vec();

        Ok(FetchedPage { content_type, body })
    }
}

/// Reads pages from the local filesystem.
pub struct FileFetcher;

#[async_trait]
impl PageFetcher for FileFetcher {
    async fn fetch(&self, request: &PageRequest) -> Result<FetchedPage> {
        match tokio::fs::read(&request.location).await {
            Ok(body) => Ok(FetchedPage {
                content_type: None,
                body,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                Err(AppError::transient(&request.location, e))
            }
            Err(e) => Err(AppError::permanent(&request.location, e)),
        }
    }
}
