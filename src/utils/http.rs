// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use reqwest::StatusCode;

use crate::error::{AppError, Result};
use crate::models::{Config, ExtractorConfig};

/// Create the client used by extractors.
pub fn create_async_client(config: &ExtractorConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Create the client used for media fetches during enrichment.
pub fn create_media_client(config: &Config) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.extractor.user_agent)
        .timeout(Duration::from_secs(config.enrichment.timeout_secs))
        .build()?;
    Ok(client)
}

/// Map an HTTP status to the source error taxonomy.
///
/// 5xx is transient, any other non-success status is permanent.
pub fn classify_status(url: &str, status: StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else if status.is_server_error() {
        Err(AppError::transient(url, status))
    } else {
        Err(AppError::permanent(url, status))
    }
}

/// Map a transport error to the source error taxonomy.
///
/// Timeouts and connection failures are transient; anything else (bad URL,
/// body decoding) is permanent.
pub fn classify_transport(url: &str, error: reqwest::Error) -> AppError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        AppError::transient(url, error)
    } else {
        AppError::permanent(url, error)
    }
}
