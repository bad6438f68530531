#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Client for the public emergency-dispatch JSON feed.
//!
//! A [`FeedClient`] fetches the raw items of one poll; [`FeedItem`] turns
//! each item into typed fields, and the [`classify`] and [`parsing`]
//! modules derive the incident type, coordinates, and time from them.

pub mod classify;
pub mod item;
pub mod parsing;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

pub use item::FeedItem;

/// Errors that can occur while fetching the feed.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// HTTP request failed (connection, timeout, body read).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The feed answered with a non-success status.
    #[error("Feed returned HTTP {status} for {url}")]
    Status {
        /// Response status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// The body was not valid JSON.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The body was JSON but neither an array nor an object.
    #[error("Unexpected JSON root kind: {kind}")]
    UnexpectedRoot {
        /// Kind of the root value, e.g. `"string"`.
        kind: &'static str,
    },
}

/// Source of raw feed items.
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Where items come from, for log messages.
    fn endpoint(&self) -> &str;

    /// Fetches the current feed contents.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError`] if the request fails or the body cannot be
    /// parsed.
    async fn fetch(&self) -> Result<Vec<Value>, FeedError>;
}

/// [`FeedClient`] that GETs a URL with a fixed timeout. No retries: a failed
/// fetch is reported to the caller, which polls again later.
#[derive(Debug, Clone)]
pub struct HttpFeedClient {
    client: reqwest::Client,
    url: String,
}

impl HttpFeedClient {
    /// Creates a client for `url` whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Http`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl FeedClient for HttpFeedClient {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<Vec<Value>, FeedError> {
        log::debug!("Fetching {}", self.url);
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }

        let body = response.text().await?;
        let items = parse_body(&body)?;
        log::debug!("Received {} item(s) from {}", items.len(), self.url);
        Ok(items)
    }
}

/// Splits a feed body into items.
///
/// An array yields its elements, an object yields itself, and an empty or
/// whitespace-only body yields nothing.
///
/// # Errors
///
/// Returns [`FeedError::Json`] for invalid JSON and
/// [`FeedError::UnexpectedRoot`] for any other root value.
pub fn parse_body(body: &str) -> Result<Vec<Value>, FeedError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str::<Value>(body)? {
        Value::Array(items) => Ok(items),
        object @ Value::Object(_) => Ok(vec![object]),
        other => Err(FeedError::UnexpectedRoot {
            kind: json_kind(&other),
        }),
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
