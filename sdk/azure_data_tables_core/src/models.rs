//! Common types shared across the Azure Data Tables crates.

use std::collections::BTreeMap;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::error::TablesResult;

/// `Accept` value requesting JSON with minimal OData metadata.
pub const ACCEPT_MINIMAL_METADATA: &str = "application/json;odata=minimalmetadata";

/// OData protocol version spoken by the Tables service.
pub const DATA_SERVICE_VERSION: &str = "3.0";

/// Content type of JSON entity bodies.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// A fully described HTTP request, independent of any transport.
///
/// Headers are kept in a sorted map, so iterating them always yields
/// names in lexicographic order regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRequest {
    method: Method,
    url: Url,
    headers: BTreeMap<String, String>,
    body: Option<Bytes>,
}

impl TableRequest {
    /// Create a request with no headers and no body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// Set a header, replacing any previous value for the same name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the request body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Headers in name-sorted order.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Look up a header by its exact name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

/// An HTTP response with its body fully read.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    /// Read a transport response to completion.
    pub async fn read(response: reqwest::Response) -> TablesResult<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(Self {
            status,
            headers,
            body,
        })
    }

    /// The `ETag` header, if present and valid UTF-8.
    pub fn etag(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
    }

    /// Deserialize the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> TablesResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Error envelope returned by the Tables service:
/// `{"odata.error": {"code": "...", "message": {"lang": "...", "value": "..."}}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ODataErrorEnvelope {
    #[serde(rename = "odata.error")]
    pub error: ODataError,
}

/// The `odata.error` object.
#[derive(Debug, Clone, Deserialize)]
pub struct ODataError {
    pub code: String,
    pub message: ODataErrorMessage,
}

/// The localized message of an `odata.error`.
#[derive(Debug, Clone, Deserialize)]
pub struct ODataErrorMessage {
    #[serde(default)]
    pub lang: Option<String>,
    pub value: String,
}
