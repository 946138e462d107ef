//! HTTP client for Azure Data Tables.
//!
//! This module provides [`TableServiceClient`], the transport used by the
//! `azure_data_tables` crate. The client handles authentication, the
//! `x-ms-version` header, retries on transient failures, and endpoint
//! management. It knows nothing about entities or batches: it sends
//! [`TableRequest`]s and hands back [`RawResponse`]s.
//!
//! # Examples
//!
//! ## Using a SAS token
//! ```rust,no_run
//! use azure_data_tables_core::client::TableServiceClient;
//! use azure_data_tables_core::auth::TableCredential;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = TableServiceClient::builder()
//!     .endpoint("https://myaccount.table.core.windows.net")
//!     .credential(TableCredential::sas_token("sv=2019-02-02&ss=t&sig=..."))
//!     .build()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Using an Entra ID access token
//! ```rust,no_run
//! use azure_data_tables_core::client::TableServiceClient;
//! use azure_data_tables_core::auth::TableCredential;
//!
//! # fn example(token: String) -> Result<(), Box<dyn std::error::Error>> {
//! let client = TableServiceClient::builder()
//!     .endpoint("https://myaccount.table.core.windows.net")
//!     .credential(TableCredential::bearer_token(token))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::auth::TableCredential;
use crate::error::{TablesError, TablesResult};
use crate::models::{ODataErrorEnvelope, RawResponse, TableRequest};
use reqwest::Client as HttpClient;
use url::Url;

use std::time::Duration;

/// Default service version sent as `x-ms-version`.
pub const DEFAULT_API_VERSION: &str = "2019-02-02";

/// Default connection timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default read/response timeout (60 seconds).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Determines if an HTTP status code represents a retriable error.
///
/// Retriable errors are transient server-side issues that may succeed on retry:
/// - 429 Too Many Requests (rate limiting)
/// - 500 Internal Server Error
/// - 502 Bad Gateway
/// - 503 Service Unavailable
/// - 504 Gateway Timeout
#[inline]
pub fn is_retriable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Configuration for automatic retry behavior on transient errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the initial request).
    pub max_retries: u32,
    /// Initial backoff duration before the first retry.
    /// Subsequent retries use exponential backoff (2^attempt * initial_backoff).
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

/// The base client for interacting with the Azure Tables service.
///
/// The client is cheaply cloneable and can be shared across threads.
#[derive(Debug, Clone)]
pub struct TableServiceClient {
    pub(crate) http: HttpClient,
    pub(crate) endpoint: Url,
    pub(crate) credential: TableCredential,
    pub(crate) api_version: String,
    pub(crate) retry_policy: RetryPolicy,
}

/// Builder for constructing a [`TableServiceClient`].
///
/// Use [`TableServiceClient::builder()`] to create a new builder.
#[derive(Debug, Default)]
pub struct TableServiceClientBuilder {
    endpoint: Option<String>,
    credential: Option<TableCredential>,
    api_version: Option<String>,
    http_client: Option<HttpClient>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    retry_policy: Option<RetryPolicy>,
}

impl TableServiceClient {
    /// Create a new builder for configuring a `TableServiceClient`.
    pub fn builder() -> TableServiceClientBuilder {
        TableServiceClientBuilder::default()
    }

    /// Get the service endpoint URL. Always ends with `/`.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Get the service version being used.
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Get the retry policy configuration.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Build a full URL for a path relative to the service endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be joined to the endpoint URL.
    pub fn url(&self, path: &str) -> TablesResult<Url> {
        self.endpoint
            .join(path.trim_start_matches('/'))
            .map_err(|e| TablesError::invalid_endpoint_with_source("failed to construct URL", e))
    }

    /// Send a request and return the response whatever its status.
    ///
    /// Adds authentication and `x-ms-version`. Retries on retriable HTTP
    /// errors (429, 500, 502, 503, 504) with exponential backoff; the final
    /// response is returned even when it is a failure, so callers that need
    /// to inspect failure bodies (such as the batch decoder) can do so.
    ///
    /// # Errors
    ///
    /// Returns an error only if the request cannot be sent or its body
    /// cannot be read.
    pub async fn execute(&self, request: &TableRequest) -> TablesResult<RawResponse> {
        let url = self.credential.authorize_url(request.url());
        let auth = self.credential.authorization();

        for attempt in 0..=self.retry_policy.max_retries {
            let mut builder = self
                .http
                .request(request.method().clone(), url.clone())
                .header("x-ms-version", &self.api_version);
            if let Some(ref auth) = auth {
                builder = builder.header("Authorization", auth);
            }
            for (name, value) in request.headers() {
                builder = builder.header(name, value);
            }
            if let Some(body) = request.body() {
                builder = builder.body(body.clone());
            }

            let response = builder.send().await?;
            let status = response.status().as_u16();

            // Success, non-retriable error, or last attempt - hand it back
            if response.status().is_success()
                || !is_retriable_status(status)
                || attempt == self.retry_policy.max_retries
            {
                return RawResponse::read(response).await;
            }

            // Calculate backoff with jitter: base_backoff * jitter_factor
            // jitter_factor is in range [0.75, 1.25] for +/-25% variation
            let base_backoff = self.retry_policy.initial_backoff * 2_u32.pow(attempt);
            let jitter = 0.75 + fastrand::f64() * 0.5; // 0.75 to 1.25
            let backoff = base_backoff.mul_f64(jitter);
            tracing::debug!(status, attempt, ?backoff, "retrying after transient error");
            tokio::time::sleep(backoff).await;
        }

        // This should never be reached due to the loop logic
        unreachable!("retry loop should return before reaching here")
    }

    /// Send a request and fail on any non-success status.
    ///
    /// # Errors
    ///
    /// Returns [`TablesError::Api`] when the service answers with an
    /// `odata.error` body, [`TablesError::Http`] for other failures, or the
    /// transport error from [`Self::execute`].
    pub async fn send(&self, request: &TableRequest) -> TablesResult<RawResponse> {
        let response = self.execute(request).await?;
        Self::check_response(response)
    }

    /// Maximum length for error messages to prevent sensitive data leaks.
    const MAX_ERROR_MESSAGE_LEN: usize = 1000;

    /// Redact the value following `marker` up to the next delimiter.
    fn redact_after(msg: &str, marker: &str, delimiters: &[char]) -> String {
        let mut result = msg.to_string();
        let mut search_start = 0;

        while search_start < result.len() {
            let Some(relative_pos) = result[search_start..].find(marker) else {
                break;
            };
            let value_start = search_start + relative_pos + marker.len();

            if result[value_start..].starts_with("[REDACTED]") {
                search_start = value_start + 10;
                continue;
            }

            let value_end = result[value_start..]
                .find(|c: char| c.is_whitespace() || delimiters.contains(&c))
                .map(|pos| value_start + pos)
                .unwrap_or(result.len());

            if value_end > value_start {
                result.replace_range(value_start..value_end, "[REDACTED]");
                search_start = value_start + 10; // "[REDACTED]" is 10 chars
            } else {
                search_start = value_start;
            }
        }

        result
    }

    /// Sanitize error messages by removing bearer tokens and SAS signatures.
    pub(crate) fn sanitize_error_message(msg: &str) -> String {
        let result = Self::redact_after(msg, "Bearer ", &['"', '\'', ',']);
        Self::redact_after(&result, "sig=", &['"', '\'', ',', '&'])
    }

    /// Prepare a service-supplied message for surfacing in an error.
    ///
    /// Bearer tokens and SAS signatures are redacted, then the result is
    /// truncated to 1000 bytes on a character boundary.
    pub fn truncate_message(msg: &str) -> String {
        let sanitized = Self::sanitize_error_message(msg);

        if sanitized.len() > Self::MAX_ERROR_MESSAGE_LEN {
            let mut cut = Self::MAX_ERROR_MESSAGE_LEN;
            while !sanitized.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}... (truncated)", &sanitized[..cut])
        } else {
            sanitized
        }
    }

    /// Check the response status and return an error if not successful.
    fn check_response(response: RawResponse) -> TablesResult<RawResponse> {
        if response.status.is_success() {
            return Ok(response);
        }

        let status = response.status.as_u16();
        if let Ok(envelope) = serde_json::from_slice::<ODataErrorEnvelope>(&response.body) {
            return Err(TablesError::Api {
                code: envelope.error.code,
                message: Self::truncate_message(&envelope.error.message.value),
            });
        }

        let body = String::from_utf8_lossy(&response.body);
        Err(TablesError::http(status, Self::truncate_message(&body)))
    }
}

impl TableServiceClientBuilder {
    /// Set the service endpoint URL.
    ///
    /// This should be in the format:
    /// `https://<account>.table.core.windows.net`
    ///
    /// If not set, the builder will check the `AZURE_TABLES_ENDPOINT`
    /// environment variable.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the credential to use for authentication.
    ///
    /// If not set, the builder will use [`TableCredential::from_env()`].
    pub fn credential(mut self, credential: TableCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Set the service version.
    ///
    /// Defaults to [`DEFAULT_API_VERSION`] (`2019-02-02`).
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Set a custom HTTP client.
    ///
    /// **Note:** If you provide a custom HTTP client, any timeout configuration
    /// via [`connect_timeout`](Self::connect_timeout) or
    /// [`read_timeout`](Self::read_timeout) will be ignored.
    pub fn http_client(mut self, client: HttpClient) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the read timeout.
    ///
    /// It covers the entire request/response cycle including reading the body.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the retry policy for transient errors.
    ///
    /// Defaults to 3 retries with 500ms initial backoff.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Build the `TableServiceClient`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No endpoint is provided and `AZURE_TABLES_ENDPOINT` is not set
    /// - The endpoint URL is invalid or cannot be a base URL
    pub fn build(self) -> TablesResult<TableServiceClient> {
        let http = self.http_client.unwrap_or_else(|| {
            let connect_timeout = self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
            let read_timeout = self.read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT);

            reqwest::Client::builder()
                .connect_timeout(connect_timeout)
                .timeout(read_timeout)
                .build()
                .expect("failed to build HTTP client")
        });

        let endpoint_str = self
            .endpoint
            .or_else(|| std::env::var("AZURE_TABLES_ENDPOINT").ok())
            .ok_or_else(|| {
                TablesError::MissingConfig(
                    "endpoint is required. Set it via builder or AZURE_TABLES_ENDPOINT env var."
                        .into(),
                )
            })?;

        let mut endpoint = Url::parse(&endpoint_str)
            .map_err(|e| TablesError::invalid_endpoint_with_source("invalid endpoint URL", e))?;
        if endpoint.cannot_be_a_base() {
            return Err(TablesError::invalid_endpoint(
                "endpoint must be a hierarchical URL",
            ));
        }
        // Emulator endpoints carry the account name as a path segment.
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let credential = self
            .credential
            .map(Ok)
            .unwrap_or_else(TableCredential::from_env)?;

        Ok(TableServiceClient {
            http,
            endpoint,
            credential,
            api_version: self
                .api_version
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            retry_policy: self.retry_policy.unwrap_or_default(),
        })
    }
}
