use thiserror::Error;

/// Errors that can occur when interacting with the Azure Tables service.
#[derive(Error, Debug)]
pub enum TablesError {
    /// The request failed due to an HTTP error.
    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A payload could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The HTTP request failed at the transport level.
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    /// The endpoint URL is invalid.
    #[error("Invalid endpoint URL: {message}")]
    InvalidEndpoint {
        message: String,
        #[source]
        source: Option<url::ParseError>,
    },

    /// A required configuration value is missing.
    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    /// The service returned an `odata.error` response.
    #[error("API error ({code}): {message}")]
    Api { code: String, message: String },

    /// A request could not be built from the supplied values.
    #[error("Invalid request: {0}")]
    Builder(String),

    /// A transaction was submitted without any actions.
    #[error("transaction contains no actions")]
    EmptyTransaction,

    /// An entity payload lacks one of its identity properties.
    #[error("entity is missing required string property `{field}`")]
    MissingEntityKey { field: &'static str },

    /// The service rejected a transaction.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// A service response could not be decoded.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// A rejected transaction, correlated to the action that caused it.
///
/// `failed_index` is the zero-based position of the offending action in the
/// submitted sequence. It is `None` when the service message carries no
/// `<index>:` prefix.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transaction failed ({code}): {message}")]
pub struct TransactionError {
    /// HTTP status of the failing response, when one was observed.
    pub status: Option<u16>,
    /// Service error code, e.g. `EntityAlreadyExists`.
    pub code: String,
    /// Service message with the index prefix removed.
    pub message: String,
    /// Position of the failed action, if the service reported one.
    pub failed_index: Option<usize>,
}

impl TablesError {
    /// Create an HTTP error from a status code and message.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Create an endpoint error without an underlying parse error.
    pub fn invalid_endpoint(message: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            message: message.into(),
            source: None,
        }
    }

    /// Create an endpoint error wrapping a URL parse failure.
    pub fn invalid_endpoint_with_source(message: impl Into<String>, source: url::ParseError) -> Self {
        Self::InvalidEndpoint {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a malformed response error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }
}

/// Result type alias for Tables operations.
pub type TablesResult<T> = std::result::Result<T, TablesError>;
