//! Typed error hierarchy for the falcon-sdk crate.
//!
//! Every fallible operation in the library returns [`FalconError`]. The
//! dispatcher's infallible entry point ([`crate::client::FalconClient::command`])
//! folds these errors back into a synthetic response envelope using
//! [`FalconError::status_code`], so callers that prefer the envelope style
//! never see a `Result` at all.
//!
//! Variant mapping onto envelope status codes:
//!
//! | Variant | Status |
//! |---------|--------|
//! | `InvalidArgument` | 400 |
//! | `Auth`, `NoAuthentication` | 401 |
//! | `InvalidMethod` | 405 |
//! | `InvalidOperation` | 418 |
//! | `Api` | the vendor's status |
//! | everything else | 500 |

use reqwest::StatusCode;

/// Unified error type for all falcon-sdk operations.
#[derive(Debug, thiserror::Error)]
pub enum FalconError {
    /// Failure at the OAuth2 token endpoint that is not a plain HTTP
    /// status (missing token field, token absent after a successful login).
    #[error("authentication failed: {message}")]
    Auth {
        /// Human-readable description, including the vendor's error text
        /// when one was returned.
        message: String,
        /// The underlying transport or parse error, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The Falcon API returned a non-success HTTP status code.
    ///
    /// `body` is the raw response body, which for Falcon is a JSON
    /// document with an `errors` array.
    #[error("API error {status}: {body}")]
    Api {
        /// The HTTP status code returned by the API.
        status: StatusCode,
        /// The raw response body text.
        body: String,
    },

    /// The requested operation ID is not present in the catalog.
    #[error("invalid API operation specified: {0}")]
    InvalidOperation(String),

    /// The operation's HTTP method is not one the SDK will send.
    #[error("invalid HTTP method specified: {0}")]
    InvalidMethod(String),

    /// A payload or path argument failed validation.
    #[error("{0}")]
    InvalidArgument(String),

    /// The base URL could not be resolved.
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// No credentials or token were configured.
    #[error("no authentication mechanism has been specified")]
    NoAuthentication,

    /// Configuration file or HTTP client construction failed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The endpoint manifest could not be parsed.
    #[error("failed to parse endpoint manifest: {0}")]
    Manifest(#[from] toml::de::Error),

    /// JSON (de)serialization failed.
    #[error("failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    /// Transport-level failure: DNS, TCP, TLS, timeout.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Local I/O failure (config files, upload sources).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FalconError {
    /// Status code used when this error is folded into a response envelope.
    pub fn status_code(&self) -> u16 {
        match self {
            FalconError::InvalidArgument(_) => 400,
            FalconError::Auth { .. } | FalconError::NoAuthentication => 401,
            FalconError::InvalidMethod(_) => 405,
            FalconError::InvalidOperation(_) => 418,
            FalconError::Api { status, .. } => status.as_u16(),
            _ => 500,
        }
    }
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, FalconError>;
