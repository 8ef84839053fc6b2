//! Error types for jukebox-session
//!
//! Defines the service-level error plus one error enum per external
//! collaborator. Collaborator errors are `Clone` so a single failed flight can
//! be handed to every caller that joined it.

use thiserror::Error;

/// Main error type for jukebox-session
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shared library errors
    #[error(transparent)]
    Common(#[from] jukebox_common::Error),

    /// Device session errors
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Credential errors
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Remote Web API errors
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using jukebox-session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Remote Web API (player and playlist endpoints) errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Credential rejected (HTTP 401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resource does not exist (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Throttled (HTTP 429)
    #[error("Rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Any other non-success status
    #[error("API error {status}: {message}")]
    Status { status: u16, message: String },

    /// Transport failure (DNS, connect, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// Response body could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// No credential available to sign the request
    #[error("No credential: {0}")]
    Credential(String),
}

impl ApiError {
    /// Whether this failure says something about connectivity rather than
    /// about the request itself
    pub fn is_network_failure(&self) -> bool {
        match self {
            ApiError::Network(_) => true,
            ApiError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }
}

/// Credential acquisition errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Credential endpoint unreachable
    #[error("Credential source unreachable: {0}")]
    Unreachable(String),

    /// Credential endpoint answered with a failure status
    #[error("Credential source returned {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Credential endpoint answered with an unusable body
    #[error("Invalid credential response: {0}")]
    InvalidResponse(String),
}

/// Playback SDK errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SdkError {
    /// SDK refused the credential
    #[error("SDK authentication failed: {0}")]
    Authentication(String),

    /// SDK could not be constructed
    #[error("SDK unavailable: {0}")]
    Unavailable(String),

    /// Any other SDK failure
    #[error("SDK error: {0}")]
    Other(String),
}

/// Device session errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// SDK did not load within the bounded wait
    #[error("Playback SDK unavailable: {0}")]
    SdkUnavailable(String),

    /// SDK rejected the credential and the retry budget is spent
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// SDK connect step returned failure
    #[error("Connect failed: {0}")]
    ConnectError(String),

    /// Account cannot be used for playback
    #[error("Account error: {0}")]
    AccountError(String),

    /// SDK failed to initialize
    #[error("Initialization error: {0}")]
    InitializationError(String),

    /// No ready signal within the bounded wait
    #[error("Device did not become ready within {0}ms")]
    ReadyTimeout(u64),

    /// Credential could not be obtained
    #[error("Credential unavailable: {0}")]
    Token(#[from] TokenError),

    /// Recovery attempt budget consumed
    #[error("Recovery exhausted after {0} attempts")]
    RecoveryExhausted(u32),

    /// Session is in the terminal error state and needs an explicit reset
    #[error("Device session failed: {0}")]
    SessionFailed(String),

    /// Session was torn down while the operation was running
    #[error("Device session destroyed")]
    Destroyed,
}

/// Track suggestion collaborator errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SuggestionError {
    /// Suggestion service unreachable or failed
    #[error("Suggestion service unavailable: {0}")]
    Unavailable(String),

    /// Suggestion service answered with an unusable body
    #[error("Invalid suggestion response: {0}")]
    InvalidResponse(String),
}
