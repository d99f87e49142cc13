//! Errors and their engine-facing classification
//!
//! Every fallible API in the crate returns [`Result`]. What the engine does
//! with a failure depends only on [`Error::class`]: configuration and internal
//! errors end the run, retryable fetch errors go through the shrink ladder,
//! fatal fetch errors are written to the error sink.

use thiserror::Error;

/// Crate-wide error
#[derive(Error, Debug)]
pub enum Error {
    // Setup
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Missing required config field: {field}")]
    MissingConfigField { field: String },

    #[error("Invalid value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Authentication rejected: {message}")]
    Auth { message: String },

    // Fetching a unit
    #[error("HTTP transport: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Rate limited for {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("No response within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Gave up after {max_retries} retries")]
    MaxRetriesExceeded { max_retries: u32 },

    #[error("JSONPath: {message}")]
    JsonPath { message: String },

    #[error("Undecodable response: {message}")]
    Decode { message: String },

    /// Raised by host-provided sources
    #[error("Source failed: {message}")]
    Source { message: String },

    // Rows
    #[error("Failed to transform field '{field}': {message}")]
    Transform { field: String, message: String },

    // Bookkeeping
    #[error("State error: {message}")]
    State { message: String },

    #[error("Checkpoint failed: {message}")]
    Checkpoint { message: String },

    #[error("Sink rejected write: {message}")]
    Sink { message: String },

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("No such file: {path}")]
    FileNotFound { path: String },

    /// Anything a host source wraps with `anyhow`
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// How the engine reacts to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Ends the run before or without further progress
    Configuration,
    /// Shrink the unit and try again
    RetryableFetch,
    /// Record the unit and move past it
    FatalFetch,
    /// A single row could not be mapped
    Transform,
    /// State, sink or I/O failure; ends the run
    Internal,
}

impl ErrorClass {
    /// Snake-case label used in error records and logs
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::RetryableFetch => "retryable_fetch",
            Self::FatalFetch => "fatal_fetch",
            Self::Transform => "transform",
            Self::Internal => "internal",
        }
    }

    /// Whether the whole run stops
    pub fn aborts(self) -> bool {
        matches!(self, Self::Configuration | Self::Internal)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! message_ctor {
    ($($(#[$doc:meta])* $name:ident => $variant:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $name(message: impl Into<String>) -> Self {
                Self::$variant { message: message.into() }
            }
        )*
    };
}

impl Error {
    message_ctor! {
        /// [`Error::Config`]
        config => Config;
        /// [`Error::Auth`]
        auth => Auth;
        /// [`Error::Decode`]
        decode => Decode;
        /// [`Error::Source`], for host sources
        upstream => Source;
        /// [`Error::State`]
        state => State;
        /// [`Error::Checkpoint`]
        checkpoint => Checkpoint;
        /// [`Error::Sink`]
        sink => Sink;
    }

    /// [`Error::MissingConfigField`]
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingConfigField {
            field: field.into(),
        }
    }

    /// [`Error::InvalidConfigValue`]
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// [`Error::HttpStatus`]
    pub fn http_status(status: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            body: body.into(),
        }
    }

    /// [`Error::Transform`] for one field
    pub fn transform(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transform {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Transient upstream failure: transport, throttling, deadline or 5xx
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimited { .. } | Self::Timeout { .. } => true,
            Self::HttpStatus { status, .. } => {
                matches!(status, 429 | 500 | 502 | 503 | 504 | 520..=524)
            }
            _ => false,
        }
    }

    /// Engine classification
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config { .. }
            | Self::MissingConfigField { .. }
            | Self::InvalidConfigValue { .. }
            | Self::YamlParse(_)
            | Self::InvalidUrl(_)
            | Self::Auth { .. }
            | Self::HttpStatus {
                status: 401 | 403, ..
            } => ErrorClass::Configuration,
            Self::Transform { .. } => ErrorClass::Transform,
            Self::State { .. }
            | Self::Checkpoint { .. }
            | Self::Sink { .. }
            | Self::Io(_)
            | Self::FileNotFound { .. } => ErrorClass::Internal,
            other if other.is_retryable() => ErrorClass::RetryableFetch,
            _ => ErrorClass::FatalFetch,
        }
    }

    /// Class label, as written to error records
    pub fn kind(&self) -> &'static str {
        self.class().as_str()
    }
}

/// Result with the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;
