//! Error types for background removal, compositing and export operations

use thiserror::Error;

/// Result type alias for studio operations
pub type Result<T> = std::result::Result<T, StudioError>;

/// Error types for every stage of the image pipeline
#[derive(Error, Debug)]
pub enum StudioError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Input bytes could not be decoded into a bitmap
    #[error("Decode error: {0}")]
    Decode(String),

    /// The removal service could not be reached
    #[error("Network error: {0}")]
    Network(String),

    /// The removal service rejected the credential
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The removal service refused the call because credits or rate limits are exhausted
    #[error("Quota exceeded: {0}")]
    Quota(String),

    /// The removal service answered with an error or an unusable body
    #[error("Service error: {0}")]
    Service(String),

    /// A background image could not be fetched or decoded at render time
    #[error("Background fetch error: {0}")]
    CompositeFetch(String),

    /// An operation that needs processed images found none
    #[error("Nothing to export: no processed images in batch")]
    EmptyBatch,

    /// No entry with the given id exists in the batch
    #[error("Unknown image id '{0}'")]
    UnknownImage(String),

    /// The entry exists but has no cutout yet
    #[error("Image '{0}' has not been processed")]
    NotProcessed(String),

    /// An explicit id is already taken
    #[error("Image id '{0}' is already in use")]
    DuplicateId(String),

    /// An explicit id cannot be used as an archive file name
    #[error("Invalid image id '{0}': use letters, digits, '.', '_' or '-'")]
    InvalidId(String),

    /// A batch removal run is already in flight
    #[error("Background removal is already running")]
    AlreadyRunning,

    /// The operation was cancelled before it completed
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Archive writing errors
    #[error("Archive error: {0}")]
    Archive(String),
}

/// Coarse grouping of errors used in per-item reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Decode,
    Network,
    Auth,
    Quota,
    Service,
    CompositeFetch,
    Cancelled,
    Usage,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Decode => "decode",
            Self::Network => "network",
            Self::Auth => "auth",
            Self::Quota => "quota",
            Self::Service => "service",
            Self::CompositeFetch => "background-fetch",
            Self::Cancelled => "cancelled",
            Self::Usage => "usage",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl StudioError {
    /// Create a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Create a new authentication error
    pub fn auth<S: Into<String>>(msg: S) -> Self {
        Self::Auth(msg.into())
    }

    /// Create a new quota error
    pub fn quota<S: Into<String>>(msg: S) -> Self {
        Self::Quota(msg.into())
    }

    /// Create a new service error
    pub fn service<S: Into<String>>(msg: S) -> Self {
        Self::Service(msg.into())
    }

    /// Create a new background fetch error
    pub fn composite_fetch<S: Into<String>>(msg: S) -> Self {
        Self::CompositeFetch(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new archive error
    pub fn archive<S: Into<String>>(msg: S) -> Self {
        Self::Archive(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create a network error from a transport failure with request context
    pub fn network_error(operation: &str, error: &reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            "timed out"
        } else if error.is_connect() {
            "connection failed"
        } else {
            "transport error"
        };
        Self::Network(format!("{} {}: {}", operation, kind, error))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
    ) -> Self {
        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {})",
            parameter, value, valid_range
        ))
    }

    /// Category used when reporting this error against a single image
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Decode(_) | Self::Image(_) => ErrorCategory::Decode,
            Self::Network(_) => ErrorCategory::Network,
            Self::Auth(_) => ErrorCategory::Auth,
            Self::Quota(_) => ErrorCategory::Quota,
            Self::Service(_) => ErrorCategory::Service,
            Self::CompositeFetch(_) => ErrorCategory::CompositeFetch,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::EmptyBatch
            | Self::UnknownImage(_)
            | Self::NotProcessed(_)
            | Self::DuplicateId(_)
            | Self::InvalidId(_)
            | Self::AlreadyRunning
            | Self::InvalidConfig(_) => ErrorCategory::Usage,
            Self::Io(_) | Self::Archive(_) => ErrorCategory::Internal,
        }
    }

    /// Message without the variant prefix, for reports that carry the category separately
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Decode(msg)
            | Self::Network(msg)
            | Self::Auth(msg)
            | Self::Quota(msg)
            | Self::Service(msg)
            | Self::CompositeFetch(msg)
            | Self::InvalidConfig(msg)
            | Self::Archive(msg) => msg.clone(),
            Self::Io(e) => e.to_string(),
            Self::Image(e) => e.to_string(),
            _ => self.to_string(),
        }
    }

    /// Rebuild a typed error from a reported category and detail message
    #[must_use]
    pub fn from_category(category: ErrorCategory, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match category {
            ErrorCategory::Decode => Self::Decode(detail),
            ErrorCategory::Network => Self::Network(detail),
            ErrorCategory::Auth => Self::Auth(detail),
            ErrorCategory::Quota => Self::Quota(detail),
            ErrorCategory::CompositeFetch => Self::CompositeFetch(detail),
            ErrorCategory::Cancelled => Self::Cancelled,
            ErrorCategory::Service | ErrorCategory::Usage | ErrorCategory::Internal => {
                Self::Service(detail)
            },
        }
    }
}

impl From<zip::result::ZipError> for StudioError {
    fn from(error: zip::result::ZipError) -> Self {
        Self::Archive(error.to_string())
    }
}
