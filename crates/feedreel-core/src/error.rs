//! Error types for feedreel Core

use thiserror::Error;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Catalog loading failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Payload had no usable `id,url` rows
    #[error("Catalog is empty or malformed")]
    Empty,

    /// Nothing fetched and nothing cached
    #[error("No catalog data available")]
    NoData,

    #[error("Catalog fetch failed: {0}")]
    Network(String),
}

impl CatalogError {
    pub fn error_code(&self) -> &'static str {
        match self {
            CatalogError::Empty => "CATALOG_EMPTY",
            CatalogError::NoData => "CATALOG_NO_DATA",
            CatalogError::Network(_) => "CATALOG_NETWORK",
        }
    }
}

/// Jump target did not match any catalog id
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No catalog entry with id #{id}")]
pub struct NotFoundError {
    pub id: String,
}

/// Failure of a single media load attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaLoadError {
    #[error("Load timed out")]
    Timeout,

    #[error("Backend error: {0}")]
    BackendFatal(String),

    #[error("Unsupported source: {0}")]
    Unsupported(String),

    #[error("Source unreachable")]
    Unreachable,
}

impl MediaLoadError {
    pub fn error_code(&self) -> &'static str {
        match self {
            MediaLoadError::Timeout => "LOAD_TIMEOUT",
            MediaLoadError::BackendFatal(_) => "BACKEND_FATAL",
            MediaLoadError::Unsupported(_) => "UNSUPPORTED",
            MediaLoadError::Unreachable => "UNREACHABLE",
        }
    }
}

/// Advisory result of a reachability probe. Never fatal on its own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Validation failed for {url}: {reason}")]
pub struct ValidationFailure {
    pub url: String,
    pub reason: String,
}

/// Persistent store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Crate-level error
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    MediaLoad(#[from] MediaLoadError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid playback rate: {0}")]
    InvalidPlaybackRate(f64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The session event loop is gone
    #[error("Session closed")]
    SessionClosed,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl Error {
    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Catalog(CatalogError::Network(_))
                | Error::NotFound(_)
                | Error::MediaLoad(_)
                | Error::Store(_)
                | Error::InvalidPlaybackRate(_)
                | Error::Network(_)
        )
    }

    /// Returns the error code for event reporting
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Catalog(e) => e.error_code(),
            Error::NotFound(_) => "NOT_FOUND",
            Error::MediaLoad(e) => e.error_code(),
            Error::Store(_) => "STORE",
            Error::InvalidPlaybackRate(_) => "INVALID_RATE",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::SessionClosed => "SESSION_CLOSED",
            Error::Network(_) => "NETWORK",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::from(CatalogError::Empty).error_code(), "CATALOG_EMPTY");
        assert_eq!(Error::from(MediaLoadError::Timeout).error_code(), "LOAD_TIMEOUT");
        assert_eq!(Error::SessionClosed.error_code(), "SESSION_CLOSED");
    }

    #[test]
    fn test_recoverable() {
        assert!(Error::from(MediaLoadError::Unreachable).is_recoverable());
        assert!(!Error::from(CatalogError::NoData).is_recoverable());
        assert!(!Error::SessionClosed.is_recoverable());
    }
}
