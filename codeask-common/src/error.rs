//! Error types for the codeask engine.

use thiserror::Error;

/// Result type alias using the codeask error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for codeask crates.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (including use of an unconfigured client)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Session store unavailable or failed
    #[error("Session store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The agent runtime rejected a request or reported a failure
    #[error("Agent runtime error: {0}")]
    External(String),

    /// The live event stream failed or closed early
    #[error("Event stream error: {0}")]
    Stream(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip any context wrappers and return the underlying error.
    pub fn root(&self) -> &Error {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this is a session store failure.
    pub fn is_store(&self) -> bool {
        matches!(self.root(), Self::Store(_))
    }

    /// Check if this is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self.root(), Self::Config(_))
    }

    /// Check if this error came from the event stream or the runtime transport.
    pub fn is_stream(&self) -> bool {
        matches!(self.root(), Self::Stream(_) | Self::Http(_))
    }
}

impl From<crate::validation::ValidationError> for Error {
    fn from(err: crate::validation::ValidationError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Extension trait for adding context to any error type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_with_context() {
        let err = Error::Internal("db failed".into());
        let with_ctx = err.with_context("loading session");
        assert!(matches!(with_ctx, Error::WithContext { .. }));
        assert_eq!(with_ctx.to_string(), "loading session: Internal error: db failed");
    }

    #[test]
    fn test_root_sees_through_context() {
        let err = Error::Config("missing endpoint".into())
            .with_context("building client")
            .with_context("starting");
        assert!(err.is_config());
        assert!(!err.is_store());
    }

    #[test]
    fn test_store_error_conversion() {
        let err: Error = rusqlite::Error::InvalidQuery.into();
        assert!(err.is_store());
    }

    #[test]
    fn test_result_ext_context() {
        let res: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let err = res.context("opening sessions.db").unwrap_err();
        assert!(err.to_string().starts_with("opening sessions.db"));
    }

    #[test]
    fn test_stream_classification() {
        assert!(Error::Stream("closed".into()).is_stream());
        assert!(!Error::External("rejected".into()).is_stream());
    }
}
