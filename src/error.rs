//! Error types for prometeo-dl
//!
//! The taxonomy exposed to callers is small by design:
//! - [`Error::InvalidArgument`] for caller-supplied values that fail validation
//! - [`Error::BadUrl`] for URLs the engine cannot or will not download from
//! - [`Error::BadMetadata`] for corrupt manifests and inconsistent origin metadata
//! - [`Error::Internal`] / [`Error::Io`] for filesystem and composition failures

use thiserror::Error;

/// Result type alias for prometeo-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for prometeo-dl
#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied value failed validation (wrong shape, empty,
    /// non-positive, destination already present, temp dir not creatable)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// URL is syntactically invalid, HEAD returned non-2xx, or the origin
    /// does not honor byte-range requests
    #[error("bad URL: {0}")]
    BadUrl(String),

    /// Corrupt or inconsistent manifest, or origin metadata the engine
    /// cannot plan from (e.g. a zero-length content length)
    #[error("bad metadata: {0}")]
    BadMetadata(String),

    /// Engine-internal failure: a range worker died leaving its part
    /// incomplete, or composition could not be carried out
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error creating work directories, writing parts, or composing
    /// the final artifact
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an [`Error::Internal`] from anything displayable.
    pub(crate) fn internal(message: impl std::fmt::Display) -> Self {
        Error::Internal(message.to_string())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_match_taxonomy() {
        let cases: Vec<(Error, &str)> = vec![
            (
                Error::InvalidArgument("connections must be > 0".into()),
                "invalid argument:",
            ),
            (Error::BadUrl("not absolute".into()), "bad URL:"),
            (Error::BadMetadata("invalid manifest".into()), "bad metadata:"),
            (Error::Internal("range 2 incomplete".into()), "internal error:"),
        ];

        for (err, prefix) in cases {
            let rendered = err.to_string();
            assert!(
                rendered.starts_with(prefix),
                "{rendered:?} should start with {prefix:?}"
            );
        }
    }

    #[test]
    fn io_errors_convert_via_from() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)), "expected Io variant, got {err:?}");
    }
}
