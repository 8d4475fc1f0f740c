use thiserror::Error;

/// Why an endpoint URL was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// Not a URI at all
    ParseError,
    /// No host
    MissingAuthority,
    /// Relative URL; endpoints must compose to an absolute one
    MissingScheme,
}

/// Errors raised while building, encoding or wiring up a request.
///
/// These never reach completion handlers directly: the dispatcher folds
/// them into classified transport failures, except for multipart encoding
/// failures which are only reported through [`crate::default_error`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RequestError {
    #[error("could not assemble HTTP request: {0}")]
    RequestBuild(#[from] http::Error),

    /// An endpoint default header has an unusable name
    #[error("bad header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// An endpoint default header has an unusable value
    #[error("bad header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// The composed endpoint URL is unusable; match on `kind`, log `reason`
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        url: String,
        kind: InvalidUriKind,
        reason: String,
    },

    /// Plain `http` while the transport is TLS-only, or a non-http scheme
    #[error("scheme '{scheme}' rejected: {reason}")]
    InvalidScheme { scheme: String, reason: String },

    /// Building the rustls client configuration failed
    #[error("TLS setup failed: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// JSON encoding error
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Query string encoding error
    #[error("Query encoding failed: {0}")]
    QueryEncode(#[from] serde_urlencoded::ser::Error),

    /// A multipart part could not be encoded
    #[error("Multipart encoding failed for '{field}': {reason}")]
    Multipart {
        /// Field name of the offending part
        field: String,
        /// Why the part was rejected
        reason: String,
    },

    /// No Tokio runtime was available to drive requests
    #[error("No Tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_tls_setup_keeps_cause() {
        let err = RequestError::Tls("no root certificates".into());
        assert_eq!(err.source().unwrap().to_string(), "no root certificates");
        assert_eq!(err.to_string(), "TLS setup failed: no root certificates");
    }

    #[test]
    fn test_invalid_uri_message_names_url() {
        let err = RequestError::InvalidUri {
            url: "not a url".to_owned(),
            kind: InvalidUriKind::ParseError,
            reason: "invalid uri character".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid URL 'not a url': invalid uri character"
        );
    }

    #[test]
    fn test_multipart_error_message() {
        let err = RequestError::Multipart {
            field: "photo".to_owned(),
            reason: "contains a line break".to_owned(),
        };
        assert!(err.to_string().contains("'photo'"));
    }
}
