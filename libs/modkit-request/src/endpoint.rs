//! Endpoint descriptors: per-request configuration owned by the caller.

use crate::network_error::ClassifiedError;
use crate::retry::RetryPrompt;
use crate::transport::MultipartFile;
use std::fmt;

/// JSON object used for request parameters
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// HTTP request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Options,
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Trace,
    Connect,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Options => "OPTIONS",
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Trace => "TRACE",
            Self::Connect => "CONNECT",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for http::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Options => Self::OPTIONS,
            HttpMethod::Get => Self::GET,
            HttpMethod::Head => Self::HEAD,
            HttpMethod::Post => Self::POST,
            HttpMethod::Put => Self::PUT,
            HttpMethod::Patch => Self::PATCH,
            HttpMethod::Delete => Self::DELETE,
            HttpMethod::Trace => Self::TRACE,
            HttpMethod::Connect => Self::CONNECT,
        }
    }
}

/// API version path segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ApiVersion {
    /// No version segment
    #[default]
    None,
    V1,
    V2,
    V3,
    V4,
}

impl ApiVersion {
    /// Path segment, `None` for unversioned endpoints
    #[must_use]
    pub fn segment(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::V1 => Some("v1"),
            Self::V2 => Some("v2"),
            Self::V3 => Some("v3"),
            Self::V4 => Some("v4"),
        }
    }
}

/// Credentials attached to a request
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Authorization {
    /// HTTP basic authentication
    Basic { username: String, password: String },
    #[default]
    None,
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::None => f.write_str("None"),
        }
    }
}

/// Read-only description of one remote operation.
///
/// Only `base_url`, `path` and `method` are required; everything else has
/// a default matching a plain unauthenticated JSON endpoint that offers a
/// retry prompt.
pub trait Endpoint: Send + Sync + 'static {
    fn base_url(&self) -> &str;

    fn path(&self) -> &str;

    fn method(&self) -> HttpMethod;

    /// Segment placed between the base URL and the API version
    fn pre_path(&self) -> &str {
        ""
    }

    fn api_version(&self) -> ApiVersion {
        ApiVersion::None
    }

    fn parameters(&self) -> JsonObject {
        JsonObject::new()
    }

    fn default_parameters(&self) -> JsonObject {
        JsonObject::new()
    }

    fn default_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn authorization(&self) -> Authorization {
        Authorization::None
    }

    /// Error code that means "not authorized" for this endpoint
    fn code_for_not_authorized_error(&self) -> Option<&str> {
        None
    }

    /// Whether failures may be offered to the user for retry
    fn should_handle_retry(&self) -> bool {
        true
    }

    /// Ask the user whether to retry.
    ///
    /// Answer through [`RetryPrompt::accept`] or [`RetryPrompt::decline`];
    /// the prompt may be moved elsewhere and answered later. The default
    /// implementation has no user to ask and declines.
    fn handle_retry<E: ClassifiedError>(&self, error: Option<&E>, prompt: RetryPrompt) {
        let _ = error;
        prompt.decline();
    }

    /// Called with the errors matching [`Endpoint::code_for_not_authorized_error`]
    fn handle_authentication_failure<E: ClassifiedError>(&self, errors: &[E]) {
        let _ = errors;
    }

    /// Files sent as parts of a multipart upload
    fn multipart_files(&self) -> Vec<MultipartFile> {
        Vec::new()
    }

    /// Absolute URL: `base + pre_path + "/" + version + path`, or `base + path`
    fn full_url(&self) -> String {
        match self.api_version().segment() {
            Some(version) => format!(
                "{}{}/{}{}",
                self.base_url(),
                self.pre_path().trim(),
                version,
                self.path()
            ),
            None => format!("{}{}", self.base_url(), self.path()),
        }
    }

    /// Default parameters merged with [`Endpoint::parameters`]; on a key
    /// conflict the default value is kept.
    fn merged_parameters(&self) -> JsonObject {
        let mut merged = self.default_parameters();
        for (key, value) in self.parameters() {
            merged.entry(key).or_insert(value);
        }
        merged
    }
}
