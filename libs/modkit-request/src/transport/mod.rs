//! Boundary to the HTTP client that actually moves bytes.
//!
//! The dispatcher only needs two operations: a plain request and a
//! multipart upload. Both resolve to a [`RawResponse`]; only multipart
//! encoding can fail before anything is sent.

pub mod client;
pub mod multipart;

use crate::endpoint::{Authorization, HttpMethod, JsonObject};
use crate::error::{InvalidUriKind, RequestError};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

pub use self::client::HyperTransport;
pub use self::multipart::MultipartFile;

/// Unknown transport failure
pub const CODE_UNKNOWN: i64 = -1;
/// URL could not be parsed
pub const CODE_BAD_URL: i64 = -1000;
/// Request timed out
pub const CODE_TIMED_OUT: i64 = -1001;
/// URL scheme is not supported (or not allowed)
pub const CODE_UNSUPPORTED_URL: i64 = -1002;
/// Host refused or could not be reached
pub const CODE_CANNOT_CONNECT_TO_HOST: i64 = -1004;
/// Connection dropped mid-request
pub const CODE_NETWORK_CONNECTION_LOST: i64 = -1005;
/// Device is offline
pub const CODE_NOT_CONNECTED_TO_INTERNET: i64 = -1009;
/// Response body exceeded the configured size limit
pub const CODE_RESPONSE_TOO_LARGE: i64 = -1103;

/// How parameters travel with the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterEncoding {
    /// URL query string
    Query,
    /// JSON request body
    Json,
}

impl ParameterEncoding {
    /// GET sends parameters in the query string, everything else as JSON
    #[must_use]
    pub fn for_method(method: HttpMethod) -> Self {
        if method == HttpMethod::Get {
            Self::Query
        } else {
            Self::Json
        }
    }
}

/// Fully resolved request handed to a [`Transport`]
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub method: HttpMethod,
    pub parameters: JsonObject,
    pub headers: Vec<(String, String)>,
    pub encoding: ParameterEncoding,
    pub authorization: Authorization,
}

/// Transport-level failure: no usable response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    /// Platform-style error code (see the `CODE_*` constants)
    pub code: i64,
    pub message: String,
}

impl TransportFailure {
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Fold a request-construction error into a failure code
    #[must_use]
    pub fn from_request_error(err: &RequestError) -> Self {
        let code = match err {
            RequestError::InvalidUri { .. } => CODE_BAD_URL,
            RequestError::InvalidScheme { .. } => CODE_UNSUPPORTED_URL,
            _ => CODE_UNKNOWN,
        };
        Self::new(code, err.to_string())
    }
}

/// What came back from one attempt.
///
/// Either `failure` is set, or `status` is set with an optional parsed body.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: Option<u16>,
    pub body: Option<Value>,
    pub failure: Option<TransportFailure>,
}

impl RawResponse {
    /// Response with a parsed JSON body
    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status: Some(status),
            body: Some(body),
            failure: None,
        }
    }

    /// Response without a body
    #[must_use]
    pub fn empty(status: u16) -> Self {
        Self {
            status: Some(status),
            body: None,
            failure: None,
        }
    }

    /// Transport-level failure
    #[must_use]
    pub fn failure(code: i64, message: impl Into<String>) -> Self {
        Self {
            status: None,
            body: None,
            failure: Some(TransportFailure::new(code, message)),
        }
    }

    /// Parse raw body bytes the way every transport should.
    ///
    /// Empty bodies become `None`; bodies that are not JSON become a
    /// failure whose code is the HTTP status.
    #[must_use]
    pub fn from_body(status: u16, body: &Bytes) -> Self {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Self::empty(status);
        }
        match serde_json::from_slice::<Value>(body) {
            Ok(value) => Self::json(status, value),
            Err(e) => Self {
                status: Some(status),
                body: None,
                failure: Some(TransportFailure::new(
                    i64::from(status),
                    format!("Response could not be serialized: {e}"),
                )),
            },
        }
    }
}

/// HTTP client used by the dispatcher.
///
/// Implementations must not panic on network errors; every outcome is a
/// [`RawResponse`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send a request with URL-query or JSON encoded parameters
    async fn perform(&self, request: TransportRequest) -> RawResponse;

    /// Send a `multipart/form-data` POST.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] only when the body cannot be encoded;
    /// transmission problems are reported inside the [`RawResponse`].
    async fn perform_multipart(
        &self,
        request: TransportRequest,
        files: Vec<MultipartFile>,
    ) -> Result<RawResponse, RequestError>;
}

/// Validate an absolute http(s) URL.
///
/// # Errors
///
/// Returns [`RequestError::InvalidUri`] or [`RequestError::InvalidScheme`].
pub fn validate_url(url: &str, allow_http: bool) -> Result<http::Uri, RequestError> {
    let uri: http::Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| RequestError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })?;

    if uri.authority().is_none() {
        return Err(RequestError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::MissingAuthority,
            reason: "missing host/authority".to_owned(),
        });
    }

    match uri.scheme_str() {
        Some("https") => Ok(uri),
        Some("http") if allow_http => Ok(uri),
        Some("http") => Err(RequestError::InvalidScheme {
            scheme: "http".to_owned(),
            reason: "HTTPS required (transport security is TlsOnly)".to_owned(),
        }),
        Some(scheme) => Err(RequestError::InvalidScheme {
            scheme: scheme.to_owned(),
            reason: "only http:// and https:// schemes are supported".to_owned(),
        }),
        None => Err(RequestError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::MissingScheme,
            reason: "missing scheme".to_owned(),
        }),
    }
}
