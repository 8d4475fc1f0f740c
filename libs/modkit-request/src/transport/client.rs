//! Default [`Transport`] over the hyper-util legacy client with rustls.

use super::multipart;
use super::{
    CODE_CANNOT_CONNECT_TO_HOST, CODE_NETWORK_CONNECTION_LOST, CODE_NOT_CONNECTED_TO_INTERNET,
    CODE_RESPONSE_TOO_LARGE, CODE_TIMED_OUT, MultipartFile, ParameterEncoding, RawResponse,
    Transport, TransportFailure, TransportRequest, validate_url,
};
use crate::config::{TransportConfig, TransportSecurity};
use crate::endpoint::{Authorization, HttpMethod, JsonObject};
use crate::error::RequestError;
use crate::tls;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderName, HeaderValue, USER_AGENT};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use serde_json::Value;
use std::error::Error as StdError;
use std::io;
use std::time::Duration;

type HyperClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Transport backed by a pooled hyper client.
///
/// Every outcome, including timeouts and oversized bodies, comes back as a
/// [`RawResponse`] carrying one of the platform failure codes.
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient,
    user_agent: HeaderValue,
    request_timeout: Duration,
    max_body_size: usize,
    allow_http: bool,
}

impl HyperTransport {
    /// Build a transport from its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Tls`] if TLS roots cannot be loaded, or
    /// [`RequestError::InvalidHeaderValue`] for an unusable user agent.
    pub fn new(config: &TransportConfig) -> Result<Self, RequestError> {
        if config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 use only for testing with mock servers"
            );
        }

        let https = tls::https_connector(config.tls_roots, config.transport)?;

        let mut builder = Client::builder(TokioExecutor::new());
        // pool_timer is required for pool_idle_timeout to take effect
        builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(config.pool_max_idle_per_host);
        if let Some(idle_timeout) = config.pool_idle_timeout {
            builder.pool_idle_timeout(idle_timeout);
        }

        Ok(Self {
            client: builder.build(https),
            user_agent: HeaderValue::from_str(&config.user_agent)?,
            request_timeout: config.request_timeout,
            max_body_size: config.max_body_size,
            allow_http: config.transport == TransportSecurity::AllowInsecureHttp,
        })
    }

    fn build(
        &self,
        request: &TransportRequest,
        method: HttpMethod,
        content_type: Option<&str>,
        body: Bytes,
    ) -> Result<http::Request<Full<Bytes>>, RequestError> {
        // Multipart requests carry their parameters in the body
        let url = if content_type.is_none() && request.encoding == ParameterEncoding::Query {
            with_query(&request.url, &request.parameters)?
        } else {
            request.url.clone()
        };
        let uri = validate_url(&url, self.allow_http)?;

        let mut builder = http::Request::builder()
            .method(http::Method::from(method))
            .uri(uri);

        let mut has_user_agent = false;
        let mut has_accept = false;
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())?;
            if name == CONTENT_TYPE && content_type.is_some() {
                continue;
            }
            has_user_agent |= name == USER_AGENT;
            has_accept |= name == ACCEPT;
            builder = builder.header(name, HeaderValue::from_str(value)?);
        }
        if !has_user_agent {
            builder = builder.header(USER_AGENT, self.user_agent.clone());
        }
        if !has_accept {
            builder = builder.header(ACCEPT, "application/json");
        }
        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        if let Authorization::Basic { username, password } = &request.authorization {
            let credentials = STANDARD.encode(format!("{username}:{password}"));
            builder = builder.header(AUTHORIZATION, format!("Basic {credentials}"));
        }

        Ok(builder.body(Full::new(body))?)
    }

    async fn execute(&self, request: http::Request<Full<Bytes>>) -> RawResponse {
        let method = request.method().clone();
        let uri = request.uri().clone();
        match tokio::time::timeout(self.request_timeout, self.round_trip(request)).await {
            Ok(raw) => raw,
            Err(_) => {
                tracing::debug!(%method, %uri, timeout = ?self.request_timeout, "request timed out");
                RawResponse::failure(
                    CODE_TIMED_OUT,
                    format!("Request timed out after {:?}", self.request_timeout),
                )
            }
        }
    }

    async fn round_trip(&self, request: http::Request<Full<Bytes>>) -> RawResponse {
        let response = match self.client.request(request).await {
            Ok(response) => response,
            Err(err) => {
                let failure = map_client_error(&err);
                tracing::debug!(code = failure.code, error = %failure.message, "transport failure");
                return RawResponse {
                    status: None,
                    body: None,
                    failure: Some(failure),
                };
            }
        };

        let status = response.status().as_u16();
        match Limited::new(response.into_body(), self.max_body_size)
            .collect()
            .await
        {
            Ok(collected) => RawResponse::from_body(status, &collected.to_bytes()),
            Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => RawResponse::failure(
                CODE_RESPONSE_TOO_LARGE,
                format!("Response body exceeds limit of {} bytes", self.max_body_size),
            ),
            Err(err) => {
                tracing::debug!(error = %err, "failed to read response body");
                RawResponse::failure(CODE_NETWORK_CONNECTION_LOST, err.to_string())
            }
        }
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn perform(&self, request: TransportRequest) -> RawResponse {
        let (content_type, body) = match request.encoding {
            ParameterEncoding::Json if !request.parameters.is_empty() => {
                match serde_json::to_vec(&request.parameters) {
                    Ok(body) => (Some("application/json"), Bytes::from(body)),
                    Err(e) => return request_failure(&RequestError::from(e)),
                }
            }
            _ => (None, Bytes::new()),
        };
        match self.build(&request, request.method, content_type, body) {
            Ok(http_request) => self.execute(http_request).await,
            Err(e) => request_failure(&e),
        }
    }

    async fn perform_multipart(
        &self,
        request: TransportRequest,
        files: Vec<MultipartFile>,
    ) -> Result<RawResponse, RequestError> {
        let encoded = multipart::encode(&request.parameters, &files)?;
        let raw = match self.build(
            &request,
            HttpMethod::Post,
            Some(&encoded.content_type),
            encoded.body,
        ) {
            Ok(http_request) => self.execute(http_request).await,
            Err(e) => request_failure(&e),
        };
        Ok(raw)
    }
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("user_agent", &self.user_agent)
            .field("request_timeout", &self.request_timeout)
            .field("max_body_size", &self.max_body_size)
            .field("allow_http", &self.allow_http)
            .finish_non_exhaustive()
    }
}

fn request_failure(err: &RequestError) -> RawResponse {
    let failure = TransportFailure::from_request_error(err);
    tracing::debug!(code = failure.code, error = %failure.message, "request could not be built");
    RawResponse {
        status: None,
        body: None,
        failure: Some(failure),
    }
}

/// Append parameters to the URL's query string
fn with_query(url: &str, parameters: &JsonObject) -> Result<String, RequestError> {
    let pairs: Vec<(&str, String)> = parameters
        .iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(s) => Some((key.as_str(), s.clone())),
            other => Some((key.as_str(), other.to_string())),
        })
        .collect();
    let query = serde_urlencoded::to_string(&pairs)?;
    if query.is_empty() {
        return Ok(url.to_owned());
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    Ok(format!("{url}{separator}{query}"))
}

/// Map a hyper client error to a platform failure code
fn map_client_error(err: &hyper_util::client::legacy::Error) -> TransportFailure {
    let io_kind = io_error_kind(err);
    let code = match io_kind {
        Some(
            io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkDown,
        ) => CODE_NOT_CONNECTED_TO_INTERNET,
        Some(io::ErrorKind::TimedOut) => CODE_TIMED_OUT,
        Some(io::ErrorKind::ConnectionRefused) => CODE_CANNOT_CONNECT_TO_HOST,
        _ if err.is_connect() => CODE_CANNOT_CONNECT_TO_HOST,
        _ => CODE_NETWORK_CONNECTION_LOST,
    };
    TransportFailure::new(code, error_chain(err))
}

fn io_error_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut source = Some(err);
    while let Some(current) = source {
        if let Some(io_err) = current.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = current.source();
    }
    None
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(current) = source {
        message.push_str(": ");
        message.push_str(&current.to_string());
        source = current.source();
    }
    message
}
