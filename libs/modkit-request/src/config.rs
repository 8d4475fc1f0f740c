use crate::retry::RetryPolicy;
use std::collections::HashSet;
use std::time::Duration;

/// Default User-Agent string for HTTP requests
pub const DEFAULT_USER_AGENT: &str = concat!("modkit-request/", env!("CARGO_PKG_VERSION"));

/// Transport codes that mean "no network": not connected (-1009) and timed out (-1001)
pub const DEFAULT_CONNECTIVITY_ERROR_CODES: [&str; 2] = ["-1009", "-1001"];

/// Router-level behavior
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Policy for requests that do not set their own (default: `Automatic(5)`)
    pub default_retry_policy: RetryPolicy,

    /// Error codes treated as connectivity errors; these suppress automatic
    /// retry and go straight to the prompt flow
    pub connectivity_error_codes: HashSet<String>,

    /// Synthesize an error for non-2xx responses without an `errors` array
    /// and for undecodable 2xx bodies (default: false)
    ///
    /// Off, such responses reach the retry coordinator with an empty error
    /// list and `on_failure` receives `[]`.
    pub status_fallback_errors: bool,

    /// Include request parameters in debug logs (default: false)
    pub log_request_parameters: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_retry_policy: RetryPolicy::Automatic(5),
            connectivity_error_codes: DEFAULT_CONNECTIVITY_ERROR_CODES
                .iter()
                .map(|code| (*code).to_owned())
                .collect(),
            status_fallback_errors: false,
            log_request_parameters: false,
        }
    }
}

impl RouterConfig {
    /// Create minimal configuration (no automatic retry)
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            default_retry_policy: RetryPolicy::None,
            ..Self::default()
        }
    }

    /// Create configuration for tests (manual retry, parameters logged)
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            default_retry_policy: RetryPolicy::Manual,
            log_request_parameters: true,
            ..Self::default()
        }
    }
}

/// Where the default transport gets its trust anchors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Bundled Mozilla roots
    #[default]
    WebPki,
    /// Platform certificate store, loaded once per process
    Native,
}

/// Which URL schemes the default transport accepts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// `https` only; `http` URLs fail before any connection is made
    #[default]
    TlsOnly,
    /// `http` is accepted too. Local mock servers only.
    AllowInsecureHttp,
}

/// Settings of [`crate::HyperTransport`]
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Limit for one attempt, response body included; expiry is code -1001
    pub request_timeout: Duration,

    /// Largest accepted response body in bytes; larger is code -1103
    pub max_body_size: usize,

    /// Sent unless the endpoint supplies its own `User-Agent`
    pub user_agent: String,

    pub transport: TransportSecurity,

    pub tls_roots: TlsRootConfig,

    /// `None` keeps hyper-util's idle timeout
    pub pool_idle_timeout: Option<Duration>,

    pub pool_max_idle_per_host: usize,
}

const MIB: usize = 1024 * 1024;

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_body_size: 10 * MIB,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            transport: TransportSecurity::TlsOnly,
            tls_roots: TlsRootConfig::WebPki,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl TransportConfig {
    /// Short timeout, 1 MiB bodies, few pooled connections
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_body_size: MIB,
            pool_idle_timeout: Some(Duration::from_secs(30)),
            pool_max_idle_per_host: 8,
            ..Self::default()
        }
    }

    /// [`Self::minimal`] plus plain `http` for mock servers
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            transport: TransportSecurity::AllowInsecureHttp,
            pool_idle_timeout: Some(Duration::from_secs(10)),
            pool_max_idle_per_host: 4,
            ..Self::minimal()
        }
    }
}
