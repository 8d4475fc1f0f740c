//! The router: an explicitly constructed service object that owns the
//! transport, the pending-retry service and the active-group registry.

use crate::classifier::ErrorClassifier;
use crate::config::{RouterConfig, TransportConfig};
use crate::error::RequestError;
use crate::group::{self, Group, GroupId, GroupRegistry};
use crate::retry::RetryService;
use crate::transport::{HyperTransport, Transport};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;

struct RouterInner {
    transport: Arc<dyn Transport>,
    retry: Arc<RetryService>,
    groups: GroupRegistry,
    runtime: Handle,
    classifier: ErrorClassifier,
    config: RouterConfig,
}

/// Cloneable handle to the request machinery.
///
/// Create one per application (or per test) and pass it to every
/// [`crate::Request`].
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    /// Router with the default hyper transport on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::NoRuntime`] outside a Tokio runtime, or a TLS
    /// error if the transport cannot be built.
    pub fn new() -> Result<Self, RequestError> {
        RouterBuilder::new().build()
    }

    #[must_use]
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Run `body` with a fresh group as the innermost group on this thread.
    ///
    /// Requests started inside `body` (without an explicit group) join it.
    /// The group finishes once `body` has returned and every member has
    /// reached its terminal completion.
    #[must_use]
    pub fn make_group<F>(&self, body: F) -> Group
    where
        F: FnOnce(&Group),
    {
        let (group, hold) = self.inner.groups.create();
        tracing::debug!(group = group.id(), "request group started");
        {
            let _scope = group::enter(&group);
            body(&group);
        }
        drop(hold);
        group
    }

    /// Innermost group of this router entered on the calling thread
    #[must_use]
    pub fn current_group(&self) -> Option<Group> {
        group::current(&self.inner.groups)
    }

    /// Look up an open group by id
    #[must_use]
    pub fn group(&self, id: GroupId) -> Option<Group> {
        self.inner.groups.get(id)
    }

    /// Number of groups that have not finished yet
    #[must_use]
    pub fn active_group_count(&self) -> usize {
        self.inner.groups.active_count()
    }

    #[must_use]
    pub fn retry_service(&self) -> &Arc<RetryService> {
        &self.inner.retry
    }

    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub(crate) fn classifier(&self) -> ErrorClassifier {
        self.inner.classifier
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    pub(crate) fn groups(&self) -> &GroupRegistry {
        &self.inner.groups
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("config", &self.inner.config)
            .field("retry", &self.inner.retry)
            .field("groups", &self.inner.groups)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Router`]
#[derive(Default)]
pub struct RouterBuilder {
    config: RouterConfig,
    transport: Option<Arc<dyn Transport>>,
    transport_config: TransportConfig,
    runtime: Option<Handle>,
    retry: Option<Arc<RetryService>>,
}

impl RouterBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom transport instead of [`HyperTransport`]
    #[must_use]
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Configuration for the default [`HyperTransport`]; ignored when a
    /// custom transport is set
    #[must_use]
    pub fn transport_config(mut self, config: TransportConfig) -> Self {
        self.transport_config = config;
        self
    }

    /// Allow insecure HTTP for the default transport (for testing only)
    ///
    /// Only available in debug builds or with the `allow-insecure-http`
    /// feature.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "modkit_request::security",
            "allow_insecure_http() called - HTTP traffic will NOT be encrypted"
        );
        self.transport_config.transport = crate::config::TransportSecurity::AllowInsecureHttp;
        self
    }

    /// Runtime that runs request attempts (default: the current runtime)
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Share a pending-retry service between routers
    #[must_use]
    pub fn retry_service(mut self, retry: Arc<RetryService>) -> Self {
        self.retry = Some(retry);
        self
    }

    /// # Errors
    ///
    /// Returns [`RequestError::NoRuntime`] if no runtime was given and none
    /// is current, or a transport construction error.
    pub fn build(self) -> Result<Router, RequestError> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()?,
        };
        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let _guard = runtime.enter();
                Arc::new(HyperTransport::new(&self.transport_config)?)
            }
        };
        Ok(Router {
            inner: Arc::new(RouterInner {
                transport,
                retry: self.retry.unwrap_or_default(),
                groups: GroupRegistry::new(),
                runtime,
                classifier: ErrorClassifier::new(self.config.status_fallback_errors),
                config: self.config,
            }),
        })
    }
}

impl fmt::Debug for RouterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterBuilder")
            .field("config", &self.config)
            .field("custom_transport", &self.transport.is_some())
            .field("transport_config", &self.transport_config)
            .finish_non_exhaustive()
    }
}
