//! Request dispatcher: runs one logical request through the transport, the
//! classifier and the retry coordinator, and settles its completion handler
//! and group membership.

use crate::classifier::Outcome;
use crate::endpoint::Endpoint;
use crate::group::{self, Group};
use crate::handler::CompletionHandler;
use crate::network_error::{ClassifiedError, ErrorTaxonomy, NetworkError, default_error};
use crate::retry::{RetryCoordinator, RetryPolicy, RetryPrompt, Retryable};
use crate::router::Router;
use crate::transport::{ParameterEncoding, RawResponse, TransportRequest};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// A logical request against endpoint `P`, decoding `T` on success and
/// reporting failures as `E`.
///
/// ```ignore
/// let handler = Request::<_, User>::new(&router, GetUser { id: 7 })
///     .with_retry_policy(RetryPolicy::Manual)
///     .start()
///     .on_success(|user| println!("{}", user.name))
///     .on_failure(|errors| default_network_errors(&errors));
/// ```
pub struct Request<P, T, E = NetworkError> {
    router: Router,
    endpoint: P,
    policy: RetryPolicy,
    handler: Option<CompletionHandler<T, E>>,
    group: Option<Group>,
    delay_completion: bool,
    _types: PhantomData<fn() -> (T, E)>,
}

impl<P, T, E> Request<P, T, E>
where
    P: Endpoint,
    T: DeserializeOwned + Send + 'static,
    E: ClassifiedError,
{
    /// Request using the router's default retry policy
    #[must_use]
    pub fn new(router: &Router, endpoint: P) -> Self {
        Self {
            router: router.clone(),
            policy: router.config().default_retry_policy,
            endpoint,
            handler: None,
            group: None,
            delay_completion: false,
            _types: PhantomData,
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Report to an existing handler instead of a fresh one
    #[must_use]
    pub fn with_handler(mut self, handler: CompletionHandler<T, E>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Join `group` instead of the innermost group entered on this thread
    #[must_use]
    pub fn in_group(mut self, group: &Group) -> Self {
        self.group = Some(group.clone());
        self
    }

    /// Leave the group only when the caller calls
    /// [`CompletionHandler::complete`], after `on_success`/`on_failure`.
    #[must_use]
    pub fn delay_completion(mut self, delay: bool) -> Self {
        self.delay_completion = delay;
        self
    }

    /// Dispatch with URL-query (GET) or JSON parameters
    #[must_use]
    pub fn start(self) -> CompletionHandler<T, E> {
        self.dispatch(CallKind::Plain)
    }

    /// Dispatch as a `multipart/form-data` POST.
    ///
    /// Encoding failures are logged through [`default_error`] and never
    /// reach the handler's callbacks.
    #[must_use]
    pub fn start_multipart(self) -> CompletionHandler<T, E> {
        self.dispatch(CallKind::Multipart)
    }

    fn dispatch(self, kind: CallKind) -> CompletionHandler<T, E> {
        let handler = self.handler.unwrap_or_default();
        let group = self
            .group
            .or_else(|| group::current(self.router.groups()));
        if let Some(group) = group {
            match group.join() {
                Some(lease) => handler.on_group_leave(move || drop(lease)),
                None => tracing::debug!(group = group.id(), "group already finished, not joining"),
            }
        }

        let call = Arc::new(Call {
            router: self.router,
            endpoint: self.endpoint,
            policy: Mutex::new(self.policy),
            handler: handler.clone(),
            kind,
            delay_completion: self.delay_completion,
            attempts: AtomicU32::new(0),
            _types: PhantomData,
        });
        call.attempt();
        handler
    }
}

impl<P, T, E> fmt::Debug for Request<P, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("policy", &self.policy)
            .field("group", &self.group)
            .field("delay_completion", &self.delay_completion)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Plain,
    Multipart,
}

/// State shared by every attempt of one logical request
struct Call<P, T, E> {
    router: Router,
    endpoint: P,
    policy: Mutex<RetryPolicy>,
    handler: CompletionHandler<T, E>,
    kind: CallKind,
    delay_completion: bool,
    attempts: AtomicU32,
    _types: PhantomData<fn() -> T>,
}

impl<P, T, E> Call<P, T, E>
where
    P: Endpoint,
    T: DeserializeOwned + Send + 'static,
    E: ClassifiedError,
{
    fn attempt(self: Arc<Self>) {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let runtime = self.router.runtime().clone();
        runtime.spawn(async move {
            self.run(attempt).await;
        });
    }

    async fn run(self: Arc<Self>, attempt: u32) {
        let request = self.transport_request();
        if self.router.config().log_request_parameters {
            tracing::debug!(
                url = %request.url,
                method = %request.method,
                attempt,
                parameters = %serde_json::Value::Object(request.parameters.clone()),
                "starting request"
            );
        } else {
            tracing::debug!(url = %request.url, method = %request.method, attempt, "starting request");
        }

        let transport = Arc::clone(self.router.transport());
        let raw = match self.kind {
            CallKind::Plain => transport.perform(request).await,
            CallKind::Multipart => {
                match transport
                    .perform_multipart(request, self.endpoint.multipart_files())
                    .await
                {
                    Ok(raw) => raw,
                    Err(err) => {
                        default_error(&err);
                        self.handler.finish_delay_if_exists();
                        return;
                    }
                }
            }
        };
        self.settle(&raw);
    }

    fn transport_request(&self) -> TransportRequest {
        let method = self.endpoint.method();
        TransportRequest {
            url: self.endpoint.full_url(),
            method,
            parameters: self.endpoint.merged_parameters(),
            headers: self.endpoint.default_headers(),
            encoding: ParameterEncoding::for_method(method),
            authorization: self.endpoint.authorization(),
        }
    }

    fn settle(self: Arc<Self>, raw: &RawResponse) {
        match self.router.classifier().classify::<T, E>(raw) {
            Outcome::Success(value) => {
                self.handler.resolve_success(value);
                self.finish();
            }
            Outcome::Failure(failure) => {
                let router = self.router.clone();
                let not_authorized = self
                    .endpoint
                    .code_for_not_authorized_error()
                    .map(str::to_owned);
                let taxonomy = ErrorTaxonomy::new(
                    not_authorized.as_deref(),
                    &router.config().connectivity_error_codes,
                );
                RetryCoordinator::new(router.retry_service(), taxonomy).handle(self, failure);
            }
        }
    }

    /// Terminal step after success or failure
    fn finish(&self) {
        if !self.delay_completion {
            self.handler.complete();
        }
    }
}

impl<P, T, E> Retryable<E> for Call<P, T, E>
where
    P: Endpoint,
    T: DeserializeOwned + Send + 'static,
    E: ClassifiedError,
{
    fn policy(&self) -> RetryPolicy {
        *self.policy.lock()
    }

    fn set_policy(&self, policy: RetryPolicy) {
        *self.policy.lock() = policy;
    }

    fn should_handle_retry(&self) -> bool {
        self.endpoint.should_handle_retry()
    }

    fn replay(self: Arc<Self>) {
        self.attempt();
    }

    fn fail(&self, errors: Vec<E>) {
        self.handler.resolve_failure(errors);
        self.finish();
    }

    fn authentication_failed(&self, errors: &[E]) {
        self.endpoint.handle_authentication_failure(errors);
    }

    fn prompt(&self, error: Option<&E>, prompt: RetryPrompt) {
        self.endpoint.handle_retry(error, prompt);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::{RouterConfig, TransportConfig};
    use crate::endpoint::{HttpMethod, JsonObject};
    use crate::transport::MultipartFile;
    use httpmock::prelude::*;
    use serde::Deserialize;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        value: i64,
    }

    struct Lookup {
        base_url: String,
    }

    impl Endpoint for Lookup {
        fn base_url(&self) -> &str {
            &self.base_url
        }

        fn path(&self) -> &str {
            "/answer"
        }

        fn method(&self) -> HttpMethod {
            HttpMethod::Get
        }

        fn parameters(&self) -> JsonObject {
            let mut params = JsonObject::new();
            params.insert("q".to_owned(), json!("life"));
            params
        }
    }

    struct Upload {
        base_url: String,
    }

    impl Endpoint for Upload {
        fn base_url(&self) -> &str {
            &self.base_url
        }

        fn path(&self) -> &str {
            "/upload"
        }

        fn method(&self) -> HttpMethod {
            HttpMethod::Post
        }

        fn multipart_files(&self) -> Vec<MultipartFile> {
            vec![MultipartFile::new("doc", "bad\"name.txt", "text/plain", "x")]
        }
    }

    fn router() -> Router {
        Router::builder()
            .transport_config(TransportConfig::for_testing())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_success_over_http() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/answer").query_param("q", "life");
            then.status(200).json_body(json!({"value": 42}));
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let done = tx.clone();
        let _handler = Request::<_, Answer>::new(&router(), Lookup { base_url: server.base_url() })
            .start()
            .on_success(move |answer| {
                let _ = tx.send(format!("success {}", answer.value));
            })
            .on_complete(move || {
                let _ = done.send("complete".to_owned());
            });

        assert_eq!(rx.recv().await.unwrap(), "success 42");
        assert_eq!(rx.recv().await.unwrap(), "complete");
        mock.assert();
    }

    #[tokio::test]
    async fn test_status_error_with_policy_none_fails() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/answer");
            then.status(500);
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handler = Request::<_, Answer>::new(&router(), Lookup { base_url: server.base_url() })
            .with_retry_policy(RetryPolicy::None)
            .start()
            .on_failure(move |errors| {
                let _ = tx.send(errors);
            });

        assert!(rx.recv().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_error_with_fallback_enabled_names_status() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/answer");
            then.status(500);
        });
        let router = Router::builder()
            .config(RouterConfig {
                status_fallback_errors: true,
                ..RouterConfig::default()
            })
            .transport_config(TransportConfig::for_testing())
            .build()
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handler = Request::<_, Answer>::new(&router, Lookup { base_url: server.base_url() })
            .with_retry_policy(RetryPolicy::None)
            .start()
            .on_failure(move |errors| {
                let _ = tx.send(errors);
            });

        let errors = rx.recv().await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, "500");
    }

    #[tokio::test]
    async fn test_multipart_encoding_failure_skips_callbacks() {
        let router = router();
        let (tx, mut rx) = mpsc::unbounded_channel::<&'static str>();
        let (s, f, c) = (tx.clone(), tx.clone(), tx.clone());

        let group = router.make_group(|_| {
            let _handler = Request::<_, ()>::new(&router, Upload { base_url: "http://127.0.0.1:1".to_owned() })
                .start_multipart()
                .on_success(move |()| {
                    let _ = s.send("success");
                })
                .on_failure(move |_| {
                    let _ = f.send("failure");
                })
                .on_complete(move || {
                    let _ = c.send("complete");
                });
        });
        group.on_complete(move || {
            let _ = tx.send("group");
        });

        assert_eq!(rx.recv().await.unwrap(), "group");
        assert!(rx.try_recv().is_err());
    }
}
