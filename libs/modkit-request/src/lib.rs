#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Request orchestration for `ModKit` clients
//!
//! This crate wraps HTTP calls with:
//! - Endpoint descriptors (URL composition, parameter and header merging)
//! - Typed completion handlers (`on_success` / `on_failure` / `on_complete`)
//! - Request groups that complete once every member has finished
//! - Per-request retry policy (none, manual, automatic with a counter)
//! - A pending-retry queue that coalesces concurrent failures into one
//!   user prompt
//! - Error classification into authentication, connectivity, server and
//!   transport errors
//!
//! The default transport is a hyper client with rustls (HTTPS only by
//! default); any [`Transport`] can be plugged in through [`RouterBuilder`].
//!
//! # Example
//!
//! ```ignore
//! use modkit_request::{Endpoint, HttpMethod, Request, RetryPolicy, Router};
//!
//! struct Profile;
//!
//! impl Endpoint for Profile {
//!     fn base_url(&self) -> &str { "https://api.example.com" }
//!     fn path(&self) -> &str { "/profile" }
//!     fn method(&self) -> HttpMethod { HttpMethod::Get }
//!     fn code_for_not_authorized_error(&self) -> Option<&str> { Some("AUTH") }
//! }
//!
//! let router = Router::new()?;
//! let group = router.make_group(|_| {
//!     let _profile = Request::<_, serde_json::Value>::new(&router, Profile)
//!         .with_retry_policy(RetryPolicy::Automatic(3))
//!         .start()
//!         .on_success(|profile| println!("{profile}"));
//! });
//! group.on_complete(|| println!("all loaded"));
//! ```

pub mod classifier;
mod config;
pub mod endpoint;
mod error;
pub mod group;
mod handler;
pub mod network_error;
pub mod queue;
mod request;
pub mod retry;
mod router;
pub mod tls;
pub mod transport;

pub use classifier::{ErrorClassifier, Failure, Outcome};
pub use config::{
    DEFAULT_CONNECTIVITY_ERROR_CODES, DEFAULT_USER_AGENT, RouterConfig, TlsRootConfig,
    TransportConfig, TransportSecurity,
};
pub use endpoint::{ApiVersion, Authorization, Endpoint, HttpMethod, JsonObject};
pub use error::{InvalidUriKind, RequestError};
pub use group::{Group, GroupId, GroupLease, GroupRegistry};
pub use handler::CompletionHandler;
pub use network_error::{
    ClassifiedError, ErrorClass, FailureOrigin, NetworkError, default_error,
    default_network_error, default_network_errors,
};
pub use queue::ThreadSafeQueue;
pub use request::Request;
pub use retry::{RetryPolicy, RetryPrompt, RetryService};
pub use router::{Router, RouterBuilder};
pub use transport::{HyperTransport, MultipartFile, RawResponse, Transport, TransportRequest};
