//! Classified domain errors and the default error reporters.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Placeholder used when a server error omits its `code`
pub const MISSING_CODE: &str = "Error code missing";
/// Placeholder used when a server error omits its `title`
pub const MISSING_TITLE: &str = "Title missing";
/// Placeholder used when a server error omits its `desc`
pub const MISSING_DESCRIPTION: &str = "Description missing";

/// A domain error produced by the classifier.
///
/// Implement this for a custom error type to receive it in `on_failure`
/// callbacks instead of [`NetworkError`].
pub trait ClassifiedError: Clone + fmt::Debug + Send + Sync + 'static {
    /// Build an error from its three parts
    fn new(code: String, title: String, description: String) -> Self;

    /// Machine-readable error code (server code or transport code as string)
    fn code(&self) -> &str;

    /// Short human-readable title
    fn title(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;
}

/// Default classified error type.
///
/// Serialized with the same field names the server uses in its `errors`
/// array (`code`, `title`, `desc`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
#[error("{title} ({code}): {description}")]
pub struct NetworkError {
    pub code: String,
    pub title: String,
    #[serde(rename = "desc")]
    pub description: String,
}

impl ClassifiedError for NetworkError {
    fn new(code: String, title: String, description: String) -> Self {
        Self {
            code,
            title,
            description,
        }
    }

    fn code(&self) -> &str {
        &self.code
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Where a failed attempt's errors came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOrigin {
    /// No usable response: network error, timeout, unreadable body
    Transport,
    /// Errors listed by the server in the response body
    Server,
    /// Errors synthesized from the status code or an undecodable body
    Status,
}

/// Error taxonomy used by the retry coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Matches the endpoint's "not authorized" code; always terminal
    Authentication,
    /// No network; suppresses automatic retry
    Connectivity,
    /// Reported by the server
    Server,
    /// Transport-level failure with a platform code
    Transport,
}

/// Assigns an [`ErrorClass`] to classified errors for one endpoint.
#[derive(Debug, Clone, Copy)]
pub struct ErrorTaxonomy<'a> {
    not_authorized_code: Option<&'a str>,
    connectivity_codes: &'a HashSet<String>,
}

impl<'a> ErrorTaxonomy<'a> {
    #[must_use]
    pub fn new(not_authorized_code: Option<&'a str>, connectivity_codes: &'a HashSet<String>) -> Self {
        Self {
            not_authorized_code,
            connectivity_codes,
        }
    }

    /// Class of a single error given the origin of its attempt
    #[must_use]
    pub fn class_of<E: ClassifiedError>(&self, error: &E, origin: FailureOrigin) -> ErrorClass {
        if self.not_authorized_code == Some(error.code()) {
            ErrorClass::Authentication
        } else if self.connectivity_codes.contains(error.code()) {
            ErrorClass::Connectivity
        } else if origin == FailureOrigin::Transport {
            ErrorClass::Transport
        } else {
            ErrorClass::Server
        }
    }

    /// Errors whose class is [`ErrorClass::Authentication`]
    #[must_use]
    pub fn authentication_errors<E: ClassifiedError>(
        &self,
        errors: &[E],
        origin: FailureOrigin,
    ) -> Vec<E> {
        errors
            .iter()
            .filter(|e| self.class_of(*e, origin) == ErrorClass::Authentication)
            .cloned()
            .collect()
    }

    /// Whether any error is of class [`ErrorClass::Connectivity`]
    #[must_use]
    pub fn has_connectivity_error<E: ClassifiedError>(
        &self,
        errors: &[E],
        origin: FailureOrigin,
    ) -> bool {
        errors
            .iter()
            .any(|e| self.class_of(e, origin) == ErrorClass::Connectivity)
    }
}

/// Report one classified error: `Network Error: <description>`
pub fn default_network_error<E: ClassifiedError>(error: &E) {
    tracing::warn!(code = error.code(), title = error.title(), "Network Error: {}", error.description());
}

/// Report every classified error in order
pub fn default_network_errors<E: ClassifiedError>(errors: &[E]) {
    for error in errors {
        default_network_error(error);
    }
}

/// Report an error that never reached a completion handler: `Error: <error>`
pub fn default_error(error: &dyn std::error::Error) {
    tracing::error!("Error: {error}");
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn err(code: &str) -> NetworkError {
        NetworkError::new(code.to_owned(), "t".to_owned(), "d".to_owned())
    }

    fn connectivity() -> HashSet<String> {
        HashSet::from(["-1009".to_owned(), "-1001".to_owned()])
    }

    #[test]
    fn test_network_error_deserializes_server_shape() {
        let parsed: NetworkError = serde_json::from_value(serde_json::json!({
            "code": "AUTH",
            "title": "Unauthorized",
            "desc": "bad token"
        }))
        .unwrap();
        assert_eq!(parsed.code, "AUTH");
        assert_eq!(parsed.description, "bad token");
        assert_eq!(parsed.to_string(), "Unauthorized (AUTH): bad token");
    }

    #[test]
    fn test_class_of_prefers_authentication() {
        let codes = connectivity();
        let taxonomy = ErrorTaxonomy::new(Some("-1009"), &codes);
        assert_eq!(
            taxonomy.class_of(&err("-1009"), FailureOrigin::Transport),
            ErrorClass::Authentication
        );
    }

    #[test]
    fn test_class_of_by_origin() {
        let codes = connectivity();
        let taxonomy = ErrorTaxonomy::new(Some("AUTH"), &codes);
        assert_eq!(
            taxonomy.class_of(&err("-1001"), FailureOrigin::Transport),
            ErrorClass::Connectivity
        );
        assert_eq!(
            taxonomy.class_of(&err("-1004"), FailureOrigin::Transport),
            ErrorClass::Transport
        );
        assert_eq!(
            taxonomy.class_of(&err("E42"), FailureOrigin::Server),
            ErrorClass::Server
        );
    }

    #[test]
    fn test_authentication_errors_filters() {
        let codes = connectivity();
        let taxonomy = ErrorTaxonomy::new(Some("AUTH"), &codes);
        let errors = vec![err("E1"), err("AUTH"), err("E2")];
        assert_eq!(
            taxonomy.authentication_errors(&errors, FailureOrigin::Server),
            vec![err("AUTH")]
        );

        let no_code = ErrorTaxonomy::new(None, &codes);
        assert!(no_code.authentication_errors(&errors, FailureOrigin::Server).is_empty());
    }

    #[test]
    fn test_has_connectivity_error() {
        let codes = connectivity();
        let taxonomy = ErrorTaxonomy::new(None, &codes);
        let origin = FailureOrigin::Transport;
        assert!(taxonomy.has_connectivity_error(&[err("E1"), err("-1009")], origin));
        assert!(!taxonomy.has_connectivity_error(&[err("E1")], origin));
    }

    #[test]
    fn test_authentication_code_is_not_connectivity() {
        let codes = connectivity();
        let taxonomy = ErrorTaxonomy::new(Some("-1001"), &codes);
        let errors = [err("-1001")];
        assert!(!taxonomy.has_connectivity_error(&errors, FailureOrigin::Transport));
        assert_eq!(
            taxonomy.authentication_errors(&errors, FailureOrigin::Transport),
            vec![err("-1001")]
        );
    }

    #[test]
    #[traced_test]
    fn test_default_network_errors_logs_each_description() {
        default_network_errors(&[
            NetworkError::new("1".to_owned(), "t".to_owned(), "first failure".to_owned()),
            NetworkError::new("2".to_owned(), "t".to_owned(), "second failure".to_owned()),
        ]);
        assert!(logs_contain("Network Error: first failure"));
        assert!(logs_contain("Network Error: second failure"));
    }
}
