//! Turns a raw transport outcome into a typed success value or a list of
//! classified errors.

use crate::network_error::{
    ClassifiedError, FailureOrigin, MISSING_CODE, MISSING_DESCRIPTION, MISSING_TITLE,
};
use crate::transport::RawResponse;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Title used for errors derived from a transport failure
pub const TRANSPORT_ERROR_TITLE: &str = "Network Error";
/// Title used for errors synthesized from a non-2xx status
pub const STATUS_ERROR_TITLE: &str = "HTTP Error";
/// Title used when a 2xx body does not match the response type
pub const DECODE_ERROR_TITLE: &str = "Invalid Response";
/// Code used when a 2xx body does not match the response type
pub const DECODE_ERROR_CODE: &str = "DECODE";

/// Result of classifying one attempt
#[derive(Debug)]
pub enum Outcome<T, E> {
    /// 2xx response whose body decoded as the response type
    Success(T),
    /// Everything else
    Failure(Failure<E>),
}

/// Classified errors of a failed attempt.
///
/// `errors` may be empty when status fallback errors are disabled and the
/// server sent no `errors` array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure<E> {
    pub errors: Vec<E>,
    pub origin: FailureOrigin,
}

/// Whether a status code counts as success (`200..300`)
#[must_use]
pub fn is_status_ok(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Stateless classifier; `status_fallback_errors` controls whether failures
/// without a server `errors` array get a synthesized error.
#[derive(Debug, Clone, Copy)]
pub struct ErrorClassifier {
    status_fallback_errors: bool,
}

impl ErrorClassifier {
    #[must_use]
    pub fn new(status_fallback_errors: bool) -> Self {
        Self {
            status_fallback_errors,
        }
    }

    /// Classify a raw response.
    ///
    /// A transport failure always yields exactly one error carrying the
    /// platform code. Otherwise a 2xx status with a body that decodes as `T`
    /// is a success; any other response is inspected for an `errors` array.
    pub fn classify<T, E>(&self, response: &RawResponse) -> Outcome<T, E>
    where
        T: DeserializeOwned,
        E: ClassifiedError,
    {
        if let Some(failure) = &response.failure {
            return Outcome::Failure(Failure {
                errors: vec![E::new(
                    failure.code.to_string(),
                    TRANSPORT_ERROR_TITLE.to_owned(),
                    failure.message.clone(),
                )],
                origin: FailureOrigin::Transport,
            });
        }

        let status = response.status.unwrap_or(500);
        let body = response.body.clone().unwrap_or(Value::Null);

        let decode_error = if is_status_ok(status) {
            match serde_json::from_value::<T>(body.clone()) {
                Ok(value) => return Outcome::Success(value),
                Err(e) => Some(e),
            }
        } else {
            None
        };

        let errors: Vec<E> = parse_server_errors(&body);
        if !errors.is_empty() || !self.status_fallback_errors {
            return Outcome::Failure(Failure {
                errors,
                origin: FailureOrigin::Server,
            });
        }

        let synthesized = match decode_error {
            Some(e) => E::new(
                DECODE_ERROR_CODE.to_owned(),
                DECODE_ERROR_TITLE.to_owned(),
                e.to_string(),
            ),
            None => E::new(
                status.to_string(),
                STATUS_ERROR_TITLE.to_owned(),
                format!("Unexpected HTTP status {status}"),
            ),
        };
        Outcome::Failure(Failure {
            errors: vec![synthesized],
            origin: FailureOrigin::Status,
        })
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Map the body's `errors` array, substituting placeholders for missing fields
fn parse_server_errors<E: ClassifiedError>(body: &Value) -> Vec<E> {
    let Some(entries) = body.get("errors").and_then(Value::as_array) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter(|entry| entry.is_object())
        .map(|entry| {
            let field = |name: &str, missing: &str| {
                entry
                    .get(name)
                    .and_then(Value::as_str)
                    .unwrap_or(missing)
                    .to_owned()
            };
            E::new(
                field("code", MISSING_CODE),
                field("title", MISSING_TITLE),
                field("desc", MISSING_DESCRIPTION),
            )
        })
        .collect()
}
