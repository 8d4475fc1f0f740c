//! Retry policy, the per-request retry decision machine, and the pending
//! retry service that coalesces concurrent prompts into one user decision.

use crate::classifier::Failure;
use crate::network_error::{ClassifiedError, ErrorTaxonomy, default_network_errors};
use crate::queue::ThreadSafeQueue;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Retry strategy attached to a logical request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Report failures immediately
    None,
    /// Always ask the user
    Manual,
    /// Retry silently while attempts remain, then ask the user
    Automatic(u32),
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::Automatic(5)
    }
}

/// What to do with one failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run the authentication hook, then fail
    Authentication,
    /// Report the errors through the default reporter, then fail
    Fail,
    /// Re-dispatch with the given number of automatic attempts left
    Retry { remaining: u32 },
    /// Report the errors, queue a replay and ask the user
    Prompt,
}

/// Decide the next step for a failed attempt.
#[must_use]
pub fn decide(
    policy: RetryPolicy,
    has_authentication_error: bool,
    has_connectivity_error: bool,
    should_handle_retry: bool,
) -> RetryDecision {
    if has_authentication_error {
        return RetryDecision::Authentication;
    }
    match policy {
        RetryPolicy::None => RetryDecision::Fail,
        RetryPolicy::Automatic(remaining) if remaining > 0 && !has_connectivity_error => {
            RetryDecision::Retry {
                remaining: remaining - 1,
            }
        }
        RetryPolicy::Manual | RetryPolicy::Automatic(_) => {
            if should_handle_retry {
                RetryDecision::Prompt
            } else {
                RetryDecision::Fail
            }
        }
    }
}

type Action = Box<dyn FnOnce() + Send>;

struct RetryEntry {
    id: u64,
    replay: Action,
}

/// Pending-retry queue plus the "prompt outstanding" flag.
///
/// The flag lock is always taken before the queue lock, so enqueue,
/// accept and decline are serialized against each other.
pub struct RetryService {
    pending: ThreadSafeQueue<RetryEntry>,
    prompt_open: Mutex<bool>,
    next_id: AtomicU64,
}

impl RetryService {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: ThreadSafeQueue::new(),
            prompt_open: Mutex::new(false),
            next_id: AtomicU64::new(0),
        }
    }

    /// Number of queued replays
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.count()
    }

    /// Whether a prompt is waiting for an answer
    #[must_use]
    pub fn is_prompt_open(&self) -> bool {
        *self.prompt_open.lock()
    }

    /// Queue a replay. Returns a prompt when none is outstanding; the
    /// prompt's decline runs `on_decline`.
    pub(crate) fn enqueue(
        self: &Arc<Self>,
        replay: Action,
        on_decline: Action,
    ) -> Option<RetryPrompt> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut open = self.prompt_open.lock();
        let queued_before = self.pending.append(RetryEntry { id, replay });
        if *open {
            tracing::debug!(queued = queued_before + 1, "retry prompt outstanding, replay queued");
            return None;
        }
        *open = true;
        Some(RetryPrompt {
            service: Arc::clone(self),
            entry_id: id,
            on_decline: Some(on_decline),
        })
    }

    fn accept(&self) {
        let entries = {
            let mut open = self.prompt_open.lock();
            *open = false;
            self.pending.drain()
        };
        tracing::info!(count = entries.len(), "retry accepted, replaying queued requests");
        for entry in entries {
            (entry.replay)();
        }
    }

    fn decline(&self, entry_id: u64) {
        let stranded = {
            let mut open = self.prompt_open.lock();
            *open = false;
            self.pending.retain(|entry| entry.id != entry_id);
            self.pending.count()
        };
        if stranded > 0 {
            tracing::warn!(
                stranded,
                "retry declined; other queued requests stay pending until the next accepted prompt"
            );
        } else {
            tracing::info!("retry declined");
        }
    }
}

impl Default for RetryService {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RetryService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryService")
            .field("pending", &self.pending_count())
            .field("prompt_open", &self.is_prompt_open())
            .finish()
    }
}

/// The outstanding retry question.
///
/// Accepting replays every queued request; declining fails the request
/// that raised the prompt. Dropping an unanswered prompt declines it.
#[must_use = "an unanswered prompt is declined when dropped"]
pub struct RetryPrompt {
    service: Arc<RetryService>,
    entry_id: u64,
    on_decline: Option<Action>,
}

impl RetryPrompt {
    /// Replay every queued request in order
    pub fn accept(mut self) {
        self.on_decline = None;
        self.service.accept();
    }

    /// Fail the request that raised this prompt
    pub fn decline(mut self) {
        self.answer_decline();
    }

    fn answer_decline(&mut self) {
        if let Some(on_decline) = self.on_decline.take() {
            self.service.decline(self.entry_id);
            on_decline();
        }
    }
}

impl Drop for RetryPrompt {
    fn drop(&mut self) {
        self.answer_decline();
    }
}

impl fmt::Debug for RetryPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPrompt")
            .field("entry_id", &self.entry_id)
            .field("answered", &self.on_decline.is_none())
            .finish()
    }
}

/// A logical request as seen by the coordinator
pub(crate) trait Retryable<E>: Send + Sync + 'static {
    fn policy(&self) -> RetryPolicy;

    fn set_policy(&self, policy: RetryPolicy);

    fn should_handle_retry(&self) -> bool;

    /// Re-dispatch with the same handler and group membership
    fn replay(self: Arc<Self>);

    /// Terminal failure
    fn fail(&self, errors: Vec<E>);

    fn authentication_failed(&self, errors: &[E]);

    fn prompt(&self, error: Option<&E>, prompt: RetryPrompt);
}

/// Routes a failed attempt to retry, prompt or terminal failure.
pub(crate) struct RetryCoordinator<'a> {
    service: &'a Arc<RetryService>,
    taxonomy: ErrorTaxonomy<'a>,
}

impl<'a> RetryCoordinator<'a> {
    pub(crate) fn new(service: &'a Arc<RetryService>, taxonomy: ErrorTaxonomy<'a>) -> Self {
        Self { service, taxonomy }
    }

    pub(crate) fn handle<E, R>(&self, target: Arc<R>, failure: Failure<E>)
    where
        E: ClassifiedError,
        R: Retryable<E>,
    {
        let Failure { errors, origin } = failure;
        let authentication = self.taxonomy.authentication_errors(&errors, origin);
        let decision = decide(
            target.policy(),
            !authentication.is_empty(),
            self.taxonomy.has_connectivity_error(&errors, origin),
            target.should_handle_retry(),
        );
        tracing::debug!(?origin, ?decision, errors = errors.len(), "attempt failed");

        match decision {
            RetryDecision::Authentication => {
                tracing::debug!(errors = authentication.len(), "authentication failure");
                target.authentication_failed(&authentication);
                target.fail(errors);
            }
            RetryDecision::Fail => {
                default_network_errors(&errors);
                target.fail(errors);
            }
            RetryDecision::Retry { remaining } => {
                tracing::info!(remaining, "retrying request automatically");
                target.set_policy(RetryPolicy::Automatic(remaining));
                target.replay();
            }
            RetryDecision::Prompt => {
                default_network_errors(&errors);
                let first = errors.first().cloned();
                let replay_target = Arc::clone(&target);
                let fail_target = Arc::clone(&target);
                let prompt = self.service.enqueue(
                    Box::new(move || replay_target.replay()),
                    Box::new(move || fail_target.fail(errors)),
                );
                if let Some(prompt) = prompt {
                    tracing::info!("asking whether to retry");
                    target.prompt(first.as_ref(), prompt);
                }
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::network_error::{FailureOrigin, NetworkError};
    use std::collections::HashSet;
    use tracing_test::traced_test;

    #[test]
    fn test_decide_authentication_preempts_policy() {
        for policy in [
            RetryPolicy::None,
            RetryPolicy::Manual,
            RetryPolicy::Automatic(3),
        ] {
            assert_eq!(decide(policy, true, false, true), RetryDecision::Authentication);
        }
    }

    #[test]
    fn test_decide_automatic_decrements() {
        assert_eq!(
            decide(RetryPolicy::Automatic(3), false, false, true),
            RetryDecision::Retry { remaining: 2 }
        );
        assert_eq!(
            decide(RetryPolicy::Automatic(1), false, false, false),
            RetryDecision::Retry { remaining: 0 }
        );
    }

    #[test]
    fn test_decide_exhausted_or_offline_prompts() {
        assert_eq!(
            decide(RetryPolicy::Automatic(0), false, false, true),
            RetryDecision::Prompt
        );
        assert_eq!(
            decide(RetryPolicy::Automatic(4), false, true, true),
            RetryDecision::Prompt
        );
        assert_eq!(decide(RetryPolicy::Manual, false, false, true), RetryDecision::Prompt);
    }

    #[test]
    fn test_decide_prompt_flow_respects_should_handle_retry() {
        assert_eq!(decide(RetryPolicy::Manual, false, false, false), RetryDecision::Fail);
        assert_eq!(
            decide(RetryPolicy::Automatic(0), false, true, false),
            RetryDecision::Fail
        );
    }

    #[test]
    fn test_decide_none_reports_and_fails() {
        assert_eq!(decide(RetryPolicy::None, false, true, true), RetryDecision::Fail);
    }

    #[derive(Default)]
    struct Attempt {
        policy: Mutex<Option<RetryPolicy>>,
        should_handle_retry: bool,
        replays: AtomicU64,
        failures: Mutex<Vec<Vec<NetworkError>>>,
        auth: Mutex<Vec<NetworkError>>,
        prompts: Mutex<Vec<RetryPrompt>>,
    }

    impl Attempt {
        fn with_policy(policy: RetryPolicy) -> Arc<Self> {
            Arc::new(Self {
                policy: Mutex::new(Some(policy)),
                should_handle_retry: true,
                ..Self::default()
            })
        }
    }

    impl Retryable<NetworkError> for Attempt {
        fn policy(&self) -> RetryPolicy {
            self.policy.lock().unwrap_or_default()
        }

        fn set_policy(&self, policy: RetryPolicy) {
            *self.policy.lock() = Some(policy);
        }

        fn should_handle_retry(&self) -> bool {
            self.should_handle_retry
        }

        fn replay(self: Arc<Self>) {
            self.replays.fetch_add(1, Ordering::SeqCst);
        }

        fn fail(&self, errors: Vec<NetworkError>) {
            self.failures.lock().push(errors);
        }

        fn authentication_failed(&self, errors: &[NetworkError]) {
            self.auth.lock().extend_from_slice(errors);
        }

        fn prompt(&self, _error: Option<&NetworkError>, prompt: RetryPrompt) {
            self.prompts.lock().push(prompt);
        }
    }

    fn err(code: &str) -> NetworkError {
        NetworkError::new(code.to_owned(), "t".to_owned(), "d".to_owned())
    }

    fn server(errors: Vec<NetworkError>) -> Failure<NetworkError> {
        Failure {
            errors,
            origin: FailureOrigin::Server,
        }
    }

    fn connectivity() -> HashSet<String> {
        HashSet::from(["-1009".to_owned(), "-1001".to_owned()])
    }

    #[test]
    fn test_automatic_retry_replays_once_and_decrements() {
        let service = Arc::new(RetryService::new());
        let codes = connectivity();
        let coordinator = RetryCoordinator::new(&service, ErrorTaxonomy::new(None, &codes));
        let attempt = Attempt::with_policy(RetryPolicy::Automatic(2));

        coordinator.handle(Arc::clone(&attempt), server(vec![err("500")]));

        assert_eq!(attempt.replays.load(Ordering::SeqCst), 1);
        assert_eq!(attempt.policy(), RetryPolicy::Automatic(1));
        assert!(attempt.failures.lock().is_empty());
        assert_eq!(service.pending_count(), 0);
    }

    #[test]
    fn test_authentication_error_fails_without_prompt() {
        let service = Arc::new(RetryService::new());
        let codes = connectivity();
        let coordinator =
            RetryCoordinator::new(&service, ErrorTaxonomy::new(Some("AUTH"), &codes));
        let attempt = Attempt::with_policy(RetryPolicy::Automatic(5));

        coordinator.handle(Arc::clone(&attempt), server(vec![err("AUTH"), err("E2")]));

        assert_eq!(*attempt.auth.lock(), vec![err("AUTH")]);
        assert_eq!(attempt.failures.lock().len(), 1);
        assert_eq!(attempt.failures.lock()[0].len(), 2);
        assert_eq!(attempt.replays.load(Ordering::SeqCst), 0);
        assert!(attempt.prompts.lock().is_empty());
        assert_eq!(attempt.policy(), RetryPolicy::Automatic(5));
    }

    #[test]
    #[traced_test]
    fn test_policy_none_reports_errors() {
        let service = Arc::new(RetryService::new());
        let codes = connectivity();
        let coordinator = RetryCoordinator::new(&service, ErrorTaxonomy::new(None, &codes));
        let attempt = Attempt::with_policy(RetryPolicy::None);

        coordinator.handle(
            Arc::clone(&attempt),
            server(vec![NetworkError::new(
                "E".to_owned(),
                "t".to_owned(),
                "disk full".to_owned(),
            )]),
        );

        assert_eq!(attempt.failures.lock().len(), 1);
        assert!(logs_contain("Network Error: disk full"));
    }

    #[test]
    fn test_concurrent_failures_share_one_prompt() {
        let service = Arc::new(RetryService::new());
        let codes = connectivity();
        let coordinator = RetryCoordinator::new(&service, ErrorTaxonomy::new(None, &codes));
        let first = Attempt::with_policy(RetryPolicy::Manual);
        let second = Attempt::with_policy(RetryPolicy::Automatic(0));

        coordinator.handle(Arc::clone(&first), server(vec![err("500")]));
        coordinator.handle(Arc::clone(&second), server(vec![err("-1009")]));

        assert_eq!(first.prompts.lock().len(), 1);
        assert!(second.prompts.lock().is_empty());
        assert_eq!(service.pending_count(), 2);
        assert!(service.is_prompt_open());

        let prompt = first.prompts.lock().pop().unwrap();
        prompt.accept();

        assert_eq!(first.replays.load(Ordering::SeqCst), 1);
        assert_eq!(second.replays.load(Ordering::SeqCst), 1);
        assert_eq!(service.pending_count(), 0);
        assert!(!service.is_prompt_open());
        assert!(first.failures.lock().is_empty());
    }

    #[test]
    fn test_decline_fails_trigger_and_strands_siblings() {
        let service = Arc::new(RetryService::new());
        let codes = connectivity();
        let coordinator = RetryCoordinator::new(&service, ErrorTaxonomy::new(None, &codes));
        let first = Attempt::with_policy(RetryPolicy::Manual);
        let second = Attempt::with_policy(RetryPolicy::Manual);

        coordinator.handle(Arc::clone(&first), server(vec![err("500")]));
        coordinator.handle(Arc::clone(&second), server(vec![err("501")]));
        first.prompts.lock().pop().unwrap().decline();

        assert_eq!(first.failures.lock().len(), 1);
        // The sibling is neither failed nor replayed; it waits for the next
        // accepted prompt.
        assert!(second.failures.lock().is_empty());
        assert_eq!(second.replays.load(Ordering::SeqCst), 0);
        assert_eq!(service.pending_count(), 1);
        assert!(!service.is_prompt_open());

        let third = Attempt::with_policy(RetryPolicy::Manual);
        coordinator.handle(Arc::clone(&third), server(vec![err("502")]));
        third.prompts.lock().pop().unwrap().accept();

        assert_eq!(second.replays.load(Ordering::SeqCst), 1);
        assert_eq!(third.replays.load(Ordering::SeqCst), 1);
        assert_eq!(first.replays.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dropped_prompt_declines() {
        let service = Arc::new(RetryService::new());
        let codes = connectivity();
        let coordinator = RetryCoordinator::new(&service, ErrorTaxonomy::new(None, &codes));
        let attempt = Attempt::with_policy(RetryPolicy::Manual);

        coordinator.handle(Arc::clone(&attempt), server(vec![err("500")]));
        drop(attempt.prompts.lock().pop());

        assert_eq!(attempt.failures.lock().len(), 1);
        assert_eq!(service.pending_count(), 0);
        assert!(!service.is_prompt_open());
    }

    #[test]
    #[traced_test]
    fn test_prompt_flow_reports_errors_before_asking() {
        let service = Arc::new(RetryService::new());
        let codes = connectivity();
        let coordinator = RetryCoordinator::new(&service, ErrorTaxonomy::new(None, &codes));
        let attempt = Attempt::with_policy(RetryPolicy::Manual);

        coordinator.handle(
            Arc::clone(&attempt),
            server(vec![NetworkError::new(
                "E".to_owned(),
                "t".to_owned(),
                "quota exceeded".to_owned(),
            )]),
        );

        assert!(logs_contain("Network Error: quota exceeded"));
        assert_eq!(attempt.prompts.lock().len(), 1);
    }

    #[test]
    fn test_transport_connectivity_error_skips_automatic_retry() {
        let service = Arc::new(RetryService::new());
        let codes = connectivity();
        let coordinator = RetryCoordinator::new(&service, ErrorTaxonomy::new(None, &codes));
        let attempt = Attempt::with_policy(RetryPolicy::Automatic(3));

        coordinator.handle(
            Arc::clone(&attempt),
            Failure {
                errors: vec![err("-1009")],
                origin: FailureOrigin::Transport,
            },
        );

        assert_eq!(attempt.replays.load(Ordering::SeqCst), 0);
        assert_eq!(attempt.prompts.lock().len(), 1);
        assert_eq!(attempt.policy(), RetryPolicy::Automatic(3));
    }

    #[test]
    #[traced_test]
    fn test_prompt_flow_without_retry_handling_reports_and_fails() {
        let service = Arc::new(RetryService::new());
        let codes = connectivity();
        let coordinator = RetryCoordinator::new(&service, ErrorTaxonomy::new(None, &codes));
        let attempt = Arc::new(Attempt {
            policy: Mutex::new(Some(RetryPolicy::Automatic(0))),
            should_handle_retry: false,
            ..Attempt::default()
        });

        coordinator.handle(Arc::clone(&attempt), server(vec![err("500")]));

        assert_eq!(attempt.failures.lock().len(), 1);
        assert_eq!(service.pending_count(), 0);
        assert!(logs_contain("Network Error: d"));
    }
}
