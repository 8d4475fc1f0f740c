//! Completion handler: success/failure/complete callbacks for one logical
//! request.
//!
//! Responses arrive on worker tasks, so a signal may be produced before the
//! caller has registered the matching callback. Such a signal is parked in
//! its channel and delivered as soon as the callback is registered. A parked
//! `complete` is held back while the success or failure value is still
//! parked, so `on_complete` runs after the outcome whatever the registration
//! order. If the outcome callback is never registered, the held `complete`
//! runs when the last handle is dropped.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

type Callback<A> = Box<dyn FnOnce(A) + Send>;
type Action = Box<dyn FnOnce() + Send>;
type Call<A> = Option<(Callback<A>, A)>;

/// One callback channel
enum Slot<A> {
    /// Nothing registered, nothing delivered
    Idle,
    /// Callback registered, waiting for the signal
    Armed(Callback<A>),
    /// Signal produced before any callback was registered
    Parked(A),
    /// Callback and signal both present, waiting for an earlier channel
    Held(Callback<A>, A),
    /// Delivered
    Fired,
}

impl<A> Slot<A> {
    /// Register a callback. Returns the call to run and the displaced
    /// callback, both to be handled once the lock is released.
    fn register(&mut self, callback: Callback<A>) -> (Call<A>, Option<Callback<A>>) {
        match std::mem::replace(self, Self::Fired) {
            Self::Idle => {
                *self = Self::Armed(callback);
                (None, None)
            }
            Self::Armed(displaced) => {
                *self = Self::Armed(callback);
                (None, Some(displaced))
            }
            Self::Parked(value) => (Some((callback, value)), None),
            Self::Held(displaced, value) => {
                *self = Self::Held(callback, value);
                (None, Some(displaced))
            }
            Self::Fired => (None, Some(callback)),
        }
    }

    /// Produce the signal; returns the call to run once the lock is released
    fn signal(&mut self, value: A) -> Call<A> {
        match std::mem::replace(self, Self::Fired) {
            Self::Armed(callback) => Some((callback, value)),
            Self::Idle => {
                *self = Self::Parked(value);
                None
            }
            kept @ (Self::Parked(_) | Self::Held(..)) => {
                *self = kept;
                None
            }
            Self::Fired => None,
        }
    }

    /// Take a held call
    fn release(&mut self) -> Call<A> {
        match std::mem::replace(self, Self::Fired) {
            Self::Held(callback, value) => Some((callback, value)),
            other => {
                *self = other;
                None
            }
        }
    }

    fn is_parked(&self) -> bool {
        matches!(self, Self::Parked(_))
    }

    fn state(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Armed(_) => "armed",
            Self::Parked(_) => "parked",
            Self::Held(..) => "held",
            Self::Fired => "fired",
        }
    }
}

struct HandlerState<T, E> {
    success: Slot<T>,
    failure: Slot<Vec<E>>,
    complete: Slot<()>,
    /// Caller-installed action, see [`CompletionHandler::finish_delay`]
    finish_delay: Option<Action>,
    /// Group membership release, installed by the dispatcher
    group_leave: Option<Action>,
    resolved: bool,
    completed: bool,
    handles: usize,
}

impl<T, E> HandlerState<T, E> {
    fn outcome_parked(&self) -> bool {
        self.success.is_parked() || self.failure.is_parked()
    }

    /// Hold a due `complete` call while the outcome is still parked
    fn gate_complete(&mut self, call: Call<()>) -> Call<()> {
        match call {
            Some((callback, ())) if self.outcome_parked() => {
                self.complete = Slot::Held(callback, ());
                None
            }
            call => call,
        }
    }

    fn release_complete(&mut self) -> Call<()> {
        if self.outcome_parked() {
            None
        } else {
            self.complete.release()
        }
    }
}

fn run<A>(call: Call<A>) {
    if let Some((callback, value)) = call {
        callback(value);
    }
}

fn run_action(action: Option<Action>) {
    if let Some(action) = action {
        action();
    }
}

/// Callback bundle attached to one logical request.
///
/// Cloning yields another reference to the same handler. Exactly one of
/// `on_success`/`on_failure` fires per logical request, and `on_complete`
/// fires once, after it.
pub struct CompletionHandler<T, E> {
    state: Arc<Mutex<HandlerState<T, E>>>,
}

impl<T, E> CompletionHandler<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HandlerState {
                success: Slot::Idle,
                failure: Slot::Idle,
                complete: Slot::Idle,
                finish_delay: None,
                group_leave: None,
                resolved: false,
                completed: false,
                handles: 1,
            })),
        }
    }

    /// Register the success callback (last registration wins)
    #[must_use]
    pub fn on_success<F>(self, callback: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        let (outcome, displaced, complete) = {
            let mut state = self.state.lock();
            let (outcome, displaced) = state.success.register(Box::new(callback));
            (outcome, displaced, state.release_complete())
        };
        drop(displaced);
        run(outcome);
        run(complete);
        self
    }

    /// Register the failure callback (last registration wins)
    #[must_use]
    pub fn on_failure<F>(self, callback: F) -> Self
    where
        F: FnOnce(Vec<E>) + Send + 'static,
    {
        let (outcome, displaced, complete) = {
            let mut state = self.state.lock();
            let (outcome, displaced) = state.failure.register(Box::new(callback));
            (outcome, displaced, state.release_complete())
        };
        drop(displaced);
        run(outcome);
        run(complete);
        self
    }

    /// Register the completion callback (last registration wins)
    #[must_use]
    pub fn on_complete<F>(self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (call, displaced) = {
            let mut state = self.state.lock();
            let (call, displaced) = state.complete.register(Box::new(move |()| callback()));
            (state.gate_complete(call), displaced)
        };
        drop(displaced);
        run(call);
        self
    }

    /// Replace the action run right after `on_complete`.
    ///
    /// Group membership is tracked separately and is released after this
    /// action. If the handler already completed the action runs immediately.
    pub fn finish_delay<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let action: Action = Box::new(action);
        let outcome = {
            let mut state = self.state.lock();
            if state.completed {
                Err(action)
            } else {
                Ok(state.finish_delay.replace(action))
            }
        };
        match outcome {
            Ok(replaced) => drop(replaced),
            Err(action) => action(),
        }
    }

    /// Run the pending finish-delay action and release group membership
    /// without completing
    pub fn finish_delay_if_exists(&self) {
        let (finish, leave) = {
            let mut state = self.state.lock();
            (state.finish_delay.take(), state.group_leave.take())
        };
        run_action(finish);
        run_action(leave);
    }

    /// Fire `on_complete`, then the finish-delay action, then release group
    /// membership. Only the first call has an effect.
    pub fn complete(&self) {
        let (call, finish, leave) = {
            let mut state = self.state.lock();
            if state.completed {
                return;
            }
            state.completed = true;
            let call = state.complete.signal(());
            (
                state.gate_complete(call),
                state.finish_delay.take(),
                state.group_leave.take(),
            )
        };
        run(call);
        run_action(finish);
        run_action(leave);
    }

    /// Whether `success` or `failure` has been signalled
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.state.lock().resolved
    }

    /// Whether [`CompletionHandler::complete`] has been called
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state.lock().completed
    }

    pub(crate) fn resolve_success(&self, value: T) {
        let call = {
            let mut state = self.state.lock();
            if std::mem::replace(&mut state.resolved, true) {
                return;
            }
            state.success.signal(value)
        };
        run(call);
    }

    pub(crate) fn resolve_failure(&self, errors: Vec<E>) {
        let call = {
            let mut state = self.state.lock();
            if std::mem::replace(&mut state.resolved, true) {
                return;
            }
            state.failure.signal(errors)
        };
        run(call);
    }

    /// Run `action` when this handler completes, after any group release
    /// already installed; runs immediately if it already completed
    pub(crate) fn on_group_leave<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let action: Action = Box::new(action);
        let late = {
            let mut state = self.state.lock();
            if state.completed {
                Some(action)
            } else {
                state.group_leave = Some(match state.group_leave.take() {
                    Some(previous) => Box::new(move || {
                        previous();
                        action();
                    }),
                    None => action,
                });
                None
            }
        };
        run_action(late);
    }
}

impl<T, E> Clone for CompletionHandler<T, E> {
    fn clone(&self) -> Self {
        self.state.lock().handles += 1;
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T, E> Drop for CompletionHandler<T, E> {
    fn drop(&mut self) {
        let held = {
            let mut state = self.state.lock();
            state.handles -= 1;
            if state.handles == 0 {
                state.complete.release()
            } else {
                None
            }
        };
        run(held);
    }
}

impl<T, E> Default for CompletionHandler<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for CompletionHandler<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CompletionHandler")
            .field("success", &state.success.state())
            .field("failure", &state.failure.state())
            .field("complete", &state.complete.state())
            .field("finish_delay", &state.finish_delay.is_some())
            .field("group_leave", &state.group_leave.is_some())
            .field("resolved", &state.resolved)
            .field("completed", &state.completed)
            .field("handles", &state.handles)
            .finish()
    }
}
