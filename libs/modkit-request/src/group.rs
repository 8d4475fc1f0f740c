//! Request groups: a batch of logical requests whose completion is tracked
//! jointly.
//!
//! A group counts outstanding members. Every logical request dispatched
//! into a group holds a [`GroupLease`] until its terminal completion; the
//! `make_group` body holds one more lease while it runs. When the last
//! lease is released the group leaves the registry and its `on_complete`
//! callback fires on the releasing thread.

use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Identifier of a group within its registry
pub type GroupId = u64;

type Action = Box<dyn FnOnce() + Send>;

enum Completion {
    /// Members outstanding; callback (if any) waits
    Pending(Option<Action>),
    /// Finished before a callback was registered
    Finished,
    /// Callback delivered
    Fired,
}

struct GroupInner {
    id: GroupId,
    outstanding: AtomicUsize,
    completion: Mutex<Completion>,
    registry: GroupRegistry,
}

/// Handle to a request group
#[derive(Clone)]
pub struct Group {
    inner: Arc<GroupInner>,
}

impl Group {
    #[must_use]
    pub fn id(&self) -> GroupId {
        self.inner.id
    }

    /// Number of leases still held
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        !matches!(*self.inner.completion.lock(), Completion::Pending(_))
    }

    /// Register the callback fired once every member has completed.
    ///
    /// Fires immediately if the group has already finished. Last
    /// registration wins while the group is pending.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let fire = {
            let mut completion = self.inner.completion.lock();
            if let Completion::Pending(slot) = &mut *completion {
                *slot = Some(Box::new(callback));
                return;
            }
            let fire = matches!(*completion, Completion::Finished);
            *completion = Completion::Fired;
            fire
        };
        if fire {
            callback();
        } else {
            tracing::debug!(group = self.id(), "group completion already delivered");
        }
    }

    /// Take a membership lease; `None` once the group has finished.
    #[must_use]
    pub fn join(&self) -> Option<GroupLease> {
        self.inner
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > 0).then_some(n + 1)
            })
            .ok()
            .map(|_| GroupLease {
                group: self.clone(),
            })
    }

    fn leave(&self) {
        if self.inner.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finish();
        }
    }

    fn finish(&self) {
        self.inner.registry.remove(self.id());
        let callback = {
            let mut completion = self.inner.completion.lock();
            match std::mem::replace(&mut *completion, Completion::Fired) {
                Completion::Pending(Some(callback)) => Some(callback),
                Completion::Pending(None) => {
                    *completion = Completion::Finished;
                    None
                }
                other => {
                    *completion = other;
                    None
                }
            }
        };
        tracing::debug!(group = self.id(), "request group finished");
        if let Some(callback) = callback {
            callback();
        }
    }

    fn belongs_to(&self, registry: &GroupRegistry) -> bool {
        Arc::ptr_eq(&self.inner.registry.state, &registry.state)
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Group {}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("id", &self.id())
            .field("outstanding", &self.outstanding())
            .finish_non_exhaustive()
    }
}

/// Membership in a group; dropping it leaves the group
#[must_use = "dropping a lease leaves the group immediately"]
pub struct GroupLease {
    group: Group,
}

impl GroupLease {
    #[must_use]
    pub fn group(&self) -> &Group {
        &self.group
    }
}

impl Drop for GroupLease {
    fn drop(&mut self) {
        self.group.leave();
    }
}

impl fmt::Debug for GroupLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GroupLease").field(&self.group.id()).finish()
    }
}

#[derive(Default)]
struct RegistryState {
    /// Open groups in creation order
    active: Vec<GroupId>,
    groups: HashMap<GroupId, Weak<GroupInner>>,
}

/// Active-group list and id lookup, mutated together under one lock
#[derive(Clone, Default)]
pub struct GroupRegistry {
    state: Arc<Mutex<RegistryState>>,
    next_id: Arc<AtomicU64>,
}

impl GroupRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a group; the returned lease is the creator's hold
    #[must_use]
    pub fn create(&self) -> (Group, GroupLease) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let group = Group {
            inner: Arc::new(GroupInner {
                id,
                outstanding: AtomicUsize::new(1),
                completion: Mutex::new(Completion::Pending(None)),
                registry: self.clone(),
            }),
        };
        {
            let mut state = self.state.lock();
            state.active.push(id);
            state.groups.insert(id, Arc::downgrade(&group.inner));
        }
        let hold = GroupLease {
            group: group.clone(),
        };
        (group, hold)
    }

    /// Look up an open group
    #[must_use]
    pub fn get(&self, id: GroupId) -> Option<Group> {
        self.state
            .lock()
            .groups
            .get(&id)
            .and_then(Weak::upgrade)
            .map(|inner| Group { inner })
    }

    /// Ids of open groups in creation order
    #[must_use]
    pub fn active_ids(&self) -> Vec<GroupId> {
        self.state.lock().active.clone()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    fn remove(&self, id: GroupId) {
        let mut state = self.state.lock();
        state.active.retain(|active| *active != id);
        state.groups.remove(&id);
    }
}

impl fmt::Debug for GroupRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupRegistry")
            .field("active", &self.active_ids())
            .finish()
    }
}

thread_local! {
    static SCOPE: RefCell<Vec<Group>> = const { RefCell::new(Vec::new()) };
}

/// Keeps a group as the innermost scope on this thread until dropped
pub(crate) struct ScopeGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPE.with(|scope| {
            scope.borrow_mut().pop();
        });
    }
}

pub(crate) fn enter(group: &Group) -> ScopeGuard {
    SCOPE.with(|scope| scope.borrow_mut().push(group.clone()));
    ScopeGuard {
        _not_send: std::marker::PhantomData,
    }
}

/// Innermost group on this thread that belongs to `registry`
pub(crate) fn current(registry: &GroupRegistry) -> Option<Group> {
    SCOPE.with(|scope| {
        scope
            .borrow()
            .iter()
            .rev()
            .find(|group| group.belongs_to(registry))
            .cloned()
    })
}
