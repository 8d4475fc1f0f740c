//! Ordered collection shared between concurrently completing requests.
//!
//! Every operation takes the same lock, so appends and clears are applied in
//! the order they are submitted and readers never observe a partial update.

use parking_lot::Mutex;

/// Thread-safe FIFO of elements (typically deferred actions).
pub struct ThreadSafeQueue<T> {
    items: Mutex<Vec<T>>,
}

impl<T> ThreadSafeQueue<T> {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    /// Number of queued elements
    #[must_use]
    pub fn count(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the queue holds no elements
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Append an element and return the queue length before the append.
    ///
    /// A return value of `0` means this element is the first one queued.
    pub fn append(&self, item: T) -> usize {
        let mut items = self.items.lock();
        let before = items.len();
        items.push(item);
        before
    }

    /// Drop every queued element
    pub fn remove_all(&self) {
        // Elements are dropped after the lock is released so their
        // destructors may touch the queue again.
        let drained = std::mem::take(&mut *self.items.lock());
        drop(drained);
    }

    /// Take every queued element, leaving the queue empty
    #[must_use]
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock())
    }

    /// Keep only the elements matching `keep`; returns how many were removed
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let removed = {
            let mut items = self.items.lock();
            let (kept, removed): (Vec<T>, Vec<T>) =
                std::mem::take(&mut *items).into_iter().partition(|item| keep(item));
            *items = kept;
            removed
        };
        removed.len()
    }

    /// Visit every element in order while holding the lock.
    ///
    /// `visit` must not call back into this queue.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&T),
    {
        let items = self.items.lock();
        for item in items.iter() {
            visit(item);
        }
    }
}

impl<T> Default for ThreadSafeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ThreadSafeQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadSafeQueue")
            .field("count", &self.count())
            .finish()
    }
}
