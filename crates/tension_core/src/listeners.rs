//! Ordered listener lists
//!
//! Every animated value fans its updates out through a [`Listeners`] list.
//! Listeners fire synchronously in subscription order. Removal is O(1) and
//! idempotent: the slot is freed immediately and the ordering vector is
//! compacted on the next notification, or sooner once removed ids pile up.
//!
//! Notification never holds the internal lock while a listener runs, so a
//! listener may subscribe, unsubscribe, or write back into the value that is
//! notifying it. A panicking listener is caught and logged; the remaining
//! listeners still run.

use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

new_key_type! {
    /// Handle to a registered listener
    pub struct ListenerId;
}

/// A shared listener callback
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ListenerSlots<T> {
    slots: SlotMap<ListenerId, Listener<T>>,
    /// Insertion order; may contain ids that were already removed
    order: Vec<ListenerId>,
}

impl<T> ListenerSlots<T> {
    /// Free a slot, compacting `order` once tombstones outnumber live ids
    fn remove(&mut self, id: ListenerId) -> bool {
        let removed = self.slots.remove(id).is_some();
        if self.order.len() > 2 * self.slots.len() {
            let slots = &self.slots;
            self.order.retain(|id| slots.contains_key(*id));
        }
        removed
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked
///
/// Listener panics are isolated with `catch_unwind`, so poisoning only tells us
/// that a callback misbehaved. The protected data is still consistent.
pub fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An insertion-ordered list of listeners
pub struct Listeners<T> {
    inner: Arc<Mutex<ListenerSlots<T>>>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Listeners<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ListenerSlots {
                slots: SlotMap::with_key(),
                order: Vec::new(),
            })),
        }
    }

    /// Add a listener and return its subscription handle
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe_shared(Arc::new(listener))
    }

    /// Add an already-shared listener
    pub fn subscribe_shared(&self, listener: Listener<T>) -> Subscription {
        let id = {
            let mut guard = lock(&self.inner);
            let id = guard.slots.insert(listener);
            guard.order.push(id);
            id
        };

        let weak: Weak<Mutex<ListenerSlots<T>>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner).remove(id);
            }
        })
    }

    /// Remove a listener by id (no-op if already removed)
    pub fn remove(&self, id: ListenerId) -> bool {
        lock(&self.inner).remove(id)
    }

    /// Invoke every listener with `value`, in subscription order
    ///
    /// Returns the number of listeners that panicked.
    pub fn notify(&self, value: &T) -> usize {
        let snapshot: SmallVec<[Listener<T>; 4]> = {
            let mut guard = lock(&self.inner);
            let ListenerSlots { slots, order } = &mut *guard;
            order.retain(|id| slots.contains_key(*id));
            order.iter().filter_map(|id| slots.get(*id).cloned()).collect()
        };

        let mut faults = 0;
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(value))).is_err() {
                faults += 1;
                tracing::error!("listener panicked during notification; continuing with the rest");
            }
        }
        faults
    }

    /// Number of live listeners
    pub fn len(&self) -> usize {
        lock(&self.inner).slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every listener
    pub fn clear(&self) {
        let mut guard = lock(&self.inner);
        guard.slots.clear();
        guard.order.clear();
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by `subscribe`
///
/// Dropping the handle does NOT unsubscribe; call [`Subscription::unsubscribe`].
/// Unsubscribing more than once is a no-op.
pub struct Subscription {
    remove: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    /// Build a subscription from its removal action
    pub fn new<F>(remove: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            remove: Mutex::new(Some(Box::new(remove))),
        }
    }

    /// A subscription with nothing to remove (e.g. subscribing to a destroyed value)
    pub fn detached() -> Self {
        Self {
            remove: Mutex::new(None),
        }
    }

    pub fn unsubscribe(&self) {
        let remove = lock(&self.remove).take();
        if let Some(remove) = remove {
            remove();
        }
    }

    /// Whether `unsubscribe` has not been called yet
    pub fn is_active(&self) -> bool {
        lock(&self.remove).is_some()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_in_subscription_order() {
        let listeners = Listeners::<i32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..3 {
            let seen = seen.clone();
            let _ = listeners.subscribe(move |v| seen.lock().unwrap().push((tag, *v)));
        }

        listeners.notify(&7);
        assert_eq!(*seen.lock().unwrap(), vec![(0, 7), (1, 7), (2, 7)]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let listeners = Listeners::<i32>::new();
        let count = Arc::new(Mutex::new(0));

        let count_clone = count.clone();
        let sub = listeners.subscribe(move |_| *count_clone.lock().unwrap() += 1);
        let count_clone = count.clone();
        let _keep = listeners.subscribe(move |_| *count_clone.lock().unwrap() += 10);

        listeners.notify(&0);
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        listeners.notify(&0);

        assert_eq!(*count.lock().unwrap(), 21);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn test_listener_may_unsubscribe_during_notify() {
        let listeners = Listeners::<i32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot_clone = slot.clone();
        let seen_clone = seen.clone();
        let first = listeners.subscribe(move |v| {
            seen_clone.lock().unwrap().push(("first", *v));
            if let Some(sub) = slot_clone.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(first);

        let seen_clone = seen.clone();
        let _second = listeners.subscribe(move |v| seen_clone.lock().unwrap().push(("second", *v)));

        listeners.notify(&1);
        listeners.notify(&2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("first", 1), ("second", 1), ("second", 2)]
        );
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let listeners = Listeners::<i32>::new();
        let reached = Arc::new(Mutex::new(false));

        let _bad = listeners.subscribe(|_| panic!("broken listener"));
        let reached_clone = reached.clone();
        let _good = listeners.subscribe(move |_| *reached_clone.lock().unwrap() = true);

        assert_eq!(listeners.notify(&3), 1);
        assert!(*reached.lock().unwrap());
    }

    #[test]
    fn test_churn_without_notify_stays_compact() {
        let listeners = Listeners::<f32>::new();
        let _kept = listeners.subscribe(|_| {});

        for _ in 0..10_000 {
            listeners.subscribe(|_| {}).unsubscribe();
        }

        assert_eq!(listeners.len(), 1);
        assert!(lock(&listeners.inner).order.len() <= 2);
    }

    #[test]
    fn test_subscription_outlives_list() {
        let sub = {
            let listeners = Listeners::<i32>::new();
            listeners.subscribe(|_| {})
        };
        // The list is gone; unsubscribing must not panic
        sub.unsubscribe();
    }
}
