use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;
type CallbackMap<T> = Mutex<BTreeMap<u64, Callback<T>>>;

/// Callbacks interested in one kind of snapshot, called in subscription order.
pub struct Subscribers<T> {
    callbacks: Arc<CallbackMap<T>>,
    next_id: AtomicU64,
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self {
            callbacks: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(0),
        }
    }
}

fn lock<T>(callbacks: &CallbackMap<T>) -> MutexGuard<'_, BTreeMap<u64, Callback<T>>> {
    callbacks
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T: 'static> Subscribers<T> {
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.callbacks).insert(id, Arc::new(callback));

        let weak: Weak<CallbackMap<T>> = Arc::downgrade(&self.callbacks);
        Subscription {
            cancel: Box::new(move || {
                if let Some(callbacks) = weak.upgrade() {
                    lock(&callbacks).remove(&id);
                }
            }),
        }
    }

    /// Calls every callback with `value`. The list is copied first so a
    /// callback may unsubscribe itself.
    pub fn broadcast(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = lock(&self.callbacks).values().cloned().collect();
        for callback in callbacks {
            callback(value);
        }
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.callbacks).is_empty()
    }

    pub fn len(&self) -> usize {
        lock(&self.callbacks).len()
    }
}

/// Handle returned by every `on_*` registration.
#[must_use = "dropping a Subscription keeps the callback registered; call unsubscribe() to remove it"]
pub struct Subscription {
    cancel: Box<dyn FnOnce() + Send>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        (self.cancel)();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
