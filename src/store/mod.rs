//! Observable document stores.
//!
//! # Concepts
//!
//! - **DataStore**: holds one document. The document is only ever replaced
//!   wholesale; each replacement notifies every subscriber synchronously, in
//!   the order they subscribed.
//!
//! - **DerivedStore**: a store whose document is a pure projection of a
//!   parent store's document, recomputed on each parent notification.
//!
//! - **RowDataStore**: follows a store of rows and publishes a `RowBundle`
//!   with the per-column filters and the selection folded in.
//!
//! - **StoreBinding**: ties a render callback to a store for the lifetime of
//!   a mounted subtree.
//!
//! # Notification discipline
//!
//! ```text
//! set_data(doc)
//!   ↓ (store notifying already? → queue doc, return)
//! replace document, bump version
//!   ↓ (snapshot subscriber list, release lock)
//! callback(&doc) for each subscriber still registered
//!   ↓
//! drain queued documents, one full round each
//! ```

mod binding;
mod derived;
mod rows;

pub use binding::StoreBinding;
pub use derived::DerivedStore;
pub use rows::{Row, RowBundle, RowDataStore, RowFilter, Selection};

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Identifies one subscription on one store. Ids increase monotonically,
/// which is what gives subscribers their notification order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

struct StoreInner<T> {
    name: String,
    data: T,
    version: u64,
    next_id: u64,
    subscribers: BTreeMap<SubscriptionId, Callback<T>>,
    notifying: bool,
    pending: VecDeque<T>,
}

/// Lock a mutex, recovering the guard if a thread panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A holder of one document plus its ordered subscriber list.
///
/// Cloning a `DataStore` yields another handle to the same store.
pub struct DataStore<T: Clone + Send + Sync + 'static> {
    inner: Arc<Mutex<StoreInner<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Clone for DataStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> fmt::Debug for DataStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("DataStore")
            .field("name", &inner.name)
            .field("version", &inner.version)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

impl<T: Clone + Default + Send + Sync + 'static> DataStore<T> {
    /// Create a store holding the empty default document.
    pub fn new(name: &str) -> Self {
        Self::with_data(name, T::default())
    }
}

impl<T: Clone + Send + Sync + 'static> DataStore<T> {
    /// Create a store seeded with a document. Seeding is not a replacement:
    /// `version()` stays at zero until the first `set_data`.
    pub fn with_data(name: &str, data: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                name: name.to_string(),
                data,
                version: 0,
                next_id: 0,
                subscribers: BTreeMap::new(),
                notifying: false,
                pending: VecDeque::new(),
            })),
        }
    }

    pub fn name(&self) -> String {
        lock(&self.inner).name.clone()
    }

    /// Current document.
    pub fn get_data(&self) -> T {
        lock(&self.inner).data.clone()
    }

    /// Read the current document without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let inner = lock(&self.inner);
        f(&inner.data)
    }

    /// Number of wholesale replacements so far.
    pub fn version(&self) -> u64 {
        lock(&self.inner).version
    }

    /// Whether `set_data` has been called at least once.
    pub fn is_loaded(&self) -> bool {
        self.version() > 0
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner).subscribers.len()
    }

    /// Replace the document and notify every subscriber with it.
    ///
    /// Calls made from inside a notification round (re-entrant calls, or a
    /// concurrent caller on another thread) are queued and delivered after the
    /// current round, each with a round of its own.
    pub fn set_data(&self, data: T) {
        {
            let mut inner = lock(&self.inner);
            if inner.notifying {
                log::debug!("store {}: queueing re-entrant update", inner.name);
                inner.pending.push_back(data);
                return;
            }
            inner.notifying = true;
            inner.pending.push_back(data);
        }

        let _round = NotifyRound { inner: &self.inner };
        loop {
            let (doc, callbacks) = {
                let mut inner = lock(&self.inner);
                let Some(doc) = inner.pending.pop_front() else {
                    inner.notifying = false;
                    break;
                };
                inner.data = doc.clone();
                inner.version += 1;
                log::debug!(
                    "store {}: version {} -> {} subscribers",
                    inner.name,
                    inner.version,
                    inner.subscribers.len()
                );
                let callbacks: Vec<(SubscriptionId, Callback<T>)> = inner
                    .subscribers
                    .iter()
                    .map(|(id, cb)| (*id, Arc::clone(cb)))
                    .collect();
                (doc, callbacks)
            };

            for (id, callback) in callbacks {
                // Skip anyone unsubscribed earlier in this round.
                let live = lock(&self.inner).subscribers.contains_key(&id);
                if live {
                    callback(&doc);
                }
            }
        }
    }

    /// Register a callback for every future `set_data`.
    ///
    /// The callback stays registered for as long as the returned
    /// `Subscription` is alive.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut inner = lock(&self.inner);
            let id = SubscriptionId(inner.next_id);
            inner.next_id += 1;
            inner.subscribers.insert(id, Arc::new(callback));
            id
        };

        let weak: Weak<Mutex<StoreInner<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            id,
            release: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    lock(&inner).subscribers.remove(&id);
                }
            })),
        }
    }

    /// Drop every subscriber. Used when the owning view is torn down.
    pub fn clear_subscribers(&self) {
        let mut inner = lock(&self.inner);
        log::debug!(
            "store {}: clearing {} subscribers",
            inner.name,
            inner.subscribers.len()
        );
        inner.subscribers.clear();
    }
}

/// Ends a notification round that a panicking subscriber unwound out of, so
/// the store keeps accepting updates. Documents queued during that round are
/// discarded.
struct NotifyRound<'a, T> {
    inner: &'a Mutex<StoreInner<T>>,
}

impl<T> Drop for NotifyRound<'_, T> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        let mut inner = lock(self.inner);
        log::warn!(
            "store {}: subscriber panicked, dropping {} queued updates",
            inner.name,
            inner.pending.len()
        );
        inner.pending.clear();
        inner.notifying = false;
    }
}

/// Scoped handle for one store subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriptionId,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Unsubscribe now. Equivalent to dropping the handle.
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.release.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}
