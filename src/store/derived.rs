use std::sync::Arc;

use super::{DataStore, Subscription};

/// A store whose document is always `project(parent document)`.
///
/// There is no way to set a derived store's document directly. Dropping the
/// `DerivedStore` releases its subscription on the parent.
pub struct DerivedStore<P, T>
where
    P: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    store: DataStore<T>,
    project: Arc<dyn Fn(&P) -> T + Send + Sync>,
    _parent: Subscription,
}

impl<P, T> DerivedStore<P, T>
where
    P: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Project the parent's current document, then follow its updates.
    pub fn new(
        name: &str,
        parent: &DataStore<P>,
        project: impl Fn(&P) -> T + Send + Sync + 'static,
    ) -> Self {
        let project: Arc<dyn Fn(&P) -> T + Send + Sync> = Arc::new(project);
        let store = DataStore::with_data(name, parent.with(|doc| project(doc)));

        let target = store.clone();
        let project_clone = Arc::clone(&project);
        let subscription = parent.subscribe(move |doc: &P| {
            target.set_data(project_clone(doc));
        });

        Self {
            store,
            project,
            _parent: subscription,
        }
    }

    /// The underlying store, for subscriptions and bindings.
    pub fn store(&self) -> &DataStore<T> {
        &self.store
    }

    pub fn get_data(&self) -> T {
        self.store.get_data()
    }

    /// Run the projection over an arbitrary parent document.
    pub fn project(&self, parent: &P) -> T {
        (self.project)(parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_initial_projection() {
        let parent = DataStore::with_data("numbers", vec![1u32, 2, 3]);
        let sum = DerivedStore::new("sum", &parent, |v: &Vec<u32>| v.iter().sum::<u32>());
        assert_eq!(sum.get_data(), 6);
        assert!(!sum.store().is_loaded());
    }

    #[test]
    fn test_tracks_parent_after_every_notification() {
        let parent = DataStore::with_data("numbers", vec![1u32]);
        let len = DerivedStore::new("len", &parent, |v: &Vec<u32>| v.len());

        for n in 2..6 {
            parent.set_data((0..n).collect());
            assert_eq!(len.get_data(), len.project(&parent.get_data()));
        }
        assert_eq!(len.get_data(), 5);
    }

    #[test]
    fn test_cascades_to_own_subscribers() {
        let parent = DataStore::with_data("numbers", vec![1u32]);
        let doubled = DerivedStore::new("doubled", &parent, |v: &Vec<u32>| {
            v.iter().map(|n| n * 2).collect::<Vec<u32>>()
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _sub = doubled
            .store()
            .subscribe(move |v: &Vec<u32>| seen_clone.lock().unwrap().push(v.clone()));

        parent.set_data(vec![5, 6]);
        assert_eq!(*seen.lock().unwrap(), vec![vec![10, 12]]);
    }

    #[test]
    fn test_chained_derivation() {
        let parent = DataStore::with_data("words", vec!["a".to_string()]);
        let lens = DerivedStore::new("lens", &parent, |v: &Vec<String>| {
            v.iter().map(String::len).collect::<Vec<usize>>()
        });
        let total = DerivedStore::new("total", lens.store(), |v: &Vec<usize>| {
            v.iter().sum::<usize>()
        });

        parent.set_data(vec!["abc".into(), "de".into()]);
        assert_eq!(total.get_data(), 5);
    }

    #[test]
    fn test_mount_unmount_cycles_do_not_leak() {
        let parent = DataStore::with_data("numbers", vec![1u32]);
        for _ in 0..50 {
            let derived = DerivedStore::new("len", &parent, |v: &Vec<u32>| v.len());
            assert_eq!(parent.listener_count(), 1);
            drop(derived);
        }
        assert_eq!(parent.listener_count(), 0);
    }

    #[test]
    fn test_parent_reentry_from_derived_subscriber() {
        let parent = DataStore::with_data("n", 1u32);
        let derived = DerivedStore::new("n+1", &parent, |n: &u32| n + 1);

        // A consumer of the derived store that writes back to the parent
        // mid-render: the parent queues the write instead of interleaving.
        let parent_handle = parent.clone();
        let _sub = derived.store().subscribe(move |n: &u32| {
            if *n < 5 {
                parent_handle.set_data(*n);
            }
        });

        parent.set_data(2);
        assert_eq!(parent.get_data(), 4);
        assert_eq!(derived.get_data(), 5);
        assert_eq!(derived.get_data(), derived.project(&parent.get_data()));
    }
}
