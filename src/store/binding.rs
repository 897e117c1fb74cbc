use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{DataStore, Subscription};

/// Ties a render callback to a store for the lifetime of a mounted subtree.
///
/// Mounting renders once with the current document and subscribes once.
/// Every notification re-renders with the new document; re-rendering never
/// touches the subscription. Unmounting (or dropping) releases it.
pub struct StoreBinding<T: Clone + Send + Sync + 'static> {
    store: DataStore<T>,
    subscription: Option<Subscription>,
    renders: Arc<AtomicU64>,
}

impl<T: Clone + Send + Sync + 'static> StoreBinding<T> {
    pub fn mount(store: &DataStore<T>, render: impl Fn(&T) + Send + Sync + 'static) -> Self {
        let renders = Arc::new(AtomicU64::new(0));
        let render: Arc<dyn Fn(&T) + Send + Sync> = Arc::new(render);

        // Subscribe before the first render so an update landing in between
        // is rendered rather than missed.
        let counter = Arc::clone(&renders);
        let render_clone = Arc::clone(&render);
        let subscription = store.subscribe(move |doc: &T| {
            render_clone(doc);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        render(&store.get_data());
        renders.fetch_add(1, Ordering::SeqCst);
        log::debug!(
            "binding mounted on store {} ({:?})",
            store.name(),
            subscription.id()
        );

        Self {
            store: store.clone(),
            subscription: Some(subscription),
            renders,
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn render_count(&self) -> u64 {
        self.renders.load(Ordering::SeqCst)
    }

    /// Read-only view of the bound document.
    pub fn data(&self) -> T {
        self.store.get_data()
    }

    pub fn unmount(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            log::debug!("binding unmounted from store {}", self.store.name());
            subscription.unsubscribe();
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for StoreBinding<T> {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_renders_on_mount_and_on_each_update() {
        let store = DataStore::with_data("title", "draft".to_string());
        let frames = Arc::new(Mutex::new(Vec::new()));
        let frames_clone = Arc::clone(&frames);
        let binding = StoreBinding::mount(&store, move |title: &String| {
            frames_clone.lock().unwrap().push(title.clone());
        });

        store.set_data("final".into());
        assert_eq!(*frames.lock().unwrap(), vec!["draft", "final"]);
        assert_eq!(binding.render_count(), 2);
        assert_eq!(binding.data(), "final");
    }

    #[test]
    fn test_update_during_mount_is_rendered() {
        let store = DataStore::with_data("n", 0u32);
        let frames = Arc::new(Mutex::new(Vec::new()));
        let frames_clone = Arc::clone(&frames);
        let writer = store.clone();
        let binding = StoreBinding::mount(&store, move |v: &u32| {
            frames_clone.lock().unwrap().push(*v);
            if *v == 0 {
                writer.set_data(1);
            }
        });

        assert_eq!(*frames.lock().unwrap(), vec![0, 1]);
        assert_eq!(binding.render_count(), 2);
        assert_eq!(binding.data(), 1);
    }

    #[test]
    fn test_rerender_does_not_resubscribe() {
        let store = DataStore::with_data("n", 0u32);
        let binding = StoreBinding::mount(&store, |_| {});
        for n in 1..=20 {
            store.set_data(n);
        }
        assert_eq!(store.listener_count(), 1);
        assert_eq!(binding.render_count(), 21);
    }

    #[test]
    fn test_unmount_removes_subscription() {
        let store = DataStore::with_data("n", 0u32);
        let calls = Arc::new(AtomicU64::new(0));
        let calls_clone = Arc::clone(&calls);
        let mut binding = StoreBinding::mount(&store, move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(store.listener_count(), 1);

        binding.unmount();
        assert!(!binding.is_mounted());
        assert_eq!(store.listener_count(), 0);

        store.set_data(1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_unmounts() {
        let store = DataStore::with_data("n", 0u32);
        {
            let _binding = StoreBinding::mount(&store, |_| {});
            assert_eq!(store.listener_count(), 1);
        }
        assert_eq!(store.listener_count(), 0);
    }
}
