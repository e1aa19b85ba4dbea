use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{
    Mutex as AsyncMutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
};

/// Lock table serializing data-key resolution per (namespace, label).
///
/// Resolution for a label holds the namespace lock shared and the label lock
/// exclusively. Rotation and re-encryption hold the namespace lock exclusively,
/// which waits out every in-flight resolution in that namespace.
///
/// Entries are only cloned out of the table under its mutex, so an entry whose
/// sole owner is the table has no holder or waiter and is dropped when the last
/// guard releases.
#[derive(Default)]
pub(crate) struct KeyLocks {
    namespaces: Mutex<HashMap<String, Arc<RwLock<()>>>>,
    labels: Mutex<HashMap<(String, String), Arc<AsyncMutex<()>>>>,
}

pub(crate) struct LabelGuard<'a> {
    locks: &'a KeyLocks,
    key: (String, String),
    label: Option<OwnedMutexGuard<()>>,
    namespace: Option<OwnedRwLockReadGuard<()>>,
}

impl Drop for LabelGuard<'_> {
    fn drop(&mut self) {
        self.label.take();
        self.namespace.take();
        self.locks.prune_label(&self.key);
        self.locks.prune_namespace(&self.key.0);
    }
}

pub(crate) struct NamespaceGuard<'a> {
    locks: &'a KeyLocks,
    namespace: String,
    guard: Option<OwnedRwLockWriteGuard<()>>,
}

impl Drop for NamespaceGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.prune_namespace(&self.namespace);
    }
}

impl KeyLocks {
    pub(crate) async fn lock_label(&self, namespace: &str, label: &str) -> LabelGuard<'_> {
        // Declared first so a cancelled wait drops it last and still prunes.
        let mut guard = LabelGuard {
            locks: self,
            key: (namespace.to_string(), label.to_string()),
            label: None,
            namespace: None,
        };
        let namespace_lock = self.namespace_lock(namespace);
        let label_lock = self
            .labels
            .lock()
            .entry(guard.key.clone())
            .or_default()
            .clone();

        guard.namespace = Some(namespace_lock.read_owned().await);
        guard.label = Some(label_lock.lock_owned().await);
        guard
    }

    pub(crate) async fn lock_namespace(&self, namespace: &str) -> NamespaceGuard<'_> {
        let mut guard = NamespaceGuard {
            locks: self,
            namespace: namespace.to_string(),
            guard: None,
        };
        let namespace_lock = self.namespace_lock(namespace);
        guard.guard = Some(namespace_lock.write_owned().await);
        guard
    }

    fn namespace_lock(&self, namespace: &str) -> Arc<RwLock<()>> {
        self.namespaces
            .lock()
            .entry(namespace.to_string())
            .or_default()
            .clone()
    }

    fn prune_label(&self, key: &(String, String)) {
        let mut labels = self.labels.lock();
        if labels.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            labels.remove(key);
        }
    }

    fn prune_namespace(&self, namespace: &str) {
        let mut namespaces = self.namespaces.lock();
        if namespaces
            .get(namespace)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            namespaces.remove(namespace);
        }
    }

    #[cfg(test)]
    fn table_sizes(&self) -> (usize, usize) {
        (self.namespaces.lock().len(), self.labels.lock().len())
    }
}
