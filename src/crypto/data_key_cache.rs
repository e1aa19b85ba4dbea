use crate::clock::Clock;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::debug;

/// Decrypted data key held in memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedDataKey {
    pub id: String,
    pub namespace: String,
    pub label: String,
    pub data_key: Vec<u8>,
    pub active: bool,
    /// Creation time of the persisted row this entry was resolved from.
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug)]
struct CacheEntry {
    key: CachedDataKey,
    expires_at: OffsetDateTime,
}

impl CacheEntry {
    fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

#[derive(Default)]
struct NamespaceEntries {
    by_id: HashMap<String, CacheEntry>,
    by_label: HashMap<String, CacheEntry>,
}

impl NamespaceEntries {
    fn is_empty(&self) -> bool {
        self.by_id.is_empty() && self.by_label.is_empty()
    }
}

/// Per-namespace cache of decrypted data keys, indexed by id and by label.
///
/// The id index serves decryption. The label index serves encryption and only
/// admits keys whose persisted row is older than the caution period, so a key
/// from a creation that may still roll back is never reused for new ciphertext.
pub struct DataKeyCache {
    ttl: Duration,
    caution_period: Duration,
    clock: Arc<dyn Clock>,
    namespaces: RwLock<HashMap<String, NamespaceEntries>>,
}

impl DataKeyCache {
    pub fn new(ttl: Duration, caution_period: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            caution_period,
            clock,
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Entry for the current key of `label`, if present and unexpired.
    pub fn get_by_label(&self, namespace: &str, label: &str) -> Option<CachedDataKey> {
        let now = self.clock.now();
        let namespaces = self.namespaces.read();
        namespaces
            .get(namespace)
            .and_then(|entries| entries.by_label.get(label))
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.key.clone())
    }

    /// Entry for data key `id`, if present and unexpired.
    pub fn get_by_id(&self, namespace: &str, id: &str) -> Option<CachedDataKey> {
        let now = self.clock.now();
        let namespaces = self.namespaces.read();
        namespaces
            .get(namespace)
            .and_then(|entries| entries.by_id.get(id))
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.key.clone())
    }

    pub fn add_by_id(&self, namespace: &str, key: CachedDataKey) {
        let entry = self.entry(key);
        let mut namespaces = self.namespaces.write();
        namespaces
            .entry(namespace.to_string())
            .or_default()
            .by_id
            .insert(entry.key.id.clone(), entry);
    }

    /// Inserts into the label index when the key has aged past the caution period.
    ///
    /// Returns whether the entry was admitted.
    pub fn add_by_label(&self, namespace: &str, key: CachedDataKey) -> bool {
        let now = self.clock.now();
        if saturating_after(key.created_at, self.caution_period) > now {
            return false;
        }
        let entry = self.entry(key);
        let mut namespaces = self.namespaces.write();
        namespaces
            .entry(namespace.to_string())
            .or_default()
            .by_label
            .insert(entry.key.label.clone(), entry);
        true
    }

    /// Drops both indexes of `namespace`.
    pub fn flush(&self, namespace: &str) {
        if self.namespaces.write().remove(namespace).is_some() {
            debug!(namespace = %namespace, "flushed data key cache");
        }
    }

    /// Removes expired entries across all namespaces. Returns the number removed.
    pub fn remove_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0usize;
        let mut namespaces = self.namespaces.write();
        for entries in namespaces.values_mut() {
            let before = entries.by_id.len() + entries.by_label.len();
            entries.by_id.retain(|_, entry| !entry.is_expired(now));
            entries.by_label.retain(|_, entry| !entry.is_expired(now));
            removed += before - entries.by_id.len() - entries.by_label.len();
        }
        namespaces.retain(|_, entries| !entries.is_empty());
        removed
    }

    /// Number of live entries in both indexes of `namespace`, as `(by_id, by_label)`.
    pub fn len(&self, namespace: &str) -> (usize, usize) {
        self.namespaces
            .read()
            .get(namespace)
            .map(|entries| (entries.by_id.len(), entries.by_label.len()))
            .unwrap_or((0, 0))
    }

    fn entry(&self, key: CachedDataKey) -> CacheEntry {
        CacheEntry {
            key,
            expires_at: saturating_after(self.clock.now(), self.ttl),
        }
    }
}

fn saturating_after(at: OffsetDateTime, by: Duration) -> OffsetDateTime {
    let by = time::Duration::try_from(by).unwrap_or(time::Duration::MAX);
    at.saturating_add(by)
}
