use dashmap::DashMap;
use std::{
    hash::Hash,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::debug;

/// Entrada del cache con su instante de expiración
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Option<Duration>) -> Self {
        let inserted_at = Instant::now();
        Self {
            value,
            inserted_at,
            expires_at: ttl.map(|ttl| inserted_at + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// Cache concurrente con TTL y capacidad acotada.
///
/// Al llenarse descarta la entrada más antigua. Clonar el cache comparte
/// los datos.
#[derive(Debug)]
pub struct TtlCache<K: Clone + Eq + Hash, V> {
    data: Arc<DashMap<K, CacheEntry<V>>>,
    capacity: usize,
    default_ttl: Option<Duration>,
}

impl<K, V> TtlCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize, default_ttl: Option<Duration>) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
            default_ttl,
        }
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.insert_with_ttl(key, value, self.default_ttl)
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Option<Duration>) -> Option<V> {
        if !self.data.contains_key(&key) && self.data.len() >= self.capacity {
            self.cleanup_expired();
            if self.data.len() >= self.capacity {
                self.evict_oldest();
            }
        }

        self.data
            .insert(key, CacheEntry::new(value, ttl))
            .map(|old| old.value)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.data.get(key)?;
        if entry.is_expired(Instant::now()) {
            drop(entry);
            self.data.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Limpia entradas expiradas y retorna el número de elementos removidos
    pub fn cleanup_expired(&self) -> usize {
        let before = self.data.len();
        let now = Instant::now();
        self.data.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.data.len());

        if removed > 0 {
            debug!("Limpiadas {} entradas expiradas del cache", removed);
        }

        removed
    }

    fn evict_oldest(&self) {
        let oldest = self
            .data
            .iter()
            .min_by_key(|entry| entry.value().inserted_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            self.data.remove(&key);
        }
    }
}

impl<K, V> Clone for TtlCache<K, V>
where
    K: Clone + Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            capacity: self.capacity,
            default_ttl: self.default_ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_returns_values() {
        let cache = TtlCache::new(10, None);
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"b".to_string()), None);
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let cache = TtlCache::new(10, None);
        cache.insert_with_ttl("a".to_string(), 1, Some(Duration::ZERO));
        assert_eq!(cache.get(&"a".to_string()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn full_cache_evicts_the_oldest_entry() {
        let cache = TtlCache::new(2, None);
        cache.insert(1, "uno");
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(2, "dos");
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(3, "tres");

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&3), Some("tres"));
    }

    #[test]
    fn overwriting_does_not_evict() {
        let cache = TtlCache::new(1, None);
        cache.insert(1, "uno");
        assert_eq!(cache.insert(1, "otro"), Some("uno"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cleanup_reports_removed_entries() {
        let cache = TtlCache::new(10, None);
        cache.insert_with_ttl(1, 1, Some(Duration::ZERO));
        cache.insert_with_ttl(2, 2, Some(Duration::ZERO));
        cache.insert(3, 3);
        assert_eq!(cache.cleanup_expired(), 2);
        assert_eq!(cache.capacity(), 10);
    }
}
