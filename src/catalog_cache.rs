// Catalogue cache in front of an inventory store
// Hotels and room types change rarely and are cached with a TTL; bookings always
// go to the backing store so availability is never answered from stale data

use crate::model::{Booking, Hotel, Room};
use crate::store::{InventoryStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

// Key used for "no city filter"
const ANY_CITY: &str = "*";

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hit_count: AtomicUsize,
    pub miss_count: AtomicUsize,
    pub eviction_count: AtomicUsize,
    pub expired_count: AtomicUsize,
    pub average_lookup_time_ns: AtomicU64,
    pub total_lookups: AtomicUsize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStatsReport {
    pub items_count: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub eviction_count: usize,
    pub expired_count: usize,
    pub average_lookup_time_ns: u64,
    pub total_lookups: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CatalogCacheConfig {
    pub default_ttl_seconds: u64,
    // Across hotel lists and room lists together
    pub max_entries: usize,
}

impl Default for CatalogCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 300,
            max_entries: 10_000,
        }
    }
}

struct CacheEntry<T> {
    data: T,
    created_at: Instant,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn new(data: T, ttl: Duration) -> Self {
        Self {
            data,
            created_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

pub struct CachedInventoryStore<S: InventoryStore> {
    inner: Arc<S>,
    ttl: Duration,
    max_entries: usize,
    hotels_by_city: DashMap<String, CacheEntry<Vec<Hotel>>>,
    rooms_by_hotel: DashMap<String, CacheEntry<Vec<Room>>>,
    stats: CacheStats,
}

impl<S: InventoryStore> CachedInventoryStore<S> {
    pub fn new(inner: Arc<S>, config: CatalogCacheConfig) -> Self {
        Self {
            inner,
            ttl: Duration::from_secs(config.default_ttl_seconds),
            max_entries: config.max_entries.max(1),
            hotels_by_city: DashMap::new(),
            rooms_by_hotel: DashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    /// Drops the hotel's room list and every city list, since any of them may
    /// contain the edited hotel.
    pub fn invalidate_hotel(&self, hotel_id: &str) -> usize {
        usize::from(self.rooms_by_hotel.remove(hotel_id).is_some())
            + drain(&self.hotels_by_city)
    }

    pub fn invalidate_city(&self, city: Option<&str>) -> usize {
        usize::from(self.hotels_by_city.remove(city_key(city)).is_some())
    }

    pub fn clear(&self) -> usize {
        drain(&self.hotels_by_city) + drain(&self.rooms_by_hotel)
    }

    // Derived from the maps so concurrent removals can never skew it
    pub fn len(&self) -> usize {
        self.hotels_by_city.len() + self.rooms_by_hotel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStatsReport {
        CacheStatsReport {
            items_count: self.len(),
            hit_count: self.stats.hit_count.load(Ordering::SeqCst),
            miss_count: self.stats.miss_count.load(Ordering::SeqCst),
            eviction_count: self.stats.eviction_count.load(Ordering::SeqCst),
            expired_count: self.stats.expired_count.load(Ordering::SeqCst),
            average_lookup_time_ns: self.stats.average_lookup_time_ns.load(Ordering::SeqCst),
            total_lookups: self.stats.total_lookups.load(Ordering::SeqCst),
        }
    }

    fn lookup<T: Clone>(&self, map: &DashMap<String, CacheEntry<T>>, key: &str) -> Option<T> {
        let now = Instant::now();
        self.stats.total_lookups.fetch_add(1, Ordering::SeqCst);

        // The read guard is released at the end of this statement; removing
        // while holding it would deadlock on the shard
        let found = map
            .get(key)
            .map(|entry| (!entry.is_expired()).then(|| entry.data.clone()));

        let cached = match found {
            Some(Some(data)) => Some(data),
            Some(None) => {
                if map.remove_if(key, |_, e| e.is_expired()).is_some() {
                    self.stats.expired_count.fetch_add(1, Ordering::SeqCst);
                }
                None
            }
            None => None,
        };

        if cached.is_some() {
            self.stats.hit_count.fetch_add(1, Ordering::SeqCst);
        } else {
            self.stats.miss_count.fetch_add(1, Ordering::SeqCst);
        }
        self.store_lookup_time(now);
        cached
    }

    fn insert<T>(&self, map: &DashMap<String, CacheEntry<T>>, key: String, data: T) {
        if self.len() >= self.max_entries && !map.contains_key(&key) {
            self.evict_oldest();
        }
        map.insert(key, CacheEntry::new(data, self.ttl));
    }

    fn evict_oldest(&self) {
        let oldest_hotels = oldest_key(&self.hotels_by_city);
        let oldest_rooms = oldest_key(&self.rooms_by_hotel);

        let evicted = match (oldest_hotels, oldest_rooms) {
            (Some((key, h_at)), Some((_, r_at))) if h_at <= r_at => {
                self.hotels_by_city.remove(&key).is_some()
            }
            (_, Some((key, _))) => self.rooms_by_hotel.remove(&key).is_some(),
            (Some((key, _)), None) => self.hotels_by_city.remove(&key).is_some(),
            (None, None) => false,
        };

        if evicted {
            self.stats.eviction_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn store_lookup_time(&self, started: Instant) {
        let duration_ns = started.elapsed().as_nanos() as u64;
        let total_lookups = self.stats.total_lookups.load(Ordering::SeqCst) as u64;
        let current_avg = self.stats.average_lookup_time_ns.load(Ordering::SeqCst);

        let new_avg = if total_lookups <= 1 {
            duration_ns
        } else {
            (current_avg * (total_lookups - 1) + duration_ns) / total_lookups
        };

        self.stats
            .average_lookup_time_ns
            .store(new_avg, Ordering::SeqCst);
    }
}

// Removes every entry and returns how many this call actually took out
fn drain<T>(map: &DashMap<String, CacheEntry<T>>) -> usize {
    let mut removed = 0;
    map.retain(|_, _| {
        removed += 1;
        false
    });
    removed
}

fn city_key(city: Option<&str>) -> &str {
    city.unwrap_or(ANY_CITY)
}

fn oldest_key<K, T>(map: &DashMap<K, CacheEntry<T>>) -> Option<(K, Instant)>
where
    K: Eq + Hash + Clone,
{
    map.iter()
        .min_by_key(|entry| entry.value().created_at)
        .map(|entry| (entry.key().clone(), entry.value().created_at))
}

#[async_trait]
impl<S: InventoryStore> InventoryStore for CachedInventoryStore<S> {
    async fn list_hotels_by_city(&self, city: Option<&str>) -> Result<Vec<Hotel>, StoreError> {
        let key = city_key(city);
        if let Some(hotels) = self.lookup(&self.hotels_by_city, key) {
            return Ok(hotels);
        }

        let hotels = self.inner.list_hotels_by_city(city).await?;
        debug!(city = key, count = hotels.len(), "caching hotel list");
        self.insert(&self.hotels_by_city, key.to_string(), hotels.clone());
        Ok(hotels)
    }

    async fn list_confirmed_bookings(
        &self,
        hotel_ids: &[String],
        check_out_after: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError> {
        self.inner
            .list_confirmed_bookings(hotel_ids, check_out_after)
            .await
    }

    async fn list_rooms_for_hotel(&self, hotel_id: &str) -> Result<Vec<Room>, StoreError> {
        if let Some(rooms) = self.lookup(&self.rooms_by_hotel, hotel_id) {
            return Ok(rooms);
        }

        let rooms = self.inner.list_rooms_for_hotel(hotel_id).await?;
        self.insert(&self.rooms_by_hotel, hotel_id.to_string(), rooms.clone());
        Ok(rooms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::SearchCriteria;
    use crate::memory_store::InMemoryStore;
    use crate::model::fixtures::*;
    use crate::model::BookingStatus;
    use crate::resolver::AvailabilityResolver;

    fn seeded() -> Arc<InMemoryStore> {
        let store = InMemoryStore::new();
        store.add_hotel(hotel("h1", "Lisbon"));
        store.add_hotel(hotel("h2", "Lisbon"));
        store.add_hotel(hotel("h3", "Porto"));
        store.add_room(room("h1", "r1", 2, 1));
        store.add_room(room("h2", "r1", 2, 1));
        store.add_room(room("h3", "r1", 2, 1));
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_catalogue_is_served_from_cache() {
        let backing = seeded();
        let cache = CachedInventoryStore::new(backing.clone(), CatalogCacheConfig::default());

        for _ in 0..3 {
            assert_eq!(cache.list_hotels_by_city(Some("Lisbon")).await.unwrap().len(), 2);
            assert_eq!(cache.list_rooms_for_hotel("h1").await.unwrap().len(), 1);
        }

        let calls = backing.call_stats();
        assert_eq!(calls.hotel_queries, 1);
        assert_eq!(calls.room_queries, 1);

        let stats = cache.stats();
        assert_eq!(stats.hit_count, 4);
        assert_eq!(stats.miss_count, 2);
        assert_eq!(stats.items_count, 2);
        assert_eq!(stats.total_lookups, 6);
    }

    #[tokio::test]
    async fn test_bookings_are_never_cached() {
        let backing = seeded();
        let cache = Arc::new(CachedInventoryStore::new(
            backing.clone(),
            CatalogCacheConfig::default(),
        ));
        let resolver = AvailabilityResolver::with_defaults(cache.clone());
        let criteria = SearchCriteria::new()
            .in_city("Lisbon")
            .for_stay(stay(12, 15));

        assert_eq!(resolver.resolve(&criteria).await.unwrap().len(), 2);

        backing.add_booking(booking("h1", "r1", 13, 14, BookingStatus::Confirmed));
        let hotels = resolver.resolve(&criteria).await.unwrap();
        assert_eq!(hotels.len(), 1);
        assert_eq!(hotels[0].id, "h2");

        let calls = backing.call_stats();
        assert_eq!(calls.booking_queries, 2);
        assert_eq!(calls.hotel_queries, 1);
        assert_eq!(calls.room_queries, 2);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let backing = seeded();
        let cache = CachedInventoryStore::new(backing.clone(), CatalogCacheConfig::default())
            .with_ttl(Duration::from_millis(30));

        cache.list_hotels_by_city(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        cache.list_hotels_by_city(None).await.unwrap();

        assert_eq!(backing.call_stats().hotel_queries, 2);
        let stats = cache.stats();
        assert_eq!(stats.expired_count, 1);
        assert_eq!(stats.items_count, 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_entry() {
        let backing = seeded();
        let config = CatalogCacheConfig {
            default_ttl_seconds: 300,
            max_entries: 2,
        };
        let cache = CachedInventoryStore::new(backing.clone(), config);

        cache.list_rooms_for_hotel("h1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.list_rooms_for_hotel("h2").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.list_rooms_for_hotel("h3").await.unwrap();

        let stats = cache.stats();
        assert_eq!(stats.items_count, 2);
        assert_eq!(stats.eviction_count, 1);

        // h1 was oldest, so it goes back to the store
        cache.list_rooms_for_hotel("h1").await.unwrap();
        cache.list_rooms_for_hotel("h3").await.unwrap();
        assert_eq!(backing.call_stats().room_queries, 4);
    }

    #[tokio::test]
    async fn test_invalidation() {
        let backing = seeded();
        let cache = CachedInventoryStore::new(backing.clone(), CatalogCacheConfig::default());

        cache.list_hotels_by_city(Some("Lisbon")).await.unwrap();
        cache.list_hotels_by_city(Some("Porto")).await.unwrap();
        cache.list_rooms_for_hotel("h1").await.unwrap();
        cache.list_rooms_for_hotel("h2").await.unwrap();

        assert_eq!(cache.invalidate_city(Some("Porto")), 1);
        assert_eq!(cache.invalidate_city(Some("Porto")), 0);
        assert_eq!(cache.invalidate_hotel("h1"), 2);
        assert_eq!(cache.stats().items_count, 1);

        backing.add_room(room("h1", "r2", 4, 1));
        assert_eq!(cache.list_rooms_for_hotel("h1").await.unwrap().len(), 2);

        assert_eq!(cache.clear(), 2);
        assert_eq!(cache.stats().items_count, 0);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let backing = seeded();
        let cache = CachedInventoryStore::new(backing.clone(), CatalogCacheConfig::default());

        backing.set_offline(true);
        assert!(cache.list_hotels_by_city(None).await.is_err());
        backing.set_offline(false);
        assert_eq!(cache.list_hotels_by_city(None).await.unwrap().len(), 3);
        assert_eq!(cache.stats().items_count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_item_count_survives_concurrent_expiry_and_invalidation() {
        let backing = seeded();
        let cache = Arc::new(
            CachedInventoryStore::new(backing, CatalogCacheConfig::default())
                .with_ttl(Duration::from_micros(1)),
        );

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                for j in 0..2_000 {
                    cache.list_hotels_by_city(None).await.unwrap();
                    cache.list_rooms_for_hotel("h1").await.unwrap();
                    if j % 7 == 0 {
                        cache.invalidate_hotel("h1");
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Only two distinct keys are ever cached
        let stats = cache.stats();
        assert!(stats.items_count <= 2, "item count drifted: {}", stats.items_count);
        assert_eq!(stats.eviction_count, 0);

        assert!(cache.clear() <= 2);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().items_count, 0);
    }
}
