// Availability resolver: which hotels still have a free unit that fits the party
// for the requested stay

use crate::criteria::SearchCriteria;
use crate::model::{Booking, Hotel, Room, StayWindow};
use crate::store::{InventoryStore, StoreError};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("Inventory unavailable")]
    Unavailable(#[source] StoreError),

    #[error("Inventory query failed")]
    Store(#[source] StoreError),

    #[error("Inventory fetch timed out after {0}ms")]
    Timeout(u64),

    #[error("Unknown room {room_id} for hotel {hotel_id}")]
    UnknownRoom { hotel_id: String, room_id: String },
}

impl From<StoreError> for ResolverError {
    fn from(err: StoreError) -> Self {
        if err.is_unavailable() {
            ResolverError::Unavailable(err)
        } else {
            ResolverError::Store(err)
        }
    }
}

impl ResolverError {
    // Lets the UI render a service-error state instead of "no hotels found"
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ResolverError::Unavailable(_) | ResolverError::Timeout(_)
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    // Max hotel ids per booking query (IN-clause limit of the store)
    pub batch_size: usize,
    pub room_fetch_concurrency: usize,
    // Deadline for all store calls of one request; None disables it
    pub fetch_timeout_ms: Option<u64>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            batch_size: 30,
            room_fetch_concurrency: 8,
            fetch_timeout_ms: Some(5000),
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.room_fetch_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "room_fetch_concurrency must be at least 1".to_string(),
            ));
        }
        if self.fetch_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "fetch_timeout_ms must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: ResolverConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Default)]
struct ResolverStats {
    searches: AtomicUsize,
    short_circuits: AtomicUsize,
    booking_batches: AtomicUsize,
    hotels_considered: AtomicUsize,
    hotels_returned: AtomicUsize,
    failures: AtomicUsize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResolverStatsReport {
    pub searches: usize,
    pub short_circuits: usize,
    pub booking_batches: usize,
    pub hotels_considered: usize,
    pub hotels_returned: usize,
    pub failures: usize,
}

/// Free inventory of a single room type for a stay.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomAvailability {
    pub room: Room,
    pub free_units: u32,
    pub fits_party: bool,
}

impl RoomAvailability {
    pub fn is_bookable(&self) -> bool {
        self.fits_party && self.free_units > 0
    }
}

// Lowest nightly price among room types that can take the party
pub fn cheapest_available_price(rooms: &[RoomAvailability]) -> Option<f64> {
    rooms
        .iter()
        .filter(|r| r.is_bookable())
        .map(|r| r.room.price)
        .min_by(|a, b| a.total_cmp(b))
}

/// Confirmed bookings of `(hotel_id, room_id)` that overlap the stay.
pub fn count_overlapping(
    bookings: &[Booking],
    hotel_id: &str,
    room_id: &str,
    stay: &StayWindow,
) -> usize {
    bookings
        .iter()
        .filter(|b| b.consumes_inventory())
        .filter(|b| b.is_for(hotel_id, room_id))
        .filter(|b| b.overlaps(stay))
        .count()
}

pub fn free_units(room: &Room, bookings: &[Booking], stay: &StayWindow) -> u32 {
    let occupied = count_overlapping(bookings, &room.hotel_id, &room.id, stay);
    let occupied = u32::try_from(occupied).unwrap_or(u32::MAX);
    room.total_inventory.saturating_sub(occupied)
}

/// A hotel has vacancy when some room type fits the party and has strictly
/// fewer overlapping confirmed bookings than units.
pub fn hotel_has_vacancy(
    hotel_id: &str,
    rooms: &[Room],
    bookings: &[Booking],
    stay: &StayWindow,
    guests: u32,
) -> bool {
    rooms
        .iter()
        .filter(|room| room.hotel_id == hotel_id)
        .filter(|room| room.fits(guests))
        .any(|room| {
            count_overlapping(bookings, hotel_id, &room.id, stay) < room.total_inventory as usize
        })
}

pub struct AvailabilityResolver<S: InventoryStore> {
    store: Arc<S>,
    config: ResolverConfig,
    stats: ResolverStats,
}

impl<S: InventoryStore> AvailabilityResolver<S> {
    pub fn new(store: Arc<S>, config: ResolverConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            stats: ResolverStats::default(),
        })
    }

    pub fn with_defaults(store: Arc<S>) -> Self {
        Self {
            store,
            config: ResolverConfig::default(),
            stats: ResolverStats::default(),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Hotels matching the city filter that, when a stay is given, have at
    /// least one room type with a free unit for the whole stay and enough
    /// capacity for the party. Fetch order is preserved.
    ///
    /// Without a stay every city-filtered hotel is returned and no inventory
    /// check is made.
    #[tracing::instrument(
        skip(self, criteria),
        fields(city = ?criteria.city, guests = criteria.guests, dated = criteria.stay.is_some())
    )]
    pub async fn resolve(&self, criteria: &SearchCriteria) -> Result<Vec<Hotel>, ResolverError> {
        self.stats.searches.fetch_add(1, Ordering::Relaxed);

        let result = self.with_deadline(self.resolve_inner(criteria)).await;
        match &result {
            Ok(hotels) => {
                self.stats
                    .hotels_returned
                    .fetch_add(hotels.len(), Ordering::Relaxed);
                info!(returned = hotels.len(), "availability search complete");
            }
            Err(err) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = ?err, "availability search failed");
            }
        }
        result
    }

    async fn resolve_inner(&self, criteria: &SearchCriteria) -> Result<Vec<Hotel>, ResolverError> {
        let hotels = self.store.list_hotels_by_city(criteria.city_filter()).await?;
        self.stats
            .hotels_considered
            .fetch_add(hotels.len(), Ordering::Relaxed);
        debug!(candidates = hotels.len(), "fetched city candidates");

        if hotels.is_empty() {
            self.stats.short_circuits.fetch_add(1, Ordering::Relaxed);
            return Ok(hotels);
        }

        let stay = match criteria.stay {
            Some(stay) => stay,
            None => return Ok(hotels),
        };

        let hotel_ids: Vec<String> = hotels.iter().map(|h| h.id.clone()).collect();
        let bookings = self.overlapping_bookings(&hotel_ids, &stay).await?;
        let rooms = self.rooms_by_hotel(&hotel_ids).await?;

        let guests = criteria.guests.max(1);
        let available = hotels
            .into_iter()
            .filter(|hotel| {
                let hotel_rooms = rooms.get(&hotel.id).map(Vec::as_slice).unwrap_or(&[]);
                hotel_has_vacancy(&hotel.id, hotel_rooms, &bookings, &stay, guests)
            })
            .collect();

        Ok(available)
    }

    /// Every room type of the hotel with its free units for the stay.
    pub async fn room_availability(
        &self,
        hotel_id: &str,
        stay: &StayWindow,
        guests: u32,
    ) -> Result<Vec<RoomAvailability>, ResolverError> {
        let guests = guests.max(1);
        let ids = [hotel_id.to_string()];

        let (rooms, bookings) = self
            .with_deadline(async {
                let rooms = self.store.list_rooms_for_hotel(hotel_id).await?;
                let bookings = self.overlapping_bookings(&ids, stay).await?;
                Ok::<_, ResolverError>((rooms, bookings))
            })
            .await?;

        Ok(rooms
            .into_iter()
            .map(|room| {
                let free = free_units(&room, &bookings, stay);
                let fits_party = room.fits(guests);
                RoomAvailability {
                    room,
                    free_units: free,
                    fits_party,
                }
            })
            .collect())
    }

    /// Pre-booking check: is at least one unit of this room type free for the stay.
    pub async fn is_room_available(
        &self,
        hotel_id: &str,
        room_id: &str,
        stay: &StayWindow,
    ) -> Result<bool, ResolverError> {
        let rooms = self.room_availability(hotel_id, stay, 1).await?;
        rooms
            .iter()
            .find(|r| r.room.id == room_id)
            .map(|r| r.free_units > 0)
            .ok_or_else(|| ResolverError::UnknownRoom {
                hotel_id: hotel_id.to_string(),
                room_id: room_id.to_string(),
            })
    }

    pub fn stats(&self) -> ResolverStatsReport {
        ResolverStatsReport {
            searches: self.stats.searches.load(Ordering::Relaxed),
            short_circuits: self.stats.short_circuits.load(Ordering::Relaxed),
            booking_batches: self.stats.booking_batches.load(Ordering::Relaxed),
            hotels_considered: self.stats.hotels_considered.load(Ordering::Relaxed),
            hotels_returned: self.stats.hotels_returned.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
        }
    }

    // The store filters on check-out; check-in, status and hotel membership are
    // re-checked here so a loose store cannot eat inventory
    async fn overlapping_bookings(
        &self,
        hotel_ids: &[String],
        stay: &StayWindow,
    ) -> Result<Vec<Booking>, ResolverError> {
        let wanted: HashSet<&str> = hotel_ids.iter().map(String::as_str).collect();
        let mut bookings = Vec::new();

        for chunk in hotel_ids.chunks(self.config.batch_size) {
            self.stats.booking_batches.fetch_add(1, Ordering::Relaxed);
            let batch = self
                .store
                .list_confirmed_bookings(chunk, stay.check_in())
                .await?;
            debug!(hotels = chunk.len(), bookings = batch.len(), "fetched booking batch");
            bookings.extend(batch);
        }

        bookings.retain(|b| {
            b.consumes_inventory() && wanted.contains(b.hotel_id.as_str()) && b.overlaps(stay)
        });
        debug!(overlapping = bookings.len(), "filtered overlapping bookings");
        Ok(bookings)
    }

    async fn rooms_by_hotel(
        &self,
        hotel_ids: &[String],
    ) -> Result<HashMap<String, Vec<Room>>, ResolverError> {
        let store = &self.store;
        stream::iter(hotel_ids.iter().cloned())
            .map(|hotel_id| async move {
                let rooms = store.list_rooms_for_hotel(&hotel_id).await?;
                Ok::<_, ResolverError>((hotel_id, rooms))
            })
            .buffer_unordered(self.config.room_fetch_concurrency)
            .try_collect()
            .await
    }

    async fn with_deadline<T, F>(&self, fut: F) -> Result<T, ResolverError>
    where
        F: std::future::Future<Output = Result<T, ResolverError>>,
    {
        match self.config.fetch_timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), fut)
                .await
                .map_err(|_| ResolverError::Timeout(ms))?,
            None => fut.await,
        }
    }
}
