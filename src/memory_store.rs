// In-process inventory store, used for tests, fixtures and local development

use crate::model::{Booking, BookingStatus, Hotel, Room};
use crate::store::{InventoryStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

// Bundled fixture used by the tests and the benchmark
pub const SAMPLE_INVENTORY_PATH: &str = "samples/inventory.json";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct InventorySnapshot {
    pub hotels: Vec<Hotel>,
    pub rooms: Vec<Room>,
    pub bookings: Vec<Booking>,
}

#[derive(Debug, Default)]
struct StoreCalls {
    hotel_queries: AtomicUsize,
    booking_queries: AtomicUsize,
    room_queries: AtomicUsize,
    largest_booking_batch: AtomicUsize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreCallStats {
    pub hotel_queries: usize,
    pub booking_queries: usize,
    pub room_queries: usize,
    pub largest_booking_batch: usize,
}

pub struct InMemoryStore {
    // Insertion order is the fetch order callers observe
    hotels: RwLock<Vec<Hotel>>,
    rooms: DashMap<String, Vec<Room>>,
    bookings: RwLock<Vec<Booking>>,
    max_in_clause: Option<usize>,
    offline: AtomicBool,
    calls: StoreCalls,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            hotels: RwLock::new(Vec::new()),
            rooms: DashMap::new(),
            bookings: RwLock::new(Vec::new()),
            max_in_clause: None,
            offline: AtomicBool::new(false),
            calls: StoreCalls::default(),
        }
    }

    /// Rejects booking queries naming more than `limit` hotels, the way
    /// document stores cap the size of an IN filter.
    pub fn with_max_in_clause(mut self, limit: usize) -> Self {
        self.max_in_clause = Some(limit);
        self
    }

    pub fn from_snapshot(snapshot: InventorySnapshot) -> Self {
        let store = Self::new();
        for hotel in snapshot.hotels {
            store.add_hotel(hotel);
        }
        for room in snapshot.rooms {
            store.add_room(room);
        }
        for booking in snapshot.bookings {
            store.add_booking(booking);
        }
        store
    }

    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let snapshot: InventorySnapshot =
            serde_json::from_str(json).map_err(|e| StoreError::Query(e.to_string()))?;
        for room in &snapshot.rooms {
            room.validate()
                .map_err(|e| StoreError::Query(e.to_string()))?;
        }
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Unavailable(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn add_hotel(&self, hotel: Hotel) {
        self.hotels.write().push(hotel);
    }

    pub fn add_room(&self, room: Room) {
        if let Some(hotel) = self
            .hotels
            .write()
            .iter_mut()
            .find(|h| h.id == room.hotel_id)
        {
            if !hotel.room_ids.contains(&room.id) {
                hotel.room_ids.push(room.id.clone());
            }
        }
        self.rooms.entry(room.hotel_id.clone()).or_default().push(room);
    }

    pub fn add_booking(&self, booking: Booking) {
        self.bookings.write().push(booking);
    }

    // Returns true when a booking with that id existed
    pub fn set_booking_status(&self, booking_id: &str, status: BookingStatus) -> bool {
        let mut bookings = self.bookings.write();
        match bookings.iter_mut().find(|b| b.id == booking_id) {
            Some(booking) => {
                booking.status = status;
                true
            }
            None => false,
        }
    }

    /// Simulates losing the connection to the backend.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn call_stats(&self) -> StoreCallStats {
        StoreCallStats {
            hotel_queries: self.calls.hotel_queries.load(Ordering::SeqCst),
            booking_queries: self.calls.booking_queries.load(Ordering::SeqCst),
            room_queries: self.calls.room_queries.load(Ordering::SeqCst),
            largest_booking_batch: self.calls.largest_booking_batch.load(Ordering::SeqCst),
        }
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store is offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for InMemoryStore {
    async fn list_hotels_by_city(&self, city: Option<&str>) -> Result<Vec<Hotel>, StoreError> {
        self.calls.hotel_queries.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;

        let hotels = self.hotels.read();
        Ok(hotels
            .iter()
            .filter(|h| city.map_or(true, |c| h.city == c))
            .cloned()
            .collect())
    }

    async fn list_confirmed_bookings(
        &self,
        hotel_ids: &[String],
        check_out_after: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError> {
        self.calls.booking_queries.fetch_add(1, Ordering::SeqCst);
        self.calls
            .largest_booking_batch
            .fetch_max(hotel_ids.len(), Ordering::SeqCst);
        self.ensure_online()?;

        if let Some(limit) = self.max_in_clause {
            if hotel_ids.len() > limit {
                return Err(StoreError::BatchTooLarge {
                    requested: hotel_ids.len(),
                    limit,
                });
            }
        }

        let bookings = self.bookings.read();
        Ok(bookings
            .iter()
            .filter(|b| b.status == BookingStatus::Confirmed)
            .filter(|b| b.check_out > check_out_after)
            .filter(|b| hotel_ids.contains(&b.hotel_id))
            .cloned()
            .collect())
    }

    async fn list_rooms_for_hotel(&self, hotel_id: &str) -> Result<Vec<Room>, StoreError> {
        self.calls.room_queries.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;

        Ok(self
            .rooms
            .get(hotel_id)
            .map(|rooms| rooms.value().clone())
            .unwrap_or_default())
    }
}
