// Data-access seam between the resolver and whatever document store holds the inventory

use crate::model::{Booking, Hotel, Room};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Inventory store not configured: {0}")]
    Unconfigured(String),

    #[error("Inventory store unavailable: {0}")]
    Unavailable(String),

    #[error("Batch of {requested} ids exceeds store limit of {limit}")]
    BatchTooLarge { requested: usize, limit: usize },

    #[error("Query error: {0}")]
    Query(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    /// True when the backend could not be reached at all, as opposed to
    /// answering with an error.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StoreError::Unconfigured(_) | StoreError::Unavailable(_)
        )
    }
}

#[async_trait]
pub trait InventoryStore: Send + Sync + 'static {
    // Hotels in the given city, or every hotel when city is None.
    // Implementations must return hotels in a stable order
    async fn list_hotels_by_city(&self, city: Option<&str>) -> Result<Vec<Hotel>, StoreError>;

    // CONFIRMED bookings for the given hotels whose check-out is strictly after
    // `check_out_after`. Callers keep `hotel_ids` within the store's IN-query limit
    async fn list_confirmed_bookings(
        &self,
        hotel_ids: &[String],
        check_out_after: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError>;

    // All room types belonging to the hotel
    async fn list_rooms_for_hotel(&self, hotel_id: &str) -> Result<Vec<Room>, StoreError>;
}
