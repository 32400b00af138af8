// Hotel availability search library
//
// Resolves which hotels have a free room type for a stay, on top of any
// document store that can list hotels, rooms and confirmed bookings

pub mod catalog_cache;
pub mod criteria;
pub mod http_store;
pub mod memory_store;
pub mod model;
pub mod resolver;
pub mod store;

// Re-export key types for convenience
pub use catalog_cache::{CacheStatsReport, CachedInventoryStore, CatalogCacheConfig};
pub use criteria::{CriteriaError, SearchCriteria};
pub use http_store::{HttpInventoryStore, HttpStoreConfig};
pub use memory_store::{InMemoryStore, InventorySnapshot};
pub use model::{Booking, BookingStatus, Hotel, ModelError, Room, StayWindow};
pub use resolver::{
    AvailabilityResolver, ConfigError, ResolverConfig, ResolverError, ResolverStatsReport,
    RoomAvailability,
};
pub use store::{InventoryStore, StoreError};
