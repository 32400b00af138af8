// Inventory data model: hotels, room types, bookings and stay windows
// All instants are normalised to DateTime<Utc> when they cross the store boundary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Invalid date range: check-out {check_out} is not after check-in {check_in}")]
    InvalidDateRange {
        check_in: DateTime<Utc>,
        check_out: DateTime<Utc>,
    },

    #[error("Invalid room {room_id}: {reason}")]
    InvalidRoom { room_id: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hotel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub city: String,
    #[serde(default, alias = "rooms")]
    pub room_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub hotel_id: String,
    #[serde(default)]
    pub name: String,
    // Max guests per unit
    pub capacity: u32,
    // Interchangeable units of this type
    #[serde(alias = "totalRooms")]
    pub total_inventory: u32,
    #[serde(default)]
    pub price: f64,
}

impl Room {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.capacity == 0 {
            return Err(ModelError::InvalidRoom {
                room_id: self.id.clone(),
                reason: "capacity must be at least 1".to_string(),
            });
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(ModelError::InvalidRoom {
                room_id: self.id.clone(),
                reason: format!("price {} is not a valid amount", self.price),
            });
        }
        Ok(())
    }

    pub fn fits(&self, guests: u32) -> bool {
        self.capacity >= guests
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookingStatus {
    #[serde(alias = "pending")]
    Pending,
    #[serde(alias = "confirmed")]
    Confirmed,
    #[serde(alias = "cancelled", alias = "CANCELED", alias = "canceled")]
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    #[serde(default)]
    pub id: String,
    pub hotel_id: String,
    pub room_id: String,
    #[serde(with = "instant")]
    pub check_in: DateTime<Utc>,
    #[serde(with = "instant")]
    pub check_out: DateTime<Utc>,
    pub status: BookingStatus,
}

impl Booking {
    pub fn consumes_inventory(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }

    pub fn window(&self) -> Result<StayWindow, ModelError> {
        StayWindow::new(self.check_in, self.check_out)
    }

    // Same predicate as StayWindow::overlaps, without requiring a well-formed booking
    pub fn overlaps(&self, stay: &StayWindow) -> bool {
        self.check_in < stay.check_out() && stay.check_in() < self.check_out
    }

    pub fn is_for(&self, hotel_id: &str, room_id: &str) -> bool {
        self.hotel_id == hotel_id && self.room_id == room_id
    }
}

/// Half-open interval `[check_in, check_out)` during which a unit is occupied.
///
/// A window can only be built with `check_out > check_in`, so code holding a
/// `StayWindow` never has to re-check the ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StayWindow {
    check_in: DateTime<Utc>,
    check_out: DateTime<Utc>,
}

impl StayWindow {
    pub fn new(check_in: DateTime<Utc>, check_out: DateTime<Utc>) -> Result<Self, ModelError> {
        if check_out <= check_in {
            return Err(ModelError::InvalidDateRange {
                check_in,
                check_out,
            });
        }
        Ok(Self {
            check_in,
            check_out,
        })
    }

    pub fn check_in(&self) -> DateTime<Utc> {
        self.check_in
    }

    pub fn check_out(&self) -> DateTime<Utc> {
        self.check_out
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    /// `[a,b)` and `[c,d)` overlap iff `a < d && c < b`.
    pub fn overlaps(&self, other: &StayWindow) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }
}

/// Serde adapter for instants coming from the document store.
///
/// Accepts RFC 3339 strings, bare `YYYY-MM-DD` dates (midnight UTC) and
/// integer epoch milliseconds. Always writes RFC 3339.
pub mod instant {
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(InstantVisitor)
    }

    pub fn parse(value: &str) -> Option<DateTime<Utc>> {
        let value = value.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
            return Some(parsed.with_timezone(&Utc));
        }
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| Utc.from_utc_datetime(&naive))
    }

    fn from_millis<E: de::Error>(millis: i64) -> Result<DateTime<Utc>, E> {
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| E::custom(format!("timestamp {} out of range", millis)))
    }

    struct InstantVisitor;

    impl<'de> Visitor<'de> for InstantVisitor {
        type Value = DateTime<Utc>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("an RFC 3339 timestamp, a YYYY-MM-DD date or epoch milliseconds")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            parse(value).ok_or_else(|| E::custom(format!("unrecognised timestamp '{}'", value)))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
            from_millis(value)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
            let millis = i64::try_from(value)
                .map_err(|_| E::custom(format!("timestamp {} out of range", value)))?;
            from_millis(millis)
        }
    }
}
