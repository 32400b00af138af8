// Inventory store backed by the booking site's JSON REST backend

use crate::model::{instant, Booking, BookingStatus, Hotel, Room};
use crate::store::{InventoryStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const ENV_API_URL: &str = "INVENTORY_API_URL";
pub const ENV_API_KEY: &str = "INVENTORY_API_KEY";
pub const ENV_API_TIMEOUT_MS: &str = "INVENTORY_API_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HttpStoreConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl Default for HttpStoreConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            timeout_ms: 3000,
        }
    }
}

impl HttpStoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Reads the backend location from the environment. A missing URL is a
    /// configuration error, not an empty inventory.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, StoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup(ENV_API_URL)
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| StoreError::Unconfigured(format!("{} is not set", ENV_API_URL)))?;
        let api_key = lookup(ENV_API_KEY).filter(|key| !key.is_empty());
        let timeout_ms = match lookup(ENV_API_TIMEOUT_MS) {
            Some(raw) => raw.trim().parse().map_err(|_| {
                StoreError::Unconfigured(format!("{} must be a number, got '{}'", ENV_API_TIMEOUT_MS, raw))
            })?,
            None => Self::default().timeout_ms,
        };

        Ok(Self {
            base_url,
            api_key,
            timeout_ms,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BookingQuery<'a> {
    hotel_ids: &'a [String],
    #[serde(with = "instant")]
    check_out_after: DateTime<Utc>,
    status: BookingStatus,
}

pub struct HttpInventoryStore {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpInventoryStore {
    pub fn new(config: HttpStoreConfig) -> Result<Self, StoreError> {
        let raw = config.base_url.trim();
        if raw.is_empty() {
            return Err(StoreError::Unconfigured("base_url is empty".to_string()));
        }
        let base_url = Url::parse(raw)
            .map_err(|e| StoreError::Unconfigured(format!("base_url '{}': {}", raw, e)))?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(StoreError::Unconfigured(format!(
                "base_url '{}' is not an http(s) URL",
                raw
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| StoreError::Unconfigured(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key,
        })
    }

    pub fn from_env() -> Result<Self, StoreError> {
        Self::new(HttpStoreConfig::from_env()?)
    }

    // Each segment is percent-encoded, so ids containing '/', '?' or '#'
    // stay inside their own path segment
    fn endpoint(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                StoreError::Unconfigured(format!("base_url '{}' cannot take a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments.iter().copied());
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, StoreError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(map_transport_error)?;
        decode(response).await
    }
}

fn map_transport_error(err: reqwest::Error) -> StoreError {
    if err.is_connect() || err.is_timeout() {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Query(err.to_string())
    }
}

fn map_status(status: StatusCode, body: &str) -> StoreError {
    match status {
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            StoreError::Unavailable(format!("backend returned {}", status))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            StoreError::Unconfigured(format!("backend rejected credentials ({})", status))
        }
        _ => StoreError::Query(format!("backend returned {}: {}", status, body)),
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(map_status(status, &body));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| StoreError::Query(format!("cannot decode response: {}", e)))
}

#[async_trait]
impl InventoryStore for HttpInventoryStore {
    async fn list_hotels_by_city(&self, city: Option<&str>) -> Result<Vec<Hotel>, StoreError> {
        let mut request = self.client.get(self.endpoint(&["hotels"])?);
        if let Some(city) = city {
            request = request.query(&[("city", city)]);
        }
        let hotels: Vec<Hotel> = self.send(request).await?;
        debug!(count = hotels.len(), "fetched hotels over http");
        Ok(hotels)
    }

    async fn list_confirmed_bookings(
        &self,
        hotel_ids: &[String],
        check_out_after: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError> {
        let query = BookingQuery {
            hotel_ids,
            check_out_after,
            status: BookingStatus::Confirmed,
        };
        let request = self.client.post(self.endpoint(&["bookings", "query"])?).json(&query);
        self.send(request).await
    }

    async fn list_rooms_for_hotel(&self, hotel_id: &str) -> Result<Vec<Room>, StoreError> {
        let request = self
            .client
            .get(self.endpoint(&["hotels", hotel_id, "rooms"])?);
        self.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::jan;
    use std::collections::HashMap;
    use test_case::test_case;
    use tokio_test::assert_err;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_config_from_lookup() {
        let config = HttpStoreConfig::from_lookup(lookup(&[
            (ENV_API_URL, "https://inventory.example.com/api/"),
            (ENV_API_KEY, "secret"),
            (ENV_API_TIMEOUT_MS, "1500"),
        ]))
        .unwrap();
        assert_eq!(config.base_url, "https://inventory.example.com/api/");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.timeout_ms, 1500);

        let defaults =
            HttpStoreConfig::from_lookup(lookup(&[(ENV_API_URL, "http://localhost:8080")])).unwrap();
        assert_eq!(defaults.api_key, None);
        assert_eq!(defaults.timeout_ms, 3000);
    }

    #[test]
    fn test_missing_url_is_unconfigured() {
        let err = HttpStoreConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, StoreError::Unconfigured(_)));
        assert!(err.is_unavailable());

        let err = HttpStoreConfig::from_lookup(lookup(&[
            (ENV_API_URL, "http://localhost"),
            (ENV_API_TIMEOUT_MS, "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, StoreError::Unconfigured(_)));
    }

    #[test_case(""; "empty")]
    #[test_case("   "; "blank")]
    #[test_case("inventory.example.com"; "no scheme")]
    fn test_rejects_bad_base_url(url: &str) {
        let result = HttpInventoryStore::new(HttpStoreConfig::new(url));
        assert!(matches!(result, Err(StoreError::Unconfigured(_))));
    }

    #[test]
    fn test_url_building() {
        let store = HttpInventoryStore::new(HttpStoreConfig::new("https://inventory.example.com/api/"))
            .unwrap();
        assert_eq!(
            store.endpoint(&["hotels"]).unwrap().as_str(),
            "https://inventory.example.com/api/hotels"
        );
        assert_eq!(
            store.endpoint(&["hotels", "h1", "rooms"]).unwrap().as_str(),
            "https://inventory.example.com/api/hotels/h1/rooms"
        );

        let bare = HttpInventoryStore::new(HttpStoreConfig::new("http://127.0.0.1:8080")).unwrap();
        assert_eq!(
            bare.endpoint(&["bookings", "query"]).unwrap().as_str(),
            "http://127.0.0.1:8080/bookings/query"
        );
    }

    #[test_case("a?b", "a%3Fb"; "question mark")]
    #[test_case("a/b", "a%2Fb"; "slash")]
    #[test_case("a#b", "a%23b"; "hash")]
    #[test_case("a?b/c", "a%3Fb%2Fc"; "question mark and slash")]
    fn test_hotel_id_stays_in_one_path_segment(hotel_id: &str, encoded: &str) {
        let store = HttpInventoryStore::new(HttpStoreConfig::new("https://inventory.example.com/api/"))
            .unwrap();
        let url = store.endpoint(&["hotels", hotel_id, "rooms"]).unwrap();

        assert_eq!(url.path(), format!("/api/hotels/{}/rooms", encoded));
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
        let segments: Vec<&str> = url.path_segments().unwrap().collect();
        assert_eq!(segments.len(), 4);
    }

    #[test_case(StatusCode::SERVICE_UNAVAILABLE, true; "503")]
    #[test_case(StatusCode::BAD_GATEWAY, true; "502")]
    #[test_case(StatusCode::UNAUTHORIZED, true; "401")]
    #[test_case(StatusCode::BAD_REQUEST, false; "400")]
    #[test_case(StatusCode::NOT_FOUND, false; "404")]
    fn test_status_mapping(status: StatusCode, unavailable: bool) {
        assert_eq!(map_status(status, "").is_unavailable(), unavailable);
    }

    #[test]
    fn test_booking_query_body() {
        let ids = vec!["h1".to_string(), "h2".to_string()];
        let query = BookingQuery {
            hotel_ids: &ids,
            check_out_after: jan(12),
            status: BookingStatus::Confirmed,
        };
        let body = serde_json::to_value(&query).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "hotelIds": ["h1", "h2"],
                "checkOutAfter": "2025-01-12T00:00:00+00:00",
                "status": "CONFIRMED"
            })
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_unavailable() {
        // Nothing listens on port 1
        let config = HttpStoreConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            api_key: Some("secret".to_string()),
            timeout_ms: 500,
        };
        let store = HttpInventoryStore::new(config).unwrap();

        let err = assert_err!(store.list_hotels_by_city(Some("Lisbon")).await);
        assert!(err.is_unavailable(), "unexpected error: {:?}", err);
    }
}
