// Search criteria as submitted by the hotel search form

use crate::model::{instant, ModelError, StayWindow};
use thiserror::Error;

// City value the search form sends when no city is selected
pub const ALL_CITIES: &str = "All";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CriteriaError {
    #[error("Invalid date: '{0}'")]
    InvalidDate(String),

    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),
}

impl From<ModelError> for CriteriaError {
    fn from(err: ModelError) -> Self {
        CriteriaError::InvalidDateRange(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchCriteria {
    pub city: Option<String>,
    pub stay: Option<StayWindow>,
    pub guests: u32,
}

impl Default for SearchCriteria {
    fn default() -> Self {
        Self {
            city: None,
            stay: None,
            guests: 1,
        }
    }
}

impl SearchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds criteria from raw query-string values.
    ///
    /// Date filtering is all or nothing: unless both dates are present the
    /// stay is left unset. A present but unparsable date, or a check-out that
    /// is not after check-in, is rejected. The guest count is read from the
    /// leading digits and falls back to 1 when absent, non-numeric or zero.
    pub fn from_query(
        city: Option<&str>,
        check_in: Option<&str>,
        check_out: Option<&str>,
        guests: Option<&str>,
    ) -> Result<Self, CriteriaError> {
        let check_in = non_blank(check_in);
        let check_out = non_blank(check_out);

        let stay = match (check_in, check_out) {
            (Some(check_in), Some(check_out)) => {
                let check_in = instant::parse(check_in)
                    .ok_or_else(|| CriteriaError::InvalidDate(check_in.to_string()))?;
                let check_out = instant::parse(check_out)
                    .ok_or_else(|| CriteriaError::InvalidDate(check_out.to_string()))?;
                Some(StayWindow::new(check_in, check_out)?)
            }
            _ => None,
        };

        Ok(Self {
            city: normalize_city(city),
            stay,
            guests: parse_guests(guests),
        })
    }

    pub fn in_city(mut self, city: &str) -> Self {
        self.city = normalize_city(Some(city));
        self
    }

    pub fn for_stay(mut self, stay: StayWindow) -> Self {
        self.stay = Some(stay);
        self
    }

    pub fn with_guests(mut self, guests: u32) -> Self {
        self.guests = guests.max(1);
        self
    }

    pub fn city_filter(&self) -> Option<&str> {
        self.city.as_deref()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn normalize_city(city: Option<&str>) -> Option<String> {
    non_blank(city)
        .filter(|c| !c.eq_ignore_ascii_case(ALL_CITIES))
        .map(str::to_string)
}

// Reads the leading digits, so "2 guests" or "2.5" count as 2
pub fn parse_guests(guests: Option<&str>) -> u32 {
    guests
        .map(str::trim)
        .and_then(|g| {
            let end = g.find(|c: char| !c.is_ascii_digit()).unwrap_or(g.len());
            g[..end].parse::<u32>().ok()
        })
        .filter(|&g| g > 0)
        .unwrap_or(1)
}
