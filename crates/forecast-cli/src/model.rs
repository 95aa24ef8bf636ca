use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastRequestMode {
    Auto,
    Manual,
}

impl ForecastRequestMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

/// A saved city name that is not blank. The text is kept exactly as stored;
/// surrounding whitespace only matters for the blank check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CityQuery(String);

impl CityQuery {
    pub fn parse(raw: Option<&str>) -> Result<Self, ValidationError> {
        let raw = raw.ok_or(ValidationError::EmptyCity)?;
        if raw.trim().is_empty() {
            return Err(ValidationError::EmptyCity);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CityQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ValidationError> {
        validate_coordinates(latitude, longitude)?;
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Parses `"lat,lon"` as written in env overrides and the preference store.
    pub fn parse_pair(raw: &str) -> Result<Self, ValidationError> {
        let (lat, lon) = raw
            .split_once(',')
            .ok_or_else(|| ValidationError::MalformedCoordinates(raw.to_string()))?;
        let lat = lat
            .trim()
            .parse::<f64>()
            .map_err(|_| ValidationError::MalformedCoordinates(raw.to_string()))?;
        let lon = lon
            .trim()
            .parse::<f64>()
            .map_err(|_| ValidationError::MalformedCoordinates(raw.to_string()))?;
        Self::new(lat, lon)
    }

    pub fn to_pair(self) -> String {
        format!("{},{}", self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityInfo {
    pub name: String,
    pub country: String,
    pub timezone_offset_secs: i32,
    pub sunrise: i64,
    pub sunset: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherCondition {
    pub id: i32,
    pub icon: String,
    pub description: String,
}

/// One forecast step. Temperatures are Kelvin, wind is m/s, visibility meters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastEntry {
    pub timestamp: i64,
    pub temp_k: f64,
    pub feels_like_k: f64,
    pub temp_min_k: f64,
    pub temp_max_k: f64,
    pub pressure_hpa: u32,
    pub humidity_pct: u8,
    pub visibility_m: Option<u32>,
    pub wind_speed_ms: f64,
    pub condition: WeatherCondition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub city: CityInfo,
    pub entries: Vec<ForecastEntry>,
}

impl Forecast {
    pub fn current(&self) -> Option<&ForecastEntry> {
        self.entries.first()
    }

    pub fn following_days(&self) -> &[ForecastEntry] {
        self.entries.get(1..).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ForecastFailure {
    #[error("invalid city")]
    InvalidCity,
    #[error("location permission denied")]
    LocationPermissionDenied,
    #[error("location request failed")]
    LocationRequestFailed,
    #[error("{0}")]
    Other(String),
}

impl ForecastFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidCity => "invalid_city",
            Self::LocationPermissionDenied => "location_permission_denied",
            Self::LocationRequestFailed => "location_request_failed",
            Self::Other(_) => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForecastOutcome {
    Success(Forecast),
    Failure(ForecastFailure),
}

impl ForecastOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn failure(&self) -> Option<&ForecastFailure> {
        match self {
            Self::Success(_) => None,
            Self::Failure(reason) => Some(reason),
        }
    }
}

pub fn validate_coordinates(lat: f64, lon: f64) -> Result<(), ValidationError> {
    if !((-90.0)..=90.0).contains(&lat) {
        return Err(ValidationError::InvalidLatitude(lat));
    }
    if !((-180.0)..=180.0).contains(&lon) {
        return Err(ValidationError::InvalidLongitude(lon));
    }
    Ok(())
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("city must not be empty")]
    EmptyCity,
    #[error("invalid latitude: {0}")]
    InvalidLatitude(f64),
    #[error("invalid longitude: {0}")]
    InvalidLongitude(f64),
    #[error("malformed coordinates '{0}': expected 'lat,lon'")]
    MalformedCoordinates(String),
}
