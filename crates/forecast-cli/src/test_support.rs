//! Fakes shared by the controller, presenter and session tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::gateway::{ForecastGateway, GatewayError};
use crate::location::{LocationError, LocationProvider};
use crate::model::{CityInfo, CityQuery, Coordinates, Forecast, ForecastEntry, WeatherCondition};
use crate::permissions::PermissionGate;

pub const DAY0: i64 = 1_770_681_600;

pub fn entry(timestamp: i64, temp_k: f64) -> ForecastEntry {
    ForecastEntry {
        timestamp,
        temp_k,
        feels_like_k: temp_k - 1.5,
        temp_min_k: temp_k - 3.0,
        temp_max_k: temp_k + 2.0,
        pressure_hpa: 1012,
        humidity_pct: 64,
        visibility_m: Some(10_000),
        wind_speed_ms: 3.6,
        condition: WeatherCondition {
            id: 800,
            icon: "01d".to_string(),
            description: "clear sky".to_string(),
        },
    }
}

pub fn forecast(city: &str, country: &str) -> Forecast {
    Forecast {
        city: CityInfo {
            name: city.to_string(),
            country: country.to_string(),
            timezone_offset_secs: 3_600,
            sunrise: DAY0 + 7 * 3_600,
            sunset: DAY0 + 16 * 3_600,
        },
        entries: vec![
            entry(DAY0 + 9 * 3_600, 283.15),
            entry(DAY0 + 86_400 + 11 * 3_600, 285.15),
            entry(DAY0 + 2 * 86_400 + 11 * 3_600, 280.15),
        ],
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    City(String),
    Coordinates(Coordinates),
}

pub struct FakeGateway {
    result: Mutex<Result<Forecast, GatewayError>>,
    calls: Mutex<Vec<GatewayCall>>,
}

impl FakeGateway {
    pub fn returning(result: Result<Forecast, GatewayError>) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(result),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().clone()
    }

    fn respond(&self, call: GatewayCall) -> Result<Forecast, GatewayError> {
        self.calls.lock().push(call);
        self.result.lock().clone()
    }
}

impl ForecastGateway for FakeGateway {
    fn by_city(&self, city: &CityQuery) -> Result<Forecast, GatewayError> {
        self.respond(GatewayCall::City(city.as_str().to_string()))
    }

    fn by_coordinates(&self, coordinates: Coordinates) -> Result<Forecast, GatewayError> {
        self.respond(GatewayCall::Coordinates(coordinates))
    }
}

#[derive(Default)]
pub struct SwitchGate(AtomicBool);

impl SwitchGate {
    pub fn new(granted: bool) -> Arc<Self> {
        Arc::new(Self(AtomicBool::new(granted)))
    }

    pub fn set(&self, granted: bool) {
        self.0.store(granted, Ordering::SeqCst);
    }
}

impl PermissionGate for SwitchGate {
    fn has_location_permission(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct CountingProvider {
    fix: Option<Coordinates>,
    calls: AtomicUsize,
}

impl CountingProvider {
    pub fn new(fix: Option<Coordinates>) -> Arc<Self> {
        Arc::new(Self {
            fix,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LocationProvider for CountingProvider {
    fn last_known_location(&self) -> Result<Option<Coordinates>, LocationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.fix)
    }
}
