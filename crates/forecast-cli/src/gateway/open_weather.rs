//! OpenWeather 5-day / 3-hour forecast adapter.
//!
//! The provider returns 3-hour steps; they are condensed into the current
//! step followed by one summary per later local calendar day.

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::config::RetryPolicy;
use crate::model::{CityInfo, CityQuery, Coordinates, Forecast, ForecastEntry, WeatherCondition};

use super::{GatewayError, GatewaySettings, execute_request, execute_with_retry};

const PROVIDER_NAME: &str = "open_weather";
const SECONDS_PER_DAY: i64 = 86_400;
const LOCAL_NOON_SECS: i64 = 12 * 3_600;

#[derive(Debug, Serialize)]
struct CityForecastQuery<'a> {
    q: &'a str,
    appid: &'a str,
    lang: &'a str,
}

#[derive(Debug, Serialize)]
struct CoordinateForecastQuery<'a> {
    lat: f64,
    lon: f64,
    appid: &'a str,
    lang: &'a str,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    list: Vec<StepPayload>,
    city: Option<CityPayload>,
}

#[derive(Debug, Deserialize)]
struct StepPayload {
    dt: i64,
    main: MainPayload,
    #[serde(default)]
    weather: Vec<ConditionPayload>,
    wind: Option<WindPayload>,
    visibility: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct MainPayload {
    temp: f64,
    feels_like: Option<f64>,
    temp_min: Option<f64>,
    temp_max: Option<f64>,
    pressure: Option<f64>,
    humidity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ConditionPayload {
    id: i32,
    #[serde(default)]
    icon: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct WindPayload {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct CityPayload {
    name: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    timezone: i32,
    #[serde(default)]
    sunrise: i64,
    #[serde(default)]
    sunset: i64,
}

pub fn fetch_by_city(
    client: &Client,
    settings: &GatewaySettings,
    city: &CityQuery,
    retry_policy: RetryPolicy,
) -> Result<Forecast, GatewayError> {
    let api_key = settings.require_api_key()?;
    let query = CityForecastQuery {
        q: city.as_str(),
        appid: api_key,
        lang: &settings.lang,
    };
    let endpoint = forecast_endpoint(settings);

    execute_with_retry(
        PROVIDER_NAME,
        retry_policy,
        || {
            execute_request(client.get(&endpoint).query(&query))
                .map_err(|error| classify_city_error(error, city))
                .and_then(|body| parse_forecast_response(&body))
        },
        std::thread::sleep,
    )
}

pub fn fetch_by_coordinates(
    client: &Client,
    settings: &GatewaySettings,
    coordinates: Coordinates,
    retry_policy: RetryPolicy,
) -> Result<Forecast, GatewayError> {
    let api_key = settings.require_api_key()?;
    let query = CoordinateForecastQuery {
        lat: coordinates.latitude,
        lon: coordinates.longitude,
        appid: api_key,
        lang: &settings.lang,
    };
    let endpoint = forecast_endpoint(settings);

    execute_with_retry(
        PROVIDER_NAME,
        retry_policy,
        || {
            execute_request(client.get(&endpoint).query(&query))
                .and_then(|body| parse_forecast_response(&body))
        },
        std::thread::sleep,
    )
}

fn forecast_endpoint(settings: &GatewaySettings) -> String {
    format!("{}/forecast", settings.base_url)
}

fn classify_city_error(error: GatewayError, city: &CityQuery) -> GatewayError {
    match error {
        GatewayError::Http { status: 404, .. } => GatewayError::CityNotFound(city.to_string()),
        other => other,
    }
}

fn parse_forecast_response(body: &str) -> Result<Forecast, GatewayError> {
    let payload: ForecastResponse = serde_json::from_str(body)
        .map_err(|error| GatewayError::InvalidResponse(format!("forecast payload: {error}")))?;

    let city = payload
        .city
        .ok_or_else(|| GatewayError::InvalidResponse("forecast payload: missing city".into()))?;

    if city.name.trim().is_empty() {
        return Err(GatewayError::InvalidResponse(
            "forecast payload: empty city name".to_string(),
        ));
    }

    if payload.list.is_empty() {
        return Err(GatewayError::InvalidResponse(
            "forecast payload: empty forecast list".to_string(),
        ));
    }

    let offset_secs = city.timezone;
    let steps = payload
        .list
        .into_iter()
        .map(build_entry)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Forecast {
        city: CityInfo {
            name: city.name.trim().to_string(),
            country: city.country.trim().to_string(),
            timezone_offset_secs: offset_secs,
            sunrise: city.sunrise,
            sunset: city.sunset,
        },
        entries: condense_daily(steps, offset_secs),
    })
}

fn build_entry(step: StepPayload) -> Result<ForecastEntry, GatewayError> {
    let condition = step
        .weather
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::InvalidResponse(format!("step {}: missing weather", step.dt)))?;
    let main = step.main;

    Ok(ForecastEntry {
        timestamp: step.dt,
        temp_k: main.temp,
        feels_like_k: main.feels_like.unwrap_or(main.temp),
        temp_min_k: main.temp_min.unwrap_or(main.temp),
        temp_max_k: main.temp_max.unwrap_or(main.temp),
        pressure_hpa: main.pressure.map(clamp_u32).unwrap_or(0),
        humidity_pct: main.humidity.map(clamp_percentage).unwrap_or(0),
        visibility_m: step.visibility.map(clamp_u32),
        wind_speed_ms: step.wind.map(|wind| wind.speed).unwrap_or(0.0),
        condition: WeatherCondition {
            id: condition.id,
            icon: condition.icon,
            description: condition.description,
        },
    })
}

/// Keeps the first step as the current reading; for each later local date
/// keeps the step closest to local noon, widened to that day's min/max.
fn condense_daily(steps: Vec<ForecastEntry>, offset_secs: i32) -> Vec<ForecastEntry> {
    let mut steps = steps.into_iter();
    let Some(current) = steps.next() else {
        return Vec::new();
    };

    let current_day = local_day(current.timestamp, offset_secs);
    let mut days: Vec<(i64, ForecastEntry)> = Vec::new();

    for step in steps {
        let day = local_day(step.timestamp, offset_secs);
        if day == current_day {
            continue;
        }

        match days.last_mut() {
            Some((last_day, picked)) if *last_day == day => {
                let temp_min_k = picked.temp_min_k.min(step.temp_min_k);
                let temp_max_k = picked.temp_max_k.max(step.temp_max_k);
                if noon_distance(step.timestamp, offset_secs)
                    < noon_distance(picked.timestamp, offset_secs)
                {
                    *picked = step;
                }
                picked.temp_min_k = temp_min_k;
                picked.temp_max_k = temp_max_k;
            }
            _ => days.push((day, step)),
        }
    }

    std::iter::once(current)
        .chain(days.into_iter().map(|(_, entry)| entry))
        .collect()
}

fn local_day(timestamp: i64, offset_secs: i32) -> i64 {
    (timestamp + i64::from(offset_secs)).div_euclid(SECONDS_PER_DAY)
}

fn noon_distance(timestamp: i64, offset_secs: i32) -> i64 {
    let seconds_of_day = (timestamp + i64::from(offset_secs)).rem_euclid(SECONDS_PER_DAY);
    (seconds_of_day - LOCAL_NOON_SECS).abs()
}

fn clamp_u32(value: f64) -> u32 {
    if !value.is_finite() {
        return 0;
    }
    value.clamp(0.0, f64::from(u32::MAX)).round() as u32
}

fn clamp_percentage(value: f64) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    value.clamp(0.0, 100.0).round() as u8
}
