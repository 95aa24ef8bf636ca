use std::collections::HashMap;
use std::path::PathBuf;

use crate::model::Coordinates;

pub const FORECAST_CONFIG_DIR_ENV: &str = "FORECAST_CONFIG_DIR";
pub const FORECAST_API_KEY_ENV: &str = "FORECAST_API_KEY";
pub const FORECAST_API_BASE_URL_ENV: &str = "FORECAST_API_BASE_URL";
pub const FORECAST_LANG_ENV: &str = "FORECAST_LANG";
pub const FORECAST_LOCATION_PROVIDER_ENV: &str = "FORECAST_LOCATION_PROVIDER";
pub const FORECAST_LAST_LOCATION_ENV: &str = "FORECAST_LAST_LOCATION";
pub const FORECAST_LOG_ENV: &str = "FORECAST_LOG";
const OPENWEATHER_API_KEY_ENV: &str = "OPENWEATHER_API_KEY";
const XDG_CONFIG_HOME_ENV: &str = "XDG_CONFIG_HOME";
const HOME_ENV: &str = "HOME";

const APP_DIR_NAME: &str = "nils-forecast-cli";
pub const DEFAULT_API_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";
pub const DEFAULT_LANG: &str = "en";
pub const DEFAULT_LOG_FILTER: &str = "warn";

pub const PROVIDER_TIMEOUT_SECS: u64 = 5;
pub const PROVIDER_RETRY_MAX_ATTEMPTS: usize = 2;
pub const PROVIDER_RETRY_BASE_BACKOFF_MS: u64 = 200;
pub const HTTP_USER_AGENT: &str =
    "nils-forecast-cli/0.3 (+https://github.com/sympoies/nils-forecast)";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocationSource {
    /// IP geolocation, falling back to the last remembered fix.
    Ip,
    /// A fix supplied through `FORECAST_LAST_LOCATION`.
    Fixed(Coordinates),
    /// No location service; every lookup yields no fix.
    Disabled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub config_dir: PathBuf,
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub lang: String,
    pub location_source: LocationSource,
    pub log_filter: String,
    pub retry_policy: RetryPolicy,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_pairs(std::env::vars())
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            config_dir: resolve_config_dir(&map),
            api_key: non_empty(&map, FORECAST_API_KEY_ENV)
                .or_else(|| non_empty(&map, OPENWEATHER_API_KEY_ENV))
                .map(str::to_string),
            api_base_url: non_empty(&map, FORECAST_API_BASE_URL_ENV)
                .unwrap_or(DEFAULT_API_BASE_URL)
                .to_string(),
            lang: non_empty(&map, FORECAST_LANG_ENV)
                .unwrap_or(DEFAULT_LANG)
                .to_string(),
            location_source: resolve_location_source(&map),
            log_filter: non_empty(&map, FORECAST_LOG_ENV)
                .unwrap_or(DEFAULT_LOG_FILTER)
                .to_string(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

fn non_empty<'a>(env_map: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    env_map
        .get(key)
        .map(String::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn resolve_config_dir(env_map: &HashMap<String, String>) -> PathBuf {
    let home = env_map.get(HOME_ENV).map(String::as_str);

    if let Some(explicit) = non_empty(env_map, FORECAST_CONFIG_DIR_ENV) {
        return PathBuf::from(expand_home_path(explicit, home));
    }

    if let Some(xdg) = non_empty(env_map, XDG_CONFIG_HOME_ENV) {
        return PathBuf::from(expand_home_path(xdg, home)).join(APP_DIR_NAME);
    }

    home.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|home| PathBuf::from(home).join(".config").join(APP_DIR_NAME))
        .unwrap_or_else(|| std::env::temp_dir().join(APP_DIR_NAME))
}

fn resolve_location_source(env_map: &HashMap<String, String>) -> LocationSource {
    let fixed = non_empty(env_map, FORECAST_LAST_LOCATION_ENV).and_then(|raw| {
        Coordinates::parse_pair(raw)
            .inspect_err(|error| {
                tracing::warn!(%error, "ignoring malformed last location override");
            })
            .ok()
    });

    match non_empty(env_map, FORECAST_LOCATION_PROVIDER_ENV)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("none") => LocationSource::Disabled,
        Some("fixed") => fixed.map_or(LocationSource::Disabled, LocationSource::Fixed),
        Some("ip") => LocationSource::Ip,
        _ => fixed.map_or(LocationSource::Ip, LocationSource::Fixed),
    }
}

fn expand_home_path(raw: &str, home: Option<&str>) -> String {
    let trimmed = raw.trim();
    let Some(home) = home.map(str::trim).filter(|value| !value.is_empty()) else {
        return trimmed.to_string();
    };

    let home = home.trim_end_matches('/');
    let mut expanded = trimmed.replace("$HOME", home);

    if expanded == "~" {
        expanded = home.to_string();
    } else if let Some(rest) = expanded.strip_prefix("~/") {
        expanded = format!("{home}/{rest}");
    }

    expanded
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: PROVIDER_RETRY_MAX_ATTEMPTS,
            base_backoff_ms: PROVIDER_RETRY_BASE_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    pub fn backoff_for_attempt(self, attempt: usize) -> u64 {
        if attempt <= 1 {
            return 0;
        }

        let shift = (attempt - 2).min(8);
        self.base_backoff_ms.saturating_mul(1_u64 << shift)
    }
}
