//! User preferences: an injected string key/value store plus typed readers.
//!
//! Values are always read fresh from the store; nothing here caches them.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;

use crate::model::ForecastRequestMode;
use crate::units::{DEFAULT_TEMPERATURE_UNIT, DEFAULT_TIME_FORMAT, TemperatureUnit, TimeFormat};

pub const PREF_IS_AUTO_MODE: &str = "is_auto_mode";
pub const PREF_CITY_NAME: &str = "city_name";
pub const PREF_COUNTRY_NAME: &str = "country_name";
pub const PREF_TEMPERATURE_UNIT: &str = "temperature_unit";
pub const PREF_TIME_FORMAT: &str = "time_format";
pub const PREF_LAST_KNOWN_LOCATION: &str = "last_known_location";

pub const PREFERENCES_FILE_NAME: &str = "preferences.json";

pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError>;
    fn remove(&self, key: &str) -> Result<(), PreferenceError>;
    fn entries(&self) -> Vec<(String, String)>;
}

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("unknown preference key '{0}'")]
    UnknownKey(String),
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error("failed to persist preferences at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize preferences: {0}")]
    Serialize(String),
}

#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: Mutex::new(
                pairs
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PreferenceError> {
        self.values.lock().remove(key);
        Ok(())
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.values
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// JSON object of strings on disk, rewritten atomically on every mutation.
#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FilePreferenceStore {
    pub fn open(dir: &Path) -> Result<Self, PreferenceError> {
        let path = dir.join(PREFERENCES_FILE_NAME);
        let values = read_values(&path)?;
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate<F>(&self, apply: F) -> Result<(), PreferenceError>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let mut guard = self.values.lock();
        let mut next = guard.clone();
        apply(&mut next);

        let payload = serde_json::to_vec_pretty(&next)
            .map_err(|error| PreferenceError::Serialize(error.to_string()))?;
        write_atomic(&self.path, &payload).map_err(|source| PreferenceError::Io {
            path: self.path.clone(),
            source,
        })?;

        *guard = next;
        Ok(())
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        tracing::debug!(key, path = %self.path.display(), "writing preference");
        self.mutate(|values| {
            values.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), PreferenceError> {
        tracing::debug!(key, path = %self.path.display(), "removing preference");
        self.mutate(|values| {
            values.remove(key);
        })
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.values
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

fn read_values(path: &Path) -> Result<BTreeMap<String, String>, PreferenceError> {
    let payload = match fs::read_to_string(path) {
        Ok(payload) => payload,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(source) => {
            return Err(PreferenceError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    match serde_json::from_str::<BTreeMap<String, String>>(&payload) {
        Ok(values) => Ok(values),
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "ignoring unreadable preferences file");
            Ok(BTreeMap::new())
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "preferences path must have a parent directory",
        )
    })?;
    fs::create_dir_all(parent)?;

    let tmp_path = path.with_extension(format!("{}.tmp", std::process::id()));
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitPreferences {
    pub temperature_unit: TemperatureUnit,
    pub time_format: TimeFormat,
}

/// Missing key means auto; otherwise only a case-insensitive `"true"` does.
pub fn request_mode(store: &dyn PreferenceStore) -> ForecastRequestMode {
    match store.get(PREF_IS_AUTO_MODE) {
        None => ForecastRequestMode::Auto,
        Some(value) if value.trim().eq_ignore_ascii_case("true") => ForecastRequestMode::Auto,
        Some(_) => ForecastRequestMode::Manual,
    }
}

pub fn saved_city(store: &dyn PreferenceStore) -> Option<String> {
    store.get(PREF_CITY_NAME)
}

pub fn unit_preferences(store: &dyn PreferenceStore) -> UnitPreferences {
    let temperature_unit = match store.get(PREF_TEMPERATURE_UNIT) {
        None => DEFAULT_TEMPERATURE_UNIT,
        Some(raw) => TemperatureUnit::parse(&raw).unwrap_or_else(|| {
            tracing::warn!(value = %raw, "unknown temperature unit, using default");
            DEFAULT_TEMPERATURE_UNIT
        }),
    };

    let time_format = match store.get(PREF_TIME_FORMAT) {
        None => TimeFormat::default(),
        Some(raw) => TimeFormat::parse(&raw).unwrap_or_else(|error| {
            tracing::warn!(value = %raw, %error, "unusable time format, using default");
            TimeFormat::default()
        }),
    };

    UnitPreferences {
        temperature_unit,
        time_format,
    }
}

pub fn save_resolved_city(
    store: &dyn PreferenceStore,
    city: &str,
    country: &str,
) -> Result<(), PreferenceError> {
    store.set(PREF_CITY_NAME, city)?;
    store.set(PREF_COUNTRY_NAME, country)
}

/// Keys a user may edit through `config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferenceKey {
    IsAutoMode,
    CityName,
    CountryName,
    TemperatureUnit,
    TimeFormat,
}

impl PreferenceKey {
    pub const ALL: [PreferenceKey; 5] = [
        PreferenceKey::IsAutoMode,
        PreferenceKey::CityName,
        PreferenceKey::CountryName,
        PreferenceKey::TemperatureUnit,
        PreferenceKey::TimeFormat,
    ];

    pub fn parse(raw: &str) -> Result<Self, PreferenceError> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == raw.trim())
            .ok_or_else(|| PreferenceError::UnknownKey(raw.trim().to_string()))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::IsAutoMode => PREF_IS_AUTO_MODE,
            Self::CityName => PREF_CITY_NAME,
            Self::CountryName => PREF_COUNTRY_NAME,
            Self::TemperatureUnit => PREF_TEMPERATURE_UNIT,
            Self::TimeFormat => PREF_TIME_FORMAT,
        }
    }

    pub fn default_value(self) -> Option<&'static str> {
        match self {
            Self::IsAutoMode => Some("true"),
            Self::CityName => Some(""),
            Self::CountryName => None,
            Self::TemperatureUnit => Some(DEFAULT_TEMPERATURE_UNIT.symbol()),
            Self::TimeFormat => Some(DEFAULT_TIME_FORMAT),
        }
    }

    /// Validates a user-supplied value and returns the form that is stored.
    pub fn normalize_value(self, raw: &str) -> Result<String, PreferenceError> {
        let key = self.as_str();
        match self {
            Self::IsAutoMode => match raw.trim().to_ascii_lowercase().as_str() {
                "true" => Ok("true".to_string()),
                "false" => Ok("false".to_string()),
                _ => Err(PreferenceError::InvalidValue {
                    key,
                    reason: "expected 'true' or 'false'".to_string(),
                }),
            },
            Self::CityName | Self::CountryName => Ok(raw.trim().to_string()),
            Self::TemperatureUnit => TemperatureUnit::parse(raw)
                .map(|unit| unit.symbol().to_string())
                .ok_or_else(|| PreferenceError::InvalidValue {
                    key,
                    reason: "expected one of °C, °F, K".to_string(),
                }),
            Self::TimeFormat => TimeFormat::parse(raw)
                .map(|format| format.pattern().to_string())
                .map_err(|error| PreferenceError::InvalidValue {
                    key,
                    reason: error.to_string(),
                }),
        }
    }
}

pub fn set_validated(
    store: &dyn PreferenceStore,
    key: PreferenceKey,
    raw: &str,
) -> Result<String, PreferenceError> {
    let value = key.normalize_value(raw)?;
    store.set(key.as_str(), &value)?;
    Ok(value)
}
