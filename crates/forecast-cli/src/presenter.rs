//! Turns published load states into view updates.
//!
//! The presenter owns every user-visible reaction: rendering a forecast with
//! the current unit preferences, showing failure messages and driving the
//! permission request when location access is missing. It never starts a
//! cycle itself; a `Reload` effect asks the owner to call `load()` again.

use std::sync::Arc;

use serde::Serialize;

use crate::controller::LoadState;
use crate::model::{Forecast, ForecastEntry, ForecastFailure, ForecastOutcome};
use crate::permissions::{PermissionGate, StoredPermissions};
use crate::preferences::{self, PreferenceStore, UnitPreferences};
use crate::units::{format_humidity, format_pressure, format_visibility, format_wind_speed};
use crate::weather_icon::WeatherIcon;

pub trait ForecastView {
    fn show_loading(&mut self);
    fn show_forecast(&mut self, screen: &ForecastScreen);
    fn show_message(&mut self, message: UserMessage);
}

/// Interactive permission request. The answer comes back to the presenter,
/// never to the controller.
pub trait PermissionPrompt {
    fn request_location_permission(&mut self) -> PermissionResponse;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionResponse {
    Granted,
    Denied,
    Dismissed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UserMessage {
    InvalidCity,
    GenericError,
    LocationAccessNotGranted,
}

impl UserMessage {
    pub fn text(self) -> &'static str {
        match self {
            Self::InvalidCity => "Invalid city name. Check the saved city and try again.",
            Self::GenericError => "Something went wrong while loading the forecast.",
            Self::LocationAccessNotGranted => {
                "Location access is not granted. Allow it to see the forecast for your location."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterEffect {
    None,
    Reload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastScreen {
    pub title: String,
    pub city: String,
    pub country: String,
    pub temperature_unit: &'static str,
    pub time_format: String,
    pub current: CurrentConditions,
    pub days: Vec<DaySummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentConditions {
    pub time: Option<String>,
    pub temperature: String,
    pub feels_like: String,
    pub pressure: String,
    pub humidity: String,
    pub visibility: Option<String>,
    pub wind: String,
    pub icon: WeatherIcon,
    pub glyph: &'static str,
    pub description: String,
    pub sunrise: Option<String>,
    pub sunset: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaySummary {
    pub date: Option<String>,
    pub temperature: String,
    pub temp_min: String,
    pub temp_max: String,
    pub icon: WeatherIcon,
    pub glyph: &'static str,
    pub description: String,
}

impl ForecastScreen {
    /// `None` when the forecast carries no current reading.
    pub fn build(forecast: &Forecast, units: &UnitPreferences) -> Option<Self> {
        let current = forecast.current()?;
        let offset = forecast.city.timezone_offset_secs;
        let unit = units.temperature_unit;
        let icon = icon_for(current);

        Some(Self {
            title: format!("{}, {}", forecast.city.name, forecast.city.country),
            city: forecast.city.name.clone(),
            country: forecast.city.country.clone(),
            temperature_unit: unit.symbol(),
            time_format: units.time_format.pattern().to_string(),
            current: CurrentConditions {
                time: units.time_format.format_timestamp(current.timestamp, offset),
                temperature: unit.format_kelvin(current.temp_k),
                feels_like: unit.format_kelvin(current.feels_like_k),
                pressure: format_pressure(current.pressure_hpa),
                humidity: format_humidity(current.humidity_pct),
                visibility: current.visibility_m.map(format_visibility),
                wind: format_wind_speed(current.wind_speed_ms),
                icon,
                glyph: icon.glyph(),
                description: describe(current, icon),
                sunrise: units.time_format.format_clock(forecast.city.sunrise, offset),
                sunset: units.time_format.format_clock(forecast.city.sunset, offset),
            },
            days: forecast
                .following_days()
                .iter()
                .map(|entry| {
                    let icon = icon_for(entry);
                    DaySummary {
                        date: units.time_format.format_timestamp(entry.timestamp, offset),
                        temperature: unit.format_kelvin(entry.temp_k),
                        temp_min: unit.format_kelvin(entry.temp_min_k),
                        temp_max: unit.format_kelvin(entry.temp_max_k),
                        icon,
                        glyph: icon.glyph(),
                        description: describe(entry, icon),
                    }
                })
                .collect(),
        })
    }
}

fn icon_for(entry: &ForecastEntry) -> WeatherIcon {
    WeatherIcon::from_condition(entry.condition.id, &entry.condition.icon)
}

/// Provider wording when present, otherwise the icon's own label.
fn describe(entry: &ForecastEntry, icon: WeatherIcon) -> String {
    let description = entry.condition.description.trim();
    if description.is_empty() {
        icon.label().to_string()
    } else {
        description.to_string()
    }
}

pub struct ForecastPresenter<V, P> {
    view: V,
    prompt: P,
    preferences: Arc<dyn PreferenceStore>,
    permissions: StoredPermissions,
}

impl<V, P> ForecastPresenter<V, P>
where
    V: ForecastView,
    P: PermissionPrompt,
{
    pub fn new(view: V, prompt: P, preferences: Arc<dyn PreferenceStore>) -> Self {
        let permissions = StoredPermissions::new(Arc::clone(&preferences));
        Self {
            view,
            prompt,
            preferences,
            permissions,
        }
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn into_view(self) -> V {
        self.view
    }

    /// Call once per published state.
    pub fn present(&mut self, state: &LoadState) -> PresenterEffect {
        match state {
            LoadState::Idle => PresenterEffect::None,
            LoadState::Loading => {
                self.view.show_loading();
                PresenterEffect::None
            }
            LoadState::Resolved(ForecastOutcome::Success(forecast)) => {
                self.render(forecast);
                PresenterEffect::None
            }
            LoadState::Resolved(ForecastOutcome::Failure(failure)) => match failure {
                ForecastFailure::LocationPermissionDenied => self.request_permission(),
                ForecastFailure::InvalidCity => {
                    self.view.show_message(UserMessage::InvalidCity);
                    PresenterEffect::None
                }
                ForecastFailure::LocationRequestFailed | ForecastFailure::Other(_) => {
                    self.view.show_message(UserMessage::GenericError);
                    PresenterEffect::None
                }
            },
        }
    }

    fn render(&mut self, forecast: &Forecast) {
        let units = preferences::unit_preferences(self.preferences.as_ref());
        let Some(screen) = ForecastScreen::build(forecast, &units) else {
            tracing::warn!(city = %forecast.city.name, "forecast has no current reading");
            self.view.show_message(UserMessage::GenericError);
            return;
        };

        if let Err(error) = preferences::save_resolved_city(
            self.preferences.as_ref(),
            &forecast.city.name,
            &forecast.city.country,
        ) {
            tracing::warn!(%error, "failed to remember resolved city");
        }
        self.view.show_forecast(&screen);
    }

    fn request_permission(&mut self) -> PresenterEffect {
        if self.permissions.has_location_permission() {
            return PresenterEffect::Reload;
        }

        if self.permissions.should_show_rationale() {
            self.view.show_message(UserMessage::LocationAccessNotGranted);
            return PresenterEffect::None;
        }

        match self.prompt.request_location_permission() {
            PermissionResponse::Granted => match self.permissions.grant_all() {
                Ok(()) => PresenterEffect::Reload,
                Err(error) => {
                    tracing::warn!(%error, "failed to record location grant");
                    self.view.show_message(UserMessage::GenericError);
                    PresenterEffect::None
                }
            },
            PermissionResponse::Denied => {
                if let Err(error) = self.permissions.deny_all() {
                    tracing::warn!(%error, "failed to record location denial");
                }
                self.view.show_message(UserMessage::LocationAccessNotGranted);
                PresenterEffect::None
            }
            PermissionResponse::Dismissed => {
                self.view.show_message(UserMessage::LocationAccessNotGranted);
                PresenterEffect::None
            }
        }
    }
}
