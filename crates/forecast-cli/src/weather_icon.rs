use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherIcon {
    Thunderstorm,
    Drizzle,
    Rain,
    FreezingRain,
    Snow,
    Sleet,
    Fog,
    Tornado,
    ClearDay,
    ClearNight,
    FewCloudsDay,
    FewCloudsNight,
    ScatteredClouds,
    Overcast,
    Unknown,
}

impl WeatherIcon {
    /// Picks the icon for an OpenWeather condition id; the icon code's
    /// `d`/`n` suffix decides between day and night variants.
    pub fn from_condition(id: i32, icon_code: &str) -> Self {
        let night = icon_code.trim().ends_with('n');
        match id {
            200..=232 => Self::Thunderstorm,
            300..=321 => Self::Drizzle,
            511 => Self::FreezingRain,
            500..=531 => Self::Rain,
            611..=616 => Self::Sleet,
            600..=622 => Self::Snow,
            781 => Self::Tornado,
            701..=771 => Self::Fog,
            800 if night => Self::ClearNight,
            800 => Self::ClearDay,
            801 if night => Self::FewCloudsNight,
            801 => Self::FewCloudsDay,
            802 => Self::ScatteredClouds,
            803 | 804 => Self::Overcast,
            _ => Self::Unknown,
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            Self::Thunderstorm => "⛈",
            Self::Drizzle => "🌦",
            Self::Rain => "🌧",
            Self::FreezingRain => "🧊",
            Self::Snow => "❄",
            Self::Sleet => "🌨",
            Self::Fog => "🌫",
            Self::Tornado => "🌪",
            Self::ClearDay => "☀",
            Self::ClearNight => "🌙",
            Self::FewCloudsDay => "🌤",
            Self::FewCloudsNight => "☁",
            Self::ScatteredClouds => "⛅",
            Self::Overcast => "☁",
            Self::Unknown => "?",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Thunderstorm => "Thunderstorm",
            Self::Drizzle => "Drizzle",
            Self::Rain => "Rain",
            Self::FreezingRain => "Freezing rain",
            Self::Snow => "Snow",
            Self::Sleet => "Sleet",
            Self::Fog => "Fog",
            Self::Tornado => "Tornado",
            Self::ClearDay | Self::ClearNight => "Clear",
            Self::FewCloudsDay | Self::FewCloudsNight => "Few clouds",
            Self::ScatteredClouds => "Scattered clouds",
            Self::Overcast => "Overcast",
            Self::Unknown => "Unknown",
        }
    }
}
