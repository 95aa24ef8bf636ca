//! Unit conversion and display formatting for rendered forecasts.
//!
//! Provider payloads carry Kelvin, m/s and meters; everything shown to the
//! user passes through here with the unit preferences read at render time.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const KELVIN_OFFSET: f64 = 273.15;
const FAHRENHEIT_KELVIN_OFFSET: f64 = 459.67;

pub const DEFAULT_TEMPERATURE_UNIT: TemperatureUnit = TemperatureUnit::Celsius;
pub const DEFAULT_TIME_FORMAT: &str = "dd MMM, HH:mm";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
    Kelvin,
}

impl TemperatureUnit {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Celsius => "°C",
            Self::Fahrenheit => "°F",
            Self::Kelvin => "K",
        }
    }

    /// Accepts the stored symbol as well as the usual spellings.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "°c" | "c" | "celsius" => Some(Self::Celsius),
            "°f" | "f" | "fahrenheit" => Some(Self::Fahrenheit),
            "k" | "°k" | "kelvin" => Some(Self::Kelvin),
            _ => None,
        }
    }

    pub fn from_kelvin(self, kelvin: f64) -> f64 {
        match self {
            Self::Celsius => kelvin - KELVIN_OFFSET,
            Self::Fahrenheit => kelvin * 9.0 / 5.0 - FAHRENHEIT_KELVIN_OFFSET,
            Self::Kelvin => kelvin,
        }
    }

    pub fn to_kelvin(self, value: f64) -> f64 {
        match self {
            Self::Celsius => value + KELVIN_OFFSET,
            Self::Fahrenheit => (value + FAHRENHEIT_KELVIN_OFFSET) * 5.0 / 9.0,
            Self::Kelvin => value,
        }
    }

    pub fn format_kelvin(self, kelvin: f64) -> String {
        let value = round1(self.from_kelvin(kelvin));
        match self {
            Self::Kelvin => format!("{value:.1} {}", self.symbol()),
            _ => format!("{value:.1}{}", self.symbol()),
        }
    }
}

pub fn convert_temperature(value: f64, from: TemperatureUnit, to: TemperatureUnit) -> f64 {
    to.from_kelvin(from.to_kelvin(value))
}

pub fn format_visibility(meters: u32) -> String {
    if meters < 1_000 {
        return format!("{meters} m");
    }
    format!("{} km", trim_decimal(round1(f64::from(meters) / 1_000.0)))
}

pub fn format_wind_speed(meters_per_sec: f64) -> String {
    format!("{:.1} m/s", round1(meters_per_sec))
}

pub fn format_pressure(hpa: u32) -> String {
    format!("{hpa} hPa")
}

pub fn format_humidity(pct: u8) -> String {
    format!("{}%", pct.min(100))
}

fn round1(value: f64) -> f64 {
    // `+ 0.0` folds a rounded -0.0 into 0.0 so it never renders as "-0.0".
    (value * 10.0).round() / 10.0 + 0.0
}

fn trim_decimal(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.1}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeFormatError {
    #[error("time format must not be empty")]
    Empty,
    #[error("unsupported time format token '{0}'")]
    UnsupportedToken(String),
    #[error("unterminated quoted literal in time format")]
    UnterminatedQuote,
}

/// A user time-format pattern (LDML letters, e.g. `dd MMM, HH:mm`) together
/// with its strftime translation.
///
/// The segment after the first `", "` is the clock pattern used for
/// sunrise/sunset; a pattern without that separator is its own clock pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeFormat {
    pattern: String,
    full: String,
    clock: String,
}

impl TimeFormat {
    pub fn parse(pattern: &str) -> Result<Self, TimeFormatError> {
        let full = translate_pattern(pattern)?;
        let clock = translate_pattern(clock_segment(pattern))?;
        Ok(Self {
            pattern: pattern.to_string(),
            full,
            clock,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn format_timestamp(&self, timestamp: i64, offset_secs: i32) -> Option<String> {
        format_with(&self.full, timestamp, offset_secs)
    }

    pub fn format_clock(&self, timestamp: i64, offset_secs: i32) -> Option<String> {
        format_with(&self.clock, timestamp, offset_secs)
    }
}

impl Default for TimeFormat {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_TIME_FORMAT.to_string(),
            full: "%d %b, %H:%M".to_string(),
            clock: "%H:%M".to_string(),
        }
    }
}

pub fn clock_segment(pattern: &str) -> &str {
    pattern
        .split(", ")
        .nth(1)
        .filter(|segment| !segment.trim().is_empty())
        .unwrap_or(pattern)
}

fn format_with(strftime: &str, timestamp: i64, offset_secs: i32) -> Option<String> {
    let offset = FixedOffset::east_opt(offset_secs)?;
    let instant = DateTime::from_timestamp(timestamp, 0)?;
    Some(instant.with_timezone(&offset).format(strftime).to_string())
}

pub fn translate_pattern(pattern: &str) -> Result<String, TimeFormatError> {
    if pattern.trim().is_empty() {
        return Err(TimeFormatError::Empty);
    }

    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut index = 0;

    while index < chars.len() {
        let ch = chars[index];

        if ch == '\'' {
            index = push_quoted(&chars, index, &mut out)?;
            continue;
        }

        if ch.is_ascii_alphabetic() {
            let mut run = 1;
            while index + run < chars.len() && chars[index + run] == ch {
                run += 1;
            }
            let spec = token_spec(ch, run)
                .ok_or_else(|| TimeFormatError::UnsupportedToken(ch.to_string().repeat(run)))?;
            out.push_str(spec);
            index += run;
            continue;
        }

        push_literal(&mut out, ch);
        index += 1;
    }

    Ok(out)
}

// Returns the index just past the closing quote. `''` is an escaped quote,
// both inside and outside a quoted section.
fn push_quoted(chars: &[char], start: usize, out: &mut String) -> Result<usize, TimeFormatError> {
    if chars.get(start + 1) == Some(&'\'') {
        out.push('\'');
        return Ok(start + 2);
    }

    let mut index = start + 1;
    loop {
        match chars.get(index) {
            None => return Err(TimeFormatError::UnterminatedQuote),
            Some('\'') if chars.get(index + 1) == Some(&'\'') => {
                out.push('\'');
                index += 2;
            }
            Some('\'') => return Ok(index + 1),
            Some(ch) => {
                push_literal(out, *ch);
                index += 1;
            }
        }
    }
}

fn push_literal(out: &mut String, ch: char) {
    if ch == '%' {
        out.push_str("%%");
    } else {
        out.push(ch);
    }
}

fn token_spec(letter: char, run: usize) -> Option<&'static str> {
    let spec = match (letter, run) {
        ('y', 2) => "%y",
        ('y', _) => "%Y",
        ('M', 1) => "%-m",
        ('M', 2) => "%m",
        ('M', 3) => "%b",
        ('M', _) => "%B",
        ('d', 1) => "%-d",
        ('d', _) => "%d",
        ('E', 1..=3) => "%a",
        ('E', _) => "%A",
        ('H', 1) => "%-H",
        ('H', _) => "%H",
        ('h', 1) => "%-I",
        ('h', _) => "%I",
        ('m', 1) => "%-M",
        ('m', _) => "%M",
        ('s', 1) => "%-S",
        ('s', _) => "%S",
        ('a', _) => "%p",
        _ => return None,
    };
    Some(spec)
}
