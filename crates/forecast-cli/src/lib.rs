pub mod config;
pub mod controller;
pub mod error;
pub mod gateway;
pub mod location;
pub mod model;
pub mod permissions;
pub mod preferences;
pub mod presenter;
pub mod session;
pub mod units;
pub mod weather_icon;

#[cfg(test)]
mod test_support;
