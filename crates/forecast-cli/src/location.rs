//! Last-known-location lookup behind the permission gate.

use std::sync::Arc;

use reqwest::blocking::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::{LocationSource, RetryPolicy, RuntimeConfig};
use crate::gateway::{GatewayError, execute_request, execute_with_retry, http_client};
use crate::model::Coordinates;
use crate::permissions::PermissionGate;
use crate::preferences::{PREF_LAST_KNOWN_LOCATION, PreferenceStore};

const IP_PROVIDER_NAME: &str = "ipapi";
pub const IP_LOCATION_ENDPOINT: &str = "https://ipapi.co/json/";

/// Platform-style location service. `Ok(None)` means the service answered
/// but has no fix.
pub trait LocationProvider: Send + Sync {
    fn last_known_location(&self) -> Result<Option<Coordinates>, LocationError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("location lookup failed: {0}")]
    Lookup(String),
    #[error("location lookup was interrupted: {0}")]
    Interrupted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("location permission denied")]
pub struct PermissionDenied;

/// An in-flight lookup. Completes exactly once.
#[derive(Debug)]
pub struct PendingLocation {
    task: JoinHandle<Result<Option<Coordinates>, LocationError>>,
}

impl PendingLocation {
    pub async fn completion(self) -> Result<Option<Coordinates>, LocationError> {
        self.task
            .await
            .map_err(|error| LocationError::Interrupted(error.to_string()))?
    }
}

#[derive(Clone)]
pub struct LocationResolver {
    gate: Arc<dyn PermissionGate>,
    provider: Arc<dyn LocationProvider>,
}

impl LocationResolver {
    pub fn new(gate: Arc<dyn PermissionGate>, provider: Arc<dyn LocationProvider>) -> Self {
        Self { gate, provider }
    }

    /// Fails synchronously when permission is missing; the provider is never
    /// touched in that case. Must be called from within a tokio runtime.
    pub fn resolve_location(&self) -> Result<PendingLocation, PermissionDenied> {
        if !self.gate.has_location_permission() {
            return Err(PermissionDenied);
        }

        let provider = Arc::clone(&self.provider);
        Ok(PendingLocation {
            task: tokio::task::spawn_blocking(move || provider.last_known_location()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedLocationProvider {
    fix: Option<Coordinates>,
}

impl FixedLocationProvider {
    pub fn new(fix: Option<Coordinates>) -> Self {
        Self { fix }
    }
}

impl LocationProvider for FixedLocationProvider {
    fn last_known_location(&self) -> Result<Option<Coordinates>, LocationError> {
        Ok(self.fix)
    }
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    latitude: Option<f64>,
    longitude: Option<f64>,
    #[serde(default)]
    error: bool,
    reason: Option<String>,
}

/// IP geolocation. A successful fix is remembered in the preference store and
/// served again when a later lookup fails.
pub struct IpLocationProvider {
    client: Client,
    endpoint: String,
    store: Arc<dyn PreferenceStore>,
    retry_policy: RetryPolicy,
}

impl IpLocationProvider {
    pub fn new(
        store: Arc<dyn PreferenceStore>,
        retry_policy: RetryPolicy,
    ) -> Result<Self, LocationError> {
        Self::with_endpoint(store, IP_LOCATION_ENDPOINT, retry_policy)
    }

    pub fn with_endpoint(
        store: Arc<dyn PreferenceStore>,
        endpoint: impl Into<String>,
        retry_policy: RetryPolicy,
    ) -> Result<Self, LocationError> {
        let client = http_client().map_err(|error| LocationError::Lookup(error.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            store,
            retry_policy,
        })
    }

    fn lookup(&self) -> Result<Coordinates, GatewayError> {
        execute_with_retry(
            IP_PROVIDER_NAME,
            self.retry_policy,
            || execute_request(self.client.get(&self.endpoint)).and_then(|body| parse_ip_response(&body)),
            std::thread::sleep,
        )
    }

    fn remembered(&self) -> Option<Coordinates> {
        let raw = self.store.get(PREF_LAST_KNOWN_LOCATION)?;
        Coordinates::parse_pair(&raw).ok()
    }

    fn remember(&self, coordinates: Coordinates) {
        if let Err(error) = self
            .store
            .set(PREF_LAST_KNOWN_LOCATION, &coordinates.to_pair())
        {
            tracing::warn!(%error, "failed to remember last known location");
        }
    }
}

impl LocationProvider for IpLocationProvider {
    fn last_known_location(&self) -> Result<Option<Coordinates>, LocationError> {
        match self.lookup() {
            Ok(coordinates) => {
                self.remember(coordinates);
                Ok(Some(coordinates))
            }
            Err(error) => match self.remembered() {
                Some(coordinates) => {
                    tracing::warn!(%error, "IP geolocation failed, using last known location");
                    Ok(Some(coordinates))
                }
                None => Err(LocationError::Lookup(error.to_string())),
            },
        }
    }
}

fn parse_ip_response(body: &str) -> Result<Coordinates, GatewayError> {
    let payload: IpApiResponse = serde_json::from_str(body)
        .map_err(|error| GatewayError::InvalidResponse(format!("geolocation payload: {error}")))?;

    if payload.error {
        return Err(GatewayError::InvalidResponse(format!(
            "geolocation refused: {}",
            payload.reason.as_deref().unwrap_or("unknown reason")
        )));
    }

    let (Some(latitude), Some(longitude)) = (payload.latitude, payload.longitude) else {
        return Err(GatewayError::InvalidResponse(
            "geolocation payload: missing coordinates".to_string(),
        ));
    };

    Coordinates::new(latitude, longitude)
        .map_err(|error| GatewayError::InvalidResponse(format!("geolocation payload: {error}")))
}

pub fn provider_from_config(
    config: &RuntimeConfig,
    store: Arc<dyn PreferenceStore>,
) -> Result<Arc<dyn LocationProvider>, LocationError> {
    let provider: Arc<dyn LocationProvider> = match config.location_source {
        LocationSource::Ip => Arc::new(IpLocationProvider::new(store, config.retry_policy)?),
        LocationSource::Fixed(coordinates) => Arc::new(FixedLocationProvider::new(Some(coordinates))),
        LocationSource::Disabled => Arc::new(FixedLocationProvider::new(None)),
    };
    Ok(provider)
}
