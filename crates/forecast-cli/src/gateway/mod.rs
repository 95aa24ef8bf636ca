use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use serde_json::Value;
use thiserror::Error;

use crate::config::{HTTP_USER_AGENT, PROVIDER_TIMEOUT_SECS, RetryPolicy, RuntimeConfig};
use crate::model::{CityQuery, Coordinates, Forecast};

pub mod open_weather;

/// Remote forecast source. Calls block; the controller runs them off the
/// owning task.
pub trait ForecastGateway: Send + Sync {
    fn by_city(&self, city: &CityQuery) -> Result<Forecast, GatewayError>;
    fn by_coordinates(&self, coordinates: Coordinates) -> Result<Forecast, GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub lang: String,
}

impl GatewaySettings {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            lang: config.lang.clone(),
        }
    }

    fn require_api_key(&self) -> Result<&str, GatewayError> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(GatewayError::MissingApiKey)
    }
}

#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    settings: GatewaySettings,
    retry_policy: RetryPolicy,
}

impl HttpGateway {
    pub fn new(config: &RuntimeConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client()?,
            settings: GatewaySettings::from_config(config),
            retry_policy: config.retry_policy,
        })
    }
}

impl ForecastGateway for HttpGateway {
    fn by_city(&self, city: &CityQuery) -> Result<Forecast, GatewayError> {
        open_weather::fetch_by_city(&self.client, &self.settings, city, self.retry_policy)
    }

    fn by_coordinates(&self, coordinates: Coordinates) -> Result<Forecast, GatewayError> {
        open_weather::fetch_by_coordinates(
            &self.client,
            &self.settings,
            coordinates,
            self.retry_policy,
        )
    }
}

pub(crate) fn http_client() -> Result<Client, GatewayError> {
    Client::builder()
        .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
        .user_agent(HTTP_USER_AGENT)
        .build()
        .map_err(|error| GatewayError::Transport(error.without_url().to_string()))
}

pub fn execute_with_retry<T, F, S>(
    provider_name: &'static str,
    policy: RetryPolicy,
    mut operation: F,
    mut sleep_fn: S,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Result<T, GatewayError>,
    S: FnMut(Duration),
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match operation() {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !error.retryable() || attempt == max_attempts {
                    return Err(error.with_provider(provider_name));
                }

                let delay = policy.backoff_for_attempt(attempt + 1);
                tracing::warn!(
                    provider = provider_name,
                    attempt,
                    delay_ms = delay,
                    %error,
                    "retrying provider request"
                );
                sleep_fn(Duration::from_millis(delay));
            }
        }
    }

    Err(GatewayError::InvalidResponse(format!(
        "{provider_name}: exhausted retry attempts"
    )))
}

/// Sends the request and returns the body of a 2xx response.
pub(crate) fn execute_request(request: RequestBuilder) -> Result<String, GatewayError> {
    let response = request
        .send()
        .map_err(|error| GatewayError::Transport(error.without_url().to_string()))?;
    let status = response.status();
    let body = response
        .text()
        .map_err(|error| GatewayError::Transport(error.without_url().to_string()))?;

    if status.is_success() {
        return Ok(body);
    }

    let message = extract_error_message(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });

    Err(GatewayError::Http {
        status: status.as_u16(),
        message,
    })
}

pub(crate) fn extract_error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    let from_json = serde_json::from_str::<Value>(trimmed)
        .ok()
        .and_then(|json| {
            ["message", "reason", "error", "detail"]
                .into_iter()
                .filter_map(|key| json.get(key).and_then(Value::as_str))
                .map(str::trim)
                .find(|message| !message.is_empty())
                .map(str::to_string)
        });

    from_json.or_else(|| Some(trimmed.to_string()))
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http error ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("city not found: {0}")]
    CityNotFound(String),
    #[error("missing API key: set FORECAST_API_KEY")]
    MissingApiKey,
}

impl GatewayError {
    pub fn retryable(&self) -> bool {
        match self {
            GatewayError::Transport(_) => true,
            GatewayError::Http { status, .. } => *status == 429 || (500..=599).contains(status),
            GatewayError::InvalidResponse(_)
            | GatewayError::CityNotFound(_)
            | GatewayError::MissingApiKey => false,
        }
    }

    pub fn with_provider(self, provider: &'static str) -> Self {
        match self {
            GatewayError::Transport(message) => {
                GatewayError::Transport(format!("{provider}: {message}"))
            }
            GatewayError::Http { status, message } => GatewayError::Http {
                status,
                message: format!("{provider}: {message}"),
            },
            GatewayError::InvalidResponse(message) => {
                GatewayError::InvalidResponse(format!("{provider}: {message}"))
            }
            // The city name is shown to the user as-is.
            GatewayError::CityNotFound(_) | GatewayError::MissingApiKey => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn retry_recovers_from_transient_transport_error() {
        let attempts = Rc::new(RefCell::new(0usize));
        let observed_sleep = Rc::new(RefCell::new(Vec::<u64>::new()));
        let attempts_for_op = Rc::clone(&attempts);
        let sleeps_for_op = Rc::clone(&observed_sleep);

        let result = execute_with_retry(
            "test-provider",
            RetryPolicy {
                max_attempts: 2,
                base_backoff_ms: 25,
            },
            move || {
                let mut value = attempts_for_op.borrow_mut();
                *value += 1;
                if *value < 2 {
                    return Err(GatewayError::Transport("timeout".to_string()));
                }
                Ok("ok")
            },
            move |delay| sleeps_for_op.borrow_mut().push(delay.as_millis() as u64),
        )
        .expect("should succeed on retry");

        assert_eq!(result, "ok");
        assert_eq!(*attempts.borrow(), 2);
        assert_eq!(*observed_sleep.borrow(), vec![25]);
    }

    #[test]
    fn retry_gives_up_immediately_on_city_not_found() {
        let attempts = Rc::new(RefCell::new(0usize));
        let attempts_for_op = Rc::clone(&attempts);

        let error = execute_with_retry(
            "test-provider",
            RetryPolicy::default(),
            move || -> Result<(), GatewayError> {
                *attempts_for_op.borrow_mut() += 1;
                Err(GatewayError::CityNotFound("Atlantis".to_string()))
            },
            |_| panic!("must not sleep"),
        )
        .expect_err("must fail");

        assert_eq!(error, GatewayError::CityNotFound("Atlantis".to_string()));
        assert_eq!(*attempts.borrow(), 1);
    }

    #[test]
    fn gateway_error_marks_retryable_http_statuses() {
        assert!(
            GatewayError::Http {
                status: 429,
                message: "rate limit".to_string()
            }
            .retryable()
        );
        assert!(
            GatewayError::Http {
                status: 503,
                message: "unavailable".to_string()
            }
            .retryable()
        );
        assert!(
            !GatewayError::Http {
                status: 401,
                message: "invalid api key".to_string()
            }
            .retryable()
        );
    }

    #[test]
    fn extract_error_message_prefers_provider_message() {
        assert_eq!(
            extract_error_message(r#"{"cod":"404","message":"city not found"}"#),
            Some("city not found".to_string())
        );
        assert_eq!(extract_error_message("   "), None);
        assert_eq!(
            extract_error_message("bad gateway"),
            Some("bad gateway".to_string())
        );
    }

    #[test]
    fn settings_require_non_blank_api_key() {
        let settings = GatewaySettings {
            base_url: "http://localhost".to_string(),
            api_key: Some("  ".to_string()),
            lang: "en".to_string(),
        };
        assert_eq!(settings.require_api_key(), Err(GatewayError::MissingApiKey));
    }
}
