//! Forecast acquisition state machine.
//!
//! Each `load()` starts an independent cycle: read the request mode, then
//! either fetch by the saved city or resolve the device location and fetch by
//! coordinates. Cycles publish into a single latest-value channel, so when two
//! overlap the one that completes last wins. Dropping the controller cancels
//! every cycle still in flight; nothing is published after that.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::gateway::{ForecastGateway, GatewayError};
use crate::location::{LocationResolver, PendingLocation};
use crate::model::{CityQuery, Forecast, ForecastFailure, ForecastOutcome, ForecastRequestMode};
use crate::preferences::{self, PreferenceStore};

#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
    Idle,
    Loading,
    Resolved(ForecastOutcome),
}

impl LoadState {
    pub fn outcome(&self) -> Option<&ForecastOutcome> {
        match self {
            Self::Resolved(outcome) => Some(outcome),
            Self::Idle | Self::Loading => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Resolved(ForecastOutcome::Success(_)) => "success",
            Self::Resolved(ForecastOutcome::Failure(reason)) => reason.as_str(),
        }
    }
}

pub struct ControllerDeps {
    pub preferences: Arc<dyn PreferenceStore>,
    pub gateway: Arc<dyn ForecastGateway>,
    pub resolver: LocationResolver,
}

struct Inner {
    preferences: Arc<dyn PreferenceStore>,
    gateway: Arc<dyn ForecastGateway>,
    resolver: LocationResolver,
    state: watch::Sender<LoadState>,
    cycles: AtomicU64,
    runtime: Handle,
}

impl Inner {
    fn publish(&self, cycle: u64, state: LoadState) {
        tracing::debug!(cycle, state = state.as_str(), "publishing load state");
        self.state.send_replace(state);
    }
}

pub struct ForecastController {
    inner: Arc<Inner>,
    shutdown: CancellationToken,
}

impl ForecastController {
    /// Publishes `Idle`, then starts the first cycle.
    pub fn new(deps: ControllerDeps, runtime: Handle) -> Self {
        let (state, _) = watch::channel(LoadState::Idle);
        let controller = Self {
            inner: Arc::new(Inner {
                preferences: deps.preferences,
                gateway: deps.gateway,
                resolver: deps.resolver,
                state,
                cycles: AtomicU64::new(0),
                runtime,
            }),
            shutdown: CancellationToken::new(),
        };
        controller.load();
        controller
    }

    pub fn subscribe(&self) -> watch::Receiver<LoadState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> LoadState {
        self.inner.state.borrow().clone()
    }

    pub fn load(&self) {
        let cycle = self.inner.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let _runtime = self.inner.runtime.enter();
        let mode = preferences::request_mode(self.inner.preferences.as_ref());
        tracing::debug!(cycle, mode = mode.as_str(), "starting forecast cycle");

        match mode {
            ForecastRequestMode::Manual => {
                let saved = preferences::saved_city(self.inner.preferences.as_ref());
                let Ok(city) = CityQuery::parse(saved.as_deref()) else {
                    self.inner.publish(
                        cycle,
                        LoadState::Resolved(ForecastOutcome::Failure(ForecastFailure::InvalidCity)),
                    );
                    return;
                };

                self.inner.publish(cycle, LoadState::Loading);
                self.spawn_cycle(cycle, fetch_by_city(Arc::clone(&self.inner.gateway), city));
            }
            ForecastRequestMode::Auto => match self.inner.resolver.resolve_location() {
                Err(_) => self.inner.publish(
                    cycle,
                    LoadState::Resolved(ForecastOutcome::Failure(
                        ForecastFailure::LocationPermissionDenied,
                    )),
                ),
                Ok(pending) => {
                    self.inner.publish(cycle, LoadState::Loading);
                    self.spawn_cycle(
                        cycle,
                        fetch_by_location(Arc::clone(&self.inner.gateway), pending),
                    );
                }
            },
        }
    }

    fn spawn_cycle<F>(&self, cycle: u64, work: F)
    where
        F: Future<Output = ForecastOutcome> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let shutdown = self.shutdown.clone();
        self.inner.runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::debug!(cycle, "controller dropped, discarding cycle");
                }
                outcome = work => inner.publish(cycle, LoadState::Resolved(outcome)),
            }
        });
    }
}

impl Drop for ForecastController {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn fetch_by_city(gateway: Arc<dyn ForecastGateway>, city: CityQuery) -> ForecastOutcome {
    let result = tokio::task::spawn_blocking(move || gateway.by_city(&city)).await;
    outcome_from(result)
}

async fn fetch_by_location(
    gateway: Arc<dyn ForecastGateway>,
    pending: PendingLocation,
) -> ForecastOutcome {
    let coordinates = match pending.completion().await {
        Ok(Some(coordinates)) => coordinates,
        Ok(None) => {
            tracing::debug!("location service returned no fix");
            return ForecastOutcome::Failure(ForecastFailure::LocationRequestFailed);
        }
        Err(error) => {
            tracing::warn!(%error, "location lookup failed");
            return ForecastOutcome::Failure(ForecastFailure::LocationRequestFailed);
        }
    };

    let result = tokio::task::spawn_blocking(move || gateway.by_coordinates(coordinates)).await;
    outcome_from(result)
}

fn outcome_from(result: Result<Result<Forecast, GatewayError>, JoinError>) -> ForecastOutcome {
    match result {
        Ok(Ok(forecast)) => ForecastOutcome::Success(forecast),
        Ok(Err(GatewayError::CityNotFound(city))) => {
            tracing::debug!(%city, "provider does not know the city");
            ForecastOutcome::Failure(ForecastFailure::InvalidCity)
        }
        Ok(Err(error)) => ForecastOutcome::Failure(ForecastFailure::Other(error.to_string())),
        Err(error) => ForecastOutcome::Failure(ForecastFailure::Other(format!(
            "forecast request interrupted: {error}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::location::LocationProvider;
    use crate::model::{CityQuery, Coordinates};
    use crate::preferences::{MemoryPreferenceStore, PREF_CITY_NAME, PREF_IS_AUTO_MODE};
    use crate::test_support::{CountingProvider, FakeGateway, GatewayCall, SwitchGate, forecast};

    fn manual_store(city: Option<&str>) -> Arc<MemoryPreferenceStore> {
        let store = MemoryPreferenceStore::with_entries([(PREF_IS_AUTO_MODE, "false")]);
        if let Some(city) = city {
            store.set(PREF_CITY_NAME, city).expect("set city");
        }
        Arc::new(store)
    }

    fn controller(
        store: Arc<MemoryPreferenceStore>,
        gateway: Arc<FakeGateway>,
        gate: Arc<SwitchGate>,
        provider: Arc<dyn LocationProvider>,
    ) -> ForecastController {
        ForecastController::new(
            ControllerDeps {
                preferences: store,
                gateway,
                resolver: LocationResolver::new(gate, provider),
            },
            Handle::current(),
        )
    }

    async fn resolved(controller: &ForecastController) -> ForecastOutcome {
        let mut receiver = controller.subscribe();
        let state = receiver
            .wait_for(|state| matches!(state, LoadState::Resolved(_)))
            .await
            .expect("controller alive");
        state.outcome().cloned().expect("resolved outcome")
    }

    #[tokio::test]
    async fn manual_blank_city_fails_without_gateway_call() {
        for city in [None, Some(""), Some("   "), Some("\t")] {
            let gateway = FakeGateway::returning(Ok(forecast("Paris", "FR")));
            let controller = controller(
                manual_store(city),
                gateway.clone(),
                SwitchGate::new(true),
                CountingProvider::new(None),
            );

            assert_eq!(
                controller.state(),
                LoadState::Resolved(ForecastOutcome::Failure(ForecastFailure::InvalidCity))
            );
            assert!(gateway.calls().is_empty());
        }
    }

    #[tokio::test]
    async fn manual_city_is_fetched_once_with_exact_name() {
        let gateway = FakeGateway::returning(Ok(forecast("Paris", "FR")));
        let controller = controller(
            manual_store(Some("Paris")),
            gateway.clone(),
            SwitchGate::new(true),
            CountingProvider::new(None),
        );

        assert_eq!(controller.state(), LoadState::Loading);
        let outcome = resolved(&controller).await;

        assert_eq!(outcome, ForecastOutcome::Success(forecast("Paris", "FR")));
        assert_eq!(gateway.calls(), vec![GatewayCall::City("Paris".to_string())]);
    }

    #[tokio::test]
    async fn manual_city_with_surrounding_spaces_is_sent_verbatim() {
        let gateway = FakeGateway::returning(Ok(forecast("Paris", "FR")));
        let controller = controller(
            manual_store(Some("  Paris ")),
            gateway.clone(),
            SwitchGate::new(true),
            CountingProvider::new(None),
        );

        assert!(resolved(&controller).await.is_success());
        assert_eq!(
            gateway.calls(),
            vec![GatewayCall::City("  Paris ".to_string())]
        );
    }

    #[tokio::test]
    async fn manual_unknown_city_maps_to_invalid_city() {
        let gateway = FakeGateway::returning(Err(GatewayError::CityNotFound("Atlantis".to_string())));
        let controller = controller(
            manual_store(Some("Atlantis")),
            gateway,
            SwitchGate::new(true),
            CountingProvider::new(None),
        );

        assert_eq!(
            resolved(&controller).await,
            ForecastOutcome::Failure(ForecastFailure::InvalidCity)
        );
    }

    #[tokio::test]
    async fn gateway_transport_failure_maps_to_other() {
        let gateway = FakeGateway::returning(Err(GatewayError::Transport("timeout".to_string())));
        let controller = controller(
            manual_store(Some("Paris")),
            gateway,
            SwitchGate::new(true),
            CountingProvider::new(None),
        );

        assert!(matches!(
            resolved(&controller).await,
            ForecastOutcome::Failure(ForecastFailure::Other(message)) if message.contains("timeout")
        ));
    }

    #[tokio::test]
    async fn auto_without_permission_never_touches_location() {
        let provider = CountingProvider::new(Some(Coordinates {
            latitude: 48.85,
            longitude: 2.35,
        }));
        let gateway = FakeGateway::returning(Ok(forecast("Paris", "FR")));
        let controller = controller(
            Arc::new(MemoryPreferenceStore::new()),
            gateway.clone(),
            SwitchGate::new(false),
            provider.clone(),
        );

        assert_eq!(
            controller.state(),
            LoadState::Resolved(ForecastOutcome::Failure(
                ForecastFailure::LocationPermissionDenied
            ))
        );
        assert_eq!(provider.calls(), 0);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn auto_without_fix_fails_without_coordinates_call() {
        let gateway = FakeGateway::returning(Ok(forecast("Paris", "FR")));
        let controller = controller(
            Arc::new(MemoryPreferenceStore::new()),
            gateway.clone(),
            SwitchGate::new(true),
            CountingProvider::new(None),
        );

        assert_eq!(
            resolved(&controller).await,
            ForecastOutcome::Failure(ForecastFailure::LocationRequestFailed)
        );
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn auto_with_fix_fetches_those_exact_coordinates() {
        let fix = Coordinates {
            latitude: 48.85,
            longitude: 2.35,
        };
        let gateway = FakeGateway::returning(Ok(forecast("Paris", "FR")));
        let controller = controller(
            Arc::new(MemoryPreferenceStore::new()),
            gateway.clone(),
            SwitchGate::new(true),
            CountingProvider::new(Some(fix)),
        );

        assert!(resolved(&controller).await.is_success());
        assert_eq!(gateway.calls(), vec![GatewayCall::Coordinates(fix)]);
    }

    #[tokio::test]
    async fn reload_after_grant_takes_the_located_path() {
        let gate = SwitchGate::new(false);
        let provider = CountingProvider::new(Some(Coordinates {
            latitude: 48.85,
            longitude: 2.35,
        }));
        let gateway = FakeGateway::returning(Ok(forecast("Paris", "FR")));
        let controller = controller(
            Arc::new(MemoryPreferenceStore::new()),
            gateway.clone(),
            gate.clone(),
            provider.clone(),
        );
        assert_eq!(
            controller.state().outcome(),
            Some(&ForecastOutcome::Failure(
                ForecastFailure::LocationPermissionDenied
            ))
        );

        gate.set(true);
        controller.load();
        assert_eq!(controller.state(), LoadState::Loading);

        assert!(resolved(&controller).await.is_success());
        assert_eq!(provider.calls(), 1);
        assert_eq!(gateway.calls().len(), 1);
    }

    #[tokio::test]
    async fn mode_is_read_fresh_on_every_load() {
        let store = manual_store(Some(""));
        let gateway = FakeGateway::returning(Ok(forecast("Paris", "FR")));
        let controller = controller(
            store.clone(),
            gateway.clone(),
            SwitchGate::new(false),
            CountingProvider::new(None),
        );
        assert_eq!(
            controller.state().outcome(),
            Some(&ForecastOutcome::Failure(ForecastFailure::InvalidCity))
        );

        store.set(PREF_IS_AUTO_MODE, "true").expect("set mode");
        controller.load();
        assert_eq!(
            controller.state().outcome(),
            Some(&ForecastOutcome::Failure(
                ForecastFailure::LocationPermissionDenied
            ))
        );
    }

    /// Answers every city at once except `held`, which waits for a release.
    struct HoldingGateway {
        held: &'static str,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl HoldingGateway {
        fn new(held: &'static str) -> (Arc<Self>, std::sync::mpsc::Sender<()>) {
            let (release, blocked) = std::sync::mpsc::channel();
            let gateway = Arc::new(Self {
                held,
                release: Mutex::new(blocked),
            });
            (gateway, release)
        }
    }

    impl ForecastGateway for HoldingGateway {
        fn by_city(&self, city: &CityQuery) -> Result<Forecast, GatewayError> {
            if city.as_str() == self.held {
                let _ = self.release.lock().recv();
            }
            Ok(forecast(city.as_str(), "FR"))
        }

        fn by_coordinates(&self, _coordinates: Coordinates) -> Result<Forecast, GatewayError> {
            Err(GatewayError::Transport("unused".to_string()))
        }
    }

    #[tokio::test]
    async fn dropping_controller_discards_in_flight_cycle() {
        let (gateway, release) = HoldingGateway::new("Paris");
        let controller = ForecastController::new(
            ControllerDeps {
                preferences: manual_store(Some("Paris")),
                gateway,
                resolver: LocationResolver::new(
                    SwitchGate::new(true),
                    CountingProvider::new(None),
                ),
            },
            Handle::current(),
        );
        let mut receiver = controller.subscribe();
        assert_eq!(*receiver.borrow_and_update(), LoadState::Loading);

        drop(controller);
        release.send(()).expect("release gateway");

        while receiver.changed().await.is_ok() {}
        assert_eq!(*receiver.borrow(), LoadState::Loading);
    }

    fn resolved_city(state: &LoadState) -> Option<&str> {
        match state {
            LoadState::Resolved(ForecastOutcome::Success(forecast)) => {
                Some(forecast.city.name.as_str())
            }
            _ => None,
        }
    }

    #[tokio::test]
    async fn overlapping_cycles_keep_the_one_that_finishes_last() {
        let (gateway, release) = HoldingGateway::new("Slow");
        let store = manual_store(Some("Slow"));
        let controller = ForecastController::new(
            ControllerDeps {
                preferences: store.clone(),
                gateway,
                resolver: LocationResolver::new(
                    SwitchGate::new(true),
                    CountingProvider::new(None),
                ),
            },
            Handle::current(),
        );

        store.set(PREF_CITY_NAME, "Fast").expect("set city");
        controller.load();
        let mut receiver = controller.subscribe();
        receiver
            .wait_for(|state| resolved_city(state) == Some("Fast"))
            .await
            .expect("fast cycle resolves");

        release.send(()).expect("release slow cycle");
        receiver
            .wait_for(|state| resolved_city(state) == Some("Slow"))
            .await
            .expect("slow cycle resolves");

        assert_eq!(
            controller.state(),
            LoadState::Resolved(ForecastOutcome::Success(forecast("Slow", "FR")))
        );
    }
}
