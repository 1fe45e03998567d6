//! Process assembly: opens the store and wires routers, backends, the
//! load signal and the capacity controller from `GateConfig`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tracing::info;

use modelgate_api::ApiState;
use modelgate_autoscale::{CapacityController, ControllerConfig, SimulatedProvisioner};
use modelgate_backend::{Dispatcher, SimulatedBackend};
use modelgate_core::{GateConfig, SignalKind, Tier};
use modelgate_load::{LoadSignalProvider, LogVolumeSignal, RequestRateSignal};
use modelgate_router::{RoutingPolicy, SessionRouter};
use modelgate_state::{ModelStateStore, TierPhase, TierState};

/// Opened store plus the pieces every mode shares.
pub struct Gate {
    pub config: GateConfig,
    pub store_path: PathBuf,
    pub router: SessionRouter,
}

impl Gate {
    /// Open (creating if needed) the state store under `data_dir` and make
    /// sure a tier state exists.
    pub fn open(config: GateConfig, data_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("create data dir {}", data_dir.display()))?;
        let store_path = data_dir.join(&config.store.path);
        let store = ModelStateStore::open(&store_path)
            .with_context(|| format!("open state store {}", store_path.display()))?;
        info!(path = ?store_path, "state store opened");

        let state = store.bootstrap(config.capacity.threshold_bytes)?;
        info!(
            active_tier = %state.active_tier,
            threshold = state.threshold,
            "tier state ready"
        );

        let policy = RoutingPolicy {
            session_ttl: config.routing.session_ttl(),
            small_slots: config.routing.small_slots(),
        };
        Ok(Self {
            router: SessionRouter::new(store, policy),
            config,
            store_path,
        })
    }

    pub fn store(&self) -> &ModelStateStore {
        self.router.store()
    }

    pub fn dispatcher(&self) -> Dispatcher {
        let backend = &self.config.backend;
        Dispatcher::new(
            self.router.clone(),
            Arc::new(SimulatedBackend::new(Tier::Small, backend.small_latency())),
            Arc::new(SimulatedBackend::new(Tier::Large, backend.large_latency())),
        )
    }

    /// The configured load signal. The request-rate counter is returned
    /// separately so the API can feed it.
    pub fn signal(&self) -> (Arc<dyn LoadSignalProvider>, Option<Arc<RequestRateSignal>>) {
        let signal = &self.config.signal;
        let window = self.config.signal_window();
        match signal.kind {
            SignalKind::LogVolume => {
                info!(dir = ?signal.log_dir, "using log-volume load signal");
                (
                    Arc::new(LogVolumeSignal::new(&signal.log_dir, window)),
                    None,
                )
            }
            SignalKind::RequestRate => {
                info!("using request-rate load signal");
                let counter = Arc::new(RequestRateSignal::new(window));
                (counter.clone(), Some(counter))
            }
        }
    }

    pub fn controller(&self, signal: Arc<dyn LoadSignalProvider>) -> CapacityController {
        CapacityController::new(
            self.store().clone(),
            signal,
            Arc::new(SimulatedProvisioner::from_config(&self.config.provisioner)),
            ControllerConfig::from_config(&self.config.capacity),
        )
    }

    pub fn api_state(
        &self,
        capacity: Option<CapacityController>,
        requests: Option<Arc<RequestRateSignal>>,
    ) -> ApiState {
        ApiState {
            router: self.router.clone(),
            dispatcher: self.dispatcher(),
            capacity,
            requests,
        }
    }

    /// Snapshot for `modelgated status`.
    pub fn report(&self) -> anyhow::Result<StatusReport> {
        let store = self.store();
        let tier_state = store.tier_state()?;
        Ok(StatusReport {
            store: self.store_path.clone(),
            phase: tier_state.phase(),
            small_sessions: store.count_sessions_on(Tier::Small)?,
            large_sessions: store.count_sessions_on(Tier::Large)?,
            tier_state,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub store: PathBuf,
    pub phase: TierPhase,
    pub tier_state: TierState,
    pub small_sessions: usize,
    pub large_sessions: usize,
}
