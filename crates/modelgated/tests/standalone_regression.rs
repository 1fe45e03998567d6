//! Standalone regression tests.
//!
//! Drives the assembled API router end to end: session start, chat
//! completions, fallback, capacity transitions triggered by real load
//! signals, and health reporting when the store goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use modelgate_api::{ApiState, build_router};
use modelgate_autoscale::{
    CapacityController, ControllerConfig, SimulatedProvisioner, StepOutcome,
};
use modelgate_backend::{Dispatcher, SimulatedBackend};
use modelgate_core::Tier;
use modelgate_load::{LoadSignalProvider, LogVolumeSignal, RequestRateSignal};
use modelgate_router::{RoutingPolicy, SessionRouter};
use modelgate_state::{
    KvStore, ModelStateStore, RedbKv, StateError, StateResult, epoch_millis, session_key,
};

struct Harness {
    router: Router,
    store: ModelStateStore,
    small: Arc<SimulatedBackend>,
    controller: CapacityController,
}

fn fast_provisioner() -> Arc<SimulatedProvisioner> {
    Arc::new(SimulatedProvisioner::new(
        Duration::from_millis(5),
        Duration::from_millis(5),
        Duration::from_millis(5),
    ))
}

fn controller_config() -> ControllerConfig {
    ControllerConfig {
        scale_up_interval: Duration::from_millis(10),
        scale_down_interval: Duration::from_millis(10),
        readiness_grace: Duration::from_secs(1),
    }
}

fn harness_with(
    store: ModelStateStore,
    signal: Arc<dyn LoadSignalProvider>,
    requests: Option<Arc<RequestRateSignal>>,
) -> Harness {
    let sessions = SessionRouter::new(store.clone(), RoutingPolicy::default());
    let small = Arc::new(SimulatedBackend::new(Tier::Small, Duration::from_millis(1)));
    let large = Arc::new(SimulatedBackend::new(Tier::Large, Duration::from_millis(1)));
    let controller = CapacityController::new(
        store.clone(),
        signal,
        fast_provisioner(),
        controller_config(),
    );
    let router = build_router(ApiState {
        dispatcher: Dispatcher::new(sessions.clone(), small.clone(), large),
        router: sessions,
        capacity: Some(controller.clone()),
        requests,
    });
    Harness {
        router,
        store,
        small,
        controller,
    }
}

/// Request-rate driven harness: `threshold` chat calls per window trips
/// scale-up.
fn harness(threshold: u64) -> Harness {
    let store = ModelStateStore::open_in_memory().unwrap();
    store.bootstrap(threshold).unwrap();
    let requests = Arc::new(RequestRateSignal::new(Duration::from_secs(30)));
    harness_with(store, requests.clone(), Some(requests))
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&v).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn initiate(router: &Router, id: &str) -> Value {
    let (status, body) = call(router, "POST", "/initiate_call", Some(json!({ "session_id": id }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["data"].clone()
}

async fn chat(router: &Router, id: &str, message: &str) -> (StatusCode, Value) {
    call(
        router,
        "POST",
        "/chat_completions",
        Some(json!({ "session_id": id, "message": message })),
    )
    .await
}

#[tokio::test]
async fn standalone_session_lifecycle() {
    let h = harness(1_000);

    let (status, body) = call(&h.router, "POST", "/initiate_call", None).await;
    assert_eq!(status, StatusCode::OK);
    let id = body["data"]["session_id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["tier"], "large");

    let (status, body) = chat(&h.router, &id, "hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["model_used"], "large");
    assert_eq!(
        body["data"]["response"],
        format!("Large model response for session {id}: hello")
    );

    let (status, body) = call(&h.router, "GET", &format!("/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["tier"], "large");

    let (status, _) = call(&h.router, "DELETE", &format!("/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = chat(&h.router, &id, "still there?").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn standalone_reinitiate_is_stable() {
    let h = harness(1_000);
    let first = initiate(&h.router, "call-42").await;
    for _ in 0..3 {
        assert_eq!(initiate(&h.router, "call-42").await, first);
    }
}

#[tokio::test]
async fn standalone_request_load_scales_up_without_remapping() {
    let h = harness(3);
    initiate(&h.router, "early").await;

    for i in 0..4 {
        let (status, _) = chat(&h.router, "early", &format!("m{i}")).await;
        assert_eq!(status, StatusCode::OK);
    }

    let outcome = h.controller.scale_up_step().await.unwrap();
    let StepOutcome::ScaledUp(state) = outcome else {
        panic!("expected scale-up, got {outcome:?}");
    };
    assert_eq!(state.threshold, 6);

    // New sessions land on small; the existing one keeps its tier.
    assert_eq!(initiate(&h.router, "late").await["tier"], "small");
    let (_, body) = chat(&h.router, "early", "again").await;
    assert_eq!(body["data"]["model_used"], "large");

    let (status, body) = call(&h.router, "GET", "/capacity", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["phase"], "small_active");
    assert_eq!(body["data"]["small_sessions"], 1);
    assert_eq!(body["data"]["signal"], "request_rate");

    let (_, body) = call(&h.router, "GET", "/health", None).await;
    assert_eq!(body["data"]["active_tier"], "small");
}

#[tokio::test]
async fn standalone_small_failure_falls_back_to_large() {
    let h = harness(1);
    let current = h.store.tier_state().unwrap();
    h.store
        .put_tier_state(&current.escalated(modelgate_state::epoch_millis()))
        .unwrap();

    assert_eq!(initiate(&h.router, "s1").await["tier"], "small");
    h.small.set_healthy(false);

    let (status, body) = chat(&h.router, "s1", "hi").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["model_used"], "large");
    assert_eq!(body["data"]["fallback"], true);

    let (_, body) = call(&h.router, "GET", "/sessions/s1", None).await;
    assert_eq!(body["data"]["tier"], "large");
}

#[tokio::test]
async fn standalone_log_growth_drives_full_cycle() {
    let logs = tempfile::tempdir().unwrap();
    let store = ModelStateStore::open_in_memory().unwrap();
    store.bootstrap(1_024).unwrap();
    let signal = Arc::new(LogVolumeSignal::new(logs.path(), Duration::from_millis(200)));
    let h = harness_with(store, signal, None);

    // Establish a baseline sample.
    assert_eq!(h.controller.scale_up_step().await.unwrap(), StepOutcome::Idle);

    std::fs::write(logs.path().join("modelgated-1.log"), vec![b'x'; 4_096]).unwrap();
    assert!(matches!(
        h.controller.scale_up_step().await.unwrap(),
        StepOutcome::ScaledUp(_)
    ));

    // A session pinned to small holds the tier up even once logs go quiet.
    assert_eq!(initiate(&h.router, "pinned").await["tier"], "small");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.controller.scale_down_step().await.unwrap(), StepOutcome::Idle);

    call(&h.router, "DELETE", "/sessions/pinned", None).await;
    let StepOutcome::ScaledDown(state) = h.controller.scale_down_step().await.unwrap() else {
        panic!("expected scale-down");
    };
    assert_eq!(state.threshold, 1_024);
    assert_eq!(initiate(&h.router, "after").await["tier"], "large");
}

#[tokio::test]
async fn standalone_sessions_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("modelgate.redb");

    let assigned = {
        let store = ModelStateStore::open(&path).unwrap();
        store.bootstrap(1_000).unwrap();
        let h = harness_with(store, Arc::new(RequestRateSignal::new(Duration::from_secs(1))), None);
        initiate(&h.router, "durable").await
    };

    let store = ModelStateStore::open(&path).unwrap();
    store.bootstrap(1_000).unwrap();
    let h = harness_with(store, Arc::new(RequestRateSignal::new(Duration::from_secs(1))), None);
    let (status, body) = call(&h.router, "GET", "/sessions/durable", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], assigned);
}

/// redb-backed store whose reachability can be switched off.
struct FlakyKv {
    inner: RedbKv,
    down: AtomicBool,
}

impl FlakyKv {
    fn check(&self) -> StateResult<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(StateError::StoreUnavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

impl KvStore for FlakyKv {
    fn get(&self, key: &str) -> StateResult<Option<Vec<u8>>> {
        self.check()?;
        self.inner.get(key)
    }
    fn set(&self, key: &str, value: &[u8]) -> StateResult<()> {
        self.check()?;
        self.inner.set(key, value)
    }
    fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> StateResult<()> {
        self.check()?;
        self.inner.set_with_ttl(key, value, ttl)
    }
    fn delete(&self, key: &str) -> StateResult<bool> {
        self.check()?;
        self.inner.delete(key)
    }
    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: &[u8],
        expires_at_ms: Option<u64>,
    ) -> StateResult<bool> {
        self.check()?;
        self.inner.compare_and_set(key, expected, value, expires_at_ms)
    }
    fn scan_prefix(&self, prefix: &str) -> StateResult<Vec<(String, Vec<u8>)>> {
        self.check()?;
        self.inner.scan_prefix(prefix)
    }
    fn ping(&self) -> StateResult<()> {
        self.check()?;
        self.inner.ping()
    }
    fn purge_expired(&self) -> StateResult<u32> {
        self.check()?;
        self.inner.purge_expired()
    }
}

#[tokio::test]
async fn standalone_store_outage_is_retryable_not_defaulted() {
    let kv = Arc::new(FlakyKv {
        inner: RedbKv::open_in_memory().unwrap(),
        down: AtomicBool::new(false),
    });
    let store = ModelStateStore::with_kv(kv.clone());
    store.bootstrap(1_000).unwrap();
    let h = harness_with(store, Arc::new(RequestRateSignal::new(Duration::from_secs(1))), None);
    initiate(&h.router, "s1").await;

    kv.down.store(true, Ordering::SeqCst);

    let (status, body) = call(&h.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
    assert_eq!(body["retryable"], true);
    assert_eq!(body["data"]["store_reachable"], false);
    assert!(body["data"]["active_tier"].is_null());

    let (status, body) = call(&h.router, "POST", "/initiate_call", Some(json!({ "session_id": "s2" }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["retryable"], true);

    let (status, _) = chat(&h.router, "s1", "hi").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    assert!(h.controller.scale_up_step().await.is_err());

    kv.down.store(false, Ordering::SeqCst);
    let (status, body) = call(&h.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["active_tier"], "large");
}

/// redb-backed store that parks the first write of one key until released.
struct ParkedWriteKv {
    inner: RedbKv,
    key: String,
    reached: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<Option<mpsc::Receiver<()>>>,
}

impl KvStore for ParkedWriteKv {
    fn get(&self, key: &str) -> StateResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }
    fn set(&self, key: &str, value: &[u8]) -> StateResult<()> {
        self.inner.set(key, value)
    }
    fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> StateResult<()> {
        self.inner.set_with_ttl(key, value, ttl)
    }
    fn delete(&self, key: &str) -> StateResult<bool> {
        self.inner.delete(key)
    }
    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: &[u8],
        expires_at_ms: Option<u64>,
    ) -> StateResult<bool> {
        if key == self.key {
            let reached = self.reached.lock().unwrap().take();
            let release = self.release.lock().unwrap().take();
            if let (Some(reached), Some(release)) = (reached, release) {
                reached.send(()).unwrap();
                release.recv().unwrap();
            }
        }
        self.inner.compare_and_set(key, expected, value, expires_at_ms)
    }
    fn scan_prefix(&self, prefix: &str) -> StateResult<Vec<(String, Vec<u8>)>> {
        self.inner.scan_prefix(prefix)
    }
    fn ping(&self) -> StateResult<()> {
        self.inner.ping()
    }
    fn purge_expired(&self) -> StateResult<u32> {
        self.inner.purge_expired()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn standalone_scale_down_during_initiate_leaves_no_small_pin() {
    let (reached_tx, reached_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let kv = Arc::new(ParkedWriteKv {
        inner: RedbKv::open_in_memory().unwrap(),
        key: session_key("late"),
        reached: Mutex::new(Some(reached_tx)),
        release: Mutex::new(Some(release_rx)),
    });
    let store = ModelStateStore::with_kv(kv);
    store.bootstrap(1_000).unwrap();
    let current = store.tier_state().unwrap();
    store.put_tier_state(&current.escalated(epoch_millis())).unwrap();

    let quiet = Arc::new(RequestRateSignal::new(Duration::from_secs(1)));
    let h = harness_with(store.clone(), quiet, None);
    let sessions = SessionRouter::new(store.clone(), RoutingPolicy::default());

    // The tier read sees small; the session write is parked.
    let initiating = tokio::task::spawn_blocking(move || sessions.initiate(Some("late")));
    tokio::task::spawn_blocking(move || reached_rx.recv().unwrap())
        .await
        .unwrap();

    let outcome = h.controller.scale_down_step().await.unwrap();
    let StepOutcome::ScaledDown(state) = outcome else {
        panic!("expected scale-down, got {outcome:?}");
    };
    assert!(!state.small_tier_active);

    release_tx.send(()).unwrap();
    let assigned = initiating.await.unwrap().unwrap();
    assert_eq!(assigned.tier, Tier::Large);
    assert_eq!(store.count_sessions_on(Tier::Small).unwrap(), 0);

    let (_, body) = call(&h.router, "GET", "/sessions/late", None).await;
    assert_eq!(body["data"]["tier"], "large");
}
