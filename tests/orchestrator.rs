//! Refresh-loop behaviour end to end, with scripted sources and recording renderers.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::watch;
use url::Url;

use healthdash::refresh::{
    CycleState, Orchestrator, Registration, Registry, SourceStatus, Timing, Trigger, FAILURE_NOTICE,
};
use healthdash::render::{payload_digest, Board, Renderer, NO_DATA};
use healthdash::source::{Fetch, FetchError};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Answers from a per-path script. Optionally holds every call until a gate opens,
/// or sleeps a configurable delay first.
struct ScriptedFetcher {
    script: Mutex<HashMap<String, Result<Value, FetchError>>>,
    calls: AtomicUsize,
    delay_ms: AtomicU64,
    gate: Option<watch::Receiver<bool>>,
}

impl ScriptedFetcher {
    fn new() -> Self {
        Self {
            script: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            delay_ms: AtomicU64::new(0),
            gate: None,
        }
    }

    fn gated(gate: watch::Receiver<bool>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    fn set(&self, name: &str, outcome: Result<Value, FetchError>) {
        self.script.lock().unwrap().insert(format!("/{}", name), outcome);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_delay(&self, d: Duration) {
        self.delay_ms.store(d.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetch for ScriptedFetcher {
    async fn fetch_source(&self, endpoint: &Url) -> Result<Value, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let mut gate = gate.clone();
            let _ = gate.wait_for(|open| *open).await;
        }
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.script
            .lock()
            .unwrap()
            .get(endpoint.path())
            .cloned()
            .unwrap_or(Err(FetchError::HttpStatus { code: 404 }))
    }
}

type Calls = Arc<Mutex<Vec<(String, Value)>>>;

/// Records every call and writes the payload into its board region.
struct Recorder {
    calls: Calls,
    board: Board,
}

impl Renderer for Recorder {
    fn render(&self, region: &str, payload: &Value) -> Result<()> {
        self.calls.lock().unwrap().push((region.to_string(), payload.clone()));
        self.board
            .put(region, vec![payload.to_string()], payload_digest(payload));
        Ok(())
    }
}

struct Harness {
    orch: Arc<Orchestrator>,
    fetcher: Arc<ScriptedFetcher>,
    board: Board,
    calls: Calls,
}

impl Harness {
    fn calls_for(&self, region: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(r, _)| r == region).count()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

fn endpoint(name: &str) -> Url {
    Url::parse(&format!("http://dash.test/{}", name)).unwrap()
}

fn harness_with(names: &[&str], fetcher: ScriptedFetcher, timing: Timing) -> Harness {
    let board = Board::new();
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let mut registry = Registry::new();
    for name in names {
        board.declare(name);
        let renderer = Arc::new(Recorder {
            calls: calls.clone(),
            board: board.clone(),
        });
        registry
            .register(Registration::new(*name, endpoint(name), renderer))
            .unwrap();
    }
    let fetcher = Arc::new(fetcher);
    let orch = Arc::new(Orchestrator::new(
        registry,
        fetcher.clone(),
        Arc::new(board.clone()),
        timing,
    ));
    Harness {
        orch,
        fetcher,
        board,
        calls,
    }
}

fn harness(names: &[&str]) -> Harness {
    harness_with(names, ScriptedFetcher::new(), Timing::default())
}

fn ten_second_timing() -> Timing {
    Timing::new(Duration::from_secs(10), Duration::from_secs(5)).unwrap()
}

const FIVE: &[&str] = &["s1", "s2", "s3", "s4", "s5"];

fn script_all_ok(h: &Harness, names: &[&str]) {
    for (i, name) in names.iter().enumerate() {
        h.fetcher.set(name, Ok(json!({ "source": name, "value": i })));
    }
}

// ---------------------------------------------------------------------------
// Dispatch and failure isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn one_http_500_among_five_sources() {
    let h = harness(FIVE);
    script_all_ok(&h, FIVE);
    h.fetcher.set("s3", Err(FetchError::HttpStatus { code: 500 }));

    let report = h.orch.refresh_now().await.expect("cycle should run");

    assert_eq!(report.outcomes(), 5);
    assert_eq!(report.rendered(), 4);
    assert_eq!(report.fetch_failures(), 1);
    assert_eq!(h.total_calls(), 4);
    assert_eq!(h.calls_for("s3"), 0);
    assert_eq!(
        report.status_of("s3"),
        Some(&SourceStatus::FetchFailed(FetchError::HttpStatus { code: 500 }))
    );

    // Fresh data in the four healthy widgets, placeholder in the broken one.
    assert_eq!(h.board.lines("s1"), vec![json!({"source": "s1", "value": 0}).to_string()]);
    assert_eq!(h.board.lines("s3"), vec![NO_DATA.to_string()]);

    assert_eq!(h.board.active_notice().as_deref(), Some(FAILURE_NOTICE));
    assert!(!h.board.is_loading());
    assert_eq!(h.orch.state(), CycleState::Idle);
}

#[tokio::test]
async fn all_success_shows_no_notice() {
    let h = harness(FIVE);
    script_all_ok(&h, FIVE);

    let report = h.orch.refresh_now().await.unwrap();

    assert_eq!(report.rendered(), 5);
    assert_eq!(report.failed(), 0);
    assert!(h.board.active_notice().is_none());
    assert!(h.orch.last_cycle_start().is_some());
}

#[tokio::test]
async fn failed_source_keeps_last_good_content() {
    let h = harness(&["stats", "map"]);
    h.fetcher.set("stats", Ok(json!({"malaria_cases": 10})));
    h.fetcher.set("map", Ok(json!([])));
    h.orch.refresh_now().await.unwrap();
    let before = h.board.region("stats").unwrap();

    h.fetcher.set(
        "stats",
        Err(FetchError::Transport {
            message: "connection refused".into(),
        }),
    );
    h.fetcher.set("map", Ok(json!([{"location": "Karachi"}])));
    let report = h.orch.refresh_now().await.unwrap();

    assert_eq!(report.rendered(), 1);
    let after = h.board.region("stats").unwrap();
    assert_eq!(after.lines, before.lines);
    assert_eq!(after.digest, before.digest);
    assert_eq!(after.renders, 1);
    assert_eq!(h.board.region("map").unwrap().renders, 2);
}

#[tokio::test]
async fn always_failing_source_never_blocks_others() {
    let h = harness(FIVE);
    script_all_ok(&h, FIVE);
    h.fetcher.set(
        "s1",
        Err(FetchError::Decode {
            message: "expected value at line 1".into(),
        }),
    );

    for _ in 0..6 {
        let report = h.orch.refresh_now().await.unwrap();
        assert_eq!(report.rendered(), 4);
    }

    assert_eq!(h.calls_for("s1"), 0);
    for name in &FIVE[1..] {
        assert_eq!(h.calls_for(name), 6, "renderer for {} starved", name);
    }
    // No circuit breaker: the failing source is still asked every cycle.
    assert_eq!(h.fetcher.calls(), 30);
}

#[tokio::test]
async fn every_failure_kind_is_isolated() {
    let h = harness(&["ok", "status", "transport", "decode"]);
    h.fetcher.set("ok", Ok(json!({})));
    h.fetcher.set("status", Err(FetchError::HttpStatus { code: 503 }));
    h.fetcher.set("transport", Err(FetchError::Transport { message: "dns".into() }));
    h.fetcher.set("decode", Err(FetchError::Decode { message: "eof".into() }));

    let report = h.orch.refresh_now().await.unwrap();

    assert_eq!(report.rendered(), 1);
    assert_eq!(report.fetch_failures(), 3);
    assert_eq!(report.status_of("transport").unwrap().kind(), "transport");
    assert_eq!(report.status_of("decode").unwrap().kind(), "decode");
    assert_eq!(h.total_calls(), 1);
}

#[tokio::test]
async fn faulty_renderers_do_not_stop_later_ones() {
    let board = Board::new();
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let fetcher = Arc::new(ScriptedFetcher::new());
    for name in ["panics", "errors", "works"] {
        fetcher.set(name, Ok(json!({ "name": name })));
    }

    let panics: Arc<dyn Renderer> = Arc::new(|_: &str, _: &Value| -> Result<()> { panic!("missing field") });
    let errors: Arc<dyn Renderer> = Arc::new(|_: &str, _: &Value| -> Result<()> { Err(anyhow!("bad shape")) });
    let works: Arc<dyn Renderer> = Arc::new(Recorder {
        calls: calls.clone(),
        board: board.clone(),
    });

    let mut registry = Registry::new();
    registry.register(Registration::new("panics", endpoint("panics"), panics)).unwrap();
    registry.register(Registration::new("errors", endpoint("errors"), errors)).unwrap();
    registry.register(Registration::new("works", endpoint("works"), works)).unwrap();
    let orch = Orchestrator::new(registry, fetcher, Arc::new(board.clone()), Timing::default());

    let report = orch.refresh_now().await.unwrap();

    assert_eq!(report.rendered(), 1);
    assert_eq!(report.render_faults(), 2);
    assert_eq!(calls.lock().unwrap().len(), 1);
    match report.status_of("panics") {
        Some(SourceStatus::RenderFault(msg)) => assert!(msg.contains("missing field")),
        other => panic!("unexpected status {:?}", other),
    }
    assert_eq!(board.active_notice().as_deref(), Some(FAILURE_NOTICE));
    // The loop is usable again after a renderer panic.
    assert!(orch.refresh_now().await.is_some());
}

#[tokio::test]
async fn identical_payloads_render_identically() {
    let h = harness(FIVE);
    script_all_ok(&h, FIVE);

    h.orch.refresh_now().await.unwrap();
    let first: Vec<(String, Value)> = h.calls.lock().unwrap().drain(..).collect();
    h.orch.refresh_now().await.unwrap();
    let second: Vec<(String, Value)> = h.calls.lock().unwrap().drain(..).collect();

    assert_eq!(first.len(), 5);
    assert_eq!(first, second);
}

#[tokio::test]
async fn critical_failure_is_flagged() {
    let board = Board::new();
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.set("main", Err(FetchError::HttpStatus { code: 502 }));
    let noop: Arc<dyn Renderer> = Arc::new(|_: &str, _: &Value| -> Result<()> { Ok(()) });
    let mut registry = Registry::new();
    registry
        .register(Registration::new("main", endpoint("main"), noop).critical(true))
        .unwrap();
    let orch = Orchestrator::new(registry, fetcher, Arc::new(board), Timing::default());

    let report = orch.refresh_now().await.unwrap();
    assert!(report.critical_failed());
}

// ---------------------------------------------------------------------------
// Coalescing and scheduling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn triggers_during_a_running_cycle_are_coalesced() {
    let (open, gate) = watch::channel(false);
    let h = harness_with(FIVE, ScriptedFetcher::gated(gate), Timing::default());
    script_all_ok(&h, FIVE);

    let orch = h.orch.clone();
    let running = tokio::spawn(async move { orch.refresh_now().await });
    while h.orch.state() != CycleState::Running {
        tokio::task::yield_now().await;
    }
    assert!(h.board.is_loading());

    assert!(h.orch.refresh_now().await.is_none());
    assert!(h.orch.run_cycle(Trigger::Timer).await.is_none());

    open.send(true).unwrap();
    let report = running.await.unwrap().expect("first cycle runs");

    assert_eq!(report.outcomes(), 5);
    assert_eq!(h.fetcher.calls(), 5);
    assert_eq!(h.total_calls(), 5);
    assert_eq!(h.orch.state(), CycleState::Idle);
    assert!(!h.board.is_loading());
}

#[tokio::test(start_paused = true)]
async fn timer_tick_during_manual_cycle_is_coalesced() {
    let timing = ten_second_timing();
    let h = harness_with(&["a", "b"], ScriptedFetcher::new(), timing);
    script_all_ok(&h, &["a", "b"]);
    let mut reports = h.orch.subscribe();

    // t=0: immediate startup cycle, timer armed for t=10, 20, ...
    let first = h.orch.start().await.unwrap();
    assert_eq!(first.trigger, Trigger::Startup);
    assert!(h.orch.is_armed());
    assert_eq!(reports.recv().await.unwrap().trigger, Trigger::Startup);

    // t=5: a manual cycle that runs until t=17, straddling the t=10 tick.
    h.fetcher.set_delay(Duration::from_secs(12));
    tokio::time::sleep(Duration::from_secs(5)).await;
    let orch = h.orch.clone();
    tokio::spawn(async move { orch.refresh_now().await });

    let manual = reports.recv().await.unwrap();
    assert_eq!(manual.trigger, Trigger::Manual);
    assert_eq!(h.orch.state(), CycleState::Idle);
    h.fetcher.set_delay(Duration::ZERO);

    // t=20: the next tick starts a cycle normally.
    let timed = reports.recv().await.unwrap();
    assert_eq!(timed.trigger, Trigger::Timer);
    assert_eq!(timed.cycle_id, manual.cycle_id + 1);
    assert_eq!(h.fetcher.calls(), 3 * 2);

    assert!(h.orch.stop());
}

#[tokio::test(start_paused = true)]
async fn stop_lets_in_flight_cycle_finish() {
    let timing = ten_second_timing();
    let h = harness_with(&["a"], ScriptedFetcher::new(), timing);
    script_all_ok(&h, &["a"]);
    let mut reports = h.orch.subscribe();

    h.orch.start().await.unwrap();
    reports.recv().await.unwrap();

    // Timer cycle starts at t=10 and takes until t=15; stop at t=12.
    h.fetcher.set_delay(Duration::from_secs(5));
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(h.orch.state(), CycleState::Running);
    assert!(h.orch.stop());
    assert!(!h.orch.is_armed());

    let finished = reports.recv().await.unwrap();
    assert_eq!(finished.trigger, Trigger::Timer);
    assert_eq!(finished.rendered(), 1);

    // Disarmed: no further cycles.
    let calls = h.fetcher.calls();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.fetcher.calls(), calls);
    assert!(!h.orch.stop());
}

#[tokio::test(start_paused = true)]
async fn failure_notice_auto_dismisses() {
    let h = harness(&["a"]);
    h.fetcher.set("a", Err(FetchError::HttpStatus { code: 500 }));

    h.orch.refresh_now().await.unwrap();
    assert!(h.board.active_notice().is_some());

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(h.board.active_notice().is_none());
}

#[test]
fn zero_period_is_rejected() {
    assert!(Timing::new(Duration::ZERO, Duration::from_secs(5)).is_err());
    let timing = Timing::new(Duration::from_millis(1), Duration::ZERO).unwrap();
    assert_eq!(timing.period(), Duration::from_millis(1));
    assert!(Timing::default().period() > Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn wait_idle_blocks_until_the_running_cycle_settles() {
    let (open, gate) = watch::channel(false);
    let h = harness_with(&["a", "b"], ScriptedFetcher::gated(gate), Timing::default());
    script_all_ok(&h, &["a", "b"]);

    // Nothing in flight: returns at once.
    h.orch.wait_idle().await;

    let orch = h.orch.clone();
    let running = tokio::spawn(async move { orch.refresh_now().await });
    while h.orch.state() != CycleState::Running {
        tokio::task::yield_now().await;
    }

    let waiting = tokio::time::timeout(Duration::from_secs(30), h.orch.wait_idle()).await;
    assert!(waiting.is_err(), "wait_idle returned while the cycle was gated");

    let orch = h.orch.clone();
    let waiter = tokio::spawn(async move { orch.wait_idle().await });
    open.send(true).unwrap();
    waiter.await.unwrap();

    assert_eq!(h.orch.state(), CycleState::Idle);
    assert_eq!(h.total_calls(), 2);
    assert!(running.await.unwrap().is_some());
}

/// Calls back into the orchestrator from inside `render`.
struct Reentrant {
    orch: OnceLock<Weak<Orchestrator>>,
    seen: Mutex<Vec<(CycleState, bool)>>,
}

impl Renderer for Reentrant {
    fn render(&self, _region: &str, _payload: &Value) -> Result<()> {
        let orch = self
            .orch
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| anyhow!("orchestrator gone"))?;
        // A coalesced trigger resolves without suspending.
        let nested = orch.refresh_now().now_or_never();
        let coalesced = matches!(nested, Some(None));
        self.seen.lock().unwrap().push((orch.state(), coalesced));
        Ok(())
    }
}

#[tokio::test]
async fn refresh_from_a_renderer_is_coalesced_while_settling() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.set("a", Ok(json!({"x": 1})));
    fetcher.set("b", Ok(json!({"x": 2})));
    let reentrant = Arc::new(Reentrant {
        orch: OnceLock::new(),
        seen: Mutex::new(Vec::new()),
    });

    let mut registry = Registry::new();
    registry
        .register(Registration::new("a", endpoint("a"), reentrant.clone()))
        .unwrap();
    registry
        .register(Registration::new("b", endpoint("b"), reentrant.clone()))
        .unwrap();
    let orch = Arc::new(Orchestrator::new(
        registry,
        fetcher.clone(),
        Arc::new(Board::new()),
        Timing::default(),
    ));
    reentrant.orch.set(Arc::downgrade(&orch)).unwrap();

    let report = orch.refresh_now().await.unwrap();

    assert_eq!(report.rendered(), 2);
    assert_eq!(
        *reentrant.seen.lock().unwrap(),
        vec![(CycleState::Settling, true), (CycleState::Settling, true)]
    );
    // One cycle's worth of fetches only.
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(orch.state(), CycleState::Idle);
}

#[tokio::test(start_paused = true)]
async fn stop_on_the_tick_instant_starts_no_new_cycle() {
    for round in 0..50 {
        let h = harness_with(&["a", "b"], ScriptedFetcher::new(), ten_second_timing());
        script_all_ok(&h, &["a", "b"]);
        h.orch.start().await.unwrap();

        // Wake on the same instant the timer's first tick is due.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.orch.stop());
        let calls_at_stop = h.fetcher.calls();

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        h.orch.wait_idle().await;
        tokio::time::sleep(Duration::from_secs(35)).await;

        assert!(!h.orch.is_armed());
        assert_eq!(h.fetcher.calls(), calls_at_stop, "cycle began after stop in round {}", round);
        assert_eq!(h.orch.state(), CycleState::Idle);
    }
}
