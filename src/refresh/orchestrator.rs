use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::{json, Value};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::cycle::{CycleReport, CycleState, SourceResult, SourceStatus, Trigger};
use super::registry::{Registration, Registry};
use crate::config::Config;
use crate::logging::{self, obj, v_num, v_str, Domain, Level};
use crate::render::StatusSink;
use crate::source::{Fetch, FetchError};

/// Generic text, shown once per cycle when any source failed.
pub const FAILURE_NOTICE: &str = "Failed to refresh some dashboard data. Please check your connection.";

/// Timer period and notice lifetime. The period is always non-zero.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    period: Duration,
    notice_ttl: Duration,
}

impl Timing {
    pub fn new(period: Duration, notice_ttl: Duration) -> Result<Self> {
        if period.is_zero() {
            bail!("refresh period must be non-zero");
        }
        Ok(Self { period, notice_ttl })
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self {
            period: Duration::from_secs(cfg.refresh_secs.max(1)),
            notice_ttl: Duration::from_secs(cfg.notice_secs),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn notice_ttl(&self) -> Duration {
        self.notice_ttl
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

struct Timer {
    shutdown: watch::Sender<bool>,
    // Detached on stop so an in-flight timer cycle can finish.
    _handle: JoinHandle<()>,
}

/// Owns the registration table and the schedule state, and runs refresh cycles.
///
/// Every trigger, timer or manual, goes through [`Orchestrator::run_cycle`], which
/// admits at most one cycle at a time and drops (coalesces) the rest.
pub struct Orchestrator {
    registrations: Arc<[Registration]>,
    fetcher: Arc<dyn Fetch>,
    status: Arc<dyn StatusSink>,
    timing: Timing,
    in_flight: AtomicBool,
    cycle_seq: AtomicU64,
    state: watch::Sender<CycleState>,
    last_cycle_start: Mutex<Option<DateTime<Utc>>>,
    timer: Mutex<Option<Timer>>,
    reports: broadcast::Sender<CycleReport>,
}

/// Returns the loop to Idle when the cycle ends, including on panic or drop.
struct InFlight<'a> {
    orch: &'a Orchestrator,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let in_flight = &self.orch.in_flight;
        self.orch.state.send_modify(|state| {
            *state = CycleState::Idle;
            in_flight.store(false, Ordering::Release);
        });
    }
}

impl Orchestrator {
    pub fn new(registry: Registry, fetcher: Arc<dyn Fetch>, status: Arc<dyn StatusSink>, timing: Timing) -> Self {
        let (state, _) = watch::channel(CycleState::Idle);
        let (reports, _) = broadcast::channel(16);
        Self {
            registrations: registry.into_entries().into(),
            fetcher,
            status,
            timing,
            in_flight: AtomicBool::new(false),
            cycle_seq: AtomicU64::new(0),
            state,
            last_cycle_start: Mutex::new(None),
            timer: Mutex::new(None),
            reports,
        }
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    pub fn state(&self) -> CycleState {
        *self.state.borrow()
    }

    pub fn last_cycle_start(&self) -> Option<DateTime<Utc>> {
        *self.last_cycle_start.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_armed(&self) -> bool {
        self.timer.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Receives every completed cycle's report.
    pub fn subscribe(&self) -> broadcast::Receiver<CycleReport> {
        self.reports.subscribe()
    }

    /// Resolves once no cycle is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == CycleState::Idle).await;
    }

    /// Manual refresh. Coalesced into the running cycle if there is one.
    pub async fn refresh_now(&self) -> Option<CycleReport> {
        self.run_cycle(Trigger::Manual).await
    }

    /// Run one cycle, or return `None` if another is already in flight.
    pub async fn run_cycle(&self, trigger: Trigger) -> Option<CycleReport> {
        let Some(guard) = self.try_begin() else {
            logging::log_coalesced(trigger.as_str());
            return None;
        };
        Some(self.complete(guard, trigger).await)
    }

    // The flag and the published state flip together under the watch lock, so
    // `wait_idle` never observes Idle while a cycle holds the flag.
    fn try_begin(&self) -> Option<InFlight<'_>> {
        let admitted = self.state.send_if_modified(|state| {
            let won = self
                .in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
            if won {
                *state = CycleState::Running;
            }
            won
        });
        admitted.then(|| InFlight { orch: self })
    }

    async fn complete(&self, guard: InFlight<'_>, trigger: Trigger) -> CycleReport {
        let report = self.execute(trigger).await;
        drop(guard);

        let _ = self.reports.send(report.clone());
        report
    }

    async fn execute(&self, trigger: Trigger) -> CycleReport {
        let cycle_id = self.cycle_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let started_at = Utc::now();
        let started = Instant::now();
        *self.last_cycle_start.lock().unwrap_or_else(|e| e.into_inner()) = Some(started_at);

        self.status.set_loading(true);
        logging::log(
            Level::Info,
            Domain::Cycle,
            "cycle_started",
            obj(&[
                ("cycle_id", json!(cycle_id)),
                ("trigger", v_str(trigger.as_str())),
                ("sources", json!(self.registrations.len())),
            ]),
        );

        // Join barrier: nothing is dispatched until every fetch has resolved.
        let outcomes: Vec<Result<Value, FetchError>> = join_all(
            self.registrations
                .iter()
                .map(|reg| self.fetcher.fetch_source(&reg.endpoint)),
        )
        .await;

        self.state.send_replace(CycleState::Settling);
        let results: Vec<SourceResult> = self
            .registrations
            .iter()
            .zip(outcomes)
            .map(|(reg, outcome)| SourceResult {
                name: reg.name.clone(),
                critical: reg.is_critical,
                status: self.settle(cycle_id, reg, outcome),
            })
            .collect();

        self.status.set_loading(false);
        let report = CycleReport {
            cycle_id,
            trigger,
            started_at,
            elapsed: started.elapsed(),
            results,
        };
        if report.failed() > 0 {
            self.status.show_notice(FAILURE_NOTICE, self.timing.notice_ttl);
        }
        logging::log_cycle_summary(
            cycle_id,
            report.outcomes(),
            report.rendered(),
            report.failed(),
            report.elapsed.as_secs_f64() * 1000.0,
        );
        report
    }

    fn settle(&self, cycle_id: u64, reg: &Registration, outcome: Result<Value, FetchError>) -> SourceStatus {
        let payload = match outcome {
            Ok(payload) => payload,
            Err(err) => {
                // The region keeps whatever it showed before.
                logging::log_fetch_failure(cycle_id, &reg.name, err.kind(), &err.to_string(), reg.is_critical);
                return SourceStatus::FetchFailed(err);
            }
        };

        let rendered = catch_unwind(AssertUnwindSafe(|| reg.renderer.render(&reg.region, &payload)));
        let fault = match rendered {
            Ok(Ok(())) => {
                logging::log(
                    Level::Debug,
                    Domain::Render,
                    "rendered",
                    obj(&[
                        ("cycle_id", json!(cycle_id)),
                        ("source", v_str(&reg.name)),
                        ("region", v_str(&reg.region)),
                    ]),
                );
                return SourceStatus::Rendered;
            }
            Ok(Err(err)) => format!("{:#}", err),
            Err(panic) => format!("renderer panicked: {}", panic_message(panic.as_ref())),
        };
        logging::log_render_fault(cycle_id, &reg.name, &reg.region, &fault);
        SourceStatus::RenderFault(fault)
    }

    /// One immediate cycle, then arm the periodic timer. A second `start` while the
    /// timer is armed only runs the cycle.
    pub async fn start(self: &Arc<Self>) -> Option<CycleReport> {
        let report = self.run_cycle(Trigger::Startup).await;
        self.arm();
        report
    }

    fn arm(self: &Arc<Self>) {
        let mut slot = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.timing.period;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let Some(orch) = weak.upgrade() else { break };
                        // Admission happens under the timer lock that `stop` takes, so
                        // once `stop` returns no new timer cycle can begin.
                        let admitted = {
                            let _slot = orch.timer.lock().unwrap_or_else(|e| e.into_inner());
                            if *shutdown_rx.borrow() {
                                break;
                            }
                            orch.try_begin()
                        };
                        match admitted {
                            Some(guard) => {
                                orch.complete(guard, Trigger::Timer).await;
                            }
                            None => logging::log_coalesced(Trigger::Timer.as_str()),
                        }
                    }
                }
            }
        });

        logging::log(
            Level::Info,
            Domain::Schedule,
            "timer_armed",
            obj(&[("period_secs", v_num(period.as_secs_f64()))]),
        );
        *slot = Some(Timer {
            shutdown,
            _handle: handle,
        });
    }

    /// Disarm the timer. A cycle already in flight runs to completion.
    /// Returns whether a timer was armed.
    pub fn stop(&self) -> bool {
        let mut slot = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        let timer = slot.take();
        // Signalled while the lock is held; the timer task admits cycles under it.
        if let Some(t) = &timer {
            let _ = t.shutdown.send(true);
        }
        drop(slot);
        match timer {
            Some(_) => {
                logging::log(
                    Level::Info,
                    Domain::Schedule,
                    "timer_disarmed",
                    obj(&[("cycle_in_flight", Value::Bool(self.in_flight.load(Ordering::Acquire)))]),
                );
                true
            }
            None => false,
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(t) = self.timer.get_mut().ok().and_then(Option::take) {
            let _ = t.shutdown.send(true);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
