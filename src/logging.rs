//! Structured JSON-lines logging for the refresh loop.
//!
//! Every record carries a run id, a monotonically increasing sequence number and a
//! domain so that one cycle's fan-out can be reconstructed from the log alone.
//! Records go to stderr; when `LOG_DIR` is set they are also appended to
//! `<LOG_DIR>/<run_id>/events.jsonl`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

// =============================================================================
// Levels and domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    /// Unknown names yield `None`; the caller picks the fallback.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" | "fatal" => Some(Level::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Fetch,    // per-source HTTP outcomes
    Render,   // renderer dispatch and faults
    Cycle,    // cycle start and summary
    Schedule, // timer arm/disarm, coalesced triggers
    System,   // startup, shutdown
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Fetch => "fetch",
            Domain::Render => "render",
            Domain::Cycle => "cycle",
            Domain::Schedule => "schedule",
            Domain::System => "system",
        }
    }
}

/// Which records get written. Read once from `LOG_LEVEL` and `LOG_DOMAINS`.
#[derive(Debug, Clone)]
struct Filter {
    min: Level,
    // None means every domain.
    domains: Option<Vec<String>>,
}

impl Filter {
    fn from_env() -> Self {
        let min = std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|v| Level::parse(&v))
            .unwrap_or(Level::Info);
        let domains = std::env::var("LOG_DOMAINS")
            .ok()
            .filter(|v| v.trim() != "all" && !v.trim().is_empty())
            .map(|v| v.split(',').map(|d| d.trim().to_string()).collect());
        Self { min, domains }
    }

    fn allows(&self, level: Level, domain: Domain) -> bool {
        level >= self.min
            && self
                .domains
                .as_ref()
                .map_or(true, |ds| ds.iter().any(|d| d == domain.as_str()))
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    filter: Filter,
    events: Option<Mutex<BufWriter<File>>>,
}

fn open_events(base: &str, run_id: &str) -> Option<Mutex<BufWriter<File>>> {
    let run_dir = PathBuf::from(base).join(run_id);
    if let Err(err) = create_dir_all(&run_dir) {
        eprintln!("[log] cannot create {}: {}", run_dir.display(), err);
        return None;
    }
    match File::create(run_dir.join("events.jsonl")) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] cannot open events.jsonl: {}", err);
            None
        }
    }
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("dash-{}-{}", ts_epoch_ms(), process::id()));
        let events = std::env::var("LOG_DIR").ok().and_then(|base| open_events(&base, &run_id));
        RunContext {
            run_id,
            filter: Filter::from_env(),
            events,
        }
    })
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["source", "cycle_id", "region", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

// =============================================================================
// Emit
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    if !ctx.filter.allows(level, domain) {
        return;
    }
    let line = format_record(level, domain, event, fields);
    if let Some(events) = &ctx.events {
        if let Ok(mut w) = events.lock() {
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
    }
    eprintln!("{}", line);
}

fn format_record(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) -> String {
    let ctx = ensure_run_context();
    let (top, data) = split_fields(fields);

    let mut record = json!({
        "ts": ts_now(),
        "run_id": ctx.run_id,
        "seq": next_seq(),
        "lvl": level.as_str(),
        "component": domain.as_str(),
        "event": event,
        "msg": "",
    });
    if let Value::Object(entry) = &mut record {
        entry.extend(top);
        entry.insert("data".to_string(), Value::Object(data));
    }
    record.to_string()
}

// =============================================================================
// Refresh-loop events
// =============================================================================

pub fn log_fetch_failure(cycle_id: u64, source: &str, kind: &str, detail: &str, critical: bool) {
    let level = if critical { Level::Error } else { Level::Warn };
    log(
        level,
        Domain::Fetch,
        "fetch_failed",
        obj(&[
            ("cycle_id", json!(cycle_id)),
            ("source", v_str(source)),
            ("kind", v_str(kind)),
            ("detail", v_str(detail)),
            ("critical", Value::Bool(critical)),
        ]),
    );
}

pub fn log_render_fault(cycle_id: u64, source: &str, region: &str, detail: &str) {
    log(
        Level::Error,
        Domain::Render,
        "render_fault",
        obj(&[
            ("cycle_id", json!(cycle_id)),
            ("source", v_str(source)),
            ("region", v_str(region)),
            ("detail", v_str(detail)),
        ]),
    );
}

pub fn log_cycle_summary(cycle_id: u64, sources: usize, rendered: usize, failed: usize, elapsed_ms: f64) {
    let level = if failed > 0 { Level::Warn } else { Level::Info };
    log(
        level,
        Domain::Cycle,
        "cycle_settled",
        obj(&[
            ("cycle_id", json!(cycle_id)),
            ("sources", json!(sources)),
            ("rendered", json!(rendered)),
            ("failed", json!(failed)),
            ("elapsed_ms", v_num(elapsed_ms)),
        ]),
    );
}

pub fn log_coalesced(trigger: &str) {
    log(
        Level::Debug,
        Domain::Schedule,
        "trigger_coalesced",
        obj(&[
            ("trigger", v_str(trigger)),
            ("msg", v_str("cycle already in flight")),
        ]),
    );
}

// =============================================================================
// Field helpers
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Tests
// =============================================================================
