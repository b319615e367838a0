use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::source::FetchError;

/// Lifecycle of the refresh loop: `Idle → Running → Settling → Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    /// Fetches dispatched, waiting at the join barrier.
    Running,
    /// All outcomes in; dispatching to renderers.
    Settling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Timer,
    Manual,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Startup => "startup",
            Trigger::Timer => "timer",
            Trigger::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceStatus {
    Rendered,
    FetchFailed(FetchError),
    /// The payload arrived but its renderer returned an error or panicked.
    RenderFault(String),
}

impl SourceStatus {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceStatus::Rendered => "rendered",
            SourceStatus::FetchFailed(e) => e.kind(),
            SourceStatus::RenderFault(_) => "render_fault",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceResult {
    pub name: String,
    pub critical: bool,
    pub status: SourceStatus,
}

/// What one cycle did. Payloads are not retained.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_id: u64,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub results: Vec<SourceResult>,
}

impl CycleReport {
    pub fn outcomes(&self) -> usize {
        self.results.len()
    }

    pub fn rendered(&self) -> usize {
        self.count(|s| matches!(s, SourceStatus::Rendered))
    }

    pub fn fetch_failures(&self) -> usize {
        self.count(|s| matches!(s, SourceStatus::FetchFailed(_)))
    }

    pub fn render_faults(&self) -> usize {
        self.count(|s| matches!(s, SourceStatus::RenderFault(_)))
    }

    pub fn failed(&self) -> usize {
        self.outcomes() - self.rendered()
    }

    pub fn critical_failed(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.critical && !matches!(r.status, SourceStatus::Rendered))
    }

    pub fn status_of(&self, name: &str) -> Option<&SourceStatus> {
        self.results.iter().find(|r| r.name == name).map(|r| &r.status)
    }

    fn count(&self, pred: impl Fn(&SourceStatus) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.status)).count()
    }
}
