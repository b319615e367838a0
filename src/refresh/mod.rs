//! The refresh loop: registration table, cycle bookkeeping and the orchestrator
//! that fans out fetches, joins them and dispatches payloads to renderers.

pub mod cycle;
pub mod orchestrator;
pub mod registry;

pub use cycle::{CycleReport, CycleState, SourceResult, SourceStatus, Trigger};
pub use orchestrator::{Orchestrator, Timing, FAILURE_NOTICE};
pub use registry::{default_registry, Registration, Registry};
