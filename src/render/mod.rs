use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

pub mod board;
pub mod format;
pub mod widgets;

pub use board::{payload_digest, Board, Region, NO_DATA};

/// Consumes one decoded payload and updates the region it owns.
///
/// Implementations substitute defaults for missing fields instead of failing. An `Err`
/// (or a panic) is still contained by the orchestrator and reported as a render fault.
pub trait Renderer: Send + Sync {
    fn render(&self, region: &str, payload: &Value) -> Result<()>;
}

impl<F> Renderer for F
where
    F: Fn(&str, &Value) -> Result<()> + Send + Sync,
{
    fn render(&self, region: &str, payload: &Value) -> Result<()> {
        self(region, payload)
    }
}

/// Global indicators the orchestrator drives around each cycle.
pub trait StatusSink: Send + Sync {
    fn set_loading(&self, loading: bool);
    fn show_notice(&self, message: &str, ttl: Duration);
}

/// Pure payload → text transformation for one widget kind.
pub trait Widget: Send + Sync {
    fn lines(&self, payload: &Value, now: DateTime<Utc>) -> Result<Vec<String>>;
}

/// Adapts a `Widget` into a `Renderer` that writes into a `Board` region.
pub struct BoardRenderer<W> {
    board: Board,
    widget: W,
}

impl<W: Widget> BoardRenderer<W> {
    pub fn new(board: Board, widget: W) -> Self {
        Self { board, widget }
    }
}

impl<W: Widget> Renderer for BoardRenderer<W> {
    fn render(&self, region: &str, payload: &Value) -> Result<()> {
        // Lines are fully built before the region is touched, so a failing widget
        // leaves the last-good content in place.
        let lines = self.widget.lines(payload, Utc::now())?;
        self.board.put(region, lines, payload_digest(payload));
        Ok(())
    }
}
