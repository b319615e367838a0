use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use super::StatusSink;

/// Shown by a region that has never rendered successfully.
pub const NO_DATA: &str = "No data available";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Region {
    pub lines: Vec<String>,
    pub rendered_at: Option<DateTime<Utc>>,
    /// SHA-256 of the payload the current lines were built from.
    pub digest: Option<String>,
    pub renders: u64,
}

#[derive(Debug, Clone)]
struct Notice {
    message: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct BoardState {
    regions: BTreeMap<String, Region>,
    loading: bool,
    notice: Option<Notice>,
}

/// In-process display surface: one text region per source plus the global
/// loading flag and transient notice. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct Board {
    inner: Arc<Mutex<BoardState>>,
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BoardState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make a region known so it shows the placeholder before its first render.
    pub fn declare(&self, region: &str) {
        self.state().regions.entry(region.to_string()).or_default();
    }

    pub fn put(&self, region: &str, lines: Vec<String>, digest: String) {
        let mut st = self.state();
        let entry = st.regions.entry(region.to_string()).or_default();
        entry.lines = lines;
        entry.rendered_at = Some(Utc::now());
        entry.digest = Some(digest);
        entry.renders += 1;
    }

    pub fn region(&self, region: &str) -> Option<Region> {
        self.state().regions.get(region).cloned()
    }

    /// Current lines of a region, or the placeholder if it never rendered.
    pub fn lines(&self, region: &str) -> Vec<String> {
        match self.state().regions.get(region) {
            Some(r) if r.rendered_at.is_some() => r.lines.clone(),
            _ => vec![NO_DATA.to_string()],
        }
    }

    pub fn is_loading(&self) -> bool {
        self.state().loading
    }

    /// The notice text, if one is showing and has not yet expired.
    pub fn active_notice(&self) -> Option<String> {
        let st = self.state();
        st.notice
            .as_ref()
            .filter(|n| Instant::now() < n.expires_at)
            .map(|n| n.message.clone())
    }

    pub fn snapshot_text(&self) -> String {
        let ids: Vec<String> = self.state().regions.keys().cloned().collect();
        let mut out = String::new();
        if self.is_loading() {
            out.push_str("[loading]\n");
        }
        if let Some(notice) = self.active_notice() {
            out.push_str(&format!("!! {}\n", notice));
        }
        for id in ids {
            out.push_str(&format!("== {} ==\n", id));
            for line in self.lines(&id) {
                out.push_str("  ");
                out.push_str(&line);
                out.push('\n');
            }
        }
        out
    }
}

impl StatusSink for Board {
    fn set_loading(&self, loading: bool) {
        self.state().loading = loading;
    }

    fn show_notice(&self, message: &str, ttl: Duration) {
        self.state().notice = Some(Notice {
            message: message.to_string(),
            expires_at: Instant::now() + ttl,
        });
    }
}

/// Hex SHA-256 of the payload's canonical JSON encoding.
pub fn payload_digest(payload: &Value) -> String {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_declared_region_shows_placeholder() {
        let board = Board::new();
        board.declare("alerts");
        assert_eq!(board.lines("alerts"), vec![NO_DATA.to_string()]);
        assert_eq!(board.region("alerts").unwrap().renders, 0);
        assert!(board.snapshot_text().contains("== alerts =="));
    }

    #[test]
    fn test_put_counts_renders() {
        let board = Board::new();
        board.put("a", vec!["x".into()], "d1".into());
        board.put("a", vec!["y".into()], "d2".into());
        let r = board.region("a").unwrap();
        assert_eq!(r.renders, 2);
        assert_eq!(r.lines, vec!["y".to_string()]);
        assert_eq!(r.digest.as_deref(), Some("d2"));
    }

    #[test]
    fn test_digest_is_stable() {
        let a = payload_digest(&json!({"cases": 10}));
        let b = payload_digest(&json!({"cases": 10}));
        let c = payload_digest(&json!({"cases": 11}));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notice_expires() {
        let board = Board::new();
        board.show_notice("failed", Duration::from_secs(5));
        assert_eq!(board.active_notice().as_deref(), Some("failed"));
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(board.active_notice().is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(board.active_notice().is_none());
    }

    #[test]
    fn test_loading_flag() {
        let board = Board::new();
        assert!(!board.is_loading());
        board.set_loading(true);
        assert!(board.is_loading());
        assert!(board.snapshot_text().starts_with("[loading]"));
        board.set_loading(false);
        assert!(!board.is_loading());
    }
}
