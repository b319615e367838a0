use anyhow::{bail, Context, Result};
use std::sync::Arc;
use url::Url;

use crate::config::Config;
use crate::render::widgets::{
    ClimateAlerts, ClimateMonitoring, HealthAlerts, HighRiskAreas, MapMarkers, RecommendationList, ScenarioList,
    StatCards, Surveillance, TrendChart, WeatherSummary,
};
use crate::render::{Board, BoardRenderer, Renderer, Widget};

/// One (source, renderer) pair. Fixed once the orchestrator is built.
#[derive(Clone)]
pub struct Registration {
    pub name: String,
    pub endpoint: Url,
    /// Display region the renderer owns. Defaults to the source name.
    pub region: String,
    pub renderer: Arc<dyn Renderer>,
    pub is_critical: bool,
}

impl Registration {
    pub fn new(name: impl Into<String>, endpoint: Url, renderer: Arc<dyn Renderer>) -> Self {
        let name = name.into();
        Self {
            region: name.clone(),
            name,
            endpoint,
            renderer,
            is_critical: false,
        }
    }

    pub fn critical(mut self, is_critical: bool) -> Self {
        self.is_critical = is_critical;
        self
    }

    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint.as_str())
            .field("region", &self.region)
            .field("is_critical", &self.is_critical)
            .finish()
    }
}

/// Registration table, keyed by source name.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    entries: Vec<Registration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, reg: Registration) -> Result<()> {
        if self.entries.iter().any(|r| r.name == reg.name) {
            bail!("source {:?} registered twice", reg.name);
        }
        if self.entries.iter().any(|r| r.region == reg.region) {
            bail!("region {:?} already owned by another source", reg.region);
        }
        self.entries.push(reg);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Registration> {
        self.entries.iter().find(|r| r.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.entries.iter()
    }

    pub(crate) fn into_entries(self) -> Vec<Registration> {
        self.entries
    }
}

fn board_renderer<W: Widget + 'static>(board: &Board, widget: W) -> Arc<dyn Renderer> {
    Arc::new(BoardRenderer::new(board.clone(), widget))
}

/// The dashboard's standard sources, each bound to its own board region.
pub fn default_registry(cfg: &Config, board: &Board) -> Result<Registry> {
    let base = cfg.base()?;
    let sources: Vec<(&str, &str, Arc<dyn Renderer>)> = vec![
        ("dashboard-data", "/api/dashboard-data", board_renderer(board, StatCards)),
        ("weather-data", "/api/weather-data", board_renderer(board, WeatherSummary)),
        ("weather-alerts", "/api/weather-alerts", board_renderer(board, ClimateAlerts)),
        ("ai-recommendations", "/api/ai-recommendations", board_renderer(board, RecommendationList)),
        ("scenario-simulation", "/api/scenario-simulation", board_renderer(board, ScenarioList)),
        ("alerts", "/api/alerts", board_renderer(board, HealthAlerts)),
        ("high-risk-areas", "/api/high-risk-areas", board_renderer(board, HighRiskAreas)),
        ("disease-surveillance", "/api/disease-surveillance", board_renderer(board, Surveillance)),
        ("climate-monitoring", "/api/climate-monitoring", board_renderer(board, ClimateMonitoring)),
        ("map-data", "/api/map-data", board_renderer(board, MapMarkers)),
        ("disease-trends", "/api/disease-trends", board_renderer(board, TrendChart)),
    ];

    let mut registry = Registry::new();
    for (name, path, renderer) in sources {
        let endpoint = base
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("bad endpoint path {}", path))?;
        board.declare(name);
        registry.register(Registration::new(name, endpoint, renderer).critical(cfg.is_critical(name)))?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn noop() -> Arc<dyn Renderer> {
        Arc::new(|_: &str, _: &Value| -> Result<()> { Ok(()) })
    }

    fn url(path: &str) -> Url {
        Url::parse("http://localhost/").unwrap().join(path).unwrap()
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut reg = Registry::new();
        assert!(reg.is_empty());
        reg.register(Registration::new("a", url("a"), noop())).unwrap();
        assert!(reg.register(Registration::new("a", url("b"), noop())).is_err());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_shared_region_rejected() {
        let mut reg = Registry::new();
        reg.register(Registration::new("a", url("a"), noop())).unwrap();
        let clash = Registration::new("b", url("b"), noop()).in_region("a");
        assert!(reg.register(clash).is_err());
    }

    #[test]
    fn test_default_registry() {
        let cfg = Config {
            base_url: "http://dash.local:8080/root".to_string(),
            ..Default::default()
        };
        let board = Board::new();
        let reg = default_registry(&cfg, &board).unwrap();
        assert_eq!(reg.len(), 11);

        let stats = reg.get("dashboard-data").unwrap();
        assert!(stats.is_critical);
        assert_eq!(stats.endpoint.as_str(), "http://dash.local:8080/root/api/dashboard-data");
        assert!(!reg.get("map-data").unwrap().is_critical);
        let critical: Vec<&str> = reg.iter().filter(|r| r.is_critical).map(|r| r.name.as_str()).collect();
        assert_eq!(critical, vec!["dashboard-data"]);
        assert!(reg.iter().all(|r| r.endpoint.path().starts_with("/root/api/")));

        // Every region is declared up front and shows the placeholder.
        assert_eq!(board.lines("disease-trends"), vec![crate::render::NO_DATA.to_string()]);
    }
}
