use anyhow::{Context, Result};
use url::Url;

/// Runtime configuration, read from the environment with fixed defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub refresh_secs: u64,
    pub notice_secs: u64,
    /// Transport timeout. Unset means the transport's own behaviour applies.
    pub http_timeout_secs: Option<u64>,
    pub critical_sources: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            refresh_secs: 300,
            notice_secs: 5,
            http_timeout_secs: None,
            critical_sources: vec!["dashboard-data".to_string()],
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            base_url: std::env::var("DASH_BASE_URL").unwrap_or(d.base_url),
            refresh_secs: std::env::var("REFRESH_SECS").ok().and_then(|v| v.parse().ok()).filter(|v| *v > 0).unwrap_or(d.refresh_secs),
            notice_secs: std::env::var("NOTICE_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.notice_secs),
            http_timeout_secs: std::env::var("HTTP_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).filter(|v| *v > 0),
            critical_sources: std::env::var("CRITICAL_SOURCES")
                .map(|v| parse_list(&v))
                .unwrap_or(d.critical_sources),
        }
    }

    /// Parsed base URL. A trailing slash is added so relative joins keep any path prefix.
    pub fn base(&self) -> Result<Url> {
        let mut raw = self.base_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).with_context(|| format!("invalid DASH_BASE_URL {:?}", self.base_url))
    }

    pub fn is_critical(&self, source: &str) -> bool {
        self.critical_sources.iter().any(|s| s == source)
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
