use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use url::Url;

pub mod http;

pub use http::HttpClient;

/// Why a single source produced no payload this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The server answered, but not with a 2xx status.
    HttpStatus { code: u16 },
    /// No usable response: DNS, connect, timeout, abort or a broken body stream.
    Transport { message: String },
    /// The body was not valid JSON.
    Decode { message: String },
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::HttpStatus { .. } => "http_status",
            FetchError::Transport { .. } => "transport",
            FetchError::Decode { .. } => "decode",
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::HttpStatus { code } => write!(f, "HTTP error status {}", code),
            FetchError::Transport { message } => write!(f, "transport error: {}", message),
            FetchError::Decode { message } => write!(f, "invalid JSON body: {}", message),
        }
    }
}

impl std::error::Error for FetchError {}

/// One GET against one endpoint. Implementations resolve to a `Result` and never panic;
/// the orchestrator relies on that to keep failures isolated per source.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch_source(&self, endpoint: &Url) -> Result<Value, FetchError>;
}
