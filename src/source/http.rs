use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::{Fetch, FetchError};

/// reqwest-backed source client. Holds one connection pool for every source.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder().user_agent(concat!("healthdash/", env!("CARGO_PKG_VERSION")));
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        Ok(Self { client: builder.build()? })
    }
}

#[async_trait]
impl Fetch for HttpClient {
    async fn fetch_source(&self, endpoint: &Url) -> Result<Value, FetchError> {
        let resp = self
            .client
            .get(endpoint.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus { code: status.as_u16() });
        }

        let body = resp.bytes().await.map_err(transport)?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Decode { message: e.to_string() })
    }
}

fn transport(err: reqwest::Error) -> FetchError {
    let message = if err.is_timeout() {
        format!("timed out: {}", err)
    } else if err.is_connect() {
        format!("connect failed: {}", err)
    } else {
        err.to_string()
    };
    FetchError::Transport { message }
}
