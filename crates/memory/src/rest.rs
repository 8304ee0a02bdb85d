//! REST implementation of [`MemoryStore`].
//!
//! Network and 5xx failures surface as `Error::Transient` so callers can
//! apply their bounded-retry policy; 4xx responses are terminal.

use std::time::Duration;

use orch_domain::{Error, Result};

use crate::provider::MemoryStore;
use crate::types::{Fact, FactIngest, FactQuery, FactQueryResponse};

pub struct RestMemoryStore {
    base_url: String,
    client: reqwest::Client,
}

impl RestMemoryStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::MemoryStore(format!("client build: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn classify(status: reqwest::StatusCode, body: String) -> Error {
        if status.is_server_error() {
            Error::Transient(format!("memory store {status}: {body}"))
        } else {
            Error::MemoryStore(format!("{status}: {body}"))
        }
    }
}

#[async_trait::async_trait]
impl MemoryStore for RestMemoryStore {
    async fn query(&self, query: FactQuery) -> Result<Vec<Fact>> {
        let url = format!("{}/api/facts/query", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&query)
            .send()
            .await
            .map_err(|e| Error::Transient(format!("memory store unreachable: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify(status, body));
        }

        let parsed: FactQueryResponse = resp
            .json()
            .await
            .map_err(|e| Error::MemoryStore(format!("bad response body: {e}")))?;
        Ok(parsed.facts)
    }

    async fn ingest(&self, user_id: &str, content: &str, source: Option<&str>) -> Result<()> {
        let url = format!("{}/api/facts", self.base_url);
        let body = FactIngest {
            user_id: user_id.to_string(),
            content: content.to_string(),
            source: source.map(String::from),
        };
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transient(format!("memory store unreachable: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::classify(status, text));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let store = RestMemoryStore::new("http://localhost:7700/", Duration::from_secs(5)).unwrap();
        assert_eq!(store.base_url, "http://localhost:7700");
    }

    #[test]
    fn server_errors_are_transient() {
        let err = RestMemoryStore::classify(reqwest::StatusCode::BAD_GATEWAY, "down".into());
        assert!(err.is_retryable());
        let err = RestMemoryStore::classify(reqwest::StatusCode::UNPROCESSABLE_ENTITY, "bad".into());
        assert!(!err.is_retryable());
    }
}
