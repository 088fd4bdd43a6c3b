use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::{CdrQuery, TelephonyProvider};
use crate::config::ProviderConfig;
use crate::error::{Result, TelemetryError};
use crate::normalizer::{AgentStatusPayload, CdrPayload};
use crate::types::Location;

#[derive(Debug, Deserialize)]
struct CdrPage {
    #[serde(default)]
    records: Vec<CdrPayload>,
}

#[derive(Debug, Deserialize)]
struct AgentStatusList {
    #[serde(default)]
    agents: Vec<AgentStatusPayload>,
}

/// Provider REST client (`/reports/cdr`, `/status/agents`) with bearer auth
#[derive(Clone)]
pub struct HttpProviderClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpProviderClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        if config.api_url.trim().is_empty() {
            return Err(TelemetryError::configuration("provider.api_url is empty"));
        }
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| TelemetryError::configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self.client.get(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TelemetryError::provider_unavailable(format!(
                "{} request failed: {} {}",
                what,
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| TelemetryError::provider_unavailable(format!("{} response was not understood: {}", what, e)))
    }
}

#[async_trait]
impl TelephonyProvider for HttpProviderClient {
    async fn fetch_cdr_page(&self, query: &CdrQuery) -> Result<Vec<CdrPayload>> {
        let mut params = vec![
            ("start_date", query.range.start.format("%Y-%m-%d").to_string()),
            ("end_date", query.range.end.format("%Y-%m-%d").to_string()),
            ("limit", query.limit.to_string()),
            ("offset", query.offset.to_string()),
        ];
        if let Some(location) = query.location {
            params.push(("location", location.as_str().to_string()));
        }

        debug!(offset = query.offset, limit = query.limit, "fetching CDR page");
        let page: CdrPage = self
            .send_json(self.get("/reports/cdr").query(&params), "CDR report")
            .await?;
        Ok(page.records)
    }

    async fn fetch_agent_statuses(&self, location: Option<Location>) -> Result<Vec<AgentStatusPayload>> {
        let mut request = self.get("/status/agents");
        if let Some(location) = location {
            request = request.query(&[("location", location.as_str())]);
        }
        let list: AgentStatusList = self.send_json(request, "agent status").await?;
        Ok(list.agents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_url() {
        let config = ProviderConfig::default();
        assert!(HttpProviderClient::new(&config).is_err());
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let config = ProviderConfig {
            enabled: true,
            api_url: "https://pbx.example.com/api/".to_string(),
            ..Default::default()
        };
        let client = HttpProviderClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "https://pbx.example.com/api");
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_unavailable() {
        let config = ProviderConfig {
            enabled: true,
            // port 9 (discard) on loopback refuses connections
            api_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..Default::default()
        };
        let client = HttpProviderClient::new(&config).unwrap();
        let err = client.fetch_agent_statuses(None).await.unwrap_err();
        assert!(matches!(
            err,
            TelemetryError::ProviderUnavailable(_) | TelemetryError::Timeout(_)
        ));
    }
}
