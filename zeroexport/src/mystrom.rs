//! myStrom smart plug feeding the auxiliary grid charger.

use crate::sources::{base_url, timeout_from_ms, ChargerSource, SourceError, DEFAULT_SOURCE_TIMEOUT};

use anyhow::Context;
use async_trait::async_trait;
use log::info;
use reqwest::Client;
use serde_derive::Deserialize;
use std::time::Duration;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct MystromConfig {
    pub host: String,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Report {
    relay: bool,
}

pub struct MystromSwitch {
    url: String,
    timeout: Duration,
    client: Client,
}

impl MystromSwitch {
    pub fn new(config: &MystromConfig) -> anyhow::Result<Self> {
        let timeout = timeout_from_ms(config.timeout_ms, DEFAULT_SOURCE_TIMEOUT);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for the myStrom switch")?;
        info!("aux charger switch at {}", config.host);
        Ok(Self {
            url: format!("{}/report", base_url(&config.host)),
            timeout,
            client,
        })
    }
}

#[async_trait]
impl ChargerSource for MystromSwitch {
    async fn ac_input_active(&self) -> Result<bool, SourceError> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(SourceError::Status(response.status()));
        }
        let report: Report = response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))?;
        Ok(report.relay)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use serde_json::json;

    fn switch(host: String) -> MystromSwitch {
        MystromSwitch::new(&MystromConfig {
            host,
            timeout_ms: Some(500),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn relay_state_is_the_charger_state() {
        let mut server = Server::new_async().await;
        let _report = server
            .mock("GET", "/report")
            .with_status(200)
            .with_body(json!({ "power": 812.3, "Ws": 810.9, "relay": true, "temperature": 31.2 }).to_string())
            .create_async()
            .await;

        assert!(switch(server.url()).ac_input_active().await.unwrap());
    }

    #[tokio::test]
    async fn missing_relay_field_is_malformed() {
        let mut server = Server::new_async().await;
        let _report = server
            .mock("GET", "/report")
            .with_status(200)
            .with_body(json!({ "power": 0.0 }).to_string())
            .create_async()
            .await;

        let result = switch(server.url()).ac_input_active().await;
        assert!(matches!(result, Err(SourceError::Malformed(_))));
    }
}
