//! Battery monitor readings stored in InfluxDB (1.x HTTP API) by the BMS logger.

use crate::sources::{
    base_url, timeout_from_ms, BatteryReading, BatterySource, SourceError, DEFAULT_SOURCE_TIMEOUT,
};

use anyhow::Context;
use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use serde_derive::Deserialize;
use serde_json::Value;
use std::time::Duration;

const VOLTAGE_TOPIC: &str = "solar/data/Battery_Voltage";
const SOC_TOPIC: &str = "solar/data/Percent_Remain";
const POWER_TOPIC: &str = "solar/data/Battery_Power";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct InfluxConfig {
    pub host: String,
    pub port: Option<u16>,
    pub database: Option<String>,
    /// Only values younger than this count as current.
    pub window_minutes: Option<u32>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
}

#[derive(Debug, Default, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Series {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

impl QueryResponse {
    /// Value of the `last` column in the newest row, if there is one.
    fn last_value(&self) -> Result<Option<f64>, SourceError> {
        let Some(result) = self.results.last() else {
            return Ok(None);
        };
        if let Some(error) = &result.error {
            return Err(SourceError::Malformed(error.clone()));
        }
        let value = result.series.last().and_then(|series| {
            let column = series.columns.iter().position(|c| c == "last")?;
            series.values.last()?.get(column)?.as_f64()
        });
        Ok(value)
    }
}

pub struct InfluxBattery {
    url: String,
    database: String,
    window_minutes: u32,
    timeout: Duration,
    client: Client,
}

impl InfluxBattery {
    pub fn new(config: &InfluxConfig) -> anyhow::Result<Self> {
        let timeout = timeout_from_ms(config.timeout_ms, DEFAULT_SOURCE_TIMEOUT);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for InfluxDB")?;
        let url = format!("{}/query", with_port(&base_url(&config.host), config.port));
        info!("battery readings from InfluxDB at {url}");
        Ok(Self {
            url,
            database: config
                .database
                .clone()
                .unwrap_or_else(|| "controllers".to_string()),
            window_minutes: config.window_minutes.unwrap_or(5),
            timeout,
            client,
        })
    }

    async fn last_value(&self, topic: &str) -> Result<Option<f64>, SourceError> {
        let query = format!(
            "SELECT last(value) FROM autogen.solar WHERE (topic::tag = '{topic}') and time >= now() - {}m fill(null)",
            self.window_minutes
        );
        let response = self
            .client
            .get(&self.url)
            .query(&[("db", self.database.as_str()), ("q", query.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SourceError::Status(response.status()));
        }
        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))?;
        let value = body.last_value()?;
        debug!("{topic}: {value:?}");
        Ok(value)
    }
}

/// Appends the InfluxDB default port unless the host already names one.
fn with_port(base: &str, port: Option<u16>) -> String {
    let authority = base.split_once("://").map_or(base, |(_, rest)| rest);
    match port {
        Some(port) => format!("{base}:{port}"),
        None if authority.contains(':') => base.to_string(),
        None => format!("{base}:8086"),
    }
}

#[async_trait]
impl BatterySource for InfluxBattery {
    async fn read_battery(&self) -> Result<BatteryReading, SourceError> {
        let (voltage, soc, power) = tokio::join!(
            self.last_value(VOLTAGE_TOPIC),
            self.last_value(SOC_TOPIC),
            self.last_value(POWER_TOPIC),
        );
        if let (Err(e), Err(_), Err(_)) = (&voltage, &soc, &power) {
            return Err(SourceError::Malformed(format!("all battery queries failed: {e}")));
        }
        Ok(BatteryReading {
            voltage_v: voltage.ok().flatten(),
            soc_percent: soc.ok().flatten(),
            power_w: power.ok().flatten(),
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
