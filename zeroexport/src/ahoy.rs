//! AhoyDTU REST gateway in front of the Hoymiles inverter.
//!
//! Measurement names are published once under `/api/live`, the values under
//! `/api/inverter/id/<n>` only come as positional arrays per channel.

use crate::dispatcher::{CommandDispatcher, InverterCommand};
use crate::sources::{base_url, timeout_from_ms, InverterReading, InverterSource, SourceError};

use anyhow::Context;
use async_trait::async_trait;
use chrono::DateTime;
use log::{debug, info};
use reqwest::Client;
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::OnceCell;

const AC_CHANNEL: usize = 0;
const DC_INPUT_1: usize = 1;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, Deserialize)]
pub struct AhoyConfig {
    pub host: String,
    /// Index of the inverter in `/api/inverter/list`.
    #[serde(default = "default_inverter_id")]
    pub inverter_id: u32,
    pub timeout_ms: Option<u64>,
}

fn default_inverter_id() -> u32 {
    1
}

impl Default for AhoyConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            inverter_id: default_inverter_id(),
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LiveFields {
    ch0_fld_names: Vec<String>,
    fld_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct InverterData {
    #[serde(default)]
    ch: Vec<Vec<Value>>,
    ts_last_success: Option<f64>,
}

#[derive(Debug, Serialize, PartialEq)]
struct CtrlRequest {
    id: u32,
    cmd: &'static str,
    val: i64,
}

pub struct AhoyDtu {
    base_url: String,
    inverter_id: u32,
    timeout: Duration,
    client: Client,
    fields: OnceCell<LiveFields>,
}

impl AhoyDtu {
    pub fn new(config: &AhoyConfig) -> anyhow::Result<Self> {
        let timeout = timeout_from_ms(config.timeout_ms, DEFAULT_TIMEOUT);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for AhoyDTU")?;
        info!(
            "AhoyDTU at {}, inverter {}",
            config.host, config.inverter_id
        );
        Ok(Self {
            base_url: base_url(&config.host),
            inverter_id: config.inverter_id,
            timeout,
            client,
            fields: OnceCell::new(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, SourceError> {
        let url = format!("{}{path}", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(SourceError::Status(response.status()));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::Malformed(format!("{url}: {e}")))
    }

    async fn field_names(&self) -> Result<&LiveFields, SourceError> {
        self.fields
            .get_or_try_init(|| async {
                let fields: LiveFields = self.get_json("/api/live").await?;
                debug!(
                    "AhoyDTU fields: ac {:?}, dc {:?}",
                    fields.ch0_fld_names, fields.fld_names
                );
                Ok::<_, SourceError>(fields)
            })
            .await
    }
}

fn measurement(data: &InverterData, names: &[String], name: &str, channel: usize) -> Option<f64> {
    let index = names.iter().position(|n| n == name)?;
    data.ch.get(channel)?.get(index)?.as_f64()
}

#[async_trait]
impl InverterSource for AhoyDtu {
    async fn read_inverter(&self) -> Result<InverterReading, SourceError> {
        let fields = self.field_names().await?;
        let data: InverterData = self
            .get_json(&format!("/api/inverter/id/{}", self.inverter_id))
            .await?;

        Ok(InverterReading {
            ac_power_w: measurement(&data, &fields.ch0_fld_names, "P_AC", AC_CHANNEL),
            dc_voltage_v: measurement(&data, &fields.fld_names, "U_DC", DC_INPUT_1),
            last_success: data
                .ts_last_success
                .filter(|ts| *ts > 0.0)
                .and_then(|ts| DateTime::from_timestamp(ts as i64, 0)),
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl AhoyDtu {
    fn ctrl_request(&self, command: &InverterCommand) -> CtrlRequest {
        match command {
            InverterCommand::Limit(limit) => CtrlRequest {
                id: self.inverter_id,
                cmd: "limit_nonpersistent_absolute",
                val: i64::from(limit.target_watts.max(0)),
            },
            InverterCommand::Production(enabled) => CtrlRequest {
                id: self.inverter_id,
                cmd: "power",
                val: i64::from(*enabled),
            },
        }
    }
}

#[async_trait]
impl CommandDispatcher for AhoyDtu {
    async fn dispatch(&self, command: &InverterCommand) -> anyhow::Result<()> {
        let request = self.ctrl_request(command);
        let url = format!("{}/api/ctrl", self.base_url);
        debug!("POST {url} {request:?}");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("sending {command} to {url}"))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("AhoyDTU answered {status} to {command}");
        }

        // the gateway reports rejected commands in the body
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            anyhow::bail!("AhoyDTU rejected {command}: {body}");
        }
        Ok(())
    }
}
