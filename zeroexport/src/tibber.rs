//! Raw SML frames from the local web interface of a Tibber Pulse bridge.
//!
//! The bridge does not decode the frame, so the readings are picked from
//! fixed byte offsets. This keeps working while the internet link is down.

use crate::meter_frame::FrameLayout;
use crate::sources::{
    base_url, timeout_from_ms, GridMeterSource, GridReading, SourceError, DEFAULT_SOURCE_TIMEOUT,
};

use anyhow::Context;
use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use serde_derive::Deserialize;
use std::time::Duration;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TibberConfig {
    pub host: String,
    /// Printed on the bridge below the QR code.
    pub password: String,
    pub node_id: Option<u32>,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub frame: FrameLayout,
}

impl TibberConfig {
    pub fn is_valid(&self) -> bool {
        !self.host.is_empty() && !self.password.is_empty()
    }
}

pub struct TibberBridge {
    url: String,
    password: String,
    layout: FrameLayout,
    timeout: Duration,
    client: Client,
}

impl TibberBridge {
    pub fn new(config: &TibberConfig) -> anyhow::Result<Self> {
        let timeout = timeout_from_ms(config.timeout_ms, DEFAULT_SOURCE_TIMEOUT);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for the Tibber bridge")?;
        info!("Tibber bridge at {}", config.host);
        Ok(Self {
            url: format!(
                "{}/data.json?node_id={}",
                base_url(&config.host),
                config.node_id.unwrap_or(1)
            ),
            password: config.password.clone(),
            layout: config.frame,
            timeout,
            client,
        })
    }

    pub async fn fetch_frame(&self) -> Result<Vec<u8>, SourceError> {
        let response = self
            .client
            .get(&self.url)
            .basic_auth("admin", Some(&self.password))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SourceError::Status(response.status()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl GridMeterSource for TibberBridge {
    async fn read_grid(&self) -> Result<GridReading, SourceError> {
        let frame = self.fetch_frame().await?;
        if frame.is_empty() {
            return Err(SourceError::Malformed("empty meter frame".into()));
        }
        if frame.len() < self.layout.required_len() {
            warn!(
                "meter frame of {} bytes is shorter than the expected {}, reading zero",
                frame.len(),
                self.layout.required_len()
            );
        }
        Ok(GridReading {
            net_power_w: self.layout.power_w(&frame),
            energy_wh: self.layout.energy_wh(&frame),
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
