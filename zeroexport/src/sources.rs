//! Seams between the control loop and the devices it reads from.
//!
//! Every source has its own timeout. The aggregator enforces it, adapters
//! only report what they got. A field an adapter could not find is `None`,
//! never zero.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected HTTP status {0}")]
    Status(reqwest::StatusCode),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("no answer within {0:?}")]
    Timeout(Duration),
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct InverterReading {
    pub ac_power_w: Option<f64>,
    pub dc_voltage_v: Option<f64>,
    pub last_success: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GridReading {
    /// Net active power at the grid connection point, negative when exporting.
    pub net_power_w: i32,
    pub energy_wh: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BatteryReading {
    pub voltage_v: Option<f64>,
    pub soc_percent: Option<f64>,
    /// Positive while charging, negative while discharging.
    pub power_w: Option<f64>,
}

#[async_trait]
pub trait InverterSource: Send + Sync {
    async fn read_inverter(&self) -> Result<InverterReading, SourceError>;

    fn timeout(&self) -> Duration {
        DEFAULT_SOURCE_TIMEOUT
    }
}

#[async_trait]
pub trait GridMeterSource: Send + Sync {
    async fn read_grid(&self) -> Result<GridReading, SourceError>;

    fn timeout(&self) -> Duration {
        DEFAULT_SOURCE_TIMEOUT
    }
}

#[async_trait]
pub trait BatterySource: Send + Sync {
    async fn read_battery(&self) -> Result<BatteryReading, SourceError>;

    fn timeout(&self) -> Duration {
        DEFAULT_SOURCE_TIMEOUT
    }
}

/// Reports whether a separate hybrid charger currently imports from the grid.
#[async_trait]
pub trait ChargerSource: Send + Sync {
    async fn ac_input_active(&self) -> Result<bool, SourceError>;

    fn timeout(&self) -> Duration {
        DEFAULT_SOURCE_TIMEOUT
    }
}

/// Turns a configured host into a base URL, accepting bare hosts as well as
/// full `http(s)://` URLs.
pub(crate) fn base_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

pub(crate) fn timeout_from_ms(ms: Option<u64>, default: Duration) -> Duration {
    ms.map(Duration::from_millis).unwrap_or(default)
}
