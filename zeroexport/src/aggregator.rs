use crate::sources::{
    BatterySource, ChargerSource, GridMeterSource, InverterSource, SourceError,
};
use crate::telemetry::{CycleSnapshot, TelemetrySample};
use chrono::{DateTime, Local};
use log::{debug, warn};
use std::future::Future;
use std::time::Duration;

pub struct Sources {
    pub inverter: Box<dyn InverterSource>,
    pub grid: Box<dyn GridMeterSource>,
    pub battery: Option<Box<dyn BatterySource>>,
    pub charger: Option<Box<dyn ChargerSource>>,
}

/// Fetches all sources concurrently once per cycle.
pub struct Aggregator {
    sources: Sources,
}

impl Aggregator {
    pub fn new(sources: Sources) -> Self {
        Self { sources }
    }

    pub fn has_battery_monitor(&self) -> bool {
        self.sources.battery.is_some()
    }

    /// Every fetch is bounded by the timeout of its own source, so one
    /// unreachable device costs nothing but its own slot in the snapshot.
    pub async fn collect(&self, now: DateTime<Local>) -> CycleSnapshot {
        let inverter = &self.sources.inverter;
        let grid = &self.sources.grid;

        let (inverter, grid, battery, charger) = tokio::join!(
            bounded("inverter", inverter.timeout(), inverter.read_inverter()),
            bounded("grid meter", grid.timeout(), grid.read_grid()),
            async {
                match &self.sources.battery {
                    Some(source) => {
                        bounded("battery monitor", source.timeout(), source.read_battery()).await
                    }
                    None => None,
                }
            },
            async {
                match &self.sources.charger {
                    Some(source) => {
                        bounded("charger switch", source.timeout(), source.ac_input_active())
                            .await
                    }
                    None => Some(false),
                }
            },
        );

        if let Some(reported) = inverter.and_then(|r| r.last_success) {
            debug!("inverter last reported at {}", reported.with_timezone(&Local));
        }

        let inverter = inverter.unwrap_or_default();
        let battery = battery.unwrap_or_default();

        CycleSnapshot {
            taken_at: now,
            inverter_ac_power_w: TelemetrySample::from_option(inverter.ac_power_w, now),
            inverter_dc_voltage_v: TelemetrySample::from_option(inverter.dc_voltage_v, now),
            grid_power_w: TelemetrySample::from_option(
                grid.map(|g| f64::from(g.net_power_w)),
                now,
            ),
            grid_energy_wh: TelemetrySample::from_option(grid.map(|g| g.energy_wh), now),
            battery_voltage_v: TelemetrySample::from_option(battery.voltage_v, now),
            battery_soc_percent: TelemetrySample::from_option(battery.soc_percent, now),
            battery_power_w: TelemetrySample::from_option(battery.power_w, now),
            aux_charging: TelemetrySample::from_option(charger, now),
        }
    }
}

async fn bounded<T, F>(source: &str, limit: Duration, fetch: F) -> Option<T>
where
    F: Future<Output = Result<T, SourceError>>,
{
    let result = match tokio::time::timeout(limit, fetch).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout(limit)),
    };
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{source} unavailable this cycle: {e}");
            None
        }
    }
}
