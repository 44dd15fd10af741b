use chrono::{DateTime, Local};
use std::fmt;

/// One value observed by a telemetry source during a control cycle.
///
/// A sample without a value is invalid: the fetch failed, timed out or
/// returned something that could not be parsed. Samples are never mutated,
/// the next cycle produces new ones.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TelemetrySample<T> {
    value: Option<T>,
    observed_at: DateTime<Local>,
}

impl<T: Copy> TelemetrySample<T> {
    pub fn valid(value: T, observed_at: DateTime<Local>) -> Self {
        Self {
            value: Some(value),
            observed_at,
        }
    }

    pub fn invalid(observed_at: DateTime<Local>) -> Self {
        Self {
            value: None,
            observed_at,
        }
    }

    pub fn from_option(value: Option<T>, observed_at: DateTime<Local>) -> Self {
        Self { value, observed_at }
    }

    pub fn is_valid(&self) -> bool {
        self.value.is_some()
    }

    pub fn value(&self) -> Option<T> {
        self.value
    }

    pub fn observed_at(&self) -> DateTime<Local> {
        self.observed_at
    }
}

/// Everything gathered in one iteration of the control loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CycleSnapshot {
    pub taken_at: DateTime<Local>,
    pub inverter_ac_power_w: TelemetrySample<f64>,
    pub inverter_dc_voltage_v: TelemetrySample<f64>,
    pub grid_power_w: TelemetrySample<f64>,
    pub grid_energy_wh: TelemetrySample<f64>,
    pub battery_voltage_v: TelemetrySample<f64>,
    pub battery_soc_percent: TelemetrySample<f64>,
    pub battery_power_w: TelemetrySample<f64>,
    pub aux_charging: TelemetrySample<bool>,
}

impl CycleSnapshot {
    /// A snapshot in which no source delivered anything.
    pub fn empty(taken_at: DateTime<Local>) -> Self {
        Self {
            taken_at,
            inverter_ac_power_w: TelemetrySample::invalid(taken_at),
            inverter_dc_voltage_v: TelemetrySample::invalid(taken_at),
            grid_power_w: TelemetrySample::invalid(taken_at),
            grid_energy_wh: TelemetrySample::invalid(taken_at),
            battery_voltage_v: TelemetrySample::invalid(taken_at),
            battery_soc_percent: TelemetrySample::invalid(taken_at),
            battery_power_w: TelemetrySample::invalid(taken_at),
            aux_charging: TelemetrySample::invalid(taken_at),
        }
    }
}

fn fmt_sample(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{v:.2} {unit}"),
        None => "n/a".to_string(),
    }
}

impl fmt::Display for CycleSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inverter {} / {}, grid {} / {}, battery {} / {} / {}, aux charging {}",
            fmt_sample(self.inverter_ac_power_w.value(), "W"),
            fmt_sample(self.inverter_dc_voltage_v.value(), "V"),
            fmt_sample(self.grid_power_w.value(), "W"),
            fmt_sample(self.grid_energy_wh.value().map(|wh| wh / 1000.), "kWh"),
            fmt_sample(self.battery_voltage_v.value(), "V"),
            fmt_sample(self.battery_soc_percent.value(), "%"),
            fmt_sample(self.battery_power_w.value(), "W"),
            match self.aux_charging.value() {
                Some(true) => "on",
                Some(false) => "off",
                None => "n/a",
            }
        )
    }
}
