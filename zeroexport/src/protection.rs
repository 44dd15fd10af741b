use log::{info, warn};
use serde_derive::Deserialize;

/// Battery thresholds. Recovery values have to sit above their cutoff so
/// the protection cannot chatter around a single value.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatteryLimits {
    pub cutoff_voltage_v: f64,
    pub recovery_voltage_v: f64,
    pub min_soc_percent: f64,
    pub recovery_soc_percent: f64,
    /// Discharge above which the voltage reading is sagging under load.
    pub heavy_load_w: f64,
    /// Voltage the reading sags by under heavy load. A low state of charge
    /// only counts as drained while the reading is this far below the cutoff.
    pub load_sag_allowance_v: f64,
}

impl Default for BatteryLimits {
    fn default() -> Self {
        // 16S LiFePO4: 51.2 V is roughly 20 % charge
        Self {
            cutoff_voltage_v: 51.2,
            recovery_voltage_v: 51.5,
            min_soc_percent: 20.0,
            recovery_soc_percent: 30.0,
            heavy_load_w: 400.0,
            load_sag_allowance_v: 1.2,
        }
    }
}

impl BatteryLimits {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.recovery_voltage_v <= self.cutoff_voltage_v {
            anyhow::bail!(
                "recovery voltage {:.2} V must exceed cutoff voltage {:.2} V",
                self.recovery_voltage_v,
                self.cutoff_voltage_v
            );
        }
        if self.recovery_soc_percent <= self.min_soc_percent {
            anyhow::bail!(
                "recovery state of charge {:.1} % must exceed minimum {:.1} %",
                self.recovery_soc_percent,
                self.min_soc_percent
            );
        }
        if self.heavy_load_w < 0.0 || self.load_sag_allowance_v < 0.0 {
            anyhow::bail!("heavy load threshold and sag allowance must not be negative");
        }
        Ok(())
    }

    /// Best guess whether the battery is close to empty.
    ///
    /// A voltage at or below the cutoff is always drained. Otherwise the
    /// state of charge decides, cross-checked against the voltage with the
    /// sag of a heavy load added back.
    pub fn is_drained(&self, voltage_v: f64, soc_percent: Option<f64>, power_w: Option<f64>) -> bool {
        if voltage_v <= self.cutoff_voltage_v {
            return true;
        }
        let Some(soc) = soc_percent else {
            return false;
        };
        let load_w = power_w.map_or(0.0, |p| (-p).max(0.0));
        let adjusted_v = if load_w > self.heavy_load_w {
            voltage_v + self.load_sag_allowance_v
        } else {
            voltage_v
        };
        soc <= self.min_soc_percent && adjusted_v <= self.cutoff_voltage_v
    }

    pub fn has_recovered(&self, voltage_v: f64, soc_percent: Option<f64>) -> bool {
        voltage_v >= self.recovery_voltage_v
            && soc_percent.is_some_and(|soc| soc >= self.recovery_soc_percent)
    }

    /// Recovery for setups without a battery monitor, voltage only.
    pub fn has_recovered_voltage(&self, voltage_v: f64) -> bool {
        voltage_v >= self.recovery_voltage_v
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProtectionState {
    #[default]
    Normal,
    Protected,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ProtectionInputs {
    pub voltage_v: Option<f64>,
    pub soc_percent: Option<f64>,
    pub battery_power_w: Option<f64>,
    pub aux_charging: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtectionVerdict {
    /// The hybrid charger imports from the grid, production has to stop.
    /// The protection state is left untouched.
    AuxCharging,
    Normal,
    /// Just switched from normal to protected.
    Tripped,
    /// Still protected, `drained` tells whether the battery still looks empty.
    Holding { drained: bool },
    /// Just switched from protected back to normal.
    Recovered,
}

/// The only owner of the protection flag.
#[derive(Clone, Debug)]
pub struct BatteryProtection {
    limits: BatteryLimits,
    state: ProtectionState,
    soc_monitored: bool,
}

impl BatteryProtection {
    pub fn new(limits: BatteryLimits) -> Self {
        Self {
            limits,
            state: ProtectionState::Normal,
            soc_monitored: true,
        }
    }

    /// Without a battery monitor there never is a state of charge, so
    /// recovery is judged by voltage alone.
    pub fn without_soc(limits: BatteryLimits) -> Self {
        Self {
            soc_monitored: false,
            ..Self::new(limits)
        }
    }

    fn has_recovered(&self, voltage_v: f64, soc_percent: Option<f64>) -> bool {
        if self.soc_monitored {
            self.limits.has_recovered(voltage_v, soc_percent)
        } else {
            self.limits.has_recovered_voltage(voltage_v)
        }
    }

    pub fn state(&self) -> ProtectionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ProtectionState::Protected
    }

    pub fn evaluate(&mut self, inputs: &ProtectionInputs) -> ProtectionVerdict {
        if inputs.aux_charging {
            return ProtectionVerdict::AuxCharging;
        }

        let Some(voltage_v) = inputs.voltage_v else {
            warn!("no battery voltage available, keeping protection {:?}", self.state);
            return match self.state {
                ProtectionState::Normal => ProtectionVerdict::Normal,
                ProtectionState::Protected => ProtectionVerdict::Holding { drained: false },
            };
        };

        let drained =
            self.limits
                .is_drained(voltage_v, inputs.soc_percent, inputs.battery_power_w);

        match self.state {
            ProtectionState::Normal if drained => {
                info!(
                    "battery drained at {voltage_v:.2} V / {}, protection engaged",
                    fmt_soc(inputs.soc_percent)
                );
                self.state = ProtectionState::Protected;
                ProtectionVerdict::Tripped
            }
            ProtectionState::Normal => ProtectionVerdict::Normal,
            ProtectionState::Protected
                if self.has_recovered(voltage_v, inputs.soc_percent) =>
            {
                info!(
                    "battery recovered at {voltage_v:.2} V / {}, protection released",
                    fmt_soc(inputs.soc_percent)
                );
                self.state = ProtectionState::Normal;
                ProtectionVerdict::Recovered
            }
            ProtectionState::Protected => ProtectionVerdict::Holding { drained },
        }
    }
}

fn fmt_soc(soc: Option<f64>) -> String {
    soc.map_or("unknown charge".to_string(), |soc| format!("{soc:.0} %"))
}
