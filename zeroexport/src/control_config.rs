use crate::protection::BatteryLimits;
use serde_derive::Deserialize;
use std::time::Duration;

/// Tuning of the control loop, read once at startup.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    pub day_max_power_w: i32,
    pub night_max_power_w: i32,
    /// First hour (local time) of the day window.
    pub day_start_hour: u32,
    /// First hour (local time) after the day window.
    pub day_end_hour: u32,
    pub min_power_w: i32,
    /// Smallest change of the power limit worth sending.
    pub granularity_w: i32,
    /// Time the gateway and inverter need to apply a command.
    pub settling_time_s: u64,
    pub recheck_interval_s: u64,
    pub battery: BatteryLimits,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            day_max_power_w: 310,
            night_max_power_w: 310,
            day_start_hour: 8,
            day_end_hour: 18,
            min_power_w: 5,
            granularity_w: 5,
            settling_time_s: 5,
            recheck_interval_s: 10,
            battery: BatteryLimits::default(),
        }
    }
}

impl ControlConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.granularity_w <= 0 {
            anyhow::bail!("granularity must be positive, got {} W", self.granularity_w);
        }
        if self.min_power_w < 0 {
            anyhow::bail!("minimum power must not be negative, got {} W", self.min_power_w);
        }
        for (name, max) in [
            ("day", self.day_max_power_w),
            ("night", self.night_max_power_w),
        ] {
            if max < self.min_power_w {
                anyhow::bail!(
                    "{name} maximum of {max} W is below the minimum of {} W",
                    self.min_power_w
                );
            }
        }
        if self.day_start_hour > 24 || self.day_end_hour > 24 {
            anyhow::bail!("day window hours must lie within 0..=24");
        }
        let whole_day = self.day_start_hour == 0 && self.day_end_hour == 24;
        if self.day_start_hour % 24 == self.day_end_hour % 24 && !whole_day {
            anyhow::bail!(
                "day window {}:00 to {}:00 is empty",
                self.day_start_hour,
                self.day_end_hour
            );
        }
        if self.recheck_interval_s == 0 {
            anyhow::bail!("recheck interval must not be zero");
        }
        self.battery.validate()
    }

    /// Power cap for the given local hour. A window with its start after
    /// its end wraps past midnight.
    pub fn max_power_at(&self, hour: u32) -> i32 {
        let in_day = if self.day_start_hour <= self.day_end_hour {
            (self.day_start_hour..self.day_end_hour).contains(&hour)
        } else {
            hour >= self.day_start_hour || hour < self.day_end_hour
        };
        if in_day {
            self.day_max_power_w
        } else {
            self.night_max_power_w
        }
    }

    pub fn settling_time(&self) -> Duration {
        Duration::from_secs(self.settling_time_s)
    }

    pub fn recheck_interval(&self) -> Duration {
        Duration::from_secs(self.recheck_interval_s)
    }
}
