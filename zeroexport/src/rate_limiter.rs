use chrono::{DateTime, Local};
use log::warn;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    /// Change too small to be worth a settling period on the device.
    Suppress,
    Dispatch,
    /// Increase requested while the device is still settling.
    Defer,
}

/// Reacts to over-export at once but lets increases wait for the device to
/// settle after the previous command.
#[derive(Clone, Copy, Debug)]
pub struct RateLimiter {
    granularity_w: i32,
    settling: Duration,
}

impl RateLimiter {
    pub fn new(granularity_w: i32, settling: Duration) -> Self {
        Self {
            granularity_w,
            settling,
        }
    }

    pub fn decide(
        &self,
        target_w: i32,
        last_commanded_w: Option<i32>,
        last_command_at: Option<DateTime<Local>>,
        now: DateTime<Local>,
    ) -> RateDecision {
        let Some(last_commanded_w) = last_commanded_w else {
            return RateDecision::Dispatch;
        };

        let delta = i64::from(target_w) - i64::from(last_commanded_w);
        if delta.abs() < 2 * i64::from(self.granularity_w) {
            return RateDecision::Suppress;
        }
        if delta < 0 {
            return RateDecision::Dispatch;
        }

        if self.settled(last_command_at, now) {
            RateDecision::Dispatch
        } else {
            RateDecision::Defer
        }
    }

    /// Whether the device had time to apply the last command. A wall clock
    /// that stepped back behind the last command counts as settled.
    pub fn settled(&self, last_command_at: Option<DateTime<Local>>, now: DateTime<Local>) -> bool {
        match last_command_at.map(|at| (now - at).to_std()) {
            Some(Ok(elapsed)) => elapsed > self.settling,
            Some(Err(_)) => {
                warn!("clock stepped back behind the last command at {now}");
                true
            }
            None => true,
        }
    }
}
