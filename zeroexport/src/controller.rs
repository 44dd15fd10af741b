use crate::aggregator::Aggregator;
use crate::balance::balance_target;
use crate::control_config::ControlConfig;
use crate::dispatcher::{CommandDispatcher, InverterCommand, PowerLimitCommand};
use crate::freshness::{self, Freshness};
use crate::hybrid_inverter::HybridInverterControl;
use crate::metric_collector::MetricCollector;
use crate::protection::{BatteryProtection, ProtectionInputs, ProtectionVerdict};
use crate::rate_limiter::{RateDecision, RateLimiter};
use crate::telemetry::CycleSnapshot;

use chrono::{DateTime, Local, Timelike};
use log::{debug, error, info};
use std::sync::Arc;
use tokio::time::Instant;

/// State carried from one cycle to the next. Only the loop body touches it.
#[derive(Clone, Debug)]
pub struct ControllerState {
    pub last_inverter_sample_time: Option<DateTime<Local>>,
    pub last_inverter_power_w: f64,
    pub last_grid_sample_time: Option<DateTime<Local>>,
    pub last_grid_power_w: f64,
    pub last_commanded_power_w: Option<i32>,
    pub last_command_time: Option<DateTime<Local>>,
    pub dynamic_max_power_w: i32,
    /// Last production state the gateway accepted.
    pub production_enabled: bool,
    protection: BatteryProtection,
}

impl ControllerState {
    /// Without a battery monitor, recovery from protection is judged by
    /// voltage alone.
    pub fn new(config: &ControlConfig, battery_monitored: bool) -> Self {
        let protection = if battery_monitored {
            BatteryProtection::new(config.battery.clone())
        } else {
            BatteryProtection::without_soc(config.battery.clone())
        };
        Self {
            last_inverter_sample_time: None,
            last_inverter_power_w: 0.0,
            last_grid_sample_time: None,
            last_grid_power_w: 0.0,
            last_commanded_power_w: None,
            last_command_time: None,
            dynamic_max_power_w: config.day_max_power_w,
            production_enabled: false,
            protection,
        }
    }

    pub fn protection_active(&self) -> bool {
        self.protection.is_active()
    }

    fn absorb(&mut self, snapshot: &CycleSnapshot) {
        let inverter = snapshot.inverter_ac_power_w;
        if let Some(power_w) = inverter.value() {
            self.last_inverter_sample_time = Some(inverter.observed_at());
            self.last_inverter_power_w = power_w;
        }
        let grid = snapshot.grid_power_w;
        if let Some(power_w) = grid.value() {
            self.last_grid_sample_time = Some(grid.observed_at());
            self.last_grid_power_w = power_w;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Production was switched, the device needs to settle.
    Switched { enabled: bool },
    /// Production stays off, nothing to send.
    HeldOff,
    Skipped(Freshness),
    Suppressed { target_w: i32 },
    Deferred { target_w: i32 },
    Commanded { target_w: i32 },
}

impl CycleOutcome {
    pub fn needs_settling(&self) -> bool {
        matches!(self, CycleOutcome::Switched { .. })
    }
}

pub struct Controller {
    config: Arc<ControlConfig>,
    aggregator: Aggregator,
    dispatcher: Box<dyn CommandDispatcher>,
    collectors: Vec<Box<dyn MetricCollector + Send>>,
    hybrid_inverter: Option<Box<dyn HybridInverterControl + Send>>,
    rate_limiter: RateLimiter,
    state: ControllerState,
}

impl Controller {
    pub fn new(
        config: Arc<ControlConfig>,
        aggregator: Aggregator,
        dispatcher: Box<dyn CommandDispatcher>,
    ) -> Self {
        let rate_limiter = RateLimiter::new(config.granularity_w, config.settling_time());
        let state = ControllerState::new(&config, aggregator.has_battery_monitor());
        Self {
            config,
            aggregator,
            dispatcher,
            collectors: Vec::new(),
            hybrid_inverter: None,
            rate_limiter,
            state,
        }
    }

    pub fn with_collector(mut self, collector: Box<dyn MetricCollector + Send>) -> Self {
        self.collectors.push(collector);
        self
    }

    pub fn with_hybrid_inverter(mut self, control: Box<dyn HybridInverterControl + Send>) -> Self {
        self.hybrid_inverter = Some(control);
        self
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Runs cycles until something fails. Each incarnation starts from a
    /// known state: production switched on, all telemetry read afresh.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let settling = self.config.settling_time();
        let recheck = self.config.recheck_interval();

        self.start(Local::now()).await;
        tokio::time::sleep(settling).await;

        loop {
            let started = Instant::now();
            let outcome = self.run_cycle(Local::now()).await?;
            debug!("cycle outcome: {outcome:?}");

            let pause = if outcome.needs_settling() {
                settling
            } else {
                recheck.saturating_sub(started.elapsed())
            };
            if !pause.is_zero() {
                debug!("re-checking after {:.1} s", pause.as_secs_f64());
                tokio::time::sleep(pause).await;
            }
        }
    }

    pub async fn start(&mut self, now: DateTime<Local>) -> CycleOutcome {
        info!("switching inverter on at startup");
        self.switch_production(true, now).await
    }

    pub async fn run_cycle(&mut self, now: DateTime<Local>) -> anyhow::Result<CycleOutcome> {
        let snapshot = self.aggregator.collect(now).await;
        info!("{snapshot}");
        for collector in self.collectors.iter_mut() {
            collector.publish(&snapshot);
        }

        self.state.absorb(&snapshot);
        self.state.dynamic_max_power_w = self.config.max_power_at(now.hour());

        // unknown output counts as producing
        let producing = snapshot
            .inverter_ac_power_w
            .value()
            .map_or(true, |power_w| power_w > 0.0);

        match self.state.protection.evaluate(&protection_inputs(&snapshot)) {
            ProtectionVerdict::AuxCharging => {
                if self.state.production_enabled || producing {
                    info!("hybrid charger imports from the grid, switching inverter off");
                    return Ok(self.switch_production(false, now).await);
                }
                debug!("hybrid charger imports from the grid, inverter stays off");
                return Ok(CycleOutcome::HeldOff);
            }
            ProtectionVerdict::Tripped => {
                self.disable_hybrid_inverter();
                info!(
                    "switching inverter off until {:.2} V and {:.0} % charge",
                    self.config.battery.recovery_voltage_v,
                    self.config.battery.recovery_soc_percent
                );
                return Ok(self.switch_production(false, now).await);
            }
            ProtectionVerdict::Holding { drained } => {
                if drained {
                    self.disable_hybrid_inverter();
                }
                if self.state.production_enabled || producing {
                    info!("inverter still producing during battery protection, switching off");
                    return Ok(self.switch_production(false, now).await);
                }
                debug!("battery protection active, inverter stays off");
                return Ok(CycleOutcome::HeldOff);
            }
            ProtectionVerdict::Recovered => {
                info!("switching inverter on after battery recovery");
                return Ok(self.switch_production(true, now).await);
            }
            ProtectionVerdict::Normal if !self.state.production_enabled => {
                info!("switching inverter back on");
                return Ok(self.switch_production(true, now).await);
            }
            // ON accepted by the gateway but never applied by the inverter
            ProtectionVerdict::Normal
                if !producing
                    && self
                        .rate_limiter
                        .settled(self.state.last_command_time, now) =>
            {
                info!("inverter reports no output, switching on again");
                return Ok(self.switch_production(true, now).await);
            }
            ProtectionVerdict::Normal => {}
        }

        let freshness = freshness::assess(
            self.state.last_inverter_sample_time,
            self.state.last_grid_sample_time,
            now,
            self.config.recheck_interval(),
        );
        if !freshness.is_fresh() {
            info!("not enough recent data ({freshness:?}), skipping adjustment");
            return Ok(CycleOutcome::Skipped(freshness));
        }

        let target_w = balance_target(
            self.state.last_inverter_power_w,
            self.state.last_grid_power_w,
            self.config.granularity_w,
            self.config.min_power_w,
            self.state.dynamic_max_power_w,
        )?;

        match self.rate_limiter.decide(
            target_w,
            self.state.last_commanded_power_w,
            self.state.last_command_time,
            now,
        ) {
            RateDecision::Suppress => {
                debug!("target {target_w} W too close to the current limit, nothing sent");
                Ok(CycleOutcome::Suppressed { target_w })
            }
            RateDecision::Defer => {
                info!(
                    "future command: {target_w} W of max {} W",
                    self.state.dynamic_max_power_w
                );
                Ok(CycleOutcome::Deferred { target_w })
            }
            RateDecision::Dispatch => {
                self.send_limit(target_w, now).await;
                Ok(CycleOutcome::Commanded { target_w })
            }
        }
    }

    async fn send_limit(&mut self, target_watts: i32, now: DateTime<Local>) {
        let command = InverterCommand::Limit(PowerLimitCommand {
            target_watts,
            issued_at: now,
        });
        info!(
            "command {command} of max {} W",
            self.state.dynamic_max_power_w
        );
        match self.dispatcher.dispatch(&command).await {
            Ok(()) => {
                self.state.last_commanded_power_w = Some(target_watts);
                self.state.last_command_time = Some(now);
            }
            Err(e) => error!("failed to send {command}: {e:#}"),
        }
    }

    async fn switch_production(&mut self, enabled: bool, now: DateTime<Local>) -> CycleOutcome {
        let command = InverterCommand::Production(enabled);
        match self.dispatcher.dispatch(&command).await {
            Ok(()) => self.state.production_enabled = enabled,
            Err(e) => error!("failed to send {command}: {e:#}"),
        }
        // the next limit starts from scratch, whatever the device kept
        self.state.last_commanded_power_w = None;
        self.state.last_command_time = Some(now);
        CycleOutcome::Switched { enabled }
    }

    fn disable_hybrid_inverter(&mut self) {
        if let Some(hybrid) = self.hybrid_inverter.as_mut() {
            hybrid.set_enabled(false);
        }
    }
}

/// Lowest plausible voltage of all sources, so either of them can trip.
fn protection_inputs(snapshot: &CycleSnapshot) -> ProtectionInputs {
    let voltage_v = [
        snapshot.battery_voltage_v.value(),
        snapshot.inverter_dc_voltage_v.value(),
    ]
    .into_iter()
    .flatten()
    .filter(|v| *v > 0.0)
    .reduce(f64::min);

    ProtectionInputs {
        voltage_v,
        soc_percent: snapshot.battery_soc_percent.value().filter(|soc| *soc >= 0.0),
        battery_power_w: snapshot.battery_power_w.value(),
        aux_charging: snapshot.aux_charging.value().unwrap_or(false),
    }
}
