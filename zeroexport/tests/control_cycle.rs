use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, TimeZone};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use zeroexport::aggregator::{Aggregator, Sources};
use zeroexport::control_config::ControlConfig;
use zeroexport::controller::{Controller, CycleOutcome};
use zeroexport::dispatcher::{CommandDispatcher, InverterCommand, PowerLimitCommand};
use zeroexport::freshness::Freshness;
use zeroexport::hybrid_inverter::HybridInverterControl;
use zeroexport::sources::{
    BatteryReading, BatterySource, ChargerSource, GridMeterSource, GridReading, InverterReading,
    InverterSource, SourceError,
};

#[derive(Clone, Copy, Debug)]
struct Readings {
    inverter: Option<InverterReading>,
    grid: Option<GridReading>,
    battery: Option<BatteryReading>,
    aux_charging: Option<bool>,
    grid_hangs: bool,
}

impl Default for Readings {
    fn default() -> Self {
        Self {
            inverter: Some(InverterReading {
                ac_power_w: Some(300.0),
                dc_voltage_v: Some(53.1),
                last_success: None,
            }),
            grid: Some(GridReading {
                net_power_w: 50,
                energy_wh: 1_234_567.8,
            }),
            battery: Some(BatteryReading {
                voltage_v: Some(53.0),
                soc_percent: Some(80.0),
                power_w: Some(-300.0),
            }),
            aux_charging: Some(false),
            grid_hangs: false,
        }
    }
}

type Shared = Arc<Mutex<Readings>>;

fn offline() -> SourceError {
    SourceError::Malformed("offline".into())
}

struct FakeInverter(Shared);

#[async_trait]
impl InverterSource for FakeInverter {
    async fn read_inverter(&self) -> Result<InverterReading, SourceError> {
        self.0.lock().unwrap().inverter.ok_or_else(offline)
    }
}

struct FakeGrid(Shared);

#[async_trait]
impl GridMeterSource for FakeGrid {
    async fn read_grid(&self) -> Result<GridReading, SourceError> {
        let (hangs, grid) = {
            let readings = self.0.lock().unwrap();
            (readings.grid_hangs, readings.grid)
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        grid.ok_or_else(offline)
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(200)
    }
}

struct FakeBattery(Shared);

#[async_trait]
impl BatterySource for FakeBattery {
    async fn read_battery(&self) -> Result<BatteryReading, SourceError> {
        self.0.lock().unwrap().battery.ok_or_else(offline)
    }
}

struct FakeCharger(Shared);

#[async_trait]
impl ChargerSource for FakeCharger {
    async fn ac_input_active(&self) -> Result<bool, SourceError> {
        self.0.lock().unwrap().aux_charging.ok_or_else(offline)
    }
}

#[derive(Clone, Default)]
struct RecordingDispatcher {
    sent: Arc<Mutex<Vec<InverterCommand>>>,
    failing: Arc<AtomicBool>,
}

#[async_trait]
impl CommandDispatcher for RecordingDispatcher {
    async fn dispatch(&self, command: &InverterCommand) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("gateway unreachable");
        }
        self.sent.lock().unwrap().push(*command);
        Ok(())
    }
}

struct RecordingHybrid(Arc<Mutex<Vec<bool>>>);

impl HybridInverterControl for RecordingHybrid {
    fn set_enabled(&mut self, enabled: bool) {
        self.0.lock().unwrap().push(enabled);
    }
}

struct Rig {
    readings: Shared,
    dispatcher: RecordingDispatcher,
    hybrid: Arc<Mutex<Vec<bool>>>,
    controller: Controller,
}

impl Rig {
    fn new() -> Self {
        Self::with_battery_monitor(true)
    }

    fn with_battery_monitor(monitored: bool) -> Self {
        let config = ControlConfig {
            day_max_power_w: 330,
            night_max_power_w: 330,
            min_power_w: 10,
            ..Default::default()
        };
        let readings = Shared::default();
        let aggregator = Aggregator::new(Sources {
            inverter: Box::new(FakeInverter(readings.clone())),
            grid: Box::new(FakeGrid(readings.clone())),
            battery: monitored
                .then(|| Box::new(FakeBattery(readings.clone())) as Box<dyn BatterySource>),
            charger: Some(Box::new(FakeCharger(readings.clone()))),
        });
        let dispatcher = RecordingDispatcher::default();
        let hybrid = Arc::new(Mutex::new(Vec::new()));
        let controller = Controller::new(
            Arc::new(config),
            aggregator,
            Box::new(dispatcher.clone()),
        )
        .with_hybrid_inverter(Box::new(RecordingHybrid(hybrid.clone())));

        Self {
            readings,
            dispatcher,
            hybrid,
            controller,
        }
    }

    fn update(&self, change: impl FnOnce(&mut Readings)) {
        change(&mut *self.readings.lock().unwrap());
    }

    fn set_power(&self, inverter_w: f64, grid_w: i32) {
        self.update(|r| {
            if let Some(inverter) = r.inverter.as_mut() {
                inverter.ac_power_w = Some(inverter_w);
            }
            if let Some(grid) = r.grid.as_mut() {
                grid.net_power_w = grid_w;
            }
        });
    }

    fn set_battery(&self, voltage_v: f64, soc_percent: f64) {
        self.update(|r| {
            r.battery = Some(BatteryReading {
                voltage_v: Some(voltage_v),
                soc_percent: Some(soc_percent),
                power_w: Some(-50.0),
            })
        });
    }

    fn sent(&self) -> Vec<InverterCommand> {
        self.dispatcher.sent.lock().unwrap().clone()
    }

    fn set_failing(&self, failing: bool) {
        self.dispatcher.failing.store(failing, Ordering::SeqCst);
    }

    async fn cycle(&mut self, secs: i64) -> CycleOutcome {
        self.controller.run_cycle(at(secs)).await.unwrap()
    }
}

fn at(secs: i64) -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + TimeDelta::seconds(secs)
}

fn limit(target_watts: i32, secs: i64) -> InverterCommand {
    InverterCommand::Limit(PowerLimitCommand {
        target_watts,
        issued_at: at(secs),
    })
}

#[tokio::test]
async fn importing_household_raises_the_limit_up_to_the_cap() {
    let mut rig = Rig::new();
    assert_eq!(
        rig.controller.start(at(0)).await,
        CycleOutcome::Switched { enabled: true }
    );

    assert_eq!(rig.cycle(5).await, CycleOutcome::Commanded { target_w: 330 });
    assert_eq!(
        rig.sent(),
        vec![InverterCommand::Production(true), limit(330, 5)]
    );
    assert_eq!(rig.controller.state().last_commanded_power_w, Some(330));
    assert_eq!(rig.controller.state().last_command_time, Some(at(5)));
}

#[tokio::test]
async fn aux_charging_switches_off_without_balancing() {
    let mut rig = Rig::new();
    rig.controller.start(at(0)).await;
    rig.update(|r| r.aux_charging = Some(true));

    assert_eq!(rig.cycle(5).await, CycleOutcome::Switched { enabled: false });
    assert_eq!(
        rig.sent(),
        vec![
            InverterCommand::Production(true),
            InverterCommand::Production(false)
        ]
    );
    assert!(!rig.controller.state().production_enabled);

    // inverter has stopped, nothing more to send
    rig.set_power(0.0, 400);
    assert_eq!(rig.cycle(15).await, CycleOutcome::HeldOff);
    assert_eq!(rig.sent().len(), 2);

    rig.update(|r| r.aux_charging = Some(false));
    assert_eq!(rig.cycle(25).await, CycleOutcome::Switched { enabled: true });
    assert_eq!(rig.sent().last(), Some(&InverterCommand::Production(true)));
}

#[tokio::test]
async fn unreadable_charger_counts_as_not_charging() {
    let mut rig = Rig::new();
    rig.controller.start(at(0)).await;
    rig.update(|r| r.aux_charging = None);
    assert_eq!(rig.cycle(5).await, CycleOutcome::Commanded { target_w: 330 });
}

#[tokio::test]
async fn low_voltage_trips_and_holds_through_a_blip() {
    let mut rig = Rig::new();
    rig.controller.start(at(0)).await;

    rig.set_battery(51.1, 80.0);
    assert_eq!(rig.cycle(5).await, CycleOutcome::Switched { enabled: false });
    assert!(rig.controller.state().protection_active());
    assert_eq!(rig.sent().last(), Some(&InverterCommand::Production(false)));
    assert_eq!(*rig.hybrid.lock().unwrap(), vec![false]);

    // above the cutoff but short of recovery
    rig.set_power(0.0, 250);
    rig.set_battery(51.3, 80.0);
    assert_eq!(rig.cycle(15).await, CycleOutcome::HeldOff);
    assert!(rig.controller.state().protection_active());

    // the inverter input sags lower than the battery monitor reports
    rig.set_battery(52.0, 80.0);
    rig.update(|r| {
        if let Some(inverter) = r.inverter.as_mut() {
            inverter.dc_voltage_v = Some(51.4);
        }
    });
    assert_eq!(rig.cycle(25).await, CycleOutcome::HeldOff);

    rig.update(|r| {
        if let Some(inverter) = r.inverter.as_mut() {
            inverter.dc_voltage_v = Some(52.1);
        }
    });
    assert_eq!(rig.cycle(35).await, CycleOutcome::Switched { enabled: true });
    assert!(!rig.controller.state().protection_active());
    assert_eq!(rig.sent().last(), Some(&InverterCommand::Production(true)));
}

#[tokio::test]
async fn inverter_voltage_alone_trips_and_recovers_without_a_battery_monitor() {
    let mut rig = Rig::with_battery_monitor(false);
    rig.controller.start(at(0)).await;
    let set_dc = |rig: &Rig, voltage_v: f64| {
        rig.update(|r| {
            if let Some(inverter) = r.inverter.as_mut() {
                inverter.dc_voltage_v = Some(voltage_v);
            }
        })
    };

    set_dc(&rig, 51.0);
    assert_eq!(rig.cycle(5).await, CycleOutcome::Switched { enabled: false });
    assert!(rig.controller.state().protection_active());

    rig.set_power(0.0, 250);
    set_dc(&rig, 51.4);
    assert_eq!(rig.cycle(15).await, CycleOutcome::HeldOff);
    assert!(rig.controller.state().protection_active());

    // no SOC is ever read, the voltage has to be enough
    set_dc(&rig, 54.0);
    assert_eq!(rig.cycle(25).await, CycleOutcome::Switched { enabled: true });
    assert!(!rig.controller.state().protection_active());
    assert_eq!(rig.sent().last(), Some(&InverterCommand::Production(true)));
}

#[tokio::test]
async fn idle_inverter_is_switched_on_again_after_settling() {
    let mut rig = Rig::new();
    rig.controller.start(at(0)).await;
    rig.set_power(0.0, 50);

    assert_eq!(rig.cycle(6).await, CycleOutcome::Switched { enabled: true });
    assert_eq!(
        rig.sent(),
        vec![
            InverterCommand::Production(true),
            InverterCommand::Production(true)
        ]
    );
    assert!(rig.controller.state().production_enabled);
    assert_eq!(rig.controller.state().last_commanded_power_w, None);
}

#[tokio::test]
async fn protected_inverter_that_keeps_producing_is_switched_off_again() {
    let mut rig = Rig::new();
    rig.controller.start(at(0)).await;
    rig.set_battery(51.0, 10.0);
    rig.cycle(5).await;

    // OFF was lost somewhere, the inverter still feeds in
    rig.set_power(120.0, -30);
    assert_eq!(rig.cycle(15).await, CycleOutcome::Switched { enabled: false });
    assert_eq!(
        rig.sent()
            .iter()
            .filter(|c| **c == InverterCommand::Production(false))
            .count(),
        2
    );
}

#[tokio::test]
async fn stale_or_skewed_readings_skip_the_adjustment() {
    let mut rig = Rig::new();
    rig.controller.start(at(0)).await;

    rig.update(|r| r.inverter = None);
    assert_eq!(rig.cycle(5).await, CycleOutcome::Skipped(Freshness::Missing));

    rig.update(|r| r.inverter = Readings::default().inverter);
    assert_eq!(rig.cycle(10).await, CycleOutcome::Commanded { target_w: 330 });

    rig.update(|r| r.grid = None);
    assert_eq!(
        rig.cycle(22).await,
        CycleOutcome::Skipped(Freshness::Skewed {
            gap: Duration::from_secs(12)
        })
    );
    assert_eq!(rig.sent().len(), 2);
}

#[tokio::test]
async fn increases_wait_for_settling_and_decreases_do_not() {
    let mut rig = Rig::new();
    rig.controller.start(at(0)).await;

    rig.set_power(100.0, -40);
    assert_eq!(rig.cycle(5).await, CycleOutcome::Commanded { target_w: 65 });

    rig.set_power(65.0, 100);
    assert_eq!(rig.cycle(8).await, CycleOutcome::Deferred { target_w: 170 });
    assert_eq!(rig.cycle(11).await, CycleOutcome::Commanded { target_w: 170 });

    rig.set_power(170.0, -100);
    assert_eq!(rig.cycle(12).await, CycleOutcome::Commanded { target_w: 75 });

    rig.set_power(75.0, 3);
    assert_eq!(rig.cycle(13).await, CycleOutcome::Suppressed { target_w: 80 });

    assert_eq!(
        rig.sent(),
        vec![
            InverterCommand::Production(true),
            limit(65, 5),
            limit(170, 11),
            limit(75, 12),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn hanging_meter_does_not_stall_the_cycle() {
    let mut rig = Rig::new();
    rig.controller.start(at(0)).await;
    rig.update(|r| r.grid_hangs = true);

    let started = tokio::time::Instant::now();
    assert_eq!(rig.cycle(5).await, CycleOutcome::Skipped(Freshness::Missing));
    assert!(started.elapsed() < Duration::from_secs(1));

    let state = rig.controller.state();
    assert_eq!(state.last_inverter_sample_time, Some(at(5)));
    assert_eq!(state.last_inverter_power_w, 300.0);
    assert_eq!(state.last_grid_sample_time, None);
}

#[tokio::test]
async fn failed_dispatch_leaves_the_state_untouched() {
    let mut rig = Rig::new();
    rig.set_failing(true);
    rig.controller.start(at(0)).await;
    assert!(!rig.controller.state().production_enabled);

    rig.set_failing(false);
    assert_eq!(rig.cycle(5).await, CycleOutcome::Switched { enabled: true });
    assert!(rig.controller.state().production_enabled);

    rig.set_failing(true);
    assert_eq!(rig.cycle(10).await, CycleOutcome::Commanded { target_w: 330 });
    assert_eq!(rig.controller.state().last_commanded_power_w, None);

    rig.set_failing(false);
    assert_eq!(rig.cycle(20).await, CycleOutcome::Commanded { target_w: 330 });
    assert_eq!(rig.controller.state().last_commanded_power_w, Some(330));
}

#[tokio::test(start_paused = true)]
async fn run_switches_on_once_and_then_holds_a_steady_limit() {
    let rig = Rig::new();
    let sent = rig.dispatcher.sent.clone();

    let result = tokio::time::timeout(Duration::from_secs(36), rig.controller.run()).await;
    assert!(result.is_err(), "control loop never returns on its own");

    let sent = sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], InverterCommand::Production(true));
    assert!(matches!(
        sent[1],
        InverterCommand::Limit(PowerLimitCommand {
            target_watts: 330,
            ..
        })
    ));
}
