mod config;
mod logging;
mod rumqttc_wrapper;

use config::Config;
use rumqttc_wrapper::RumqttcWrapper;
use std::sync::Arc;
use zeroexport::aggregator::{Aggregator, Sources};
use zeroexport::ahoy::AhoyDtu;
use zeroexport::controller::Controller;
use zeroexport::hybrid_inverter::HybridInverter;
use zeroexport::influx::InfluxBattery;
use zeroexport::mystrom::MystromSwitch;
use zeroexport::simple_mqtt::SimpleMqtt;
use zeroexport::sources::{BatterySource, ChargerSource};
use zeroexport::supervisor::supervise;
use zeroexport::tibber::TibberBridge;

use log::{error, info, warn};

fn build_controller(config: &Config) -> anyhow::Result<Controller> {
    let battery = match &config.battery {
        Some(battery) => Some(Box::new(InfluxBattery::new(battery)?) as Box<dyn BatterySource>),
        None => None,
    };
    let charger = match &config.mystrom {
        Some(mystrom) => Some(Box::new(MystromSwitch::new(mystrom)?) as Box<dyn ChargerSource>),
        None => None,
    };
    let aggregator = Aggregator::new(Sources {
        inverter: Box::new(AhoyDtu::new(&config.ahoy)?),
        grid: Box::new(TibberBridge::new(&config.tibber)?),
        battery,
        charger,
    });

    let mut controller = Controller::new(
        Arc::new(config.control.clone()),
        aggregator,
        Box::new(AhoyDtu::new(&config.ahoy)?),
    );

    if let Some(mqtt) = &config.mqtt {
        info!("Publishing grid readings to MQTT broker {}", mqtt.host);
        controller = controller.with_collector(Box::new(SimpleMqtt::<RumqttcWrapper>::new(mqtt)));
        if config.hybrid_inverter_safety_off() {
            info!("hybrid inverter safety off enabled");
            controller =
                controller.with_hybrid_inverter(Box::new(HybridInverter::<RumqttcWrapper>::new(mqtt)));
        }
    } else if config.hybrid_inverter_safety_off() {
        warn!("hybrid inverter safety off needs an [mqtt] section, ignoring it");
    }

    Ok(controller)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = config::path()?;
    let config = Config::load(&path)?;

    logging::init_logger(config.debug);
    info!("Running revision: {}", env!("GIT_HASH"));
    if std::env::args().len() > 1 {
        error!("Arguments passed. Tool is configured by config.toml in its path");
    }
    if path.exists() {
        info!("configuration loaded from {}", path.display());
    } else {
        warn!("{} does not exist, using the environment only", path.display());
    }
    if !config.is_valid() {
        anyhow::bail!(
            "incomplete configuration: AhoyDTU host and Tibber bridge host and password are required"
        );
    }

    let control = &config.control;
    info!(
        "max power {} W (day, {}:00 to {}:00) / {} W (night), min {} W in steps of {} W",
        control.day_max_power_w,
        control.day_start_hour,
        control.day_end_hour,
        control.night_max_power_w,
        control.min_power_w,
        control.granularity_w
    );

    let restart_delay = control.recheck_interval();
    let config = Arc::new(config);
    supervise(
        move || {
            let config = config.clone();
            async move { build_controller(&config)?.run().await }
        },
        restart_delay,
    )
    .await;
    Ok(())
}
