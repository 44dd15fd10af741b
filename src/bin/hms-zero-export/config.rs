use std::path::{Path, PathBuf};
use std::{env, fs};

use anyhow::Context;
use serde_derive::Deserialize;
use zeroexport::ahoy::AhoyConfig;
use zeroexport::control_config::ControlConfig;
use zeroexport::influx::InfluxConfig;
use zeroexport::mqtt_config::MqttConfig;
use zeroexport::mystrom::MystromConfig;
use zeroexport::tibber::TibberConfig;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub ahoy: AhoyConfig,
    #[serde(default)]
    pub tibber: TibberConfig,
    /// Battery monitor. Without it only the inverter DC voltage guards the battery.
    pub battery: Option<InfluxConfig>,
    /// Switch of the auxiliary grid charger.
    pub mystrom: Option<MystromConfig>,
    pub mqtt: Option<MqttConfig>,
    /// Publish `false` to the hybrid inverter when the battery is drained.
    pub hybrid_inverter_safety_off: Option<bool>,
    #[serde(default)]
    pub control: ControlConfig,
}

impl Config {
    pub fn is_valid(&self) -> bool {
        !self.ahoy.host.is_empty()
            && self.tibber.is_valid()
            && self.battery.as_ref().map_or(true, |x| !x.host.is_empty())
            && self.mystrom.as_ref().map_or(true, |x| !x.host.is_empty())
            && self.mqtt.as_ref().map_or(true, |x| x.is_valid())
    }

    pub fn hybrid_inverter_safety_off(&self) -> bool {
        self.hybrid_inverter_safety_off.is_some_and(|value| value)
    }

    /// Reads `path` if it exists. Without a file the environment alone has to
    /// provide the hosts.
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let contents = if path.exists() {
            fs::read_to_string(path)
                .with_context(|| format!("Could not read {}", path.display()))?
        } else {
            "".into()
        };
        let mut config = toml::from_str::<Config>(&contents).context("toml config unparsable")?;
        config.apply_env();
        config
            .control
            .validate()
            .context("invalid control settings")?;
        Ok(config)
    }

    // overwrite config if environment variables are set
    fn apply_env(&mut self) {
        // $AHOY_HOST
        if let Ok(host) = env::var("AHOY_HOST") {
            self.ahoy.host = host;
        }
        // $TIBBER_BRIDGE_HOST
        if let Ok(host) = env::var("TIBBER_BRIDGE_HOST") {
            self.tibber.host = host;
        }
        // $TIBBER_BRIDGE_PASSWORD
        if let Ok(password) = env::var("TIBBER_BRIDGE_PASSWORD") {
            self.tibber.password = password;
        }
        // $INFLUX_HOST (optional)
        if let Ok(host) = env::var("INFLUX_HOST") {
            self.battery.get_or_insert(InfluxConfig::default()).host = host;
        }
        // $MYSTROM_HOST (optional)
        if let Ok(host) = env::var("MYSTROM_HOST") {
            self.mystrom.get_or_insert(MystromConfig::default()).host = host;
        }
        // $MQTT_BROKER_HOST (optional)
        if let Ok(host) = env::var("MQTT_BROKER_HOST") {
            self.mqtt.get_or_insert(MqttConfig::default()).host = host;
        }
        // $MQTT_USERNAME (optional)
        if let Ok(username) = env::var("MQTT_USERNAME") {
            self.mqtt.get_or_insert(MqttConfig::default()).username = Some(username);
        }
        // $MQTT_PASSWORD (optional)
        if let Ok(password) = env::var("MQTT_PASSWORD") {
            self.mqtt.get_or_insert(MqttConfig::default()).password = Some(password);
        }
        // $MQTT_PORT (optional)
        if let Ok(port) = env::var("MQTT_PORT") {
            self.mqtt.get_or_insert(MqttConfig::default()).port = Some(port.parse().unwrap_or(1883));
        }
    }
}

/// config.toml in the current working dir, or next to the executable if the former does not exist.
pub fn path() -> anyhow::Result<PathBuf> {
    let mut path = env::current_dir().context("can't retrieve current dir")?;
    path.push("config.toml");
    if !path.exists() {
        path = env::current_exe().context("Unable to get current executable path")?;
        path.pop();
        path.push("config.toml");
    }
    Ok(path)
}
