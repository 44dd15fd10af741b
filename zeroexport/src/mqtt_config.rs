use serde_derive::Deserialize;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub tls: Option<bool>,
    #[serde(default)]
    pub topics: MqttTopics,
}

impl MqttConfig {
    pub fn is_valid(&self) -> bool {
        !self.host.is_empty()
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct MqttTopics {
    pub grid_power: String,
    pub grid_energy: String,
    pub hybrid_inverter_enable: String,
}

impl Default for MqttTopics {
    fn default() -> Self {
        Self {
            grid_power: "local_tibber/power".into(),
            grid_energy: "local_tibber/energy".into(),
            hybrid_inverter_enable: "solar/control/inverter_enable".into(),
        }
    }
}
