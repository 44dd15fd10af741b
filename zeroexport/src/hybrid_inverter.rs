use crate::{
    mqtt_config::MqttConfig,
    mqtt_wrapper::{MqttWrapper, QoS},
};

use log::{info, warn};

/// Switch for a separate hybrid inverter sharing the battery.
pub trait HybridInverterControl {
    fn set_enabled(&mut self, enabled: bool);
}

/// Sends `true`/`false` to the enable topic of the hybrid inverter.
pub struct HybridInverter<MQTT: MqttWrapper> {
    client: MQTT,
    topic: String,
}

impl<MQTT: MqttWrapper> HybridInverter<MQTT> {
    pub fn new(config: &MqttConfig) -> Self {
        let client = MQTT::new(config, "-hy");
        Self {
            client,
            topic: config.topics.hybrid_inverter_enable.clone(),
        }
    }

    pub fn client(&self) -> &MQTT {
        &self.client
    }
}

impl<MQTT: MqttWrapper> HybridInverterControl for HybridInverter<MQTT> {
    fn set_enabled(&mut self, enabled: bool) {
        info!(
            "hybrid inverter {}",
            if enabled { "enable" } else { "safety off" }
        );
        if let Err(e) = self.client.publish(
            self.topic.as_str(),
            QoS::AtLeastOnce,
            false,
            enabled.to_string(),
        ) {
            warn!("mqtt error: {e:?}")
        }
    }
}
