use crate::{
    metric_collector::MetricCollector,
    mqtt_config::{MqttConfig, MqttTopics},
    mqtt_wrapper::{MqttWrapper, QoS},
    telemetry::CycleSnapshot,
};

use log::{debug, warn};

/// Forwards grid power and energy readings to plain MQTT topics.
pub struct SimpleMqtt<MQTT: MqttWrapper> {
    client: MQTT,
    topics: MqttTopics,
}

impl<MQTT: MqttWrapper> SimpleMqtt<MQTT> {
    pub fn new(config: &MqttConfig) -> Self {
        let client = MQTT::new(config, "-sm");
        Self {
            client,
            topics: config.topics.clone(),
        }
    }

    pub fn client(&self) -> &MQTT {
        &self.client
    }
}

impl<MQTT: MqttWrapper> MetricCollector for SimpleMqtt<MQTT> {
    fn publish(&mut self, snapshot: &CycleSnapshot) {
        debug!("{snapshot}");

        let topic_payload_pairs = [
            (
                &self.topics.grid_power,
                snapshot.grid_power_w.value().map(|w| format!("{w:.0}")),
            ),
            (
                &self.topics.grid_energy,
                snapshot.grid_energy_wh.value().map(|wh| format!("{wh:.1}")),
            ),
        ];

        for (topic, payload) in topic_payload_pairs {
            let Some(payload) = payload else {
                continue;
            };
            if let Err(e) = self
                .client
                .publish(topic.as_str(), QoS::AtMostOnce, false, payload)
            {
                warn!("mqtt error: {e:?}")
            }
        }
    }
}
