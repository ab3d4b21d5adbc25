//! Home Assistant discovery and state messages for decoded frames
//!
//! Every valid frame yields four publishes, in order:
//!
//! 1. discovery config for the announced entity
//! 2. its state value
//! 3. discovery config for the link's RSSI sensor
//! 4. the RSSI value of the packet that carried the frame
//!
//! Config documents use the abbreviated discovery keys and omit every field
//! whose source token is empty.

use crate::config::mqtt;
use crate::mqtt::traits::{MqttPublisher, PublishError, QoS};
use crate::protocol::{DecodedFrame, MessageKind};
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use serde::Serialize;

/// A message ready to hand to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

/// Device block shared by every entity of a sender
#[derive(Debug, Clone, Serialize)]
struct DeviceDescriptor<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    ids: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sw: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mdl: Option<&'a str>,
    mf: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct DiscoveryDocument<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    dev_cla: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit_of_meas: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stat_cla: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stat_t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uniq_id: Option<String>,
    dev: DeviceDescriptor<'a>,
}

fn non_empty(token: &str) -> Option<&str> {
    (!token.is_empty()).then_some(token)
}

fn config_topic(prefix: &str, component: &str, device_id: &str, name: &str) -> String {
    format!("{}/{}/{}/{}/config", prefix, component, device_id, name)
}

fn state_topic(component: &str, device_id: &str, name: &str) -> String {
    format!("{}/{}/{}/state", device_id, component, name)
}

/// Builds and sends discovery/state messages
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryPublisher {
    qos: QoS,
    retain: bool,
}

impl DiscoveryPublisher {
    pub fn new(qos: QoS, retain: bool) -> Self {
        Self { qos, retain }
    }

    fn message(&self, topic: String, payload: String) -> OutboundMessage {
        OutboundMessage {
            topic,
            payload,
            qos: self.qos,
            retain: self.retain,
        }
    }

    fn device<'a>(frame: &DecodedFrame<'a>) -> DeviceDescriptor<'a> {
        DeviceDescriptor {
            ids: non_empty(frame.device_id()),
            name: non_empty(frame.device_id()),
            sw: non_empty(frame.software_version()),
            mdl: non_empty(frame.model()),
            mf: mqtt::MANUFACTURER,
        }
    }

    /// Config document for the entity a frame announces
    fn entity_document<'a>(frame: &DecodedFrame<'a>) -> DiscoveryDocument<'a> {
        let kind = frame.kind();
        let device_id = non_empty(frame.device_id());

        let mut doc = DiscoveryDocument {
            dev_cla: None,
            unit_of_meas: None,
            stat_cla: None,
            name: non_empty(frame.field_name()),
            icon: None,
            stat_t: device_id.map(|id| state_topic(kind.component(), id, frame.field_name())),
            uniq_id: device_id.map(|id| format!("{}_{}", id, frame.field_name())),
            dev: Self::device(frame),
        };

        if kind == MessageKind::Sensor {
            doc.dev_cla = non_empty(frame.device_class());
            doc.unit_of_meas = non_empty(frame.unit());
            // State class is taken from the message kind field
            doc.stat_cla = non_empty(frame.message_kind());
            doc.icon = non_empty(frame.icon_prefix())
                .map(|prefix| format!("{}:{}", prefix, frame.icon_suffix()));
        }

        doc
    }

    /// Config document for the RSSI sensor, attached to the same device
    fn rssi_document<'a>(frame: &DecodedFrame<'a>) -> DiscoveryDocument<'a> {
        let device_id = frame.device_id();
        DiscoveryDocument {
            dev_cla: Some(mqtt::RSSI_DEVICE_CLASS),
            unit_of_meas: Some(mqtt::RSSI_UNIT),
            stat_cla: Some(mqtt::RSSI_STATE_CLASS),
            name: Some(mqtt::RSSI_OBJECT_ID),
            icon: Some(mqtt::RSSI_ICON.into()),
            stat_t: Some(state_topic(mqtt::SENSOR, device_id, mqtt::RSSI_OBJECT_ID)),
            uniq_id: Some(format!("{}_{}", device_id, mqtt::RSSI_OBJECT_ID)),
            dev: Self::device(frame),
        }
    }

    /// The four messages for `frame`, received with `rssi` dBm
    pub fn messages(
        &self,
        frame: &DecodedFrame<'_>,
        prefix: &str,
        rssi: i16,
    ) -> Result<Vec<OutboundMessage>, PublishError> {
        let component = frame.kind().component();
        let device_id = frame.device_id();
        let name = frame.field_name();

        let entity = serde_json::to_string(&Self::entity_document(frame))
            .map_err(|_| PublishError::Serialisation)?;
        let rssi_config = serde_json::to_string(&Self::rssi_document(frame))
            .map_err(|_| PublishError::Serialisation)?;

        Ok(alloc::vec![
            self.message(config_topic(prefix, component, device_id, name), entity),
            self.message(state_topic(component, device_id, name), frame.value().into()),
            self.message(
                config_topic(prefix, mqtt::SENSOR, device_id, mqtt::RSSI_OBJECT_ID),
                rssi_config,
            ),
            self.message(
                state_topic(mqtt::SENSOR, device_id, mqtt::RSSI_OBJECT_ID),
                rssi.to_string(),
            ),
        ])
    }

    /// Build and send the messages for `frame`
    ///
    /// Stops at the first transport failure. Returns the number of messages
    /// delivered.
    pub fn publish<P: MqttPublisher>(
        &self,
        transport: &mut P,
        frame: &DecodedFrame<'_>,
        rssi: i16,
    ) -> Result<usize, PublishError> {
        let messages = self.messages(frame, transport.discovery_prefix(), rssi)?;

        for message in &messages {
            transport.publish(&message.topic, message.payload.as_bytes(), message.qos, message.retain)?;
            log::debug!("Published {}", message.topic);
        }

        Ok(messages.len())
    }
}

impl Default for DiscoveryPublisher {
    /// Exactly-once, retained
    fn default() -> Self {
        Self::new(QoS::ExactlyOnce, true)
    }
}
