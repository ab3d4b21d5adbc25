//! MQTT publisher over the serial uplink

use crate::config::mqtt::DISCOVERY_PREFIX;
use crate::mqtt::{MqttPublisher, PublishError, QoS};
use crate::serial::SerialPort;
use crate::uplink::serialiser::{encode_publish_frame, PublishFrame};

/// Sends every publish as one COBS frame to the host owning the MQTT session
pub struct UplinkPublisher<S: SerialPort> {
    port: S,
    prefix: &'static str,
    frames_sent: u32,
}

impl<S: SerialPort> UplinkPublisher<S> {
    /// Publisher using the default discovery prefix
    pub fn new(port: S) -> Self {
        Self::with_prefix(port, DISCOVERY_PREFIX)
    }

    pub fn with_prefix(port: S, prefix: &'static str) -> Self {
        Self {
            port,
            prefix,
            frames_sent: 0,
        }
    }

    /// Frames written since construction
    pub fn frames_sent(&self) -> u32 {
        self.frames_sent
    }

    pub fn into_inner(self) -> S {
        self.port
    }
}

impl<S: SerialPort> MqttPublisher for UplinkPublisher<S> {
    fn discovery_prefix(&self) -> &str {
        self.prefix
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), PublishError> {
        let encoded = encode_publish_frame(&PublishFrame {
            topic,
            payload,
            qos,
            retain,
        })?;

        self.port.write(&encoded).map_err(|e| {
            log::warn!("Uplink write failed: {:?}", e);
            PublishError::Transport
        })?;
        self.port.flush().map_err(|e| {
            log::warn!("Uplink flush failed: {:?}", e);
            PublishError::Transport
        })?;

        self.frames_sent = self.frames_sent.wrapping_add(1);
        Ok(())
    }
}
