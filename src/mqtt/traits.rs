//! Publish transport interface
//!
//! The bridge does not own an MQTT session. Anything able to deliver
//! `(topic, payload, qos, retain)` and report the discovery prefix can carry
//! its messages.

use core::fmt;

/// MQTT delivery guarantee
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            _ => Err(value),
        }
    }
}

/// Errors that can occur while publishing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishError {
    /// Transport refused or failed to deliver
    Transport,
    /// Topic or payload exceeds what the transport can carry
    TooLarge,
    /// Discovery document could not be serialised
    Serialisation,
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Transport => "transport error",
            Self::TooLarge => "message too large",
            Self::Serialisation => "serialisation failed",
        };
        f.write_str(msg)
    }
}

/// Publish side of an MQTT client
pub trait MqttPublisher {
    /// Topic prefix for discovery config messages
    fn discovery_prefix(&self) -> &str;

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), PublishError>;
}
