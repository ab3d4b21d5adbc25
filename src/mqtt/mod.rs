//! MQTT discovery and state publishing

pub mod discovery;
pub mod traits;

pub use discovery::{DiscoveryPublisher, OutboundMessage};
pub use traits::{MqttPublisher, PublishError, QoS};
