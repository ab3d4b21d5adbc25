//! Serial uplink carrying publish requests to the MQTT host

pub mod publisher;
pub mod serialiser;

pub use publisher::UplinkPublisher;
pub use serialiser::{cobs_decode, decode_publish_frame, encode_publish_frame, FrameError, MessageId, PublishFrame};
