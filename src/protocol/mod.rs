//! Telemetry frames carried over the radio

pub mod frame;

pub use frame::{decode, tokenize, DecodeError, DecodedFrame, MessageKind};
