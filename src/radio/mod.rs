//! LoRa radio: chip handles, the chip-agnostic driver and its interrupt plumbing

pub mod bus;
pub mod cell;
pub mod driver;
pub mod signal;
pub mod sx126x;
pub mod sx127x;
pub mod traits;
pub mod variant;

pub use bus::{HalChipFactory, RadioBus};
pub use cell::RadioCell;
pub use driver::{PowerMode, RadioDriver, RadioMode, ReceiveHandler};
pub use signal::ReceiveSignal;
pub use traits::{ChipFactory, HeaderMode, RadioChip, RadioConfig, RadioError};
pub use variant::{ChipFamily, ChipVariant};
