pub mod traits;

pub use traits::{IoSerial, SerialError, SerialPort};
