//! Serial port trait for abstraction and testability
//!
//! The uplink only ever writes, so the port is a blocking byte sink. Any
//! `embedded_io::Write` (a HAL UART, a USB serial driver) can back it through
//! [`IoSerial`].

/// Errors that can occur during serial operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialError {
    /// Buffer overflow
    OverflowError,
    /// Operation timed out
    Timeout,
    /// Write error
    WriteError,
}

/// Abstract serial port interface for testability
pub trait SerialPort {
    /// Write all of `data`
    fn write(&mut self, data: &[u8]) -> Result<(), SerialError>;

    /// Flush the write buffer
    fn flush(&mut self) -> Result<(), SerialError>;
}

/// [`SerialPort`] over any blocking `embedded_io` writer
pub struct IoSerial<W> {
    inner: W,
}

impl<W: embedded_io::Write> IoSerial<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: embedded_io::Write> SerialPort for IoSerial<W> {
    fn write(&mut self, data: &[u8]) -> Result<(), SerialError> {
        self.inner.write_all(data).map_err(|_| SerialError::WriteError)
    }

    fn flush(&mut self) -> Result<(), SerialError> {
        self.inner.flush().map_err(|_| SerialError::WriteError)
    }
}

#[cfg(test)]
pub mod mock {
    //! Mock serial port for testing

    use super::*;
    use crate::config::uplink::MAX_ENCODED_FRAME;
    use heapless::Vec;

    /// Mock serial port for unit testing
    pub struct MockSerialPort {
        /// Data written via write()
        tx_buffer: Vec<u8, { MAX_ENCODED_FRAME * 4 }>,
        /// Error to return on next write
        next_write_error: Option<SerialError>,
        /// Number of flush() calls
        pub flushes: usize,
    }

    impl MockSerialPort {
        /// Create a new mock serial port
        pub fn new() -> Self {
            Self {
                tx_buffer: Vec::new(),
                next_write_error: None,
                flushes: 0,
            }
        }

        /// Get all data written via write()
        pub fn get_tx_data(&self) -> &[u8] {
            &self.tx_buffer
        }

        /// Clear the TX buffer
        pub fn clear_tx_buffer(&mut self) {
            self.tx_buffer.clear();
        }

        /// Set an error to be returned by the next write() call
        pub fn set_next_write_error(&mut self, error: SerialError) {
            self.next_write_error = Some(error);
        }
    }

    impl Default for MockSerialPort {
        fn default() -> Self {
            Self::new()
        }
    }

    impl SerialPort for MockSerialPort {
        fn write(&mut self, data: &[u8]) -> Result<(), SerialError> {
            if let Some(error) = self.next_write_error.take() {
                return Err(error);
            }

            self.tx_buffer
                .extend_from_slice(data)
                .map_err(|_| SerialError::OverflowError)
        }

        fn flush(&mut self) -> Result<(), SerialError> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_mock_write() {
            let mut port = MockSerialPort::new();

            port.write(&[0x01, 0x02]).unwrap();
            port.write(&[0x03, 0x04]).unwrap();

            assert_eq!(port.get_tx_data(), &[0x01, 0x02, 0x03, 0x04]);
        }

        #[test]
        fn test_mock_write_error() {
            let mut port = MockSerialPort::new();
            port.set_next_write_error(SerialError::Timeout);

            assert_eq!(port.write(&[0x01]), Err(SerialError::Timeout));

            // Error should be cleared
            port.write(&[0x02]).unwrap();
            assert_eq!(port.get_tx_data(), &[0x02]);
        }

        #[test]
        fn test_io_serial_writes_through() {
            let mut sink = [0u8; 8];
            let mut port = IoSerial::new(&mut sink[..]);

            port.write(&[0xAA, 0xBB, 0xCC]).unwrap();
            port.flush().unwrap();
            drop(port);

            assert_eq!(&sink[..3], &[0xAA, 0xBB, 0xCC]);
        }
    }
}
