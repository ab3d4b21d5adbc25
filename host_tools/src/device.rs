//! Serial port reader for uplink frames.

use std::io::Read;
use std::time::Duration;

use anyhow::Result;
use serialport::SerialPort;

use crate::protocol::{cobs_decode, parse_publish, Publish};

/// Find candidate uplink ports (CDC-ACM and USB-UART bridges).
pub fn find_uplink_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| p.port_name)
        .filter(|name| name.contains("ttyACM") || name.contains("ttyUSB"))
        .collect())
}

/// Resolve a port argument - returns the port path if not "auto", otherwise auto-detects.
pub fn resolve_port(port_arg: &str) -> Result<String> {
    if port_arg != "auto" {
        return Ok(port_arg.to_string());
    }

    match find_uplink_ports()?.into_iter().next() {
        Some(port) => Ok(port),
        None => anyhow::bail!("No serial port found - ensure the bridge is connected"),
    }
}

/// Reads zero-delimited frames from the bridge.
pub struct UplinkReader {
    port: Box<dyn SerialPort>,
    pending: Vec<u8>,
}

impl UplinkReader {
    pub fn new(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(200))
            .open()?;

        Ok(Self {
            port,
            pending: Vec::new(),
        })
    }

    /// Clear any pending data in the serial buffer.
    pub fn clear_buffer(&mut self) -> Result<()> {
        self.port.clear(serialport::ClearBuffer::All)?;
        self.pending.clear();
        Ok(())
    }

    /// Block until the next complete frame, returning its decoded contents.
    ///
    /// Bytes seen before the first delimiter (boot output, partial frames)
    /// come back as one frame that fails to decode.
    pub fn next_frame(&mut self) -> Result<Result<Publish>> {
        let mut buf = [0u8; 256];

        loop {
            if let Some(end) = self.pending.iter().position(|&b| b == 0x00) {
                // Keep the delimiter - corncobs expects it
                let frame: Vec<u8> = self.pending.drain(..=end).collect();
                if frame.len() == 1 {
                    continue;
                }
                return Ok(cobs_decode(&frame).and_then(|raw| parse_publish(&raw)));
            }

            match self.port.read(&mut buf) {
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
