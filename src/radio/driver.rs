//! Chip-agnostic LoRa driver
//!
//! Owns the TX/RX buffers, the mode state machine and the callbacks run from
//! interrupt context. Exactly one chip handle is alive while initialised;
//! when uninitialised the SPI bus is parked in the driver.

use crate::config::{lora_defaults, radio};
use crate::radio::traits::{
    clamp_coding_rate, clamp_spreading_factor, ChipFactory, HeaderMode, RadioChip, RadioConfig,
    RadioError,
};
use crate::radio::variant::{ChipFamily, ChipVariant};
use alloc::boxed::Box;
use heapless::Vec;
use log::{debug, info, warn};

/// Driver mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    Uninitialized,
    Idle,
    Receiving,
    Transmitting,
    Sleeping,
}

/// Modes a caller may request explicitly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    Idle,
    Sleeping,
}

/// Receiver of "packet ready" notifications, called from interrupt context
///
/// Implementations must not block, log or allocate.
pub trait ReceiveHandler: Sync {
    fn packet_received(&self, len: usize);
}

/// LoRa driver over a chip built by `F`
pub struct RadioDriver<F: ChipFactory> {
    factory: F,
    /// Bus parked while no chip handle exists
    bus: Option<F::Bus>,
    chip: Option<Box<dyn RadioChip<F::Bus>>>,
    mode: RadioMode,
    header: HeaderMode,
    tx_buffer: Vec<u8, { radio::TX_BUFFER_SIZE }>,
    rx_buffer: Vec<u8, { radio::RX_BUFFER_SIZE }>,
    rx_cursor: usize,
    last_rssi: i16,
    last_snr: f32,
    last_frequency_error: i32,
    frequency_hz: u32,
    spreading_factor: u8,
    bandwidth_hz: u32,
    on_receive: Option<&'static dyn ReceiveHandler>,
    on_tx_done: Option<fn()>,
    irq_count: u32,
}

impl<F: ChipFactory> RadioDriver<F> {
    pub fn new(factory: F, bus: F::Bus) -> Self {
        Self {
            factory,
            bus: Some(bus),
            chip: None,
            mode: RadioMode::Uninitialized,
            header: HeaderMode::Explicit,
            tx_buffer: Vec::new(),
            rx_buffer: Vec::new(),
            rx_cursor: 0,
            last_rssi: 0,
            last_snr: 0.0,
            last_frequency_error: 0,
            frequency_hz: 0,
            spreading_factor: 0,
            bandwidth_hz: 0,
            on_receive: None,
            on_tx_done: None,
            irq_count: 0,
        }
    }

    /// Build the chip for `config.variant` and bring it up
    ///
    /// Re-initialising shuts the previous chip down first. On failure the
    /// bus is returned to the driver and the driver stays uninitialised.
    pub fn initialize(&mut self, config: &RadioConfig) -> Result<(), RadioError> {
        if self.is_initialized() {
            self.shutdown();
        }

        let bus = self.bus.take().ok_or(RadioError::BusUnavailable)?;
        let mut chip = self.factory.build(config.variant, bus);

        if let Err(e) = chip.begin(config.frequency_hz) {
            warn!("{} begin failed: {}", config.variant, e);
            self.bus = Some(chip.release());
            return Err(e);
        }

        self.chip = Some(chip);
        self.mode = RadioMode::Idle;
        self.header = HeaderMode::Explicit;
        self.frequency_hz = config.frequency_hz;
        self.tx_buffer.clear();
        self.rx_buffer.clear();
        self.rx_cursor = 0;

        self.set_spreading_factor(lora_defaults::SPREADING_FACTOR);
        self.set_bandwidth(lora_defaults::BANDWIDTH_HZ);
        self.set_coding_rate(lora_defaults::CODING_RATE);
        self.set_output_power(lora_defaults::TX_POWER_DBM);
        self.set_preamble_length(lora_defaults::PREAMBLE_LENGTH);

        info!("{} initialised at {} Hz", config.variant, config.frequency_hz);
        Ok(())
    }

    /// Apply every radio setting carried by `config`
    pub fn configure(&mut self, config: &RadioConfig) {
        if !self.is_initialized() {
            return;
        }

        let config = config.clamped();
        self.set_sync_word(config.sync_word);
        self.set_coding_rate(config.coding_rate);
        self.set_spreading_factor(config.spreading_factor);
        self.set_bandwidth(config.bandwidth_hz);
        self.set_preamble_length(config.preamble_length);
        self.set_output_power(config.tx_power_dbm);
        self.set_crc_enabled(config.crc_enabled);
        self.set_invert_iq_enabled(config.invert_iq);

        debug!(
            "Radio configured: sf={} bw={} cr=4/{} sync=0x{:02X}",
            config.spreading_factor, config.bandwidth_hz, config.coding_rate, config.sync_word
        );
    }

    /// Release the chip and park the bus; drops callback registrations
    pub fn shutdown(&mut self) {
        self.on_receive = None;
        self.on_tx_done = None;

        if let Some(mut chip) = self.chip.take() {
            let _ = chip.sleep();
            self.bus = Some(chip.release());
            debug!("Radio shut down");
        }

        self.mode = RadioMode::Uninitialized;
        self.tx_buffer.clear();
        self.rx_buffer.clear();
        self.rx_cursor = 0;
    }

    pub fn is_initialized(&self) -> bool {
        self.chip.is_some()
    }

    pub fn mode(&self) -> RadioMode {
        self.mode
    }

    /// Header mode recorded by the last `begin_transmit`
    pub fn header_mode(&self) -> HeaderMode {
        self.header
    }

    pub fn variant(&self) -> Option<ChipVariant> {
        self.chip.as_ref().map(|chip| chip.variant())
    }

    /// Chip handle, leaving sleep first if needed
    fn active_chip(&mut self) -> Option<&mut dyn RadioChip<F::Bus>> {
        let chip = self.chip.as_deref_mut()?;
        if self.mode == RadioMode::Sleeping {
            let _ = chip.standby();
            self.mode = RadioMode::Idle;
        }
        Some(chip)
    }

    /// Run a setter on the chip; no-op when uninitialised
    fn apply(
        &mut self,
        what: &str,
        op: impl FnOnce(&mut dyn RadioChip<F::Bus>) -> Result<(), RadioError>,
    ) {
        if let Some(chip) = self.active_chip() {
            if let Err(e) = op(chip) {
                warn!("Setting {} failed: {}", what, e);
            }
        }
    }

    // ---- Transmit ----

    /// Start a transmit cycle with an empty TX buffer
    pub fn begin_transmit(&mut self, implicit_header: bool) -> Result<(), RadioError> {
        let header = if implicit_header {
            HeaderMode::Implicit
        } else {
            HeaderMode::Explicit
        };

        let chip = self.active_chip().ok_or(RadioError::NotInitialised)?;
        chip.set_header_mode(header)?;

        self.header = header;
        self.tx_buffer.clear();
        Ok(())
    }

    /// Append to the TX buffer, truncating at capacity
    ///
    /// Returns the number of bytes accepted.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if !self.is_initialized() {
            return 0;
        }

        let room = self.tx_buffer.capacity() - self.tx_buffer.len();
        let accepted = data.len().min(room);
        // Cannot fail: `accepted` fits the remaining capacity
        let _ = self.tx_buffer.extend_from_slice(&data[..accepted]);
        accepted
    }

    pub fn write_byte(&mut self, byte: u8) -> usize {
        self.write(&[byte])
    }

    /// Hand the TX buffer to the chip
    ///
    /// With `non_blocking` the chip reports completion on the IRQ line and
    /// the mode stays `Transmitting` until then. The TX buffer is emptied
    /// whatever the outcome; failures are never retried.
    pub fn end_transmit(&mut self, non_blocking: bool) -> Result<(), RadioError> {
        let Some(chip) = self.chip.as_deref_mut() else {
            return Err(RadioError::NotInitialised);
        };
        if self.mode == RadioMode::Sleeping {
            let _ = chip.standby();
        }

        self.mode = RadioMode::Transmitting;
        let result = if non_blocking {
            chip.start_transmit(&self.tx_buffer)
        } else {
            chip.transmit(&self.tx_buffer)
        };
        self.tx_buffer.clear();

        if result.is_err() || !non_blocking {
            self.mode = RadioMode::Idle;
        }
        result
    }

    // ---- Receive ----

    /// Start a receive cycle: empty RX buffer, continuous receive armed
    pub fn begin_receive(&mut self) -> bool {
        if !self.arm_receive() {
            return false;
        }

        self.rx_buffer.clear();
        self.rx_cursor = 0;
        true
    }

    /// Continuous receive with an RX-done interrupt, RX buffer untouched
    fn arm_receive(&mut self) -> bool {
        let Some(chip) = self.active_chip() else {
            return false;
        };

        if chip.start_receive().is_err() {
            return false;
        }

        self.mode = RadioMode::Receiving;
        true
    }

    /// Pull a pending packet into the RX buffer
    ///
    /// Returns its length, or 0 when nothing is pending, the reported length
    /// exceeds the buffer, or the read fails. The RX buffer is emptied first,
    /// so a 0 return always leaves nothing to read. Safe to call from
    /// interrupt context.
    pub fn parse_packet(&mut self) -> usize {
        if !self.is_initialized() {
            return 0;
        }

        self.rx_buffer.clear();
        self.rx_cursor = 0;

        let Some(chip) = self.active_chip() else {
            return 0;
        };

        let len = chip.packet_length();
        if len == 0 || len > radio::RX_BUFFER_SIZE {
            return 0;
        }

        let mut buf = [0u8; radio::RX_BUFFER_SIZE];
        if chip.read_data(&mut buf[..len]).is_err() {
            return 0;
        }

        let rssi = chip.packet_rssi();
        let snr = chip.packet_snr();
        let frequency_error = chip.frequency_error();

        // Cannot fail: len <= capacity
        let _ = self.rx_buffer.extend_from_slice(&buf[..len]);
        self.last_rssi = rssi;
        self.last_snr = snr;
        self.last_frequency_error = frequency_error;
        len
    }

    /// Bytes left to read from the current packet
    pub fn available(&self) -> usize {
        self.rx_buffer.len() - self.rx_cursor
    }

    pub fn read(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.rx_cursor += 1;
        Some(byte)
    }

    pub fn peek(&self) -> Option<u8> {
        self.rx_buffer.get(self.rx_cursor).copied()
    }

    /// Copy as much of the current packet as fits into `buf`
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> usize {
        let remaining = &self.rx_buffer[self.rx_cursor..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.rx_cursor += n;
        n
    }

    /// RSSI of the last packet read, dBm
    pub fn packet_rssi(&self) -> i16 {
        if !self.is_initialized() {
            return 0;
        }
        self.last_rssi
    }

    /// SNR of the last packet read, dB
    pub fn packet_snr(&self) -> f32 {
        if !self.is_initialized() {
            return 0.0;
        }
        self.last_snr
    }

    /// Frequency error of the last packet read, Hz
    pub fn packet_frequency_error(&self) -> i32 {
        if !self.is_initialized() {
            return 0;
        }
        self.last_frequency_error
    }

    /// Instantaneous RSSI, dBm
    pub fn rssi(&mut self) -> i16 {
        self.active_chip().map(|chip| chip.current_rssi()).unwrap_or(0)
    }

    pub fn random(&mut self) -> u8 {
        self.active_chip().map(|chip| chip.random_byte()).unwrap_or(0)
    }

    // ---- Settings ----

    pub fn set_mode(&mut self, mode: PowerMode) {
        let Some(chip) = self.chip.as_deref_mut() else {
            return;
        };

        let (result, next) = match mode {
            PowerMode::Idle => (chip.standby(), RadioMode::Idle),
            PowerMode::Sleeping => (chip.sleep(), RadioMode::Sleeping),
        };
        match result {
            Ok(()) => self.mode = next,
            Err(e) => warn!("Mode change to {:?} failed: {}", mode, e),
        }
    }

    pub fn set_frequency(&mut self, frequency_hz: u32) {
        if !self.is_initialized() {
            return;
        }
        self.frequency_hz = frequency_hz;
        self.apply("frequency", |chip| chip.set_frequency(frequency_hz));
    }

    pub fn frequency(&self) -> u32 {
        self.frequency_hz
    }

    /// Spreading factor, clamped to 6..=12
    pub fn set_spreading_factor(&mut self, spreading_factor: u8) {
        if !self.is_initialized() {
            return;
        }
        let sf = clamp_spreading_factor(spreading_factor);
        self.spreading_factor = sf;
        self.apply("spreading factor", |chip| chip.set_spreading_factor(sf));
    }

    pub fn spreading_factor(&self) -> u8 {
        self.spreading_factor
    }

    pub fn set_bandwidth(&mut self, bandwidth_hz: u32) {
        if !self.is_initialized() {
            return;
        }
        self.bandwidth_hz = bandwidth_hz;
        self.apply("bandwidth", |chip| chip.set_bandwidth(bandwidth_hz));
    }

    pub fn bandwidth(&self) -> u32 {
        self.bandwidth_hz
    }

    /// Coding rate denominator, clamped to 5..=8 (4/5 to 4/8)
    pub fn set_coding_rate(&mut self, denominator: u8) {
        let cr = clamp_coding_rate(denominator);
        self.apply("coding rate", |chip| chip.set_coding_rate(cr));
    }

    pub fn set_preamble_length(&mut self, symbols: u16) {
        self.apply("preamble length", |chip| chip.set_preamble_length(symbols));
    }

    /// Single-byte sync word; SX126x parts get it in both bytes
    pub fn set_sync_word(&mut self, sync_word: u8) {
        let Some(variant) = self.variant() else {
            return;
        };

        let doubled = [sync_word, sync_word];
        let word: &[u8] = match variant.family() {
            ChipFamily::Sx127x => &doubled[..1],
            ChipFamily::Sx126x => &doubled,
        };
        self.apply("sync word", |chip| chip.set_sync_word(word));
    }

    pub fn set_crc_enabled(&mut self, enabled: bool) {
        self.apply("CRC", |chip| chip.set_crc(enabled));
    }

    pub fn set_invert_iq_enabled(&mut self, enabled: bool) {
        self.apply("IQ inversion", |chip| chip.invert_iq(enabled));
    }

    pub fn set_output_power(&mut self, power_dbm: i8) {
        self.apply("output power", |chip| chip.set_output_power(power_dbm));
    }

    pub fn set_over_current_protection(&mut self, current_ma: u8) {
        self.apply("current limit", |chip| chip.set_current_limit(current_ma));
    }

    // ---- Interrupt path ----

    pub fn on_receive(&mut self, handler: Option<&'static dyn ReceiveHandler>) {
        self.on_receive = handler;
    }

    pub fn on_tx_done(&mut self, callback: Option<fn()>) {
        self.on_tx_done = callback;
    }

    /// IRQ line handler
    ///
    /// Reads any pending packet, notifies the receive handler, signals TX
    /// completion and re-arms receive when a receive handler is present.
    pub fn handle_interrupt(&mut self) {
        if !self.is_initialized() {
            return;
        }

        self.irq_count = self.irq_count.wrapping_add(1);

        // Wakes a sleeping chip before touching it
        let len = self.parse_packet();
        self.mode = RadioMode::Idle;
        if len > 0 {
            if let Some(handler) = self.on_receive {
                handler.packet_received(len);
            }
        }

        if let Some(tx_done) = self.on_tx_done {
            tx_done();
        }

        // The packet just read stays in the RX buffer for the poll loop
        if self.on_receive.is_some() {
            self.arm_receive();
        }
    }

    /// Interrupts taken since construction
    pub fn irq_count(&self) -> u32 {
        self.irq_count
    }

    #[cfg(test)]
    pub(crate) fn bus(&self) -> Option<&F::Bus> {
        self.bus.as_ref()
    }
}
