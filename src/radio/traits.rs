//! LoRa chip capability trait
//!
//! Both chip families implement [`RadioChip`], so the driver talks to one
//! operation set and the family decision is made once, when the
//! [`ChipFactory`] builds the handle.

use crate::config::{lora_defaults, radio};
use crate::radio::variant::ChipVariant;
use alloc::boxed::Box;
use core::fmt;

/// Errors that can occur during LoRa operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// Operation timed out
    Timeout,
    /// CRC error in received packet
    CrcError,
    /// Transmission failed
    TransmitFailed,
    /// Reception failed
    ReceiveFailed,
    /// Invalid configuration
    InvalidConfig,
    /// Radio busy timeout
    BusyTimeout,
    /// SPI communication error
    SpiError,
    /// Radio not initialised
    NotInitialised,
    /// Chip did not answer the identification probe
    ChipNotFound,
    /// The SPI bus is held by another chip handle
    BusUnavailable,
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Timeout => "timeout",
            Self::CrcError => "CRC error",
            Self::TransmitFailed => "transmit failed",
            Self::ReceiveFailed => "receive failed",
            Self::InvalidConfig => "invalid configuration",
            Self::BusyTimeout => "BUSY line stuck high",
            Self::SpiError => "SPI error",
            Self::NotInitialised => "radio not initialised",
            Self::ChipNotFound => "chip not found",
            Self::BusUnavailable => "SPI bus unavailable",
        };
        f.write_str(msg)
    }
}

/// Whether the LoRa header is transmitted in-band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMode {
    Explicit,
    Implicit,
}

/// Radio configuration supplied once at setup
#[derive(Debug, Clone, PartialEq)]
pub struct RadioConfig {
    /// Chip variant to drive
    pub variant: ChipVariant,
    /// Centre frequency in Hz
    pub frequency_hz: u32,
    /// Bandwidth in Hz (7800 ... 500000)
    pub bandwidth_hz: u32,
    /// Spreading factor (6-12, clamped)
    pub spreading_factor: u8,
    /// Coding rate denominator (5-8 for 4/5 to 4/8, clamped)
    pub coding_rate: u8,
    /// Sync word
    pub sync_word: u8,
    /// Preamble length in symbols
    pub preamble_length: u16,
    /// Transmit power in dBm
    pub tx_power_dbm: i8,
    pub crc_enabled: bool,
    pub invert_iq: bool,
}

impl RadioConfig {
    /// Copy with the spreading factor and coding rate forced into range
    pub fn clamped(&self) -> Self {
        Self {
            spreading_factor: clamp_spreading_factor(self.spreading_factor),
            coding_rate: clamp_coding_rate(self.coding_rate),
            ..self.clone()
        }
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            variant: ChipVariant::Sx1262,
            frequency_hz: lora_defaults::FREQUENCY_HZ,
            bandwidth_hz: lora_defaults::BANDWIDTH_HZ,
            spreading_factor: lora_defaults::SPREADING_FACTOR,
            coding_rate: lora_defaults::CODING_RATE,
            sync_word: lora_defaults::SYNC_WORD,
            preamble_length: lora_defaults::PREAMBLE_LENGTH,
            tx_power_dbm: lora_defaults::TX_POWER_DBM,
            crc_enabled: true,
            invert_iq: false,
        }
    }
}

pub fn clamp_spreading_factor(sf: u8) -> u8 {
    sf.clamp(radio::MIN_SPREADING_FACTOR, radio::MAX_SPREADING_FACTOR)
}

pub fn clamp_coding_rate(denominator: u8) -> u8 {
    denominator.clamp(radio::MIN_CODING_RATE, radio::MAX_CODING_RATE)
}

/// Low data rate optimisation is mandated once a symbol lasts 16 ms or more
pub fn needs_low_data_rate_optimize(spreading_factor: u8, bandwidth_hz: u32) -> bool {
    if bandwidth_hz == 0 {
        return true;
    }
    let symbol_us = 1u64
        .checked_shl(u32::from(spreading_factor))
        .map_or(u64::MAX, |chips| chips.saturating_mul(1_000_000))
        / bandwidth_hz as u64;
    symbol_us >= 16_000
}

/// Operation set shared by every supported chip
///
/// `B` is the bus (SPI plus control pins) the chip owns while it is alive;
/// [`RadioChip::release`] hands it back. Methods used from the interrupt
/// path (`packet_length`, `read_data`, the packet metadata getters and
/// `start_receive`) must not log or allocate.
pub trait RadioChip<B>: Send {
    /// Variant this handle was built for
    fn variant(&self) -> ChipVariant;

    /// Reset, identify and bring the chip up on the given frequency
    fn begin(&mut self, frequency_hz: u32) -> Result<(), RadioError>;

    /// Transmit and wait for completion
    fn transmit(&mut self, data: &[u8]) -> Result<(), RadioError>;

    /// Start a transmission; completion is signalled on the IRQ line
    fn start_transmit(&mut self, data: &[u8]) -> Result<(), RadioError>;

    /// Continuous receive, no timeout, IRQ on reception complete
    fn start_receive(&mut self) -> Result<(), RadioError>;

    /// Length of the pending packet, zero when none is ready
    ///
    /// Must be called before [`RadioChip::read_data`].
    fn packet_length(&mut self) -> usize;

    /// Read the pending packet into `buf` and clear the IRQ
    fn read_data(&mut self, buf: &mut [u8]) -> Result<(), RadioError>;

    /// RSSI of the last packet in dBm
    fn packet_rssi(&mut self) -> i16;

    /// SNR of the last packet in dB
    fn packet_snr(&mut self) -> f32;

    /// Frequency error of the last packet in Hz
    fn frequency_error(&mut self) -> i32;

    /// Instantaneous RSSI in dBm
    fn current_rssi(&mut self) -> i16;

    /// Random byte from the wideband RSSI noise
    fn random_byte(&mut self) -> u8;

    fn set_frequency(&mut self, frequency_hz: u32) -> Result<(), RadioError>;
    fn set_spreading_factor(&mut self, spreading_factor: u8) -> Result<(), RadioError>;
    fn set_bandwidth(&mut self, bandwidth_hz: u32) -> Result<(), RadioError>;
    fn set_coding_rate(&mut self, denominator: u8) -> Result<(), RadioError>;

    /// Sync word bytes exactly as the chip stores them
    fn set_sync_word(&mut self, word: &[u8]) -> Result<(), RadioError>;

    fn set_crc(&mut self, enabled: bool) -> Result<(), RadioError>;
    fn invert_iq(&mut self, enabled: bool) -> Result<(), RadioError>;
    fn set_header_mode(&mut self, mode: HeaderMode) -> Result<(), RadioError>;
    fn set_preamble_length(&mut self, symbols: u16) -> Result<(), RadioError>;
    fn set_output_power(&mut self, power_dbm: i8) -> Result<(), RadioError>;

    /// Over-current protection limit
    fn set_current_limit(&mut self, current_ma: u8) -> Result<(), RadioError>;

    fn standby(&mut self) -> Result<(), RadioError>;
    fn sleep(&mut self) -> Result<(), RadioError>;

    /// Tear the handle down and give the bus back
    fn release(self: Box<Self>) -> B;
}

/// Builds the chip handle for a variant around an owned bus
pub trait ChipFactory {
    type Bus: Send + 'static;

    fn build(&self, variant: ChipVariant, bus: Self::Bus) -> Box<dyn RadioChip<Self::Bus>>;
}

#[cfg(test)]
pub mod mock {
    //! Mock chip for testing the driver without hardware

    use super::*;
    use std::sync::{Arc, Mutex, MutexGuard};
    use std::vec::Vec;

    /// Calls recorded by the mock chip
    #[derive(Debug, Clone, PartialEq)]
    pub enum ChipCall {
        Begin(u32),
        Transmit(Vec<u8>),
        StartTransmit(Vec<u8>),
        StartReceive,
        ReadData(usize),
        SetFrequency(u32),
        SetSpreadingFactor(u8),
        SetBandwidth(u32),
        SetCodingRate(u8),
        SetSyncWord(Vec<u8>),
        SetCrc(bool),
        InvertIq(bool),
        SetHeaderMode(HeaderMode),
        SetPreambleLength(u16),
        SetOutputPower(i8),
        SetCurrentLimit(u8),
        Standby,
        Sleep,
    }

    /// State shared between the test and every chip built on the bus
    #[derive(Debug, Default)]
    pub struct MockChipState {
        pub calls: Vec<ChipCall>,
        pub built: Vec<ChipVariant>,
        pub releases: usize,
        pub fail_begin: bool,
        pub fail_transmit: bool,
        pub fail_read: bool,
        /// Length reported by the next `packet_length`
        pub reported_length: usize,
        pub rx_payload: Vec<u8>,
        pub rssi: i16,
        pub snr: f32,
        pub frequency_error: i32,
    }

    /// Mock bus, cloneable so the test keeps a handle to the state
    #[derive(Debug, Clone, Default)]
    pub struct MockBus {
        state: Arc<Mutex<MockChipState>>,
    }

    impl MockBus {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn state(&self) -> MutexGuard<'_, MockChipState> {
            self.state.lock().unwrap()
        }

        /// Make a packet pending, as if RX done had fired
        pub fn queue_packet(&self, data: &[u8], rssi: i16, snr: f32) {
            let mut state = self.state();
            state.reported_length = data.len();
            state.rx_payload = data.to_vec();
            state.rssi = rssi;
            state.snr = snr;
        }

        pub fn calls(&self) -> Vec<ChipCall> {
            self.state().calls.clone()
        }

        pub fn clear_calls(&self) {
            self.state().calls.clear();
        }

        fn record(&self, call: ChipCall) {
            self.state().calls.push(call);
        }
    }

    /// Mock chip recording every call
    pub struct MockChip {
        variant: ChipVariant,
        bus: MockBus,
    }

    impl RadioChip<MockBus> for MockChip {
        fn variant(&self) -> ChipVariant {
            self.variant
        }

        fn begin(&mut self, frequency_hz: u32) -> Result<(), RadioError> {
            self.bus.record(ChipCall::Begin(frequency_hz));
            if self.bus.state().fail_begin {
                return Err(RadioError::ChipNotFound);
            }
            Ok(())
        }

        fn transmit(&mut self, data: &[u8]) -> Result<(), RadioError> {
            self.bus.record(ChipCall::Transmit(data.to_vec()));
            if self.bus.state().fail_transmit {
                return Err(RadioError::TransmitFailed);
            }
            Ok(())
        }

        fn start_transmit(&mut self, data: &[u8]) -> Result<(), RadioError> {
            self.bus.record(ChipCall::StartTransmit(data.to_vec()));
            if self.bus.state().fail_transmit {
                return Err(RadioError::TransmitFailed);
            }
            Ok(())
        }

        fn start_receive(&mut self) -> Result<(), RadioError> {
            self.bus.record(ChipCall::StartReceive);
            Ok(())
        }

        fn packet_length(&mut self) -> usize {
            self.bus.state().reported_length
        }

        fn read_data(&mut self, buf: &mut [u8]) -> Result<(), RadioError> {
            self.bus.record(ChipCall::ReadData(buf.len()));
            let mut state = self.bus.state();
            if state.fail_read {
                return Err(RadioError::CrcError);
            }
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte = state.rx_payload.get(i).copied().unwrap_or(0);
            }
            // Reading clears RX done
            state.reported_length = 0;
            Ok(())
        }

        fn packet_rssi(&mut self) -> i16 {
            self.bus.state().rssi
        }

        fn packet_snr(&mut self) -> f32 {
            self.bus.state().snr
        }

        fn frequency_error(&mut self) -> i32 {
            self.bus.state().frequency_error
        }

        fn current_rssi(&mut self) -> i16 {
            self.bus.state().rssi
        }

        fn random_byte(&mut self) -> u8 {
            0x5A
        }

        fn set_frequency(&mut self, frequency_hz: u32) -> Result<(), RadioError> {
            self.bus.record(ChipCall::SetFrequency(frequency_hz));
            Ok(())
        }

        fn set_spreading_factor(&mut self, spreading_factor: u8) -> Result<(), RadioError> {
            self.bus.record(ChipCall::SetSpreadingFactor(spreading_factor));
            Ok(())
        }

        fn set_bandwidth(&mut self, bandwidth_hz: u32) -> Result<(), RadioError> {
            self.bus.record(ChipCall::SetBandwidth(bandwidth_hz));
            Ok(())
        }

        fn set_coding_rate(&mut self, denominator: u8) -> Result<(), RadioError> {
            self.bus.record(ChipCall::SetCodingRate(denominator));
            Ok(())
        }

        fn set_sync_word(&mut self, word: &[u8]) -> Result<(), RadioError> {
            self.bus.record(ChipCall::SetSyncWord(word.to_vec()));
            Ok(())
        }

        fn set_crc(&mut self, enabled: bool) -> Result<(), RadioError> {
            self.bus.record(ChipCall::SetCrc(enabled));
            Ok(())
        }

        fn invert_iq(&mut self, enabled: bool) -> Result<(), RadioError> {
            self.bus.record(ChipCall::InvertIq(enabled));
            Ok(())
        }

        fn set_header_mode(&mut self, mode: HeaderMode) -> Result<(), RadioError> {
            self.bus.record(ChipCall::SetHeaderMode(mode));
            Ok(())
        }

        fn set_preamble_length(&mut self, symbols: u16) -> Result<(), RadioError> {
            self.bus.record(ChipCall::SetPreambleLength(symbols));
            Ok(())
        }

        fn set_output_power(&mut self, power_dbm: i8) -> Result<(), RadioError> {
            self.bus.record(ChipCall::SetOutputPower(power_dbm));
            Ok(())
        }

        fn set_current_limit(&mut self, current_ma: u8) -> Result<(), RadioError> {
            self.bus.record(ChipCall::SetCurrentLimit(current_ma));
            Ok(())
        }

        fn standby(&mut self) -> Result<(), RadioError> {
            self.bus.record(ChipCall::Standby);
            Ok(())
        }

        fn sleep(&mut self) -> Result<(), RadioError> {
            self.bus.record(ChipCall::Sleep);
            Ok(())
        }

        fn release(self: Box<Self>) -> MockBus {
            self.bus.state().releases += 1;
            self.bus
        }
    }

    /// Factory producing [`MockChip`]s
    #[derive(Debug, Default)]
    pub struct MockFactory;

    impl ChipFactory for MockFactory {
        type Bus = MockBus;

        fn build(&self, variant: ChipVariant, bus: MockBus) -> Box<dyn RadioChip<MockBus>> {
            bus.state().built.push(variant);
            Box::new(MockChip { variant, bus })
        }
    }
}
