//! SX1276 / SX1277 / SX1278 / SX1279 chip handle
//!
//! Register-mapped model: one address byte (bit 7 set for writes) followed
//! by data. No BUSY handshake; DIO0 carries RX done / TX done.

use crate::config::{lora_defaults, radio};
use crate::radio::bus::RadioBus;
use crate::radio::traits::{
    clamp_coding_rate, clamp_spreading_factor, needs_low_data_rate_optimize, HeaderMode, RadioChip,
    RadioError,
};
use crate::radio::variant::ChipVariant;
use alloc::boxed::Box;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiBus;

/// SX127x register addresses (LoRa page)
mod reg {
    pub const FIFO: u8 = 0x00;
    pub const OP_MODE: u8 = 0x01;
    pub const FRF_MSB: u8 = 0x06;
    pub const FRF_MID: u8 = 0x07;
    pub const FRF_LSB: u8 = 0x08;
    pub const PA_CONFIG: u8 = 0x09;
    pub const OCP: u8 = 0x0B;
    pub const LNA: u8 = 0x0C;
    pub const FIFO_ADDR_PTR: u8 = 0x0D;
    pub const FIFO_TX_BASE_ADDR: u8 = 0x0E;
    pub const FIFO_RX_BASE_ADDR: u8 = 0x0F;
    pub const FIFO_RX_CURRENT_ADDR: u8 = 0x10;
    pub const IRQ_FLAGS: u8 = 0x12;
    pub const RX_NB_BYTES: u8 = 0x13;
    pub const PKT_SNR_VALUE: u8 = 0x19;
    pub const PKT_RSSI_VALUE: u8 = 0x1A;
    pub const RSSI_VALUE: u8 = 0x1B;
    pub const MODEM_CONFIG_1: u8 = 0x1D;
    pub const MODEM_CONFIG_2: u8 = 0x1E;
    pub const PREAMBLE_MSB: u8 = 0x20;
    pub const PREAMBLE_LSB: u8 = 0x21;
    pub const PAYLOAD_LENGTH: u8 = 0x22;
    pub const MODEM_CONFIG_3: u8 = 0x26;
    pub const FREQ_ERROR_MSB: u8 = 0x28;
    pub const RSSI_WIDEBAND: u8 = 0x2C;
    pub const DETECT_OPTIMIZE: u8 = 0x31;
    pub const INVERT_IQ: u8 = 0x33;
    pub const DETECTION_THRESHOLD: u8 = 0x37;
    pub const SYNC_WORD: u8 = 0x39;
    pub const INVERT_IQ2: u8 = 0x3B;
    pub const DIO_MAPPING_1: u8 = 0x40;
    pub const VERSION: u8 = 0x42;
    pub const PA_DAC: u8 = 0x4D;
}

/// Operating modes
mod mode {
    pub const LORA: u8 = 0x80;
    pub const SLEEP: u8 = 0x00;
    pub const STDBY: u8 = 0x01;
    pub const TX: u8 = 0x03;
    pub const RX_CONTINUOUS: u8 = 0x05;
}

/// IRQ flags
mod irq {
    pub const TX_DONE: u8 = 0x08;
    pub const PAYLOAD_CRC_ERROR: u8 = 0x20;
    pub const RX_DONE: u8 = 0x40;
    pub const ALL: u8 = 0xFF;
}

/// DIO0 mapping: 00 = RxDone, 01 = TxDone
mod dio0 {
    pub const RX_DONE: u8 = 0x00;
    pub const TX_DONE: u8 = 0x40;
}

/// Silicon revision reported by every SX127x part
const EXPECTED_VERSION: u8 = 0x12;

/// Crystal frequency
const FXOSC_HZ: u64 = 32_000_000;

/// Below this the LF port (and its RSSI offset) is in use
const MID_BAND_THRESHOLD_HZ: u32 = 525_000_000;
const RSSI_OFFSET_LF_PORT: i16 = 164;
const RSSI_OFFSET_HF_PORT: i16 = 157;

/// SX127x chip handle
pub struct Sx127x<Spi, Nss, Nrst, Busy, Delay> {
    variant: ChipVariant,
    bus: RadioBus<Spi, Nss, Nrst, Busy, Delay>,
    frequency_hz: u32,
    bandwidth_hz: u32,
    spreading_factor: u8,
    header: HeaderMode,
    /// FIFO address of the packet reported by `packet_length`
    rx_addr: u8,
}

impl<Spi, Nss, Nrst, Busy, Delay> Sx127x<Spi, Nss, Nrst, Busy, Delay>
where
    Spi: SpiBus,
    Nss: OutputPin,
    Nrst: OutputPin,
    Busy: InputPin,
    Delay: DelayNs,
{
    pub fn new(variant: ChipVariant, bus: RadioBus<Spi, Nss, Nrst, Busy, Delay>) -> Self {
        Self {
            variant,
            bus,
            frequency_hz: lora_defaults::FREQUENCY_HZ,
            bandwidth_hz: lora_defaults::BANDWIDTH_HZ,
            spreading_factor: lora_defaults::SPREADING_FACTOR,
            header: HeaderMode::Explicit,
            rx_addr: 0,
        }
    }

    fn read_register(&mut self, addr: u8) -> Result<u8, RadioError> {
        let mut frame = [addr & 0x7F, 0x00];
        self.bus.transaction(|spi| spi.transfer_in_place(&mut frame))?;
        Ok(frame[1])
    }

    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), RadioError> {
        self.bus.transaction(|spi| spi.write(&[addr | 0x80, value]))
    }

    /// Read-modify-write of the bits selected by `mask`
    fn update_register(&mut self, addr: u8, mask: u8, value: u8) -> Result<(), RadioError> {
        let current = self.read_register(addr)?;
        self.write_register(addr, (current & !mask) | (value & mask))
    }

    fn write_fifo(&mut self, data: &[u8]) -> Result<(), RadioError> {
        self.bus.transaction(|spi| {
            spi.write(&[reg::FIFO | 0x80])?;
            spi.write(data)
        })
    }

    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), RadioError> {
        self.bus.transaction(|spi| {
            spi.write(&[reg::FIFO & 0x7F])?;
            spi.read(buf)
        })
    }

    fn set_mode(&mut self, op: u8) -> Result<(), RadioError> {
        self.write_register(reg::OP_MODE, mode::LORA | op)
    }

    /// Low data rate optimisation follows SF and bandwidth
    fn update_ldro(&mut self) -> Result<(), RadioError> {
        let ldro = needs_low_data_rate_optimize(self.spreading_factor, self.bandwidth_hz);
        self.update_register(reg::MODEM_CONFIG_3, 0x08, if ldro { 0x08 } else { 0x00 })
    }

    fn rssi_offset(&self) -> i16 {
        if self.variant.is_low_band() || self.frequency_hz < MID_BAND_THRESHOLD_HZ {
            RSSI_OFFSET_LF_PORT
        } else {
            RSSI_OFFSET_HF_PORT
        }
    }

    /// Load a payload into the FIFO with DIO0 mapped to TX done
    fn prepare_transmit(&mut self, data: &[u8]) -> Result<(), RadioError> {
        if data.is_empty() || data.len() > radio::TX_BUFFER_SIZE - 1 {
            return Err(RadioError::InvalidConfig);
        }

        self.set_mode(mode::STDBY)?;
        self.write_register(reg::DIO_MAPPING_1, dio0::TX_DONE)?;
        self.write_register(reg::FIFO_ADDR_PTR, 0x00)?;
        self.write_fifo(data)?;
        self.write_register(reg::PAYLOAD_LENGTH, data.len() as u8)
    }

    fn pending_length(&mut self) -> Result<usize, RadioError> {
        let flags = self.read_register(reg::IRQ_FLAGS)?;
        if flags & irq::RX_DONE == 0 {
            return Ok(0);
        }
        if flags & irq::PAYLOAD_CRC_ERROR != 0 {
            self.write_register(reg::IRQ_FLAGS, flags)?;
            return Ok(0);
        }

        let len = match self.header {
            HeaderMode::Implicit => self.read_register(reg::PAYLOAD_LENGTH)?,
            HeaderMode::Explicit => self.read_register(reg::RX_NB_BYTES)?,
        };
        self.rx_addr = self.read_register(reg::FIFO_RX_CURRENT_ADDR)?;
        Ok(len as usize)
    }
}

impl<Spi, Nss, Nrst, Busy, Delay> RadioChip<RadioBus<Spi, Nss, Nrst, Busy, Delay>>
    for Sx127x<Spi, Nss, Nrst, Busy, Delay>
where
    Spi: SpiBus + Send,
    Nss: OutputPin + Send,
    Nrst: OutputPin + Send,
    Busy: InputPin + Send,
    Delay: DelayNs + Send,
{
    fn variant(&self) -> ChipVariant {
        self.variant
    }

    fn begin(&mut self, frequency_hz: u32) -> Result<(), RadioError> {
        self.bus.reset(10, 10);

        if self.read_register(reg::VERSION)? != EXPECTED_VERSION {
            return Err(RadioError::ChipNotFound);
        }

        // LoRa mode can only be selected from sleep
        self.set_mode(mode::SLEEP)?;
        self.set_frequency(frequency_hz)?;

        self.write_register(reg::FIFO_TX_BASE_ADDR, 0x00)?;
        self.write_register(reg::FIFO_RX_BASE_ADDR, 0x00)?;

        // LNA boost, AGC auto
        self.update_register(reg::LNA, 0x03, 0x03)?;
        self.write_register(reg::MODEM_CONFIG_3, 0x04)?;

        self.set_output_power(lora_defaults::TX_POWER_DBM)?;
        self.set_mode(mode::STDBY)
    }

    fn transmit(&mut self, data: &[u8]) -> Result<(), RadioError> {
        self.prepare_transmit(data)?;
        self.set_mode(mode::TX)?;

        for _ in 0..radio::TX_TIMEOUT_MS {
            if self.read_register(reg::IRQ_FLAGS)? & irq::TX_DONE != 0 {
                // Chip drops back to standby on its own
                return self.write_register(reg::IRQ_FLAGS, irq::TX_DONE);
            }
            self.bus.delay.delay_ms(1);
        }

        self.set_mode(mode::STDBY)?;
        Err(RadioError::Timeout)
    }

    fn start_transmit(&mut self, data: &[u8]) -> Result<(), RadioError> {
        self.prepare_transmit(data)?;
        self.set_mode(mode::TX)
    }

    fn start_receive(&mut self) -> Result<(), RadioError> {
        self.set_mode(mode::STDBY)?;
        self.write_register(reg::DIO_MAPPING_1, dio0::RX_DONE)?;
        self.write_register(reg::IRQ_FLAGS, irq::ALL)?;
        self.write_register(reg::FIFO_ADDR_PTR, 0x00)?;

        if self.header == HeaderMode::Implicit {
            self.write_register(reg::PAYLOAD_LENGTH, radio::IMPLICIT_PAYLOAD_LENGTH)?;
        }

        self.set_mode(mode::RX_CONTINUOUS)
    }

    fn packet_length(&mut self) -> usize {
        self.pending_length().unwrap_or(0)
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<(), RadioError> {
        self.write_register(reg::FIFO_ADDR_PTR, self.rx_addr)?;
        let read = self.read_fifo(buf);
        self.write_register(reg::IRQ_FLAGS, irq::ALL)?;
        read
    }

    fn packet_rssi(&mut self) -> i16 {
        match self.read_register(reg::PKT_RSSI_VALUE) {
            Ok(raw) => raw as i16 - self.rssi_offset(),
            Err(_) => 0,
        }
    }

    fn packet_snr(&mut self) -> f32 {
        match self.read_register(reg::PKT_SNR_VALUE) {
            Ok(raw) => (raw as i8) as f32 * 0.25,
            Err(_) => 0.0,
        }
    }

    fn frequency_error(&mut self) -> i32 {
        let mut raw = [0u8; 3];
        for (i, byte) in raw.iter_mut().enumerate() {
            match self.read_register(reg::FREQ_ERROR_MSB + i as u8) {
                Ok(value) => *byte = value,
                Err(_) => return 0,
            }
        }

        let mut fei = (((raw[0] & 0x07) as i32) << 16) | ((raw[1] as i32) << 8) | raw[2] as i32;
        // Sign-extend the 20-bit value
        if raw[0] & 0x08 != 0 {
            fei -= 0x8_0000;
        }

        let bw_khz = self.bandwidth_hz as f32 / 1000.0;
        let error = (fei as f32 * (1u32 << 24) as f32 / FXOSC_HZ as f32) * (bw_khz / 500.0);
        error as i32
    }

    fn current_rssi(&mut self) -> i16 {
        match self.read_register(reg::RSSI_VALUE) {
            Ok(raw) => raw as i16 - self.rssi_offset(),
            Err(_) => 0,
        }
    }

    fn random_byte(&mut self) -> u8 {
        self.read_register(reg::RSSI_WIDEBAND).unwrap_or(0)
    }

    fn set_frequency(&mut self, frequency_hz: u32) -> Result<(), RadioError> {
        // Frf_reg = (Freq * 2^19) / Fxosc
        let frf = ((frequency_hz as u64) << 19) / FXOSC_HZ;

        self.write_register(reg::FRF_MSB, ((frf >> 16) & 0xFF) as u8)?;
        self.write_register(reg::FRF_MID, ((frf >> 8) & 0xFF) as u8)?;
        self.write_register(reg::FRF_LSB, (frf & 0xFF) as u8)?;
        self.frequency_hz = frequency_hz;
        Ok(())
    }

    fn set_spreading_factor(&mut self, spreading_factor: u8) -> Result<(), RadioError> {
        let spreading_factor = clamp_spreading_factor(spreading_factor);

        // SF6 needs its own detection settings and implicit header mode
        if spreading_factor == 6 {
            self.write_register(reg::DETECT_OPTIMIZE, 0xC5)?;
            self.write_register(reg::DETECTION_THRESHOLD, 0x0C)?;
        } else {
            self.write_register(reg::DETECT_OPTIMIZE, 0xC3)?;
            self.write_register(reg::DETECTION_THRESHOLD, 0x0A)?;
        }

        self.update_register(reg::MODEM_CONFIG_2, 0xF0, spreading_factor << 4)?;
        self.spreading_factor = spreading_factor;
        self.update_ldro()
    }

    fn set_bandwidth(&mut self, bandwidth_hz: u32) -> Result<(), RadioError> {
        let code = bandwidth_code(bandwidth_hz).ok_or(RadioError::InvalidConfig)?;
        self.update_register(reg::MODEM_CONFIG_1, 0xF0, code << 4)?;
        self.bandwidth_hz = bandwidth_hz;
        self.update_ldro()
    }

    fn set_coding_rate(&mut self, denominator: u8) -> Result<(), RadioError> {
        let cr = clamp_coding_rate(denominator) - 4;
        self.update_register(reg::MODEM_CONFIG_1, 0x0E, cr << 1)
    }

    fn set_sync_word(&mut self, word: &[u8]) -> Result<(), RadioError> {
        match word {
            [sync] => self.write_register(reg::SYNC_WORD, *sync),
            _ => Err(RadioError::InvalidConfig),
        }
    }

    fn set_crc(&mut self, enabled: bool) -> Result<(), RadioError> {
        self.update_register(reg::MODEM_CONFIG_2, 0x04, if enabled { 0x04 } else { 0x00 })
    }

    fn invert_iq(&mut self, enabled: bool) -> Result<(), RadioError> {
        if enabled {
            self.write_register(reg::INVERT_IQ, 0x66)?;
            self.write_register(reg::INVERT_IQ2, 0x19)
        } else {
            self.write_register(reg::INVERT_IQ, 0x27)?;
            self.write_register(reg::INVERT_IQ2, 0x1D)
        }
    }

    fn set_header_mode(&mut self, mode: HeaderMode) -> Result<(), RadioError> {
        let bit = match mode {
            HeaderMode::Explicit => 0x00,
            HeaderMode::Implicit => 0x01,
        };
        self.update_register(reg::MODEM_CONFIG_1, 0x01, bit)?;
        self.header = mode;
        Ok(())
    }

    fn set_preamble_length(&mut self, symbols: u16) -> Result<(), RadioError> {
        self.write_register(reg::PREAMBLE_MSB, (symbols >> 8) as u8)?;
        self.write_register(reg::PREAMBLE_LSB, (symbols & 0xFF) as u8)
    }

    fn set_output_power(&mut self, power_dbm: i8) -> Result<(), RadioError> {
        // PA_BOOST output; +20 dBm needs the high power DAC
        let level = if power_dbm > 17 {
            self.write_register(reg::PA_DAC, 0x87)?;
            self.set_current_limit(140)?;
            power_dbm.min(20) - 3
        } else {
            self.write_register(reg::PA_DAC, 0x84)?;
            self.set_current_limit(100)?;
            power_dbm.max(2)
        };

        self.write_register(reg::PA_CONFIG, 0x80 | (level - 2) as u8)
    }

    fn set_current_limit(&mut self, current_ma: u8) -> Result<(), RadioError> {
        let trim = match current_ma {
            0..=120 => current_ma.saturating_sub(45) / 5,
            121..=240 => ((current_ma as u16 + 30) / 10) as u8,
            _ => 27,
        };
        self.write_register(reg::OCP, 0x20 | (trim & 0x1F))
    }

    fn standby(&mut self) -> Result<(), RadioError> {
        self.set_mode(mode::STDBY)
    }

    fn sleep(&mut self) -> Result<(), RadioError> {
        self.set_mode(mode::SLEEP)
    }

    fn release(self: Box<Self>) -> RadioBus<Spi, Nss, Nrst, Busy, Delay> {
        self.bus
    }
}

/// SX127x bandwidth code, rounding up to the next supported bandwidth
fn bandwidth_code(bandwidth_hz: u32) -> Option<u8> {
    match bandwidth_hz {
        0..=7_800 => Some(0),
        ..=10_400 => Some(1),
        ..=15_600 => Some(2),
        ..=20_800 => Some(3),
        ..=31_250 => Some(4),
        ..=41_700 => Some(5),
        ..=62_500 => Some(6),
        ..=125_000 => Some(7),
        ..=250_000 => Some(8),
        ..=500_000 => Some(9),
        _ => None,
    }
}
