//! SX1262 / SX1268 chip handle
//!
//! Command-based register model with a BUSY handshake. All calls are
//! blocking and bounded so the receive path can run from the IRQ handler.

use crate::config::{lora_defaults, radio, tcxo};
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

/// SX126x command opcodes
mod cmd {
    pub const SET_SLEEP: u8 = 0x84;
    pub const SET_STANDBY: u8 = 0x80;
    pub const SET_TX: u8 = 0x83;
    pub const SET_RX: u8 = 0x82;
    pub const SET_RF_FREQUENCY: u8 = 0x86;
    pub const SET_PACKET_TYPE: u8 = 0x8A;
    pub const SET_MODULATION_PARAMS: u8 = 0x8B;
    pub const SET_PACKET_PARAMS: u8 = 0x8C;
    pub const SET_BUFFER_BASE_ADDRESS: u8 = 0x8F;
    pub const SET_PA_CONFIG: u8 = 0x95;
    pub const SET_DIO3_AS_TCXO_CTRL: u8 = 0x97;
    pub const SET_DIO2_AS_RF_SWITCH_CTRL: u8 = 0x9D;
    pub const SET_TX_PARAMS: u8 = 0x8E;
    pub const CALIBRATE: u8 = 0x89;
    pub const CALIBRATE_IMAGE: u8 = 0x98;
    pub const WRITE_BUFFER: u8 = 0x0E;
    pub const READ_BUFFER: u8 = 0x1E;
    pub const WRITE_REGISTER: u8 = 0x0D;
    pub const READ_REGISTER: u8 = 0x1D;
    pub const GET_RX_BUFFER_STATUS: u8 = 0x13;
    pub const GET_PACKET_STATUS: u8 = 0x14;
    pub const GET_RSSI_INST: u8 = 0x15;
    pub const GET_IRQ_STATUS: u8 = 0x12;
    pub const CLEAR_IRQ_STATUS: u8 = 0x02;
    pub const SET_DIO_IRQ_PARAMS: u8 = 0x08;
}

/// SX126x register addresses
mod reg {
    /// LoRa sync word, MSB then LSB
    pub const SYNC_WORD: u16 = 0x0740;
    /// IQ polarity fix-up (datasheet 15.4)
    pub const IQ_POLARITY: u16 = 0x0736;
    /// Frequency error estimate, 20-bit signed
    pub const FREQ_ERROR: u16 = 0x076B;
    pub const RANDOM_NUMBER: u16 = 0x0819;
    /// Over-current protection register
    pub const OCP_CONFIGURATION: u16 = 0x08E7;
}

/// Standby modes
mod standby {
    pub const STDBY_RC: u8 = 0x00;
}

/// Packet types
mod packet_type {
    pub const LORA: u8 = 0x01;
}

/// IRQ masks
mod irq {
    pub const TX_DONE: u16 = 0x0001;
    pub const RX_DONE: u16 = 0x0002;
    pub const HEADER_ERR: u16 = 0x0020;
    pub const CRC_ERR: u16 = 0x0040;
    pub const TIMEOUT: u16 = 0x0200;
    pub const ALL: u16 = 0xFFFF;
}

/// Sync word MSB after reset in LoRa mode, used to detect the chip
const SYNC_WORD_RESET_MSB: u8 = 0x14;

/// Modulation parameters are written as one command, so keep them together
#[derive(Debug, Clone, Copy)]
struct Modulation {
    spreading_factor: u8,
    bandwidth_hz: u32,
    coding_rate: u8,
}

/// Packet parameters, also written as one command
#[derive(Debug, Clone, Copy)]
struct PacketParams {
    preamble_length: u16,
    header: HeaderMode,
    payload_len: u8,
    crc: bool,
    invert_iq: bool,
}

/// SX126x chip handle
pub struct Sx126x<Spi, Nss, Nrst, Busy, Delay> {
    variant: ChipVariant,
    bus: RadioBus<Spi, Nss, Nrst, Busy, Delay>,
    modulation: Modulation,
    packet: PacketParams,
    rx_offset: u8,
    sleeping: bool,
}

impl<Spi, Nss, Nrst, Busy, Delay> Sx126x<Spi, Nss, Nrst, Busy, Delay>
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
            modulation: Modulation {
                spreading_factor: lora_defaults::SPREADING_FACTOR,
                bandwidth_hz: lora_defaults::BANDWIDTH_HZ,
                coding_rate: lora_defaults::CODING_RATE,
            },
            packet: PacketParams {
                preamble_length: lora_defaults::PREAMBLE_LENGTH,
                header: HeaderMode::Explicit,
                payload_len: radio::IMPLICIT_PAYLOAD_LENGTH,
                crc: true,
                invert_iq: false,
            },
            rx_offset: 0,
            sleeping: false,
        }
    }

    /// Wait for the BUSY pin to go low
    fn wait_not_busy(&mut self) -> Result<(), RadioError> {
        // Poll with timeout
        for _ in 0..1000 {
            if self.bus.busy.is_low().unwrap_or(false) {
                return Ok(());
            }
            self.bus.delay.delay_us(100);
        }
        Err(RadioError::BusyTimeout)
    }

    /// Write a command to the radio
    fn write_command(&mut self, cmd: u8, data: &[u8]) -> Result<(), RadioError> {
        self.wait_not_busy()?;

        let mut buf = [0u8; 16];
        buf[0] = cmd;
        let len = 1 + data.len().min(15);
        buf[1..len].copy_from_slice(&data[..len - 1]);

        self.bus.transaction(|spi| spi.write(&buf[..len]))
    }

    /// Read a command response (status byte skipped)
    fn read_command(&mut self, cmd: u8, out: &mut [u8]) -> Result<(), RadioError> {
        self.wait_not_busy()?;

        // Command byte + NOP (status), then the response
        self.bus.transaction(|spi| {
            spi.write(&[cmd, 0x00])?;
            spi.read(out)
        })
    }

    /// Write consecutive registers starting at `addr`
    fn write_register(&mut self, addr: u16, values: &[u8]) -> Result<(), RadioError> {
        let mut data = [0u8; 15];
        let len = values.len().min(13);
        data[0] = (addr >> 8) as u8;
        data[1] = (addr & 0xFF) as u8;
        data[2..2 + len].copy_from_slice(&values[..len]);
        self.write_command(cmd::WRITE_REGISTER, &data[..2 + len])
    }

    /// Read consecutive registers starting at `addr`
    fn read_register(&mut self, addr: u16, out: &mut [u8]) -> Result<(), RadioError> {
        self.wait_not_busy()?;

        self.bus.transaction(|spi| {
            spi.write(&[cmd::READ_REGISTER, (addr >> 8) as u8, (addr & 0xFF) as u8, 0x00])?;
            spi.read(out)
        })
    }

    /// Write data to TX buffer
    fn write_buffer(&mut self, offset: u8, data: &[u8]) -> Result<(), RadioError> {
        self.wait_not_busy()?;

        self.bus.transaction(|spi| {
            spi.write(&[cmd::WRITE_BUFFER, offset])?;
            spi.write(data)
        })
    }

    /// Read data from RX buffer
    fn read_buffer(&mut self, offset: u8, out: &mut [u8]) -> Result<(), RadioError> {
        self.wait_not_busy()?;

        // Command + offset + NOP, then data
        self.bus.transaction(|spi| {
            spi.write(&[cmd::READ_BUFFER, offset, 0x00])?;
            spi.read(out)
        })
    }

    /// Configure DIO3 as TCXO control
    fn configure_tcxo(&mut self) -> Result<(), RadioError> {
        // SetDIO3AsTcxoCtrl: voltage code + timeout (24-bit)
        let timeout = tcxo::STARTUP_TIMEOUT;
        let data = [
            tcxo::VOLTAGE_CODE,
            ((timeout >> 16) & 0xFF) as u8,
            ((timeout >> 8) & 0xFF) as u8,
            (timeout & 0xFF) as u8,
        ];
        self.write_command(cmd::SET_DIO3_AS_TCXO_CTRL, &data)?;
        // Calibration ran against the RC clock, redo it on the TCXO
        self.bus.delay.delay_ms(10);
        self.write_command(cmd::CALIBRATE, &[0x7F])
    }

    /// Configure DIO2 as RF switch control
    fn configure_dio2_rf_switch(&mut self) -> Result<(), RadioError> {
        self.write_command(cmd::SET_DIO2_AS_RF_SWITCH_CTRL, &[0x01])
    }

    /// Image calibration for the band containing `freq_hz`
    fn calibrate_image(&mut self, freq_hz: u32) -> Result<(), RadioError> {
        let band = match freq_hz {
            902_000_000.. => [0xE1, 0xE9],
            863_000_000.. => [0xD7, 0xDB],
            779_000_000.. => [0xC1, 0xC5],
            470_000_000.. => [0x75, 0x81],
            _ => [0x6B, 0x6F],
        };
        self.write_command(cmd::CALIBRATE_IMAGE, &band)
    }

    /// Set standby mode
    fn set_standby_internal(&mut self) -> Result<(), RadioError> {
        if self.sleeping {
            // NSS falling edge wakes the chip; BUSY drops once it is up
            let _ = self.bus.nss.set_low();
            let woke = self.wait_not_busy();
            let _ = self.bus.nss.set_high();
            woke?;
            self.sleeping = false;
        }
        self.write_command(cmd::SET_STANDBY, &[standby::STDBY_RC])
    }

    /// Set packet type to LoRa
    fn set_packet_type_lora(&mut self) -> Result<(), RadioError> {
        self.write_command(cmd::SET_PACKET_TYPE, &[packet_type::LORA])
    }

    /// Set buffer base addresses
    fn set_buffer_base_address(&mut self, tx_base: u8, rx_base: u8) -> Result<(), RadioError> {
        self.write_command(cmd::SET_BUFFER_BASE_ADDRESS, &[tx_base, rx_base])
    }

    /// Route `irq_mask` to the status register and `dio1_mask` to DIO1
    fn configure_irq(&mut self, irq_mask: u16, dio1_mask: u16) -> Result<(), RadioError> {
        let data = [
            (irq_mask >> 8) as u8,
            (irq_mask & 0xFF) as u8,
            (dio1_mask >> 8) as u8,
            (dio1_mask & 0xFF) as u8,
            0x00,
            0x00, // DIO2 mask
            0x00,
            0x00, // DIO3 mask
        ];
        self.write_command(cmd::SET_DIO_IRQ_PARAMS, &data)
    }

    /// Clear IRQ status
    fn clear_irq(&mut self, irq_mask: u16) -> Result<(), RadioError> {
        let data = [(irq_mask >> 8) as u8, (irq_mask & 0xFF) as u8];
        self.write_command(cmd::CLEAR_IRQ_STATUS, &data)
    }

    /// Get IRQ status
    fn get_irq_status(&mut self) -> Result<u16, RadioError> {
        let mut result = [0u8; 2];
        self.read_command(cmd::GET_IRQ_STATUS, &mut result)?;
        Ok(((result[0] as u16) << 8) | (result[1] as u16))
    }

    /// Get packet status: (rssi raw, snr raw)
    fn get_packet_status(&mut self) -> Result<(u8, i8), RadioError> {
        let mut result = [0u8; 3];
        self.read_command(cmd::GET_PACKET_STATUS, &mut result)?;
        Ok((result[0], result[1] as i8))
    }

    /// Set modulation parameters
    fn apply_modulation(&mut self) -> Result<(), RadioError> {
        let m = self.modulation;
        let bw = bandwidth_code(m.bandwidth_hz).ok_or(RadioError::InvalidConfig)?;
        // 4/5 .. 4/8 map to 0x01 .. 0x04
        let cr = m.coding_rate.saturating_sub(4);
        let ldro = needs_low_data_rate_optimize(m.spreading_factor, m.bandwidth_hz) as u8;

        let data = [m.spreading_factor, bw, cr, ldro];
        self.write_command(cmd::SET_MODULATION_PARAMS, &data)
    }

    /// Set packet parameters
    fn apply_packet_params(&mut self) -> Result<(), RadioError> {
        let p = self.packet;
        let data = [
            (p.preamble_length >> 8) as u8,
            (p.preamble_length & 0xFF) as u8,
            match p.header {
                HeaderMode::Explicit => 0x00,
                HeaderMode::Implicit => 0x01,
            },
            p.payload_len,
            p.crc as u8,
            p.invert_iq as u8,
        ];
        self.write_command(cmd::SET_PACKET_PARAMS, &data)
    }

    /// Load a payload and configure packet/IRQ parameters for TX
    fn prepare_transmit(&mut self, data: &[u8]) -> Result<(), RadioError> {
        if data.is_empty() || data.len() > radio::TX_BUFFER_SIZE - 1 {
            return Err(RadioError::InvalidConfig);
        }

        self.set_standby_internal()?;

        self.packet.payload_len = data.len() as u8;
        self.apply_packet_params()?;

        self.set_buffer_base_address(0x00, 0x00)?;
        self.write_buffer(0x00, data)?;

        self.configure_irq(irq::TX_DONE | irq::TIMEOUT, irq::TX_DONE)?;
        self.clear_irq(irq::ALL)
    }
}

impl<Spi, Nss, Nrst, Busy, Delay> RadioChip<RadioBus<Spi, Nss, Nrst, Busy, Delay>>
    for Sx126x<Spi, Nss, Nrst, Busy, Delay>
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
        self.bus.reset(10, 20);
        self.sleeping = false;
        self.wait_not_busy()?;
        self.set_standby_internal()?;

        // Board quirks: WIO-SX1262 runs from a 1.8V TCXO and switches the
        // antenna with DIO2. Modules without them reject these, carry on.
        let _ = self.configure_tcxo();
        let _ = self.configure_dio2_rf_switch();

        self.set_packet_type_lora()?;

        let mut sync = [0u8; 1];
        self.read_register(reg::SYNC_WORD, &mut sync)?;
        if sync[0] != SYNC_WORD_RESET_MSB {
            return Err(RadioError::ChipNotFound);
        }

        self.set_buffer_base_address(0x00, 0x00)?;
        self.calibrate_image(frequency_hz)?;
        self.set_frequency(frequency_hz)?;
        self.apply_modulation()?;
        self.apply_packet_params()?;
        self.set_current_limit(lora_defaults::CURRENT_LIMIT_MA)
    }

    fn transmit(&mut self, data: &[u8]) -> Result<(), RadioError> {
        self.prepare_transmit(data)?;

        // Start transmission (timeout 0 = no timeout)
        self.write_command(cmd::SET_TX, &[0x00, 0x00, 0x00])?;

        let mut irq_status = 0;
        for _ in 0..radio::TX_TIMEOUT_MS {
            irq_status = self.get_irq_status()?;
            if irq_status & (irq::TX_DONE | irq::TIMEOUT) != 0 {
                break;
            }
            self.bus.delay.delay_ms(1);
        }

        self.clear_irq(irq::ALL)?;
        self.set_standby_internal()?;

        if irq_status & irq::TX_DONE != 0 {
            Ok(())
        } else if irq_status & irq::TIMEOUT != 0 {
            Err(RadioError::TransmitFailed)
        } else {
            Err(RadioError::Timeout)
        }
    }

    fn start_transmit(&mut self, data: &[u8]) -> Result<(), RadioError> {
        self.prepare_transmit(data)?;
        self.write_command(cmd::SET_TX, &[0x00, 0x00, 0x00])
    }

    fn start_receive(&mut self) -> Result<(), RadioError> {
        self.set_standby_internal()?;

        // Set packet parameters for max length
        if self.packet.header == HeaderMode::Explicit {
            self.packet.payload_len = radio::IMPLICIT_PAYLOAD_LENGTH;
        }
        self.apply_packet_params()?;
        self.set_buffer_base_address(0x00, 0x00)?;

        // Errors land in the status register, only RX done raises DIO1
        self.configure_irq(irq::RX_DONE | irq::CRC_ERR | irq::HEADER_ERR, irq::RX_DONE)?;
        self.clear_irq(irq::ALL)?;

        // Start continuous RX (timeout = 0xFFFFFF means continuous)
        self.write_command(cmd::SET_RX, &[0xFF, 0xFF, 0xFF])
    }

    fn packet_length(&mut self) -> usize {
        let status = self.get_irq_status().unwrap_or(0);
        if status & irq::RX_DONE == 0 {
            return 0;
        }
        if status & (irq::CRC_ERR | irq::HEADER_ERR) != 0 {
            let _ = self.clear_irq(irq::ALL);
            return 0;
        }

        let mut result = [0u8; 2];
        if self.read_command(cmd::GET_RX_BUFFER_STATUS, &mut result).is_err() {
            return 0;
        }
        // (payload_length, buffer_offset)
        self.rx_offset = result[1];
        result[0] as usize
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<(), RadioError> {
        let offset = self.rx_offset;
        let read = self.read_buffer(offset, buf);
        self.clear_irq(irq::ALL)?;
        read
    }

    fn packet_rssi(&mut self) -> i16 {
        match self.get_packet_status() {
            // RSSI: -result[0]/2
            Ok((rssi, _)) => -(rssi as i16) / 2,
            Err(_) => 0,
        }
    }

    fn packet_snr(&mut self) -> f32 {
        match self.get_packet_status() {
            // SNR: result[1] as signed / 4
            Ok((_, snr)) => snr as f32 / 4.0,
            Err(_) => 0.0,
        }
    }

    fn frequency_error(&mut self) -> i32 {
        let mut raw = [0u8; 3];
        if self.read_register(reg::FREQ_ERROR, &mut raw).is_err() {
            return 0;
        }
        let mut efe = (((raw[0] & 0x0F) as i32) << 16) | ((raw[1] as i32) << 8) | raw[2] as i32;
        // Sign-extend the 20-bit value
        if efe & 0x8_0000 != 0 {
            efe -= 0x10_0000;
        }
        let bw_khz = self.modulation.bandwidth_hz as f32 / 1000.0;
        (1.55 * efe as f32 / (1600.0 / bw_khz)) as i32
    }

    fn current_rssi(&mut self) -> i16 {
        let mut result = [0u8; 1];
        match self.read_command(cmd::GET_RSSI_INST, &mut result) {
            Ok(()) => -(result[0] as i16) / 2,
            Err(_) => 0,
        }
    }

    fn random_byte(&mut self) -> u8 {
        let mut value = [0u8; 1];
        let _ = self.read_register(reg::RANDOM_NUMBER, &mut value);
        value[0]
    }

    /// Set RF frequency
    fn set_frequency(&mut self, frequency_hz: u32) -> Result<(), RadioError> {
        // Frequency = (freq_rf * 2^25) / 32MHz
        let freq_reg = ((frequency_hz as u64 * (1 << 25)) / 32_000_000) as u32;
        let data = [
            ((freq_reg >> 24) & 0xFF) as u8,
            ((freq_reg >> 16) & 0xFF) as u8,
            ((freq_reg >> 8) & 0xFF) as u8,
            (freq_reg & 0xFF) as u8,
        ];
        self.write_command(cmd::SET_RF_FREQUENCY, &data)
    }

    fn set_spreading_factor(&mut self, spreading_factor: u8) -> Result<(), RadioError> {
        self.modulation.spreading_factor = clamp_spreading_factor(spreading_factor);
        self.apply_modulation()
    }

    fn set_bandwidth(&mut self, bandwidth_hz: u32) -> Result<(), RadioError> {
        if bandwidth_code(bandwidth_hz).is_none() {
            return Err(RadioError::InvalidConfig);
        }
        self.modulation.bandwidth_hz = bandwidth_hz;
        self.apply_modulation()
    }

    fn set_coding_rate(&mut self, denominator: u8) -> Result<(), RadioError> {
        self.modulation.coding_rate = clamp_coding_rate(denominator);
        self.apply_modulation()
    }

    fn set_sync_word(&mut self, word: &[u8]) -> Result<(), RadioError> {
        if word.len() != 2 {
            return Err(RadioError::InvalidConfig);
        }
        self.write_register(reg::SYNC_WORD, word)
    }

    fn set_crc(&mut self, enabled: bool) -> Result<(), RadioError> {
        self.packet.crc = enabled;
        self.apply_packet_params()
    }

    fn invert_iq(&mut self, enabled: bool) -> Result<(), RadioError> {
        self.packet.invert_iq = enabled;
        self.apply_packet_params()?;

        let mut value = [0u8; 1];
        self.read_register(reg::IQ_POLARITY, &mut value)?;
        let fixed = if enabled { value[0] & !0x04 } else { value[0] | 0x04 };
        self.write_register(reg::IQ_POLARITY, &[fixed])
    }

    fn set_header_mode(&mut self, mode: HeaderMode) -> Result<(), RadioError> {
        self.packet.header = mode;
        if mode == HeaderMode::Implicit {
            self.packet.payload_len = radio::IMPLICIT_PAYLOAD_LENGTH;
        }
        self.apply_packet_params()
    }

    fn set_preamble_length(&mut self, symbols: u16) -> Result<(), RadioError> {
        self.packet.preamble_length = symbols;
        self.apply_packet_params()
    }

    fn set_output_power(&mut self, power_dbm: i8) -> Result<(), RadioError> {
        // SetPaConfig for the high power PA:
        // paDutyCycle=0x04, hpMax=0x07, deviceSel=0x00, paLut=0x01
        self.write_command(cmd::SET_PA_CONFIG, &[0x04, 0x07, 0x00, 0x01])?;

        // Power register maps directly to dBm for -9..=22, two's complement
        let power = power_dbm.clamp(-9, 22) as u8;
        self.write_command(cmd::SET_TX_PARAMS, &[power, 0x04]) // ramp 200us
    }

    /// Set current limit (OCP - Over Current Protection)
    fn set_current_limit(&mut self, current_ma: u8) -> Result<(), RadioError> {
        // OCP register value = current_ma / 2.5
        let ocp_value = ((current_ma as u32 * 10) / 25).min(63) as u8;
        self.write_register(reg::OCP_CONFIGURATION, &[ocp_value])
    }

    fn standby(&mut self) -> Result<(), RadioError> {
        self.set_standby_internal()
    }

    fn sleep(&mut self) -> Result<(), RadioError> {
        // Warm start keeps the configuration
        self.write_command(cmd::SET_SLEEP, &[0x04])?;
        self.sleeping = true;
        Ok(())
    }

    fn release(self: Box<Self>) -> RadioBus<Spi, Nss, Nrst, Busy, Delay> {
        self.bus
    }
}

/// SX126x bandwidth code, rounding up to the next supported bandwidth
fn bandwidth_code(bandwidth_hz: u32) -> Option<u8> {
    match bandwidth_hz {
        0..=7_800 => Some(0x00),
        ..=10_400 => Some(0x08),
        ..=15_600 => Some(0x01),
        ..=20_800 => Some(0x09),
        ..=31_250 => Some(0x02),
        ..=41_700 => Some(0x0A),
        ..=62_500 => Some(0x03),
        ..=125_000 => Some(0x04),
        ..=250_000 => Some(0x05),
        ..=500_000 => Some(0x06),
        _ => None,
    }
}
