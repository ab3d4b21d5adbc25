//! LoRa to MQTT bridge
//!
//! Ties the radio, the frame decoder and the discovery publisher together.
//! The interrupt side only raises the [`ReceiveSignal`]; everything else runs
//! from [`Bridge::poll`] in task context.

use crate::config::{bridge, lora_pins, radio, spi};
use crate::mqtt::{DiscoveryPublisher, MqttPublisher, PublishError};
use crate::protocol::{decode, DecodeError};
use crate::radio::{ChipFactory, RadioCell, RadioConfig, RadioError, ReceiveSignal};
use core::fmt;
use log::{debug, error, info, warn};

/// Board wiring of the radio module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinConfig {
    pub sclk: u8,
    pub miso: u8,
    pub mosi: u8,
    pub nss: u8,
    /// DIO1 on SX126x, DIO0 on SX127x
    pub irq: u8,
    pub nrst: u8,
    /// SX126x only
    pub busy: Option<u8>,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            sclk: spi::SCLK,
            miso: spi::MISO,
            mosi: spi::MOSI,
            nss: lora_pins::NSS,
            irq: lora_pins::IRQ,
            nrst: lora_pins::NRST,
            busy: Some(lora_pins::BUSY),
        }
    }
}

impl fmt::Display for PinConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SCLK={} MISO={} MOSI={} NSS={} IRQ={} NRST={}",
            self.sclk, self.miso, self.mosi, self.nss, self.irq, self.nrst
        )?;
        match self.busy {
            Some(busy) => write!(f, " BUSY={}", busy),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub radio: RadioConfig,
    pub pins: PinConfig,
    /// Interval between status reports
    pub status_interval_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            radio: RadioConfig::default(),
            pins: PinConfig::default(),
            status_interval_ms: bridge::STATUS_INTERVAL_MS,
        }
    }
}

/// Reasons [`Bridge::setup`] can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeError {
    /// No driver installed, or the driver is already borrowed
    RadioUnavailable,
    Radio(RadioError),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::RadioUnavailable => write!(f, "radio unavailable"),
            BridgeError::Radio(e) => write!(f, "radio: {}", e),
        }
    }
}

impl From<RadioError> for BridgeError {
    fn from(e: RadioError) -> Self {
        BridgeError::Radio(e)
    }
}

/// Result of one [`Bridge::poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing received
    Idle,
    /// Frame decoded, this many messages published
    Published(usize),
    Rejected(DecodeError),
    PublishFailed(PublishError),
}

/// Counters since startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub packets: u32,
    pub rejected: u32,
    pub publish_failures: u32,
}

pub struct Bridge<F: ChipFactory + 'static, P: MqttPublisher> {
    radio: &'static RadioCell<F>,
    signal: &'static ReceiveSignal,
    publisher: P,
    discovery: DiscoveryPublisher,
    config: BridgeConfig,
    failed: bool,
    stats: BridgeStats,
    last_status_ms: u64,
    last_irq_count: u32,
}

impl<F: ChipFactory + 'static, P: MqttPublisher> Bridge<F, P> {
    /// `radio` must already hold a driver; [`Bridge::setup`] brings it up
    pub fn new(
        radio: &'static RadioCell<F>,
        signal: &'static ReceiveSignal,
        publisher: P,
        config: BridgeConfig,
    ) -> Self {
        Self {
            radio,
            signal,
            publisher,
            discovery: DiscoveryPublisher::default(),
            config,
            failed: false,
            stats: BridgeStats::default(),
            last_status_ms: 0,
            last_irq_count: 0,
        }
    }

    /// Initialise and configure the radio, then start listening
    pub fn setup(&mut self) -> Result<(), BridgeError> {
        let radio_config = &self.config.radio;
        info!("Radio pins: {}", self.config.pins);
        info!(
            "Radio: {} {} Hz SF{} BW {} Hz CR 4/{} sync 0x{:02X} {} dBm",
            radio_config.variant,
            radio_config.frequency_hz,
            radio_config.spreading_factor,
            radio_config.bandwidth_hz,
            radio_config.coding_rate,
            radio_config.sync_word,
            radio_config.tx_power_dbm
        );

        let signal = self.signal;
        let result = self.radio.with(|driver| -> Result<(), RadioError> {
            driver.initialize(radio_config)?;
            driver.configure(radio_config);
            driver.on_receive(Some(signal));
            if !driver.begin_receive() {
                return Err(RadioError::ReceiveFailed);
            }
            Ok(())
        });

        let result = match result {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(BridgeError::Radio(e)),
            None => Err(BridgeError::RadioUnavailable),
        };

        match result {
            Ok(()) => {
                self.failed = false;
                self.signal.clear();
                info!("Bridge listening");
            }
            Err(e) => {
                self.failed = true;
                error!("Radio setup failed: {}", e);
            }
        }
        result
    }

    /// Handle at most one received packet
    pub fn poll(&mut self) -> PollOutcome {
        if self.failed {
            return PollOutcome::Idle;
        }

        let Some(reported) = self.signal.take() else {
            return PollOutcome::Idle;
        };

        let mut buf = [0u8; radio::RX_BUFFER_SIZE];
        let Some((len, rssi)) = self.radio.with(|driver| {
            let len = driver.read_bytes(&mut buf);
            (len, driver.packet_rssi())
        }) else {
            warn!("Packet signalled but radio unavailable");
            return PollOutcome::Idle;
        };

        if len == 0 {
            debug!("Packet signalled ({} bytes) but RX buffer empty", reported);
            return PollOutcome::Idle;
        }

        self.stats.packets = self.stats.packets.wrapping_add(1);
        debug!("Packet: {} bytes, RSSI {} dBm", len, rssi);

        let frame = match decode(&buf[..len]) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.rejected = self.stats.rejected.wrapping_add(1);
                warn!("Rejected frame: {}", e);
                return PollOutcome::Rejected(e);
            }
        };

        match self.discovery.publish(&mut self.publisher, &frame, rssi) {
            Ok(sent) => {
                info!("{}/{} = {} ({} dBm)", frame.device_id(), frame.field_name(), frame.value(), rssi);
                PollOutcome::Published(sent)
            }
            Err(e) => {
                self.stats.publish_failures = self.stats.publish_failures.wrapping_add(1);
                warn!("Publish failed for {}/{}: {}", frame.device_id(), frame.field_name(), e);
                PollOutcome::PublishFailed(e)
            }
        }
    }

    /// Log counters once per status interval
    ///
    /// Returns `true` when a report was emitted.
    pub fn report_status(&mut self, now_ms: u64) -> bool {
        if now_ms.saturating_sub(self.last_status_ms) < self.config.status_interval_ms {
            return false;
        }
        self.last_status_ms = now_ms;

        if self.failed {
            error!("Status: radio failed to initialise");
            return true;
        }

        let irq_count = self.radio.with(|driver| driver.irq_count()).unwrap_or(self.last_irq_count);
        info!(
            "Status: {} interrupts, {} packets, {} rejected, {} publish failures",
            irq_count, self.stats.packets, self.stats.rejected, self.stats.publish_failures
        );
        if irq_count == self.last_irq_count {
            warn!(
                "No radio interrupt in the last {} s, check the IRQ pin (GPIO {})",
                self.config.status_interval_ms / 1000,
                self.config.pins.irq
            );
        }
        self.last_irq_count = irq_count;
        true
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::traits::mock::MockPublisher;
    use crate::radio::traits::mock::{ChipCall, MockBus, MockFactory};
    use crate::radio::{ChipVariant, RadioDriver};
    use std::boxed::Box;

    const TEMPERATURE: &[u8] = "dev1:temperature:sensor:Temp:°C:21.5:mdi:thermometer:1.0:modelX:".as_bytes();

    fn leaked_cell() -> &'static RadioCell<MockFactory> {
        Box::leak(Box::new(RadioCell::new()))
    }

    fn leaked_signal() -> &'static ReceiveSignal {
        Box::leak(Box::new(ReceiveSignal::new()))
    }

    fn bridge(config: BridgeConfig) -> (Bridge<MockFactory, MockPublisher>, MockBus, &'static RadioCell<MockFactory>) {
        let cell = leaked_cell();
        let bus = MockBus::new();
        cell.install(RadioDriver::new(MockFactory, bus.clone()));
        let bridge = Bridge::new(cell, leaked_signal(), MockPublisher::new("homeassistant"), config);
        (bridge, bus, cell)
    }

    fn running() -> (Bridge<MockFactory, MockPublisher>, MockBus, &'static RadioCell<MockFactory>) {
        let (mut bridge, bus, cell) = bridge(BridgeConfig::default());
        bridge.setup().unwrap();
        bus.clear_calls();
        (bridge, bus, cell)
    }

    #[test]
    fn test_setup_arms_receive() {
        let config = BridgeConfig {
            radio: RadioConfig {
                variant: ChipVariant::Sx1276,
                sync_word: 0x34,
                ..RadioConfig::default()
            },
            ..BridgeConfig::default()
        };
        let (mut bridge, bus, cell) = bridge(config);

        bridge.setup().unwrap();

        assert!(!bridge.is_failed());
        let calls = bus.calls();
        assert_eq!(calls.first(), Some(&ChipCall::Begin(868_000_000)));
        assert!(calls.contains(&ChipCall::SetSyncWord(vec![0x34])));
        assert_eq!(calls.last(), Some(&ChipCall::StartReceive));
        assert_eq!(cell.with(|d| d.variant()), Some(Some(ChipVariant::Sx1276)));
    }

    #[test]
    fn test_setup_failure_marks_failed() {
        let (mut bridge, bus, cell) = bridge(BridgeConfig::default());
        bus.state().fail_begin = true;

        assert_eq!(bridge.setup(), Err(BridgeError::Radio(RadioError::ChipNotFound)));
        assert!(bridge.is_failed());

        // A failed bridge ignores traffic
        bus.queue_packet(TEMPERATURE, -80, 7.0);
        cell.on_interrupt();
        assert_eq!(bridge.poll(), PollOutcome::Idle);
        assert!(bridge.publisher().published.is_empty());
    }

    #[test]
    fn test_setup_without_driver() {
        let mut bridge = Bridge::new(
            leaked_cell(),
            leaked_signal(),
            MockPublisher::new("ha"),
            BridgeConfig::default(),
        );

        assert_eq!(bridge.setup(), Err(BridgeError::RadioUnavailable));
        assert!(bridge.is_failed());
    }

    #[test]
    fn test_poll_without_packet() {
        let (mut bridge, _bus, _cell) = running();
        assert_eq!(bridge.poll(), PollOutcome::Idle);
        assert_eq!(bridge.stats(), BridgeStats::default());
    }

    #[test]
    fn test_received_frame_published() {
        let (mut bridge, bus, cell) = running();
        bus.queue_packet(TEMPERATURE, -87, 6.5);

        cell.on_interrupt();

        assert_eq!(bridge.poll(), PollOutcome::Published(4));
        let published = &bridge.publisher().published;
        assert_eq!(
            bridge.publisher().topics(),
            vec![
                "homeassistant/sensor/dev1/Temp/config",
                "dev1/sensor/Temp/state",
                "homeassistant/sensor/dev1/rssi/config",
                "dev1/sensor/rssi/state",
            ]
        );
        assert_eq!(published[1].payload, "21.5");
        assert_eq!(published[3].payload, "-87");
        assert_eq!(bridge.stats().packets, 1);

        // One packet per signal
        assert_eq!(bridge.poll(), PollOutcome::Idle);
        // Receive was re-armed by the interrupt
        assert_eq!(bus.calls().last(), Some(&ChipCall::StartReceive));
    }

    #[test]
    fn test_invalid_frame_rejected() {
        let (mut bridge, bus, cell) = running();
        bus.queue_packet(b"dev1:temperature", -70, 5.0);

        cell.on_interrupt();

        assert_eq!(bridge.poll(), PollOutcome::Rejected(DecodeError::FieldCount(2)));
        assert!(bridge.publisher().published.is_empty());
        assert_eq!(
            bridge.stats(),
            BridgeStats {
                packets: 1,
                rejected: 1,
                publish_failures: 0,
            }
        );
    }

    #[test]
    fn test_ten_field_frame_not_published() {
        let (mut bridge, bus, cell) = running();
        bus.queue_packet(&TEMPERATURE[..TEMPERATURE.len() - 1], -87, 6.5);

        cell.on_interrupt();

        assert_eq!(bridge.poll(), PollOutcome::Rejected(DecodeError::FieldCount(10)));
        assert!(bridge.publisher().published.is_empty());
        assert_eq!(bridge.stats().rejected, 1);
    }

    #[test]
    fn test_publish_failure_counted() {
        let (mut bridge, bus, cell) = running();
        bridge.publisher.fail_after = Some(0);
        bus.queue_packet(TEMPERATURE, -87, 6.5);

        cell.on_interrupt();

        assert_eq!(bridge.poll(), PollOutcome::PublishFailed(PublishError::Transport));
        assert_eq!(bridge.stats().publish_failures, 1);
    }

    #[test]
    fn test_status_report_interval() {
        let (mut bridge, bus, cell) = running();

        assert!(!bridge.report_status(1_000));
        assert!(bridge.report_status(30_000));
        assert!(!bridge.report_status(45_000));

        bus.queue_packet(TEMPERATURE, -87, 6.5);
        cell.on_interrupt();
        assert!(bridge.report_status(60_000));
        assert_eq!(bridge.last_irq_count, 1);
    }

    #[test]
    fn test_pin_config_display() {
        let pins = PinConfig {
            busy: None,
            ..PinConfig::default()
        };
        assert_eq!(
            std::format!("{}", pins),
            "SCLK=7 MISO=8 MOSI=9 NSS=41 IRQ=39 NRST=42"
        );
    }
}
