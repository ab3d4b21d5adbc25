//! Hardware configuration constants for the ESP32-S3 LoRa bridge

/// SPI pins for LoRa module
pub mod spi {
    pub const SCLK: u8 = 7;
    pub const MISO: u8 = 8;
    pub const MOSI: u8 = 9;
    /// SPI clock used for the radio (8 MHz)
    pub const FREQUENCY_HZ: u32 = 8_000_000;
}

/// LoRa control pins
pub mod lora_pins {
    pub const NSS: u8 = 41;
    /// DIO1 on SX126x, DIO0 on SX127x
    pub const IRQ: u8 = 39;
    pub const NRST: u8 = 42;
    /// BUSY on SX126x, unused on SX127x
    pub const BUSY: u8 = 40;
}

/// TCXO configuration
pub mod tcxo {
    /// TCXO voltage code for SX1262 register
    /// 0x02 = 1.8V (WIO-SX1262)
    pub const VOLTAGE_CODE: u8 = 0x02;

    /// TCXO startup timeout in 15.625us steps (~5ms)
    pub const STARTUP_TIMEOUT: u32 = 0x000140;
}

/// Default LoRa configuration
pub mod lora_defaults {
    /// EU ISM band frequency
    pub const FREQUENCY_HZ: u32 = 868_000_000;
    pub const SPREADING_FACTOR: u8 = 7;
    pub const BANDWIDTH_HZ: u32 = 125_000;
    /// Coding rate 4/5
    pub const CODING_RATE: u8 = 5;
    pub const TX_POWER_DBM: i8 = 17;
    pub const PREAMBLE_LENGTH: u16 = 8;
    /// Private network sync word
    pub const SYNC_WORD: u8 = 0x12;
    /// Over-current protection limit in mA
    pub const CURRENT_LIMIT_MA: u8 = 140;
}

/// Radio driver limits
pub mod radio {
    /// Capacity of the driver's TX buffer
    pub const TX_BUFFER_SIZE: usize = 256;
    /// Capacity of the driver's RX buffer
    pub const RX_BUFFER_SIZE: usize = 256;

    pub const MIN_SPREADING_FACTOR: u8 = 6;
    pub const MAX_SPREADING_FACTOR: u8 = 12;
    pub const MIN_CODING_RATE: u8 = 5;
    pub const MAX_CODING_RATE: u8 = 8;

    /// Upper bound for a blocking transmit before giving up
    pub const TX_TIMEOUT_MS: u32 = 10_000;

    /// Payload length used when the chip runs in implicit header mode
    pub const IMPLICIT_PAYLOAD_LENGTH: u8 = 255;
}

/// Telemetry frame format
pub mod frame {
    /// Field delimiter
    pub const DELIMITER: char = ':';

    /// Number of fields in a valid frame
    pub const FIELD_COUNT: usize = 11;

    /// Longest frame the bridge accepts
    pub const MAX_FRAME_LEN: usize = 250;
}

/// MQTT discovery settings
pub mod mqtt {
    /// Used when the transport has no prefix of its own
    pub const DISCOVERY_PREFIX: &str = "homeassistant";

    /// Manufacturer reported in every device descriptor
    pub const MANUFACTURER: &str = "espressif";

    pub const BINARY_SENSOR: &str = "binary_sensor";
    pub const SENSOR: &str = "sensor";

    /// Synthetic signal-strength sensor
    pub const RSSI_OBJECT_ID: &str = "rssi";
    pub const RSSI_DEVICE_CLASS: &str = "signal_strength";
    pub const RSSI_UNIT: &str = "dBm";
    pub const RSSI_STATE_CLASS: &str = "measurement";
    pub const RSSI_ICON: &str = "mdi:wifi";
}

/// Bridge component timing
pub mod bridge {
    /// Poll loop tick
    pub const POLL_INTERVAL_MS: u64 = 16;

    /// Interval between status reports
    pub const STATUS_INTERVAL_MS: u64 = 30_000;
}

/// Serial uplink protocol constants
pub mod uplink {
    /// Frame delimiter for COBS encoding
    pub const FRAME_DELIMITER: u8 = 0x00;

    /// Maximum raw (unencoded) frame size
    pub const MAX_RAW_FRAME: usize = 1024;

    /// Maximum COBS-encoded frame size including the delimiter
    pub const MAX_ENCODED_FRAME: usize = MAX_RAW_FRAME + MAX_RAW_FRAME / 254 + 2;

    /// Protocol version (increment when message format changes)
    pub const PROTOCOL_VERSION: u8 = 1;

    pub const BAUD_RATE: u32 = 115200;
}
