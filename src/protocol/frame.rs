//! Colon-delimited telemetry frame decoder
//!
//! A frame is eleven `:`-separated ASCII fields:
//!
//! ```text
//! device_id:device_class:kind:name:unit:value:icon_prefix:icon_suffix:sw:model:reserved
//! ```
//!
//! Empty fields are significant. Every delimiter ends a field, so leading,
//! trailing and consecutive delimiters all produce empty fields. The layout
//! has no version marker; sender and receiver firmware must agree on it.

use crate::config::frame::{DELIMITER, FIELD_COUNT, MAX_FRAME_LEN};
use crate::config::mqtt;
use alloc::string::String;
use core::fmt;

/// Reasons a buffer is not a valid frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Frame exceeds the maximum length
    TooLong(usize),
    /// Frame is not valid UTF-8
    InvalidUtf8,
    /// Frame split into the wrong number of fields
    FieldCount(usize),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLong(len) => write!(f, "frame too long ({} bytes, max {})", len, MAX_FRAME_LEN),
            Self::InvalidUtf8 => f.write_str("frame is not valid UTF-8"),
            Self::FieldCount(n) => write!(f, "expected {} fields, got {}", FIELD_COUNT, n),
        }
    }
}

/// Entity category announced by a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    BinarySensor,
    /// Anything that is not a binary sensor
    Sensor,
}

impl MessageKind {
    /// Home Assistant component name used in topics
    pub fn component(self) -> &'static str {
        match self {
            Self::BinarySensor => mqtt::BINARY_SENSOR,
            Self::Sensor => mqtt::SENSOR,
        }
    }
}

/// A frame split into its eleven fields, borrowing the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame<'a> {
    fields: [&'a str; FIELD_COUNT],
}

impl<'a> DecodedFrame<'a> {
    pub fn from_fields(fields: [&'a str; FIELD_COUNT]) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[&'a str; FIELD_COUNT] {
        &self.fields
    }

    pub fn device_id(&self) -> &'a str {
        self.fields[0]
    }

    pub fn device_class(&self) -> &'a str {
        self.fields[1]
    }

    /// Raw message kind field
    pub fn message_kind(&self) -> &'a str {
        self.fields[2]
    }

    pub fn field_name(&self) -> &'a str {
        self.fields[3]
    }

    pub fn unit(&self) -> &'a str {
        self.fields[4]
    }

    pub fn value(&self) -> &'a str {
        self.fields[5]
    }

    pub fn icon_prefix(&self) -> &'a str {
        self.fields[6]
    }

    pub fn icon_suffix(&self) -> &'a str {
        self.fields[7]
    }

    pub fn software_version(&self) -> &'a str {
        self.fields[8]
    }

    pub fn model(&self) -> &'a str {
        self.fields[9]
    }

    pub fn reserved(&self) -> &'a str {
        self.fields[10]
    }

    pub fn kind(&self) -> MessageKind {
        if self.message_kind() == mqtt::BINARY_SENSOR {
            MessageKind::BinarySensor
        } else {
            MessageKind::Sensor
        }
    }

    /// Join the fields back into wire form
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push(DELIMITER);
            }
            out.push_str(field);
        }
        out
    }
}

/// Split `input` on `delimiter`
///
/// With `allow_empty` every delimiter ends a token. Without it, runs of
/// delimiters collapse and empty tokens are dropped.
pub fn tokenize(input: &str, delimiter: char, allow_empty: bool) -> impl Iterator<Item = &str> {
    input
        .split(delimiter)
        .filter(move |token| allow_empty || !token.is_empty())
}

/// Decode a received buffer
///
/// The buffer is NUL-terminated: anything after the first zero byte is
/// ignored. Nothing is returned unless exactly eleven fields are present.
pub fn decode(buffer: &[u8]) -> Result<DecodedFrame<'_>, DecodeError> {
    let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
    let bytes = &buffer[..end];

    if bytes.len() > MAX_FRAME_LEN {
        return Err(DecodeError::TooLong(bytes.len()));
    }

    let text = core::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;

    let mut fields = [""; FIELD_COUNT];
    let mut count = 0;
    for token in tokenize(text, DELIMITER, true) {
        if count < FIELD_COUNT {
            fields[count] = token;
        }
        count += 1;
    }

    if count != FIELD_COUNT {
        return Err(DecodeError::FieldCount(count));
    }

    Ok(DecodedFrame { fields })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPERATURE: &[u8] = "dev1:temperature:sensor:Temp:°C:21.5:mdi:thermometer:1.0:modelX:".as_bytes();

    #[test]
    fn test_decode_sensor_frame() {
        let frame = decode(TEMPERATURE).unwrap();

        assert_eq!(frame.device_id(), "dev1");
        assert_eq!(frame.device_class(), "temperature");
        assert_eq!(frame.message_kind(), "sensor");
        assert_eq!(frame.field_name(), "Temp");
        assert_eq!(frame.unit(), "°C");
        assert_eq!(frame.value(), "21.5");
        assert_eq!(frame.icon_prefix(), "mdi");
        assert_eq!(frame.icon_suffix(), "thermometer");
        assert_eq!(frame.software_version(), "1.0");
        assert_eq!(frame.model(), "modelX");
        assert_eq!(frame.reserved(), "");
        assert_eq!(frame.kind(), MessageKind::Sensor);
    }

    #[test]
    fn test_decode_binary_sensor_frame() {
        let frame = decode(b"door1::binary_sensor:Door::ON:::2.1:reed:").unwrap();

        assert_eq!(frame.kind(), MessageKind::BinarySensor);
        assert_eq!(frame.kind().component(), "binary_sensor");
        assert_eq!(frame.value(), "ON");
        assert_eq!(frame.device_class(), "");
    }

    #[test]
    fn test_unknown_kind_is_sensor() {
        let frame = decode(b"d:c:gauge:n:u:1:::::").unwrap();
        assert_eq!(frame.kind(), MessageKind::Sensor);
    }

    #[test]
    fn test_wrong_field_count() {
        assert_eq!(decode(b"a:b:c"), Err(DecodeError::FieldCount(3)));
        assert_eq!(decode(b"a:b:c:d:e:f:g:h:i:j:k:l"), Err(DecodeError::FieldCount(12)));
        assert_eq!(decode(b"no delimiters"), Err(DecodeError::FieldCount(1)));
    }

    #[test]
    fn test_missing_trailing_delimiter() {
        // Without the trailing ':' the reserved field disappears
        let short = &TEMPERATURE[..TEMPERATURE.len() - 1];
        assert_eq!(decode(short), Err(DecodeError::FieldCount(10)));
    }

    #[test]
    fn test_consecutive_delimiters_are_empty_fields() {
        // Ten delimiters, nothing else: eleven empty fields
        let frame = decode(b"::::::::::").unwrap();
        assert!(frame.fields().iter().all(|f| f.is_empty()));
    }

    #[test]
    fn test_stops_at_nul() {
        let mut buffer = TEMPERATURE.to_vec();
        buffer.extend_from_slice(b"\0garbage:after:nul");

        let frame = decode(&buffer).unwrap();
        assert_eq!(frame.reserved(), "");
    }

    #[test]
    fn test_too_long() {
        let long = [b'a'; 251];
        assert_eq!(decode(&long), Err(DecodeError::TooLong(251)));
    }

    #[test]
    fn test_invalid_utf8() {
        assert_eq!(decode(&[b'a', b':', 0xFF, 0xFE]), Err(DecodeError::InvalidUtf8));
    }

    #[test]
    fn test_encode_round_trip_keeps_empty_fields() {
        let fields = ["", "class", "sensor", "", "unit", "", "mdi", "", "", "model", ""];
        let encoded = DecodedFrame::from_fields(fields).encode();

        let decoded = decode(encoded.as_bytes()).unwrap();
        assert_eq!(decoded.fields(), &fields);
    }

    #[test]
    fn test_tokenize_policies() {
        let allow: Vec<&str> = tokenize("a::b:", ':', true).collect();
        assert_eq!(allow, vec!["a", "", "b", ""]);

        let collapse: Vec<&str> = tokenize("::a::b:", ':', false).collect();
        assert_eq!(collapse, vec!["a", "b"]);
    }
}
