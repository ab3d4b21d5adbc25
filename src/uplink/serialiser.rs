//! Publish frame serialiser with COBS encoding
//!
//! Frame format (before COBS):
//! `[version: u8][msg_id: u8][length: u16 LE][flags: u8][topic_len: u8][topic][payload][crc16: u16 LE]`
//!
//! `length` counts everything between it and the CRC. `flags` carries the QoS
//! in bits 0-1 and the retain flag in bit 7. The CRC (XMODEM) covers every
//! byte before it.

use crate::config::uplink::{MAX_ENCODED_FRAME, MAX_RAW_FRAME, PROTOCOL_VERSION};
use crate::mqtt::{PublishError, QoS};
use core::fmt;
use crc::{Crc, CRC_16_XMODEM};
use heapless::Vec;

const CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// version + msg_id + length
const HEADER_LEN: usize = 4;
const CRC_LEN: usize = 2;

const QOS_MASK: u8 = 0x03;
const RETAIN_FLAG: u8 = 0x80;

/// Uplink message IDs
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageId {
    Publish = 0x20,
}

/// One publish request as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishFrame<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
}

/// Reasons an uplink frame can't be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// COBS decoding failed
    Cobs,
    /// Shorter than header plus CRC
    TooShort,
    /// Unsupported protocol version
    Version(u8),
    /// Message ID other than publish
    UnknownMessage(u8),
    /// Length field disagrees with the frame size
    Length,
    /// CRC mismatch
    Crc,
    /// Topic length overruns the body or topic isn't UTF-8
    Topic,
    /// QoS bits out of range
    QoS(u8),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Cobs => write!(f, "COBS decode failed"),
            FrameError::TooShort => write!(f, "frame too short"),
            FrameError::Version(v) => write!(f, "unsupported version {}", v),
            FrameError::UnknownMessage(id) => write!(f, "unknown message 0x{:02X}", id),
            FrameError::Length => write!(f, "length mismatch"),
            FrameError::Crc => write!(f, "CRC mismatch"),
            FrameError::Topic => write!(f, "invalid topic"),
            FrameError::QoS(bits) => write!(f, "invalid QoS {}", bits),
        }
    }
}

/// Serialise a publish request to a COBS-encoded frame
///
/// Returns the complete frame including the zero delimiter.
pub fn encode_publish_frame(frame: &PublishFrame<'_>) -> Result<Vec<u8, MAX_ENCODED_FRAME>, PublishError> {
    let raw = build_raw_frame(frame)?;
    Ok(cobs_encode(&raw))
}

fn build_raw_frame(frame: &PublishFrame<'_>) -> Result<Vec<u8, MAX_RAW_FRAME>, PublishError> {
    let topic_len = u8::try_from(frame.topic.len()).map_err(|_| PublishError::TooLarge)?;
    let body_len = 2 + frame.topic.len() + frame.payload.len();
    if HEADER_LEN + body_len + CRC_LEN > MAX_RAW_FRAME {
        return Err(PublishError::TooLarge);
    }

    let mut flags = frame.qos as u8 & QOS_MASK;
    if frame.retain {
        flags |= RETAIN_FLAG;
    }

    let mut raw: Vec<u8, MAX_RAW_FRAME> = Vec::new();
    let _ = raw.push(PROTOCOL_VERSION);
    let _ = raw.push(MessageId::Publish as u8);
    let _ = raw.extend_from_slice(&(body_len as u16).to_le_bytes());
    let _ = raw.push(flags);
    let _ = raw.push(topic_len);
    let _ = raw.extend_from_slice(frame.topic.as_bytes());
    let _ = raw.extend_from_slice(frame.payload);

    let crc = CRC.checksum(&raw);
    let _ = raw.extend_from_slice(&crc.to_le_bytes());

    Ok(raw)
}

fn cobs_encode(data: &[u8]) -> Vec<u8, MAX_ENCODED_FRAME> {
    let mut output: Vec<u8, MAX_ENCODED_FRAME> = Vec::new();
    output.resize(corncobs::max_encoded_len(data.len()), 0).ok();
    let len = corncobs::encode_buf(data, &mut output);
    output.truncate(len);
    output
}

/// COBS decode one delimited frame
pub fn cobs_decode(encoded: &[u8]) -> Result<Vec<u8, MAX_RAW_FRAME>, FrameError> {
    let mut output: Vec<u8, MAX_RAW_FRAME> = Vec::new();
    output
        .resize(encoded.len().min(MAX_RAW_FRAME), 0)
        .map_err(|_| FrameError::Cobs)?;
    let len = corncobs::decode_buf(encoded, &mut output).map_err(|_| FrameError::Cobs)?;
    output.truncate(len);
    Ok(output)
}

/// Parse a raw (already COBS-decoded) publish frame
pub fn parse_publish_frame(raw: &[u8]) -> Result<PublishFrame<'_>, FrameError> {
    if raw.len() < HEADER_LEN + 2 + CRC_LEN {
        return Err(FrameError::TooShort);
    }

    let (content, crc_bytes) = raw.split_at(raw.len() - CRC_LEN);
    let received = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    if CRC.checksum(content) != received {
        return Err(FrameError::Crc);
    }

    if content[0] != PROTOCOL_VERSION {
        return Err(FrameError::Version(content[0]));
    }
    if content[1] != MessageId::Publish as u8 {
        return Err(FrameError::UnknownMessage(content[1]));
    }

    let body_len = u16::from_le_bytes([content[2], content[3]]) as usize;
    let body = &content[HEADER_LEN..];
    if body.len() != body_len {
        return Err(FrameError::Length);
    }

    let flags = body[0];
    let qos = QoS::try_from(flags & QOS_MASK).map_err(|_| FrameError::QoS(flags & QOS_MASK))?;
    let topic_len = body[1] as usize;
    let rest = &body[2..];
    if topic_len > rest.len() {
        return Err(FrameError::Topic);
    }
    let (topic, payload) = rest.split_at(topic_len);
    let topic = core::str::from_utf8(topic).map_err(|_| FrameError::Topic)?;

    Ok(PublishFrame {
        topic,
        payload,
        qos,
        retain: flags & RETAIN_FLAG != 0,
    })
}

/// COBS-decode `encoded` into `scratch` and parse the publish it carries
pub fn decode_publish_frame<'a>(
    encoded: &[u8],
    scratch: &'a mut Vec<u8, MAX_RAW_FRAME>,
) -> Result<PublishFrame<'a>, FrameError> {
    *scratch = cobs_decode(encoded)?;
    parse_publish_frame(scratch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::uplink::FRAME_DELIMITER;

    fn sample() -> PublishFrame<'static> {
        PublishFrame {
            topic: "dev1/sensor/Temp/state",
            payload: b"21.5",
            qos: QoS::ExactlyOnce,
            retain: true,
        }
    }

    #[test]
    fn test_encoded_frame_layout() {
        let encoded = encode_publish_frame(&sample()).unwrap();

        assert_eq!(*encoded.last().unwrap(), FRAME_DELIMITER);
        // Only the trailing delimiter is zero
        assert!(!encoded[..encoded.len() - 1].contains(&0));

        let raw = cobs_decode(&encoded).unwrap();
        assert_eq!(raw[0], PROTOCOL_VERSION);
        assert_eq!(raw[1], MessageId::Publish as u8);
        let body_len = 2 + 22 + 4;
        assert_eq!(u16::from_le_bytes([raw[2], raw[3]]), body_len as u16);
        assert_eq!(raw[4], 0x82);
        assert_eq!(raw[5], 22);
        assert_eq!(&raw[6..28], b"dev1/sensor/Temp/state");
        assert_eq!(&raw[28..32], b"21.5");
        assert_eq!(raw.len(), HEADER_LEN + body_len + CRC_LEN);
    }

    #[test]
    fn test_decode_matches_input() {
        let frame = PublishFrame {
            topic: "homeassistant/binary_sensor/door1/Front/config",
            payload: br#"{"name":"Front"}"#,
            qos: QoS::AtMostOnce,
            retain: false,
        };
        let encoded = encode_publish_frame(&frame).unwrap();

        let mut scratch = Vec::new();
        assert_eq!(decode_publish_frame(&encoded, &mut scratch), Ok(frame));
    }

    #[test]
    fn test_empty_payload() {
        let frame = PublishFrame {
            payload: b"",
            ..sample()
        };
        let encoded = encode_publish_frame(&frame).unwrap();

        let mut scratch = Vec::new();
        let decoded = decode_publish_frame(&encoded, &mut scratch).unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_topic_too_long() {
        let topic = "t".repeat(256);
        let frame = PublishFrame {
            topic: &topic,
            ..sample()
        };
        assert_eq!(encode_publish_frame(&frame), Err(PublishError::TooLarge));
    }

    #[test]
    fn test_payload_too_large() {
        let payload = [b'x'; MAX_RAW_FRAME];
        let frame = PublishFrame {
            payload: &payload,
            ..sample()
        };
        assert_eq!(encode_publish_frame(&frame), Err(PublishError::TooLarge));
    }

    #[test]
    fn test_largest_frame_fits() {
        let payload = [b'x'; MAX_RAW_FRAME - HEADER_LEN - 2 - 1 - CRC_LEN];
        let frame = PublishFrame {
            topic: "t",
            payload: &payload,
            ..sample()
        };
        let encoded = encode_publish_frame(&frame).unwrap();

        let mut scratch = Vec::new();
        let decoded = decode_publish_frame(&encoded, &mut scratch).unwrap();
        assert_eq!(decoded.payload.len(), payload.len());
    }

    #[test]
    fn test_corrupted_crc_rejected() {
        let mut raw = build_raw_frame(&sample()).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;

        assert_eq!(parse_publish_frame(&raw), Err(FrameError::Crc));
    }

    #[test]
    fn test_corrupted_body_rejected() {
        let mut raw = build_raw_frame(&sample()).unwrap();
        raw[8] ^= 0x01;

        assert_eq!(parse_publish_frame(&raw), Err(FrameError::Crc));
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut raw = build_raw_frame(&sample()).unwrap();
        raw.truncate(raw.len() - CRC_LEN);
        raw[0] = 9;
        let crc = CRC.checksum(&raw);
        raw.extend_from_slice(&crc.to_le_bytes()).unwrap();

        assert_eq!(parse_publish_frame(&raw), Err(FrameError::Version(9)));
    }

    #[test]
    fn test_too_short_rejected() {
        assert_eq!(parse_publish_frame(&[1, 0x20, 0]), Err(FrameError::TooShort));
    }

    #[test]
    fn test_truncated_cobs_rejected() {
        let encoded = encode_publish_frame(&sample()).unwrap();
        // Drop the delimiter and the tail
        let truncated = &encoded[..encoded.len() / 2];

        let mut scratch = Vec::new();
        assert!(decode_publish_frame(truncated, &mut scratch).is_err());
    }
}
