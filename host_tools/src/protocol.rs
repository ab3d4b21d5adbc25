//! Uplink frame definitions matching the firmware.

use crc::{Crc, CRC_16_XMODEM};

/// Protocol version (must match firmware)
pub const PROTOCOL_VERSION: u8 = 1;

/// Message ID of a publish request
pub const MSG_PUBLISH: u8 = 0x20;

const QOS_MASK: u8 = 0x03;
const RETAIN_FLAG: u8 = 0x80;

const CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Publish request sent by the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

/// COBS decode (corncobs expects the zero delimiter).
pub fn cobs_decode(encoded: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut decoded = vec![0u8; encoded.len()];
    let len = corncobs::decode_buf(encoded, &mut decoded)
        .map_err(|e| anyhow::anyhow!("COBS decode failed: {:?}", e))?;
    decoded.truncate(len);
    Ok(decoded)
}

/// Parse a COBS-decoded publish frame.
/// Format: [version: u8][msg_id: u8][length: u16 LE][flags: u8][topic_len: u8][topic][payload][crc: u16 LE]
pub fn parse_publish(data: &[u8]) -> anyhow::Result<Publish> {
    if data.len() < 8 {
        anyhow::bail!("Frame too short: {} bytes", data.len());
    }

    let length = u16::from_le_bytes([data[2], data[3]]) as usize;
    if data.len() != 4 + length + 2 {
        anyhow::bail!(
            "Frame length mismatch: expected {}, got {}",
            4 + length + 2,
            data.len()
        );
    }

    let received_crc = u16::from_le_bytes([data[4 + length], data[4 + length + 1]]);
    let calculated_crc = CRC.checksum(&data[..4 + length]);
    if calculated_crc != received_crc {
        anyhow::bail!(
            "CRC mismatch: expected {:04x}, got {:04x}",
            calculated_crc,
            received_crc
        );
    }

    if data[0] != PROTOCOL_VERSION {
        anyhow::bail!(
            "Protocol version mismatch: expected {}, got {}",
            PROTOCOL_VERSION,
            data[0]
        );
    }
    if data[1] != MSG_PUBLISH {
        anyhow::bail!("Unknown message ID: 0x{:02x}", data[1]);
    }

    let body = &data[4..4 + length];
    let flags = body[0];
    let topic_len = body[1] as usize;
    if 2 + topic_len > body.len() {
        anyhow::bail!("Topic length {} overruns frame", topic_len);
    }

    let topic = std::str::from_utf8(&body[2..2 + topic_len])?.to_string();
    let qos = flags & QOS_MASK;
    if qos > 2 {
        anyhow::bail!("Invalid QoS {}", qos);
    }

    Ok(Publish {
        topic,
        payload: body[2 + topic_len..].to_vec(),
        qos,
        retain: flags & RETAIN_FLAG != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a frame the way the firmware does
    fn build_publish(topic: &str, payload: &[u8], qos: u8, retain: bool) -> Vec<u8> {
        let mut data = vec![PROTOCOL_VERSION, MSG_PUBLISH];
        let length = (2 + topic.len() + payload.len()) as u16;
        data.extend_from_slice(&length.to_le_bytes());
        data.push(qos | if retain { RETAIN_FLAG } else { 0 });
        data.push(topic.len() as u8);
        data.extend_from_slice(topic.as_bytes());
        data.extend_from_slice(payload);
        let checksum = CRC.checksum(&data);
        data.extend_from_slice(&checksum.to_le_bytes());
        data
    }

    fn cobs_encode(data: &[u8]) -> Vec<u8> {
        let mut encoded = vec![0u8; corncobs::max_encoded_len(data.len())];
        let len = corncobs::encode_buf(data, &mut encoded);
        encoded.truncate(len);
        encoded
    }

    #[test]
    fn parses_publish() {
        let encoded = cobs_encode(&build_publish("dev1/sensor/Temp/state", b"21.5", 2, true));

        let publish = parse_publish(&cobs_decode(&encoded).unwrap()).unwrap();

        assert_eq!(
            publish,
            Publish {
                topic: "dev1/sensor/Temp/state".into(),
                payload: b"21.5".to_vec(),
                qos: 2,
                retain: true,
            }
        );
    }

    #[test]
    fn rejects_bad_crc() {
        let mut raw = build_publish("t", b"v", 0, false);
        let last = raw.len() - 1;
        raw[last] ^= 0x55;

        let err = parse_publish(&raw).unwrap_err();
        assert!(err.to_string().contains("CRC mismatch"));
    }

    #[test]
    fn rejects_wrong_version() {
        let mut raw = build_publish("t", b"v", 0, false);
        raw.truncate(raw.len() - 2);
        raw[0] = 7;
        let checksum = CRC.checksum(&raw);
        raw.extend_from_slice(&checksum.to_le_bytes());

        let err = parse_publish(&raw).unwrap_err();
        assert!(err.to_string().contains("version mismatch"));
    }

    #[test]
    fn rejects_truncated_frame() {
        let raw = build_publish("dev1/sensor/rssi/state", b"-87", 2, true);
        assert!(parse_publish(&raw[..raw.len() - 3]).is_err());
    }
}
