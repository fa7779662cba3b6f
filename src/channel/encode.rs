// src/channel/encode.rs
//
// Send payload encoding.
// ascii: UTF-8 bytes plus a trailing LF. hex: whitespace-tolerant hex byte
// pairs. binary: whitespace-tolerant bit string packed MSB-first, trailing
// bits zero-padded.

use crate::channel::buffer::SendMode;
use crate::error::MonitorError;

/// Encode a payload string into the bytes written to the device.
pub fn encode_payload(data: &str, mode: SendMode) -> Result<Vec<u8>, MonitorError> {
    match mode {
        SendMode::Ascii => {
            let mut bytes = data.as_bytes().to_vec();
            bytes.push(b'\n');
            Ok(bytes)
        }
        SendMode::Hex => encode_hex(data),
        SendMode::Binary => encode_binary(data),
    }
}

fn encode_hex(data: &str) -> Result<Vec<u8>, MonitorError> {
    let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.len() % 2 != 0 {
        return Err(MonitorError::InvalidEncoding {
            mode: "hex",
            reason: format!("odd number of hex digits ({})", cleaned.len()),
        });
    }

    let mut bytes = Vec::with_capacity(cleaned.len() / 2);
    let chars: Vec<char> = cleaned.chars().collect();
    for pair in chars.chunks(2) {
        let hi = pair[0].to_digit(16).ok_or_else(|| MonitorError::InvalidEncoding {
            mode: "hex",
            reason: format!("'{}' is not a hex digit", pair[0]),
        })?;
        let lo = pair[1].to_digit(16).ok_or_else(|| MonitorError::InvalidEncoding {
            mode: "hex",
            reason: format!("'{}' is not a hex digit", pair[1]),
        })?;
        bytes.push(((hi << 4) | lo) as u8);
    }
    Ok(bytes)
}

fn encode_binary(data: &str) -> Result<Vec<u8>, MonitorError> {
    let mut bytes = Vec::new();
    let mut current: u8 = 0;
    let mut bit_count = 0;

    for c in data.chars() {
        if c.is_whitespace() {
            continue;
        }
        let bit = match c {
            '0' => 0,
            '1' => 1,
            other => {
                return Err(MonitorError::InvalidEncoding {
                    mode: "binary",
                    reason: format!("'{}' is not a binary digit", other),
                })
            }
        };
        current = (current << 1) | bit;
        bit_count += 1;
        if bit_count == 8 {
            bytes.push(current);
            current = 0;
            bit_count = 0;
        }
    }

    // Pad a trailing partial byte with zero bits
    if bit_count > 0 {
        bytes.push(current << (8 - bit_count));
    }
    Ok(bytes)
}

/// Hex string of a byte slice, lowercase, no separators.
/// Used for the raw-data event payloads.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_appends_lf() {
        assert_eq!(encode_payload("AT", SendMode::Ascii).unwrap(), b"AT\n");
        assert_eq!(encode_payload("", SendMode::Ascii).unwrap(), b"\n");
    }

    #[test]
    fn test_hex_with_whitespace() {
        assert_eq!(
            encode_payload("01 0A ff", SendMode::Hex).unwrap(),
            vec![0x01, 0x0A, 0xFF]
        );
        assert_eq!(
            encode_payload("de\tad\nbe ef", SendMode::Hex).unwrap(),
            vec![0xDE, 0xAD, 0xBE, 0xEF]
        );
    }

    #[test]
    fn test_hex_rejects_malformed() {
        assert!(encode_payload("abc", SendMode::Hex).is_err());
        assert!(encode_payload("zz", SendMode::Hex).is_err());
    }

    #[test]
    fn test_binary_packs_msb_first() {
        assert_eq!(
            encode_payload("10100000", SendMode::Binary).unwrap(),
            vec![0xA0]
        );
        assert_eq!(
            encode_payload("1010 0000 1111", SendMode::Binary).unwrap(),
            vec![0xA0, 0xF0]
        );
        // 3 bits pad to a full byte with zeros
        assert_eq!(encode_payload("101", SendMode::Binary).unwrap(), vec![0xA0]);
    }

    #[test]
    fn test_binary_rejects_other_digits() {
        assert!(encode_payload("10102", SendMode::Binary).is_err());
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x01, 0xAB, 0xFF]), "01abff");
        assert_eq!(to_hex(&[]), "");
    }
}
