// src/decoders/slip.rs
//
// SLIP (RFC 1055) decoder.
// Matches a slice that carries at least one END-delimited SLIP frame and
// reports the first decoded payload. Escape sequences ESC ESC_END and
// ESC ESC_ESC are unescaped; an ESC followed by anything else is a
// protocol violation and rejects the match.

use serde_json::{json, Map};

use super::{DecodedFrame, DecoderPlugin};

const SLIP_END: u8 = 0xC0;
const SLIP_ESC: u8 = 0xDB;
const SLIP_ESC_END: u8 = 0xDC;
const SLIP_ESC_ESC: u8 = 0xDD;

pub struct SlipDecoder;

/// Extract the first non-empty END-terminated payload.
fn first_frame(bytes: &[u8]) -> Option<Vec<u8>> {
    let mut payload = Vec::new();
    let mut in_escape = false;
    let mut saw_end = false;

    for &byte in bytes {
        match byte {
            SLIP_END => {
                if !payload.is_empty() {
                    saw_end = true;
                    break;
                }
                // Leading END just flushes line noise
            }
            SLIP_ESC => {
                if in_escape {
                    return None;
                }
                in_escape = true;
            }
            SLIP_ESC_END if in_escape => {
                payload.push(SLIP_END);
                in_escape = false;
            }
            SLIP_ESC_ESC if in_escape => {
                payload.push(SLIP_ESC);
                in_escape = false;
            }
            other => {
                if in_escape {
                    return None;
                }
                payload.push(other);
            }
        }
    }

    if saw_end && !payload.is_empty() {
        Some(payload)
    } else {
        None
    }
}

impl DecoderPlugin for SlipDecoder {
    fn name(&self) -> &str {
        "SLIP"
    }

    fn description(&self) -> Option<&str> {
        Some("SLIP framed packets (RFC 1055)")
    }

    fn decode(&self, bytes: &[u8]) -> Option<DecodedFrame> {
        // Require the END delimiter to be present at all before scanning
        if !bytes.contains(&SLIP_END) {
            return None;
        }
        let payload = first_frame(bytes)?;

        let hex: String = payload.iter().map(|b| format!("{:02x}", b)).collect();
        let mut fields = Map::new();
        fields.insert("length".to_string(), json!(payload.len()));
        fields.insert("payload".to_string(), json!(hex));

        Some(DecodedFrame {
            name: String::new(),
            protocol: "SLIP".to_string(),
            fields,
            display: format!("SLIP frame, {} byte(s)", payload.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_frame() {
        let decoded = SlipDecoder
            .decode(&[SLIP_END, 0x01, 0x02, 0x03, SLIP_END])
            .unwrap();
        assert_eq!(decoded.fields["length"], 3);
        assert_eq!(decoded.fields["payload"], "010203");
    }

    #[test]
    fn test_escape_sequences() {
        let decoded = SlipDecoder
            .decode(&[SLIP_ESC, SLIP_ESC_END, SLIP_ESC, SLIP_ESC_ESC, SLIP_END])
            .unwrap();
        assert_eq!(decoded.fields["payload"], "c0db");
    }

    #[test]
    fn test_unterminated_rejected() {
        assert!(SlipDecoder.decode(&[SLIP_END, 0x01, 0x02]).is_none());
        assert!(SlipDecoder.decode(&[0x01, 0x02, 0x03]).is_none());
    }

    #[test]
    fn test_invalid_escape_rejected() {
        assert!(SlipDecoder.decode(&[SLIP_ESC, 0x42, SLIP_END]).is_none());
    }

    #[test]
    fn test_empty_frame_rejected() {
        assert!(SlipDecoder.decode(&[SLIP_END, SLIP_END]).is_none());
    }
}
