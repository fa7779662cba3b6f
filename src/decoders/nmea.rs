// src/decoders/nmea.rs
//
// NMEA 0183 sentence decoder.
// Matches "$TTSSS,field,field*HH" with the XOR checksum over everything
// between '$' and '*'. Trailing CR/LF is tolerated since the decoder sees
// pre-framing bytes.

use serde_json::{json, Map};

use super::{DecodedFrame, DecoderPlugin};
use crate::checksums::xor_checksum;

pub struct NmeaDecoder;

impl DecoderPlugin for NmeaDecoder {
    fn name(&self) -> &str {
        "NMEA 0183"
    }

    fn description(&self) -> Option<&str> {
        Some("NMEA 0183 sentences with XOR checksum validation")
    }

    fn decode(&self, bytes: &[u8]) -> Option<DecodedFrame> {
        let text = std::str::from_utf8(bytes).ok()?;
        let text = text.trim_end_matches(['\r', '\n']);

        let body = text.strip_prefix('$')?;
        let (payload, checksum_text) = body.rsplit_once('*')?;
        if checksum_text.len() != 2 {
            return None;
        }
        let expected = u8::from_str_radix(checksum_text, 16).ok()?;
        let checksum_valid = xor_checksum(payload.as_bytes()) == expected;

        let mut parts = payload.split(',');
        let address = parts.next()?;
        if address.len() < 3 || !address.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        // Standard talker sentences are 2-char talker + 3-char type
        let (talker, sentence) = if address.len() == 5 {
            (&address[..2], &address[2..])
        } else {
            ("", address)
        };

        let fields_list: Vec<&str> = parts.collect();

        let mut fields = Map::new();
        if !talker.is_empty() {
            fields.insert("talker".to_string(), json!(talker));
        }
        fields.insert("sentence".to_string(), json!(sentence));
        fields.insert("checksumValid".to_string(), json!(checksum_valid));
        fields.insert("fieldCount".to_string(), json!(fields_list.len()));
        fields.insert("fields".to_string(), json!(fields_list.join(",")));

        Some(DecodedFrame {
            name: String::new(),
            protocol: "NMEA 0183".to_string(),
            fields,
            display: format!(
                "NMEA {} ({} field(s){})",
                address,
                fields_list.len(),
                if checksum_valid { "" } else { ", bad checksum" }
            ),
        })
    }
}
