// src/decoders/modbus.rs
//
// Modbus RTU decoder.
// Matches a byte slice that is exactly one RTU frame with a valid CRC-16.
// Since RTU has no framing bytes, CRC validation is the only reliable
// boundary check; slices that do not checksum as a whole frame are not
// Modbus as far as this decoder is concerned.

use serde_json::{json, Map};

use super::{DecodedFrame, DecoderPlugin};
use crate::checksums::modbus_crc_valid;

/// Shortest legal RTU frame: address + function + CRC.
const MIN_FRAME_LEN: usize = 4;
/// RTU frames are capped at 256 bytes on the wire.
const MAX_FRAME_LEN: usize = 256;

pub struct ModbusRtuDecoder;

fn function_name(code: u8) -> Option<&'static str> {
    match code & 0x7F {
        0x01 => Some("Read Coils"),
        0x02 => Some("Read Discrete Inputs"),
        0x03 => Some("Read Holding Registers"),
        0x04 => Some("Read Input Registers"),
        0x05 => Some("Write Single Coil"),
        0x06 => Some("Write Single Register"),
        0x0F => Some("Write Multiple Coils"),
        0x10 => Some("Write Multiple Registers"),
        _ => None,
    }
}

impl DecoderPlugin for ModbusRtuDecoder {
    fn name(&self) -> &str {
        "Modbus RTU"
    }

    fn description(&self) -> Option<&str> {
        Some("Modbus RTU frames with CRC-16 validation")
    }

    fn decode(&self, bytes: &[u8]) -> Option<DecodedFrame> {
        if bytes.len() < MIN_FRAME_LEN || bytes.len() > MAX_FRAME_LEN {
            return None;
        }
        if !modbus_crc_valid(bytes) {
            return None;
        }

        let slave_address = bytes[0];
        // Address 0 is broadcast; 248-255 are reserved
        if slave_address > 247 {
            return None;
        }

        let function_code = bytes[1];
        let is_exception = function_code & 0x80 != 0;
        let pdu = &bytes[2..bytes.len() - 2];

        let mut fields = Map::new();
        fields.insert("slaveAddress".to_string(), json!(slave_address));
        fields.insert(
            "functionCode".to_string(),
            json!(format!("0x{:02X}", function_code)),
        );
        fields.insert("crcValid".to_string(), json!(true));
        if let Some(name) = function_name(function_code) {
            fields.insert("function".to_string(), json!(name));
        }
        if is_exception {
            fields.insert("exception".to_string(), json!(true));
            if let Some(&code) = pdu.first() {
                fields.insert("exceptionCode".to_string(), json!(code));
            }
        } else {
            // Read responses carry a byte count followed by register data
            match function_code {
                0x01..=0x04 if !pdu.is_empty() && pdu[0] as usize == pdu.len() - 1 => {
                    fields.insert("byteCount".to_string(), json!(pdu[0]));
                    let data: String =
                        pdu[1..].iter().map(|b| format!("{:02X}", b)).collect();
                    fields.insert("data".to_string(), json!(data));
                }
                _ => {
                    let data: String = pdu.iter().map(|b| format!("{:02X}", b)).collect();
                    fields.insert("data".to_string(), json!(data));
                }
            }
        }

        let display = if is_exception {
            format!(
                "Modbus RTU slave {} exception for 0x{:02X}",
                slave_address,
                function_code & 0x7F
            )
        } else {
            match function_name(function_code) {
                Some(name) => format!("Modbus RTU slave {} {}", slave_address, name),
                None => format!(
                    "Modbus RTU slave {} function 0x{:02X}",
                    slave_address, function_code
                ),
            }
        };

        Some(DecodedFrame {
            name: String::new(),
            protocol: "Modbus RTU".to_string(),
            fields,
            display,
        })
    }
}
