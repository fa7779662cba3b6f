// src/lib.rs
//
// linetap: a multi-channel serial-port monitoring server.
// Bridges physical UART/USB-serial devices to browser clients over a
// WebSocket/REST surface, with line framing, protocol decoding, bounded
// per-channel buffering, macro playback and export.

#[macro_use]
mod logging;

pub mod channel;
pub mod checksums;
pub mod decoders;
pub mod error;
pub mod events;
pub mod export;
pub mod macros;
pub mod ports;
pub mod server;
pub mod stores;

pub use server::{run, Args};
