// src/decoders/mod.rs
//
// Protocol decoder plugins.
// Decoders are pure functions over a byte slice: same input, same output,
// no shared state. The registry holds a statically registered set of
// builtin decoders (selected by an enable list), fans decode calls out to
// all of them, and isolates panicking plugins so one bad decoder cannot
// take the stream down.

mod modbus;
mod nmea;
mod slip;

pub use modbus::ModbusRtuDecoder;
pub use nmea::NmeaDecoder;
pub use slip::SlipDecoder;

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

/// One decoded protocol frame. `name` is attached by the registry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecodedFrame {
    #[serde(default)]
    pub name: String,
    pub protocol: String,
    pub fields: serde_json::Map<String, serde_json::Value>,
    pub display: String,
}

/// Decoder metadata for plugin listings.
#[derive(Clone, Debug, Serialize)]
pub struct PluginInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A protocol decoder. Implementations must be stateless and pure over
/// their input; they see raw pre-framing bytes from the device.
pub trait DecoderPlugin: Send + Sync {
    /// Display name, unique within the registry.
    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    /// Try to decode the byte slice; `None` when the protocol does not
    /// match.
    fn decode(&self, bytes: &[u8]) -> Option<DecodedFrame>;
}

/// All decoders this build ships.
pub fn builtin_plugins() -> Vec<Arc<dyn DecoderPlugin>> {
    vec![
        Arc::new(ModbusRtuDecoder),
        Arc::new(SlipDecoder),
        Arc::new(NmeaDecoder),
    ]
}

/// Read-mostly decoder registry. The plugin list is swapped atomically on
/// reload; an in-flight decode_all keeps using the set it started with.
pub struct DecoderRegistry {
    plugins: RwLock<Arc<Vec<Arc<dyn DecoderPlugin>>>>,
}

impl DecoderRegistry {
    /// Register the builtin decoders, optionally filtered by an enable
    /// list of names (None enables everything). Unknown names in the list
    /// are logged and skipped.
    pub fn new(enabled: Option<&[String]>) -> Self {
        let registry = DecoderRegistry {
            plugins: RwLock::new(Arc::new(Vec::new())),
        };
        registry.reload(enabled);
        registry
    }

    /// Rebuild the plugin list from the builtin set. Atomic from the
    /// caller's perspective: readers see either the old or the new set.
    pub fn reload(&self, enabled: Option<&[String]>) {
        let all = builtin_plugins();
        let selected: Vec<Arc<dyn DecoderPlugin>> = match enabled {
            None => all,
            Some(names) => {
                for name in names {
                    if !all.iter().any(|p| p.name() == name) {
                        tlog!("[decoders] Unknown decoder '{}' in enable list, skipping", name);
                    }
                }
                all.into_iter()
                    .filter(|p| names.iter().any(|n| n == p.name()))
                    .collect()
            }
        };
        tlog!(
            "[decoders] Registered {} decoder(s): {:?}",
            selected.len(),
            selected.iter().map(|p| p.name()).collect::<Vec<_>>()
        );
        if let Ok(mut guard) = self.plugins.write() {
            *guard = Arc::new(selected);
        }
    }

    /// Run every registered decoder over the same bytes and collect the
    /// non-None results in registration order. A panicking decoder yields
    /// nothing and does not affect the others.
    pub fn decode_all(&self, bytes: &[u8]) -> Vec<DecodedFrame> {
        let plugins = match self.plugins.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(_) => return Vec::new(),
        };

        let mut results = Vec::new();
        for plugin in plugins.iter() {
            match catch_unwind(AssertUnwindSafe(|| plugin.decode(bytes))) {
                Ok(Some(mut frame)) => {
                    frame.name = plugin.name().to_string();
                    results.push(frame);
                }
                Ok(None) => {}
                Err(_) => {
                    tlog!("[decoders] Decoder '{}' panicked, skipping", plugin.name());
                }
            }
        }
        results
    }

    pub fn plugin_infos(&self) -> Vec<PluginInfo> {
        let plugins = match self.plugins.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(_) => return Vec::new(),
        };
        plugins
            .iter()
            .map(|p| PluginInfo {
                name: p.name().to_string(),
                description: p.description().map(|d| d.to_string()),
            })
            .collect()
    }
}
