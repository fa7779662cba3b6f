// src/macros.rs
//
// Stored command macros and their executor.
// A macro is a named sequence of send commands with per-command delays,
// run for repeat_count iterations on a chosen channel. {{name}} literals
// in command data are substituted from the caller's parameter values;
// placeholders without a value are sent literally.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::channel::buffer::SendMode;
use crate::channel::manager::ChannelManager;
use crate::channel::now_ms;
use crate::error::{MonitorError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MacroCommand {
    pub data: String,
    pub mode: SendMode,
    #[serde(default)]
    pub delay_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Macro {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub commands: Vec<MacroCommand>,
    #[serde(default = "default_repeat_count")]
    pub repeat_count: u32,
    #[serde(default)]
    pub params: Vec<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

fn default_repeat_count() -> u32 {
    1
}

/// Caller-editable macro fields; id and timestamps are store-managed.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MacroInput {
    pub name: String,
    #[serde(default)]
    pub commands: Vec<MacroCommand>,
    #[serde(default = "default_repeat_count")]
    pub repeat_count: u32,
    #[serde(default)]
    pub params: Vec<String>,
}

impl Macro {
    pub fn from_input(input: MacroInput) -> Self {
        let now = now_ms();
        Macro {
            id: uuid::Uuid::new_v4().to_string(),
            name: input.name,
            commands: input.commands,
            repeat_count: input.repeat_count.max(1),
            params: input.params,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an update in place; the id and created_at are immutable.
    pub fn apply(&mut self, input: MacroInput) {
        self.name = input.name;
        self.commands = input.commands;
        self.repeat_count = input.repeat_count.max(1);
        self.params = input.params;
        self.updated_at = now_ms();
    }
}

/// Replace every {{name}} literal with its value. Placeholders without a
/// value pass through untouched.
pub fn substitute(data: &str, values: &HashMap<String, String>) -> String {
    let mut result = data.to_string();
    for (name, value) in values {
        result = result.replace(&format!("{{{{{}}}}}", name), value);
    }
    result
}

/// Run a macro on a channel. Sends commands in order for repeat_count
/// iterations, sleeping each command's delay after it, except after the
/// final command of the final iteration. The first failing send aborts
/// the run. Dropping the returned future at a delay or send boundary
/// cancels the rest of the run.
pub async fn run_macro(
    manager: &ChannelManager,
    macro_def: &Macro,
    channel_id: &str,
    values: &HashMap<String, String>,
) -> Result<()> {
    tlog!(
        "[macro] Running '{}' on channel '{}' ({} command(s) x {})",
        macro_def.name,
        channel_id,
        macro_def.commands.len(),
        macro_def.repeat_count
    );

    let total = macro_def.repeat_count.max(1);
    for iteration in 0..total {
        for (position, command) in macro_def.commands.iter().enumerate() {
            let payload = substitute(&command.data, values);
            if let Err(e) = manager.send(channel_id, &payload, command.mode).await {
                tlog!(
                    "[macro] '{}' aborted at iteration {} command {}: {}",
                    macro_def.name,
                    iteration,
                    position,
                    e
                );
                return Err(MonitorError::macro_aborted(e));
            }

            let is_last = iteration + 1 == total && position + 1 == macro_def.commands.len();
            if !is_last && command.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(command.delay_ms)).await;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::buffer::Direction;
    use crate::decoders::DecoderRegistry;
    use crate::events::EventBus;
    use std::sync::Arc;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitute() {
        let vals = values(&[("x", "42"), ("name", "pump")]);
        assert_eq!(substitute("SET {{x}}", &vals), "SET 42");
        assert_eq!(substitute("{{name}}={{x}}", &vals), "pump=42");
        // Unknown placeholders are sent literally
        assert_eq!(substitute("GET {{missing}}", &vals), "GET {{missing}}");
        assert_eq!(substitute("plain", &vals), "plain");
    }

    #[test]
    fn test_from_input_clamps_repeat_count() {
        let m = Macro::from_input(MacroInput {
            name: "m".to_string(),
            repeat_count: 0,
            ..MacroInput::default()
        });
        assert_eq!(m.repeat_count, 1);
        assert!(!m.id.is_empty());
        assert_eq!(m.created_at, m.updated_at);
    }

    fn test_macro(commands: Vec<MacroCommand>, repeat_count: u32) -> Macro {
        Macro {
            id: "test".to_string(),
            name: "test".to_string(),
            commands,
            repeat_count,
            params: vec!["x".to_string()],
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn test_macro_aborts_on_closed_channel() {
        let bus = EventBus::new();
        let decoders = Arc::new(DecoderRegistry::new(None));
        let manager = ChannelManager::new(bus, decoders);

        let m = test_macro(
            vec![MacroCommand {
                data: "GO".to_string(),
                mode: SendMode::Ascii,
                delay_ms: 0,
            }],
            2,
        );
        let err = run_macro(&manager, &m, "closed", &HashMap::new())
            .await
            .unwrap_err();
        match err {
            MonitorError::MacroAborted { source } => {
                assert!(matches!(*source, MonitorError::NotConnected(_)))
            }
            other => panic!("expected MacroAborted, got {:?}", other),
        }
    }

    /// End-to-end over a pseudo-terminal: the macro's sends reach the
    /// device in order with parameters substituted, and each shows up as
    /// a tx entry in the channel buffer.
    #[cfg(unix)]
    #[tokio::test]
    async fn test_macro_end_to_end_over_pty() {
        use crate::channel::config::PortConfigBuilder;
        use serialport::SerialPort as _;
        use std::io::Read;

        let (mut device, slave) = serialport::TTYPort::pair().expect("pty pair");
        let path = slave.name().expect("pty slave path");

        let bus = EventBus::new();
        let decoders = Arc::new(DecoderRegistry::new(None));
        let manager = ChannelManager::new(bus, decoders);

        let config = PortConfigBuilder::new().path(&path).build().unwrap();
        manager.connect("a", config).await.unwrap();

        let m = test_macro(
            vec![
                MacroCommand {
                    data: "SET {{x}}".to_string(),
                    mode: SendMode::Ascii,
                    delay_ms: 10,
                },
                MacroCommand {
                    data: "GO".to_string(),
                    mode: SendMode::Ascii,
                    delay_ms: 0,
                },
            ],
            2,
        );

        run_macro(&manager, &m, "a", &values(&[("x", "42")]))
            .await
            .unwrap();

        // The device side sees the four encoded payloads in order
        device.set_timeout(Duration::from_millis(500)).unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 64];
        let expected = b"SET 42\nGO\nSET 42\nGO\n";
        while received.len() < expected.len() {
            match device.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(_) => break,
            }
        }
        assert_eq!(received, expected);

        // And the buffer holds four ordered tx entries
        let entries = manager.snapshot_buffer("a");
        let data: Vec<&str> = entries.iter().map(|e| e.data.as_str()).collect();
        assert_eq!(data, vec!["SET 42", "GO", "SET 42", "GO"]);
        assert!(entries.iter().all(|e| e.direction == Direction::Tx));
        assert_eq!(manager.status("a").stats.lines_tx, 4);

        manager.shutdown_all().await;
    }
}
