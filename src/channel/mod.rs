// src/channel/mod.rs
//
// A Channel owns one serial connection: the device handle, its immutable
// open-time configuration, the line framer, the bounded entry buffer and
// the statistics. A blocking reader task pulls bytes from the device and
// runs them through the rx pipeline; writes go through the caller's task,
// serialised per channel. The channel itself outlives any number of
// open/close cycles and is destroyed only by the manager.

pub mod buffer;
pub mod config;
pub mod encode;
pub mod framer;
pub mod manager;

use serde::Serialize;
use serialport::SerialPort;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;

use crate::decoders::{DecodedFrame, DecoderRegistry};
use crate::error::{MonitorError, Result};
use crate::events::{EventBus, MonitorEvent};
use buffer::{ChannelStats, Direction, LineBuffer, LineEntry, SendMode};
use config::PortConfig;
use encode::{encode_payload, to_hex};
use framer::LineFramer;

/// Read timeout inside the reader loop; bounds how long a close waits for
/// the current read call to drain.
const READ_TIMEOUT_MS: u64 = 50;
/// Time allowed for the blocking open before it fails as unavailable.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);
const READ_CHUNK: usize = 256;

/// Wall-clock ms since epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Channel lifecycle. Opening and Closing are transient; concurrent
/// lifecycle calls serialise against them on the channel's io mutex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// Snapshot returned by status queries.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<PortConfig>,
    pub stats: ChannelStats,
    pub buffer_size: usize,
}

/// State shared between the reader task and the channel API.
/// Guarded by a std mutex; every critical section is short and the buffer
/// copy-out happens under it.
struct ChannelCore {
    state: ChannelState,
    config: Option<PortConfig>,
    buffer: LineBuffer,
    stats: ChannelStats,
}

/// Connection-scoped handles. Guarded by the channel's async mutex so
/// open/close/send serialise against each other.
struct ChannelIo {
    port: Option<Arc<StdMutex<Box<dyn SerialPort>>>>,
    stop_flag: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

pub struct Channel {
    id: String,
    core: Arc<StdMutex<ChannelCore>>,
    io: TokioMutex<ChannelIo>,
    bus: EventBus,
    decoders: Arc<DecoderRegistry>,
}

impl Channel {
    pub fn new(id: impl Into<String>, bus: EventBus, decoders: Arc<DecoderRegistry>) -> Self {
        Channel {
            id: id.into(),
            core: Arc::new(StdMutex::new(ChannelCore {
                state: ChannelState::Closed,
                config: None,
                buffer: LineBuffer::new(),
                stats: ChannelStats::default(),
            })),
            io: TokioMutex::new(ChannelIo {
                port: None,
                stop_flag: Arc::new(AtomicBool::new(false)),
                reader: None,
            }),
            bus,
            decoders: Arc::clone(&decoders),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Open the device. An already-open channel is closed first. Counters
    /// reset on success; the buffer and its index counter do not.
    pub async fn open(&self, config: PortConfig) -> Result<()> {
        let mut io = self.io.lock().await;
        self.close_locked(&mut io).await;

        self.with_core(|core| core.state = ChannelState::Opening);

        let opened = self.open_port(&config).await;
        let port = match opened {
            Ok(port) => port,
            Err(e) => {
                self.with_core(|core| core.state = ChannelState::Closed);
                tlog!("[channel:{}] Open failed: {}", self.id, e);
                // Synchronous failures also surface on the bus
                self.bus.publish(MonitorEvent::Error {
                    channel_id: self.id.clone(),
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let port = Arc::new(StdMutex::new(port));
        let stop_flag = Arc::new(AtomicBool::new(false));

        self.with_core(|core| {
            core.state = ChannelState::Open;
            core.config = Some(config.clone());
            core.stats = ChannelStats {
                connected_at: Some(now_ms()),
                ..ChannelStats::default()
            };
        });

        let reader = self.spawn_reader(Arc::clone(&port), Arc::clone(&stop_flag));
        io.port = Some(port);
        io.stop_flag = stop_flag;
        io.reader = Some(reader);

        tlog!("[channel:{}] Connected to {} ({} baud)", self.id, config.path, config.baud_rate);
        self.bus.publish(MonitorEvent::Connected {
            channel_id: self.id.clone(),
            config,
        });
        Ok(())
    }

    /// Close the device. Idempotent; publishes `Disconnected` exactly once
    /// per prior open (the reader does it instead when it died first).
    pub async fn close(&self) {
        let mut io = self.io.lock().await;
        self.close_locked(&mut io).await;
    }

    /// Encode and write a payload, then record the tx entry.
    /// Transient write failures do not fail the call: they bump the error
    /// counter and surface as an error event.
    pub async fn send(&self, data: &str, mode: SendMode) -> Result<()> {
        let io = self.io.lock().await;

        let open = self.with_core(|core| core.state == ChannelState::Open);
        let port = match (open, io.port.as_ref()) {
            (true, Some(port)) => Arc::clone(port),
            _ => return Err(MonitorError::NotConnected(self.id.clone())),
        };

        let bytes = encode_payload(data, mode)?;
        let byte_count = bytes.len() as u64;

        let write_result = tokio::task::spawn_blocking(move || {
            let mut guard = port
                .lock()
                .map_err(|_| "port mutex poisoned".to_string())?;
            guard
                .write_all(&bytes)
                .and_then(|_| guard.flush())
                .map_err(|e| e.to_string())
        })
        .await
        .unwrap_or_else(|e| Err(format!("write task failed: {}", e)));

        match write_result {
            Ok(()) => {
                // Append and publish under one lock so entry index order
                // matches publication order for this channel
                let mut core = self
                    .core
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                core.stats.bytes_tx += byte_count;
                core.stats.lines_tx += 1;
                let entry = core.buffer.push(LineEntry {
                    timestamp: now_ms(),
                    direction: Direction::Tx,
                    data: data.to_string(),
                    mode: Some(mode),
                    index: 0,
                    channel_id: self.id.clone(),
                });
                self.bus.publish(MonitorEvent::Line {
                    channel_id: self.id.clone(),
                    entry,
                    decoded: None,
                });
                drop(core);
                Ok(())
            }
            Err(message) => {
                self.with_core(|core| core.stats.errors += 1);
                tlog!("[channel:{}] Write failed: {}", self.id, message);
                self.bus.publish(MonitorEvent::Error {
                    channel_id: self.id.clone(),
                    message: format!("write failed: {}", message),
                });
                Ok(())
            }
        }
    }

    /// Empty the buffer and rewind the entry index. Stats are unaffected.
    pub fn clear_buffer(&self) {
        self.with_core(|core| core.buffer.clear());
        self.bus.publish(MonitorEvent::Cleared {
            channel_id: self.id.clone(),
        });
    }

    pub fn status(&self) -> ChannelStatus {
        self.with_core(|core| ChannelStatus {
            connected: core.state == ChannelState::Open,
            config: core.config.clone(),
            stats: core.stats.clone(),
            buffer_size: core.buffer.len(),
        })
    }

    /// Buffer-relative slice copy.
    pub fn get_buffer(&self, start: usize, count: Option<usize>) -> Vec<LineEntry> {
        self.with_core(|core| core.buffer.slice(start, count))
    }

    /// Whole-buffer copy for export.
    pub fn snapshot_buffer(&self) -> Vec<LineEntry> {
        self.with_core(|core| core.buffer.snapshot())
    }

    pub fn is_connected(&self) -> bool {
        self.with_core(|core| core.state == ChannelState::Open)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn with_core<T>(&self, f: impl FnOnce(&mut ChannelCore) -> T) -> T {
        let mut core = self
            .core
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut core)
    }

    async fn close_locked(&self, io: &mut ChannelIo) {
        let was_open = self.with_core(|core| {
            if core.state == ChannelState::Open {
                core.state = ChannelState::Closing;
                true
            } else {
                false
            }
        });

        io.stop_flag.store(true, Ordering::SeqCst);
        io.port = None;
        if let Some(reader) = io.reader.take() {
            let _ = reader.await;
        }

        // The reader publishes the events itself when it hit a fatal error
        // before this close ran; don't double-report.
        let emit = self.with_core(|core| {
            let emit = core.state == ChannelState::Closing;
            core.state = ChannelState::Closed;
            core.config = None;
            core.stats.connected_at = None;
            emit
        });

        if was_open && emit {
            tlog!("[channel:{}] Disconnected", self.id);
            self.bus.publish(MonitorEvent::Disconnected {
                channel_id: self.id.clone(),
            });
        }
    }

    async fn open_port(&self, config: &PortConfig) -> Result<Box<dyn SerialPort>> {
        let data_bits = config::to_serialport_data_bits(config.data_bits);
        let stop_bits = config::to_serialport_stop_bits(config.stop_bits)?;
        let parity = config::to_serialport_parity(config.parity)?;
        let flow_control = config::to_serialport_flow_control(config.flow_control);

        let path = config.path.clone();
        let baud_rate = config.baud_rate;

        let open_task = tokio::task::spawn_blocking(move || {
            serialport::new(&path, baud_rate)
                .data_bits(data_bits)
                .stop_bits(stop_bits)
                .parity(parity)
                .flow_control(flow_control)
                .timeout(Duration::from_millis(READ_TIMEOUT_MS))
                .open()
        });

        match tokio::time::timeout(OPEN_TIMEOUT, open_task).await {
            Err(_) => Err(MonitorError::DeviceUnavailable(format!(
                "open of {} timed out",
                config.path
            ))),
            Ok(Err(join_error)) => Err(MonitorError::DeviceUnavailable(format!(
                "open task failed: {}",
                join_error
            ))),
            Ok(Ok(Err(e))) => Err(match e.kind() {
                serialport::ErrorKind::InvalidInput => MonitorError::InvalidConfig(e.to_string()),
                _ => MonitorError::DeviceUnavailable(format!("{}: {}", config.path, e)),
            }),
            Ok(Ok(Ok(port))) => Ok(port),
        }
    }

    fn spawn_reader(
        &self,
        port: Arc<StdMutex<Box<dyn SerialPort>>>,
        stop_flag: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let mut pipeline = RxPipeline::new(
            self.id.clone(),
            Arc::clone(&self.core),
            self.bus.clone(),
            Arc::clone(&self.decoders),
        );

        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; READ_CHUNK];

            while !stop_flag.load(Ordering::SeqCst) {
                let read_result = match port.lock() {
                    Ok(mut guard) => guard.read(&mut buf),
                    Err(_) => {
                        pipeline.fatal("port mutex poisoned");
                        return;
                    }
                };

                match read_result {
                    Ok(0) => {
                        // EOF means the device went away
                        pipeline.fatal("device disconnected");
                        return;
                    }
                    Ok(n) => pipeline.ingest(&buf[..n], now_ms()),
                    Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(ref e)
                        if matches!(
                            e.kind(),
                            std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
                        ) =>
                    {
                        pipeline.transient(&format!("read error: {}", e));
                    }
                    Err(e) => {
                        pipeline.fatal(&format!("read error: {}", e));
                        return;
                    }
                }
            }
            // Stopped by close(); any partial line in the framer is dropped
        })
    }
}

/// The rx path: raw chunk -> stats -> raw event -> decoders -> line
/// framing -> buffer append -> line events. Factored out of the reader
/// task so tests can feed chunks without a device.
pub(crate) struct RxPipeline {
    channel_id: String,
    core: Arc<StdMutex<ChannelCore>>,
    bus: EventBus,
    decoders: Arc<DecoderRegistry>,
    framer: LineFramer,
    /// Frames decoded from chunks that have not yet completed a line;
    /// attached to the next line entry that follows them.
    pending_decoded: Vec<DecodedFrame>,
}

impl RxPipeline {
    fn new(
        channel_id: String,
        core: Arc<StdMutex<ChannelCore>>,
        bus: EventBus,
        decoders: Arc<DecoderRegistry>,
    ) -> Self {
        RxPipeline {
            channel_id,
            core,
            bus,
            decoders,
            framer: LineFramer::new(),
            pending_decoded: Vec::new(),
        }
    }

    fn with_core<T>(&self, f: impl FnOnce(&mut ChannelCore) -> T) -> T {
        let mut core = self
            .core
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut core)
    }

    /// Process one raw chunk read from the device.
    pub(crate) fn ingest(&mut self, chunk: &[u8], timestamp: u64) {
        self.with_core(|core| core.stats.bytes_rx += chunk.len() as u64);

        self.bus.publish(MonitorEvent::RawData {
            channel_id: self.channel_id.clone(),
            hex: to_hex(chunk),
            timestamp,
        });

        // Decoders see pre-framing bytes; results ride on the next line
        self.pending_decoded.extend(self.decoders.decode_all(chunk));

        for line in self.framer.feed(chunk) {
            let decoded = if self.pending_decoded.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut self.pending_decoded))
            };

            // Append and publish under one lock so entry index order
            // matches publication order for this channel
            let mut core = self
                .core
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            core.stats.lines_rx += 1;
            let entry = core.buffer.push(LineEntry {
                timestamp,
                direction: Direction::Rx,
                data: line,
                mode: None,
                index: 0,
                channel_id: self.channel_id.clone(),
            });
            self.bus.publish(MonitorEvent::Line {
                channel_id: self.channel_id.clone(),
                entry,
                decoded,
            });
        }
    }

    /// Recoverable hiccup: count it, report it, keep reading.
    fn transient(&self, message: &str) {
        self.with_core(|core| core.stats.errors += 1);
        tlog!("[channel:{}] Transient {}", self.channel_id, message);
        self.bus.publish(MonitorEvent::Error {
            channel_id: self.channel_id.clone(),
            message: message.to_string(),
        });
    }

    /// Unrecoverable failure: the channel transitions to Closed and both
    /// error and disconnected events go out, in that order.
    fn fatal(&mut self, message: &str) {
        let was_open = self.with_core(|core| {
            core.stats.errors += 1;
            if core.state == ChannelState::Open {
                core.state = ChannelState::Closed;
                core.config = None;
                core.stats.connected_at = None;
                true
            } else {
                false
            }
        });

        tlog!("[channel:{}] Fatal {}", self.channel_id, message);
        self.bus.publish(MonitorEvent::Error {
            channel_id: self.channel_id.clone(),
            message: message.to_string(),
        });
        if was_open {
            self.bus.publish(MonitorEvent::Disconnected {
                channel_id: self.channel_id.clone(),
            });
        }
    }
}
