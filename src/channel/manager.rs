// src/channel/manager.rs
//
// Channel registry and lifecycle operations.
// Channels are created lazily on first reference to their id, survive any
// number of open/close cycles, and are destroyed only by remove_channel.
// The map mutex guards insert/remove; channel operations run on the
// cloned Arc outside of it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::channel::buffer::{LineEntry, SendMode};
use crate::channel::config::PortConfig;
use crate::channel::{Channel, ChannelStatus};
use crate::decoders::DecoderRegistry;
use crate::error::Result;
use crate::events::EventBus;

/// Fallback channel id applied at the transport edges when a caller
/// omits one.
pub const DEFAULT_CHANNEL_ID: &str = "default";

pub struct ChannelManager {
    channels: Mutex<HashMap<String, Arc<Channel>>>,
    bus: EventBus,
    decoders: Arc<DecoderRegistry>,
}

impl ChannelManager {
    pub fn new(bus: EventBus, decoders: Arc<DecoderRegistry>) -> Self {
        ChannelManager {
            channels: Mutex::new(HashMap::new()),
            bus,
            decoders,
        }
    }

    /// Fetch a channel, creating a fresh closed one if absent. The single
    /// entry point for channel allocation.
    pub fn get(&self, channel_id: &str) -> Arc<Channel> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(channels.entry(channel_id.to_string()).or_insert_with(|| {
            tlog!("[manager] Created channel '{}'", channel_id);
            Arc::new(Channel::new(
                channel_id,
                self.bus.clone(),
                Arc::clone(&self.decoders),
            ))
        }))
    }

    /// Look up without creating.
    pub fn peek(&self, channel_id: &str) -> Option<Arc<Channel>> {
        self.channels
            .lock()
            .ok()
            .and_then(|channels| channels.get(channel_id).cloned())
    }

    pub async fn connect(&self, channel_id: &str, config: PortConfig) -> Result<()> {
        self.get(channel_id).open(config).await
    }

    pub async fn disconnect(&self, channel_id: &str) {
        self.get(channel_id).close().await;
    }

    pub async fn send(&self, channel_id: &str, data: &str, mode: SendMode) -> Result<()> {
        self.get(channel_id).send(data, mode).await
    }

    pub fn clear_buffer(&self, channel_id: &str) {
        self.get(channel_id).clear_buffer();
    }

    pub fn get_buffer(
        &self,
        channel_id: &str,
        start: usize,
        count: Option<usize>,
    ) -> Vec<LineEntry> {
        self.get(channel_id).get_buffer(start, count)
    }

    pub fn snapshot_buffer(&self, channel_id: &str) -> Vec<LineEntry> {
        self.get(channel_id).snapshot_buffer()
    }

    pub fn status(&self, channel_id: &str) -> ChannelStatus {
        self.get(channel_id).status()
    }

    /// Status of every known channel, keyed by id.
    pub fn status_all(&self) -> HashMap<String, ChannelStatus> {
        let channels: Vec<Arc<Channel>> = {
            let guard = self
                .channels
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.values().cloned().collect()
        };
        channels
            .into_iter()
            .map(|c| (c.id().to_string(), c.status()))
            .collect()
    }

    pub fn channel_ids(&self) -> Vec<String> {
        self.channels
            .lock()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Close (if open) and drop the channel entirely. Later references
    /// create a fresh one.
    pub async fn remove_channel(&self, channel_id: &str) {
        let removed = {
            let mut channels = self
                .channels
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            channels.remove(channel_id)
        };
        if let Some(channel) = removed {
            channel.close().await;
            tlog!("[manager] Removed channel '{}'", channel_id);
        }
    }

    /// Close every open channel and wait for their readers. Part of
    /// process shutdown; the server stops port polling alongside this.
    pub async fn shutdown_all(&self) {
        let channels: Vec<Arc<Channel>> = {
            let guard = self
                .channels
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.values().cloned().collect()
        };
        for channel in channels {
            channel.close().await;
        }
        tlog!("[manager] All channels closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelState, RxPipeline};
    use crate::events::MonitorEvent;

    fn manager() -> (ChannelManager, EventBus) {
        let bus = EventBus::new();
        let decoders = Arc::new(DecoderRegistry::new(None));
        (ChannelManager::new(bus.clone(), decoders), bus)
    }

    fn force_open_pipeline(channel: &Arc<Channel>) -> RxPipeline {
        channel.with_core(|core| core.state = ChannelState::Open);
        RxPipeline::new(
            channel.id().to_string(),
            Arc::clone(&channel.core),
            channel.bus.clone(),
            Arc::clone(&channel.decoders),
        )
    }

    #[tokio::test]
    async fn test_lazy_creation_and_reuse() {
        let (manager, _bus) = manager();
        let a = manager.get("a");
        let again = manager.get("a");
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(manager.channel_ids(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_status_all_keyed_by_id() {
        let (manager, _bus) = manager();
        manager.get("a");
        manager.get("b");
        let statuses = manager.status_all();
        assert_eq!(statuses.len(), 2);
        assert!(!statuses["a"].connected);
        assert!(!statuses["b"].connected);
    }

    #[tokio::test]
    async fn test_remove_channel_forgets_state() {
        let (manager, _bus) = manager();
        let a = manager.get("a");
        let mut pipeline = force_open_pipeline(&a);
        pipeline.ingest(b"data\n", 1000);
        assert_eq!(manager.status("a").stats.lines_rx, 1);

        manager.remove_channel("a").await;

        // A later reference gets a fresh channel
        let fresh = manager.status("a");
        assert_eq!(fresh.stats.lines_rx, 0);
        assert_eq!(fresh.buffer_size, 0);
    }

    #[tokio::test]
    async fn test_channel_isolation() {
        let (manager, bus) = manager();
        let a = manager.get("a");
        let b = manager.get("b");

        let mut sub = bus.subscribe();
        let mut pipeline_a = force_open_pipeline(&a);
        pipeline_a.ingest(b"only for a\n", 1000);

        assert_eq!(manager.status("a").stats.lines_rx, 1);
        assert_eq!(manager.status("b").stats.lines_rx, 0);
        assert_eq!(b.snapshot_buffer().len(), 0);

        // No event mentions channel b
        while let Some(event) = sub.try_recv() {
            match event {
                MonitorEvent::Line { channel_id, .. }
                | MonitorEvent::RawData { channel_id, .. } => assert_eq!(channel_id, "a"),
                other => panic!("unexpected event: {:?}", other),
            }
        }

        // Clearing a's buffer leaves b alone
        pipeline_a.ingest(b"more\n", 1001);
        let mut pipeline_b = force_open_pipeline(&b);
        pipeline_b.ingest(b"b data\n", 1002);
        manager.clear_buffer("a");
        assert_eq!(manager.status("a").buffer_size, 0);
        assert_eq!(manager.status("b").buffer_size, 1);
    }

    #[tokio::test]
    async fn test_send_on_missing_channel_is_not_connected() {
        let (manager, _bus) = manager();
        let result = manager.send("ghost", "hi", SendMode::Ascii).await;
        assert!(result.is_err());
        // The lazy channel now exists, closed
        assert!(!manager.status("ghost").connected);
    }

    #[tokio::test]
    async fn test_shutdown_all_closes_everything() {
        let (manager, _bus) = manager();
        manager.get("a");
        manager.get("b");
        manager.shutdown_all().await;
        assert!(manager.status_all().values().all(|s| !s.connected));
    }
}
