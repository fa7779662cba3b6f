// src/error.rs
//
// Error taxonomy for channel, store and macro operations.
// Reader-internal I/O hiccups are not represented here: transient read and
// write failures only bump the channel error counter and surface as error
// events on the bus, while fatal ones close the channel.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// Device path missing, permission denied, or the open timed out.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The driver (or the config builder) rejected the port parameters.
    #[error("invalid port configuration: {0}")]
    InvalidConfig(String),

    /// The operation requires an open channel.
    #[error("channel '{0}' is not connected")]
    NotConnected(String),

    /// A hex or binary send payload could not be parsed.
    #[error("invalid {mode} payload: {reason}")]
    InvalidEncoding { mode: &'static str, reason: String },

    /// Unknown macro, profile or channel id.
    #[error("{0} not found")]
    NotFound(String),

    /// A persistent store could not be read or written.
    #[error("store failure: {0}")]
    StoreFailure(String),

    /// A send inside a macro run failed; carries the underlying cause.
    #[error("macro aborted: {source}")]
    MacroAborted {
        #[source]
        source: Box<MonitorError>,
    },
}

impl MonitorError {
    /// Wrap an error as the cause of an aborted macro run.
    pub fn macro_aborted(source: MonitorError) -> Self {
        MonitorError::MacroAborted {
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
