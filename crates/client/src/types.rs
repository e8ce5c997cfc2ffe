//! Connection state and per-channel limits.

use std::time::Duration;

use mc_domain::config::ChannelConfig;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

/// Lifecycle of a [`CorrelatedChannel`](crate::channel::CorrelatedChannel).
///
/// `Disconnected → Connecting → Open → Closing → Disconnected`. A transport
/// failure while `Open` moves straight back to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelState::Disconnected => "disconnected",
            ChannelState::Connecting => "connecting",
            ChannelState::Open => "open",
            ChannelState::Closing => "closing",
        };
        f.write_str(s)
    }
}

/// Limits applied by one channel.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Deadline for each call. `None` waits until the reply or disconnect.
    pub call_timeout: Option<Duration>,
    /// Inbound text frames larger than this are dropped before parsing.
    pub max_inbound_bytes: usize,
    /// Capacity of the queue feeding the writer task.
    pub outbound_queue: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self::from(&ChannelConfig::default())
    }
}

impl From<&ChannelConfig> for ChannelSettings {
    fn from(cfg: &ChannelConfig) -> Self {
        Self {
            call_timeout: cfg.call_timeout(),
            max_inbound_bytes: cfg.max_inbound_bytes,
            outbound_queue: cfg.outbound_queue.max(1),
        }
    }
}

impl ChannelSettings {
    /// Transport config for a websocket driven by this channel.
    ///
    /// tungstenite's own frame and message caps are lifted: a frame over
    /// its default 16 MiB would otherwise be a read error that tears the
    /// whole session down. `max_inbound_bytes` is enforced by the reader
    /// instead, which drops the frame and keeps the connection.
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: None,
            max_frame_size: None,
            ..Default::default()
        }
    }
}
