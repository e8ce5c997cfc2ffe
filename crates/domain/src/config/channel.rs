use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Channel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Maximum wait for a reply, in seconds. `0` waits forever.
    #[serde(default = "d_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Inbound frames larger than this are dropped before parsing.
    #[serde(default = "d_max_inbound_bytes")]
    pub max_inbound_bytes: usize,
    /// Capacity of the outbound frame queue feeding the writer task.
    #[serde(default = "d_outbound_queue")]
    pub outbound_queue: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: d_call_timeout_secs(),
            max_inbound_bytes: d_max_inbound_bytes(),
            outbound_queue: d_outbound_queue(),
        }
    }
}

impl ChannelConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_secs > 0).then(|| Duration::from_secs(self.call_timeout_secs))
    }
}

fn d_call_timeout_secs() -> u64 {
    30
}

fn d_max_inbound_bytes() -> usize {
    64 * 1024 * 1024
}

fn d_outbound_queue() -> usize {
    64
}
