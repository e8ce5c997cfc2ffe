use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base websocket URL of the server, e.g. `wss://mesh.example.com`.
    /// `/control.ashx` is appended when missing.
    #[serde(default = "d_url")]
    pub url: String,
    /// Login domain. Empty for the default domain.
    #[serde(default)]
    pub domain: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: d_url(),
            domain: String::new(),
        }
    }
}

impl ServerConfig {
    pub fn has_websocket_scheme(&self) -> bool {
        self.url.starts_with("wss://") || self.url.starts_with("ws://")
    }
}

fn d_url() -> String {
    "wss://localhost".into()
}
