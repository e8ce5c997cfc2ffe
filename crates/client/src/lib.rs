//! `mc-client`: correlated RPC over the server's control websocket.
//!
//! One connection is shared by any number of concurrent callers. Each
//! outbound request carries a fresh `responseid`; the reader task routes
//! every inbound reply back to the caller waiting for it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   call(action, fields)   ┌───────────────────┐
//! │ ActionClient │ ───────────────────────▶ │ CorrelatedChannel │
//! │  (auth, URL) │ ◀─────────────────────── │  writer ─▶ ws     │
//! └──────────────┘          reply           │  reader ◀─ ws     │
//!        ▲                                  │  PendingTable     │
//!        │ ActionCaller                     └───────────────────┘
//! ┌──────────────┐
//! │   actions    │  meshes, nodes + filter, runcommands, users, ...
//! └──────────────┘
//! ```
//!
//! # Connection flow
//!
//! 1. Build the control URL (`<base>/control.ashx`)
//! 2. Key auth: mint a login token and append `?auth=<token>`;
//!    password auth: send `x-meshauth: <user>, <pass>[, <otp>]`
//! 3. Upgrade to websocket; the channel is `Open`
//! 4. Calls register a pending entry, then queue one text frame each
//! 5. On disconnect every pending call fails with `ConnectionClosed`;
//!    reconnecting is the caller's decision (see [`ReconnectBackoff`])

pub mod actions;
pub mod builder;
pub mod channel;
pub mod client;
mod pending;
pub mod reconnect;
pub mod types;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use actions::{ActionCaller, NewUser};
pub use builder::ActionClientBuilder;
pub use channel::CorrelatedChannel;
pub use client::ActionClient;
pub use reconnect::ReconnectBackoff;
pub use types::{ChannelSettings, ChannelState};

// Re-export the wire types so callers rarely need mc-protocol directly.
pub use mc_protocol::{Envelope, Reply};
