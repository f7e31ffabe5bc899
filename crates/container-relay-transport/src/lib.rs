//! Client transports for container relay sessions.
//!
//! Provides:
//! - In-process channel transport for embedding and tests
//! - WebSocket transport and router (feature: websocket)

pub mod channel;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use channel::{ChannelTransport, ClientEnd, Delivery, channel_pair};

#[cfg(feature = "websocket")]
pub use websocket::{WsState, WsTransport, ws_router};
