//! Core abstractions for relaying container exec and log sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `Utf8Decoder` - Incremental byte-to-text decoding for relayed output
//! - `SessionKind`, `SessionState`, `SessionInfo` - Session data model
//! - `ClientMessage`, `ServerMessage` - Wire protocol spoken with the browser
//! - `Transport` and `RuntimeClient` traits - The two capabilities a relay consumes

pub mod decoder;
pub mod error;
pub mod protocol;
pub mod session;
pub mod traits;

pub use decoder::Utf8Decoder;
pub use error::{AttachFailure, RelayError};
pub use protocol::{
    ClientFrame, ClientMessage, ControlAction, OpenRequest, ProtocolError, ServerMessage,
    SessionOpen,
};
pub use session::{SessionId, SessionInfo, SessionKind, SessionState, Target};
pub use traits::{
    CloseReason, RuntimeAttachment, RuntimeClient, RuntimeError, RuntimeEvent, RuntimeStream,
    Transport, TransportError, TransportEvent, TransportEvents,
};
