//! Session relay and registry for container exec and log sessions.
//!
//! Provides:
//! - `SessionRelay` - Attach a runtime stream to a client transport and relay both ways
//! - `SessionLifecycle` - Four-state machine with a first-wins termination guard
//! - `SessionRegistry` - Process-wide table of active sessions

pub mod lifecycle;
pub mod registry;
pub mod relay;

pub use lifecycle::SessionLifecycle;
pub use registry::{RegistryFilter, RegistryStats, SessionRegistry};
pub use relay::{SessionOutcome, SessionRelay, TerminationTrigger};
