//! Shared domain types for TurnWire.
//!
//! Turns and their lifecycle, the closed semantic event set, tool
//! invocations, training phases, engine configuration, errors, and
//! structured trace events. Everything here is transport-free; the wire
//! and engine crates build on these types.

pub mod config;
pub mod error;
pub mod event;
pub mod phase;
pub mod stream;
pub mod tool;
pub mod trace;
pub mod turn;

// Re-exports for convenience.
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use event::SemanticEvent;
pub use phase::{PhaseState, TrainingPhase};
pub use stream::BoxStream;
pub use tool::{ContentPart, InvocationStatus, ToolInvocation, ToolOutcome};
pub use turn::{Role, Turn, TurnLifecycle};
