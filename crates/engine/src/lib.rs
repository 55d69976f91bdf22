//! The TurnWire engine: session-side state for streaming conversations.
//!
//! A `TurnController` drives one session's turns over a `ChannelTransport`,
//! feeding decoded records into the reconciliation `TurnStore`, coalescing
//! deltas through the `DeltaBatcher`, and tracking training progress with
//! the `PhaseTracker`. Rendering layers subscribe to `EngineEvent`s and
//! pull snapshots; they never touch the wire.

pub mod batch;
pub mod controller;
pub mod phase;
pub mod store;

pub use batch::DeltaBatcher;
pub use controller::{OrphanResult, TurnController, TurnState};
pub use phase::PhaseTracker;
pub use store::{EngineEvent, TurnStore};
