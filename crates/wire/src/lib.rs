//! Wire layer for TurnWire.
//!
//! Frame decoding for boundary-delimited JSON, classification onto the
//! closed semantic event set, tool-activity extraction from sub-events, and
//! the channel transport seam with its chunked-HTTP implementation.

pub mod classify;
pub mod decode;
pub mod extract;
pub mod http;
pub mod traits;

// Re-exports for convenience.
pub use classify::classify;
pub use decode::FrameDecoder;
pub use extract::{extract_invocations, extract_results};
pub use http::HttpChannel;
pub use traits::{
    ChannelTransport, EnvToken, PermissionMode, StaticToken, TokenSource, TurnRequest, TurnScope,
};
