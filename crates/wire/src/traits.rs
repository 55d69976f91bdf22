use serde::{Deserialize, Serialize};
use tw_domain::error::Result;
use tw_domain::stream::BoxStream;
use tw_domain::turn::Turn;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How much the server may do without asking the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    Ask,
    AcceptEdits,
    Bypass,
}

impl Default for PermissionMode {
    fn default() -> Self {
        PermissionMode::Ask
    }
}

/// Per-turn execution scope sent with the open request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnScope {
    #[serde(default)]
    pub permission_mode: PermissionMode,
    /// Agents the server may involve in this turn.
    #[serde(default)]
    pub agent_ids: Vec<String>,
    /// Skills the server may load for this turn.
    #[serde(default)]
    pub skill_ids: Vec<String>,
}

/// The request body that opens a turn channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub session_id: String,
    pub text: String,
    #[serde(default)]
    pub scope: TurnScope,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth capability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Supplies the bearer token for channel requests.
///
/// The engine never owns credentials; the embedding application hands a
/// source to the transport. `None` means send the request unauthenticated.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// A fixed token known at construction time.
pub struct StaticToken(pub String);

impl TokenSource for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Reads the token from an environment variable on every request, so a
/// rotated token is picked up without restarting.
pub struct EnvToken(pub String);

impl TokenSource for EnvToken {
    fn token(&self) -> Option<String> {
        std::env::var(&self.0).ok().filter(|t| !t.is_empty())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core transport trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every channel transport must implement.
///
/// The engine speaks newline-delimited JSON over *some* server-push
/// channel; this trait is the seam that keeps chunked HTTP, long-poll, or
/// anything else pluggable without touching the engine.
#[async_trait::async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Open a turn channel and return the raw chunk stream.
    ///
    /// Chunk boundaries carry no meaning; the frame decoder owns framing.
    async fn open(&self, req: TurnRequest) -> Result<BoxStream<'static, Result<String>>>;

    /// Ask the server to cancel the in-flight turn on `channel_id`.
    ///
    /// Out of band with respect to the chunk stream, and idempotent: a turn
    /// that already settled server-side is a no-op, not an error.
    async fn cancel(&self, session_id: &str, channel_id: &str) -> Result<()>;

    /// Read back the server's canonical turn list for a session.
    async fn fetch_turns(&self, session_id: &str) -> Result<Vec<Turn>>;
}
