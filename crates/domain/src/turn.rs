use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Where a turn is in its life.
///
/// `Pending` marks a speculative local echo awaiting server confirmation,
/// `Streaming` an assistant turn still receiving deltas. Servers only ship
/// settled turns, so the wire default is `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnLifecycle {
    Pending,
    Streaming,
    Complete,
    Failed,
}

impl Default for TurnLifecycle {
    fn default() -> Self {
        TurnLifecycle::Complete
    }
}

/// One request or response message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub role: Role,
    pub text: String,
    #[serde(default)]
    pub lifecycle: TurnLifecycle,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

// ── Constructors ───────────────────────────────────────────────────

impl Turn {
    /// Local echo of user input, shown before the server confirms it.
    /// Ids are minted with a `temp-` prefix so the reconciliation store
    /// can tell them from server-assigned ids.
    pub fn speculative_user(text: impl Into<String>) -> Self {
        Self {
            id: format!("temp-{}", Uuid::new_v4()),
            role: Role::User,
            text: text.into(),
            lifecycle: TurnLifecycle::Pending,
            created_at: Utc::now(),
        }
    }

    /// A server-confirmed user turn.
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            text: text.into(),
            lifecycle: TurnLifecycle::Complete,
            created_at: Utc::now(),
        }
    }

    /// A settled assistant turn.
    pub fn assistant(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            text: text.into(),
            lifecycle: TurnLifecycle::Complete,
            created_at: Utc::now(),
        }
    }

    /// An assistant turn still receiving deltas.
    pub fn streaming(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            text: text.into(),
            lifecycle: TurnLifecycle::Streaming,
            created_at: Utc::now(),
        }
    }

    pub fn is_speculative(&self) -> bool {
        self.id.starts_with("temp-")
    }
}
