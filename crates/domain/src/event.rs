use serde::Serialize;

use crate::phase::TrainingPhase;
use crate::turn::Turn;

/// The closed set of semantic events a channel can produce.
///
/// Raw frames are classified onto this enum; anything the classifier does
/// not recognize lands in `Unknown` so newer servers can ship record kinds
/// older clients simply ignore.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SemanticEvent {
    /// The server accepted the request and assigned a channel id.
    #[serde(rename = "channel_opened")]
    ChannelOpened { channel_id: String },

    /// The server's canonical copy of the user turn that opened the channel.
    #[serde(rename = "user_echo_confirmed")]
    UserEchoConfirmed { turn: Turn },

    /// An assistant turn began; deltas for `turn_id` follow.
    #[serde(rename = "assistant_started")]
    AssistantStarted { turn_id: String },

    /// An incremental text fragment for a streaming assistant turn.
    #[serde(rename = "assistant_delta")]
    AssistantDelta { turn_id: String, text: String },

    /// The settled assistant turn, with its full final text.
    #[serde(rename = "assistant_finalized")]
    AssistantFinalized { turn: Turn },

    /// A nested activity payload (tool invocations and results).
    #[serde(rename = "sub_event")]
    SubEvent { raw: serde_json::Value },

    /// A training-run status report.
    #[serde(rename = "phase_status")]
    PhaseStatus {
        phase: TrainingPhase,
        score: Option<u32>,
        message: Option<String>,
    },

    /// The server confirmed a cancellation.
    #[serde(rename = "cancelled")]
    Cancelled,

    /// The turn ran to completion and the channel is done.
    #[serde(rename = "completed")]
    Completed,

    /// The turn failed server-side.
    #[serde(rename = "failed")]
    Failed { reason: String },

    /// An unrecognized record kind, kept for forward compatibility.
    #[serde(rename = "unknown")]
    Unknown,
}
