use serde::Serialize;

/// Structured trace events emitted across all TurnWire crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ChannelOpened {
        session_id: String,
        channel_id: String,
    },
    FrameDropped {
        reason: String,
        preview: String,
    },
    OrphanResultRetained {
        tool_use_id: String,
    },
    TurnSettled {
        session_id: String,
        outcome: String,
        duration_ms: u64,
    },
    ResyncApplied {
        session_id: String,
        turn_count: usize,
    },
    TrainingCompleted {
        session_id: String,
        score: u32,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "tw_event");
    }
}
