//! Record classification onto the closed semantic event set.
//!
//! Servers ship records tagged with a `type` field. Everything the engine
//! reacts to is named here; unrecognized kinds and recognizable kinds with
//! unusable payloads both classify to [`SemanticEvent::Unknown`], so a newer
//! server never breaks an older client.

use serde_json::Value;
use tw_domain::event::SemanticEvent;
use tw_domain::phase::TrainingPhase;
use tw_domain::turn::Turn;

/// Classify one decoded record.
pub fn classify(record: &Value) -> SemanticEvent {
    let kind = record.get("type").and_then(|v| v.as_str()).unwrap_or("");

    match kind {
        "channel_open" => {
            match record.get("channel_id").and_then(|v| v.as_str()) {
                Some(id) => SemanticEvent::ChannelOpened { channel_id: id.to_string() },
                None => SemanticEvent::Unknown,
            }
        }

        "user_message" => match turn_payload(record) {
            Some(turn) => SemanticEvent::UserEchoConfirmed { turn },
            None => SemanticEvent::Unknown,
        },

        "assistant_start" => {
            match record.get("turn_id").and_then(|v| v.as_str()) {
                Some(id) => SemanticEvent::AssistantStarted { turn_id: id.to_string() },
                None => SemanticEvent::Unknown,
            }
        }

        "assistant_delta" => {
            let turn_id = record.get("turn_id").and_then(|v| v.as_str());
            let text = record.get("text").and_then(|v| v.as_str());
            match (turn_id, text) {
                (Some(turn_id), Some(text)) => SemanticEvent::AssistantDelta {
                    turn_id: turn_id.to_string(),
                    text: text.to_string(),
                },
                _ => SemanticEvent::Unknown,
            }
        }

        "assistant_final" => match turn_payload(record) {
            Some(turn) => SemanticEvent::AssistantFinalized { turn },
            None => SemanticEvent::Unknown,
        },

        "sub_event" => match record.get("payload") {
            Some(payload) => SemanticEvent::SubEvent { raw: payload.clone() },
            None => SemanticEvent::Unknown,
        },

        "phase" => {
            let name = record.get("phase").and_then(|v| v.as_str()).unwrap_or("");
            match TrainingPhase::from_wire(name) {
                Some(phase) => SemanticEvent::PhaseStatus {
                    phase,
                    score: record
                        .get("score")
                        .and_then(|v| v.as_u64())
                        .and_then(|n| u32::try_from(n).ok()),
                    message: record
                        .get("message")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string()),
                },
                // An unrecognized phase name gets the same forward-compat
                // treatment as an unrecognized record kind.
                None => SemanticEvent::Unknown,
            }
        }

        "cancelled" => SemanticEvent::Cancelled,

        "done" => SemanticEvent::Completed,

        "error" => {
            let reason = record
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            SemanticEvent::Failed { reason: reason.to_string() }
        }

        _ => SemanticEvent::Unknown,
    }
}

fn turn_payload(record: &Value) -> Option<Turn> {
    let turn = record.get("turn")?.clone();
    serde_json::from_value(turn).ok()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tw_domain::turn::{Role, TurnLifecycle};

    #[test]
    fn channel_open_carries_channel_id() {
        let event = classify(&json!({"type": "channel_open", "channel_id": "ch-7"}));
        match event {
            SemanticEvent::ChannelOpened { channel_id } => assert_eq!(channel_id, "ch-7"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn user_message_parses_confirmed_turn() {
        let event = classify(&json!({
            "type": "user_message",
            "turn": {"id": "srv-1", "role": "user", "text": "Hello"},
        }));
        match event {
            SemanticEvent::UserEchoConfirmed { turn } => {
                assert_eq!(turn.id, "srv-1");
                assert_eq!(turn.role, Role::User);
                assert_eq!(turn.lifecycle, TurnLifecycle::Complete);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn assistant_delta_carries_turn_id_and_text() {
        let event = classify(&json!({
            "type": "assistant_delta",
            "turn_id": "srv-2",
            "text": "wor",
        }));
        match event {
            SemanticEvent::AssistantDelta { turn_id, text } => {
                assert_eq!(turn_id, "srv-2");
                assert_eq!(text, "wor");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn phase_record_parses_known_phase() {
        let event = classify(&json!({
            "type": "phase",
            "phase": "evaluating",
            "score": 72,
            "message": "rubric mismatch on step 3",
        }));
        match event {
            SemanticEvent::PhaseStatus { phase, score, message } => {
                assert_eq!(phase, TrainingPhase::Evaluating);
                assert_eq!(score, Some(72));
                assert_eq!(message.as_deref(), Some("rubric mismatch on step 3"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn phase_with_unknown_name_is_unknown() {
        let event = classify(&json!({"type": "phase", "phase": "deploying"}));
        assert!(matches!(event, SemanticEvent::Unknown));
    }

    #[test]
    fn terminal_records_classify() {
        assert!(matches!(
            classify(&json!({"type": "cancelled"})),
            SemanticEvent::Cancelled
        ));
        assert!(matches!(
            classify(&json!({"type": "done"})),
            SemanticEvent::Completed
        ));
        match classify(&json!({"type": "error", "message": "model overloaded"})) {
            SemanticEvent::Failed { reason } => assert_eq!(reason, "model overloaded"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn error_without_message_gets_fallback_reason() {
        match classify(&json!({"type": "error"})) {
            SemanticEvent::Failed { reason } => assert_eq!(reason, "unknown error"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unrecognized_kind_is_unknown() {
        assert!(matches!(
            classify(&json!({"type": "usage_report", "tokens": 512})),
            SemanticEvent::Unknown
        ));
    }

    #[test]
    fn missing_or_non_string_type_is_unknown() {
        assert!(matches!(classify(&json!({"data": 1})), SemanticEvent::Unknown));
        assert!(matches!(classify(&json!({"type": 42})), SemanticEvent::Unknown));
        assert!(matches!(classify(&json!("just a string")), SemanticEvent::Unknown));
    }

    #[test]
    fn known_kind_with_malformed_payload_is_unknown() {
        assert!(matches!(
            classify(&json!({"type": "channel_open"})),
            SemanticEvent::Unknown
        ));
        assert!(matches!(
            classify(&json!({"type": "assistant_delta", "turn_id": "srv-2"})),
            SemanticEvent::Unknown
        ));
        assert!(matches!(
            classify(&json!({"type": "user_message", "turn": {"id": "srv-1"}})),
            SemanticEvent::Unknown
        ));
    }

    #[test]
    fn sub_event_payload_passes_through_raw() {
        let event = classify(&json!({
            "type": "sub_event",
            "payload": [{"type": "tool_use", "id": "tc-1", "name": "search", "input": {}}],
        }));
        match event {
            SemanticEvent::SubEvent { raw } => assert!(raw.is_array()),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
