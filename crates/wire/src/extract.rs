//! Tool activity extraction from sub-event payloads.
//!
//! Sub-events nest tool traffic inside content blocks. A payload may be a
//! bare block array, an object wrapping a `content` array, or a single
//! block; the extractor accepts all three and ignores block kinds it does
//! not know.

use std::collections::HashMap;

use serde_json::Value;
use tw_domain::tool::{ContentPart, ToolInvocation, ToolOutcome};

/// Pull every `tool_use` block out of a sub-event payload.
///
/// Each block becomes a `Pending` invocation; results arrive separately.
pub fn extract_invocations(payload: &Value) -> Vec<ToolInvocation> {
    let mut invocations = Vec::new();

    for block in blocks(payload) {
        let block_type = block.get("type").and_then(|v| v.as_str()).unwrap_or("");
        if block_type != "tool_use" {
            continue;
        }
        match serde_json::from_value::<ContentPart>(block.clone()) {
            Ok(ContentPart::ToolUse { id, name, input }) => {
                invocations.push(ToolInvocation::pending(id, name, input));
            }
            _ => {
                tracing::warn!(block = %block, "skipping malformed tool_use block");
            }
        }
    }

    invocations
}

/// Pull every `tool_result` block out of a sub-event payload, keyed by the
/// invocation id it answers.
///
/// A result block without a usable `tool_use_id` cannot be matched to
/// anything and is dropped with a warning.
pub fn extract_results(payload: &Value) -> HashMap<String, ToolOutcome> {
    let mut results = HashMap::new();

    for block in blocks(payload) {
        let block_type = block.get("type").and_then(|v| v.as_str()).unwrap_or("");
        if block_type != "tool_result" {
            continue;
        }
        match serde_json::from_value::<ContentPart>(block.clone()) {
            Ok(ContentPart::ToolResult { tool_use_id, content, is_error }) => {
                results.insert(tool_use_id, ToolOutcome { content, is_error });
            }
            _ => {
                tracing::warn!(block = %block, "dropping tool_result block without tool_use_id");
            }
        }
    }

    results
}

fn blocks(payload: &Value) -> &[Value] {
    if let Some(arr) = payload.as_array() {
        return arr;
    }
    if let Some(arr) = payload.get("content").and_then(|c| c.as_array()) {
        return arr;
    }
    std::slice::from_ref(payload)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tw_domain::tool::InvocationStatus;

    #[test]
    fn invocations_from_block_array() {
        let payload = json!([
            {"type": "text", "text": "let me check"},
            {"type": "tool_use", "id": "tc-1", "name": "search", "input": {"q": "rust"}},
            {"type": "tool_use", "id": "tc-2", "name": "read_file", "input": {"path": "a.rs"}},
        ]);
        let invocations = extract_invocations(&payload);
        assert_eq!(invocations.len(), 2);
        assert_eq!(invocations[0].id, "tc-1");
        assert_eq!(invocations[0].tool_name, "search");
        assert_eq!(invocations[0].status, InvocationStatus::Pending);
        assert_eq!(invocations[1].id, "tc-2");
    }

    #[test]
    fn invocations_from_content_wrapper() {
        let payload = json!({
            "role": "assistant",
            "content": [
                {"type": "tool_use", "id": "tc-3", "name": "exec", "input": {"cmd": "ls"}},
            ],
        });
        let invocations = extract_invocations(&payload);
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].id, "tc-3");
    }

    #[test]
    fn invocation_from_single_block() {
        let payload = json!({"type": "tool_use", "id": "tc-4", "name": "search", "input": {}});
        let invocations = extract_invocations(&payload);
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].id, "tc-4");
    }

    #[test]
    fn tool_use_without_input_still_extracts() {
        let payload = json!([{"type": "tool_use", "id": "tc-5", "name": "ping"}]);
        let invocations = extract_invocations(&payload);
        assert_eq!(invocations.len(), 1);
        assert!(invocations[0].input.is_null());
    }

    #[test]
    fn unknown_block_types_skipped_silently() {
        let payload = json!([
            {"type": "thinking", "text": "hmm"},
            {"type": "citation", "url": "https://example.com"},
        ]);
        assert!(extract_invocations(&payload).is_empty());
        assert!(extract_results(&payload).is_empty());
    }

    #[test]
    fn results_keyed_by_tool_use_id() {
        let payload = json!([
            {"type": "tool_result", "tool_use_id": "tc-1", "content": "3 hits"},
            {"type": "tool_result", "tool_use_id": "tc-2", "content": "denied", "is_error": true},
        ]);
        let results = extract_results(&payload);
        assert_eq!(results.len(), 2);
        assert_eq!(results["tc-1"].content, "3 hits");
        assert!(!results["tc-1"].is_error);
        assert!(results["tc-2"].is_error);
    }

    #[test]
    fn result_without_id_dropped() {
        let payload = json!([
            {"type": "tool_result", "content": "who am I for?"},
            {"type": "tool_result", "tool_use_id": "tc-9", "content": "kept"},
        ]);
        let results = extract_results(&payload);
        assert_eq!(results.len(), 1);
        assert!(results.contains_key("tc-9"));
    }

    #[test]
    fn scalar_payload_extracts_nothing() {
        assert!(extract_invocations(&json!("plain text")).is_empty());
        assert!(extract_results(&json!(42)).is_empty());
    }
}
