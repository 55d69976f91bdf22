use serde::{Deserialize, Serialize};

/// Whether a tool invocation has seen its result yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Pending,
    Resolved,
    Errored,
}

/// The result payload of a tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

/// A tool call surfaced from a sub-event, paired with its result once
/// the matching `tool_result` block arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub status: InvocationStatus,
    pub result: Option<ToolOutcome>,
}

impl ToolInvocation {
    pub fn pending(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            input,
            status: InvocationStatus::Pending,
            result: None,
        }
    }

    /// Attach a result, moving the status to `Resolved` or `Errored`.
    pub fn resolve(&mut self, outcome: ToolOutcome) {
        self.status = if outcome.is_error {
            InvocationStatus::Errored
        } else {
            InvocationStatus::Resolved
        };
        self.result = Some(outcome);
    }
}

/// Content blocks carried inside sub-event payloads.
///
/// The extractor only acts on `tool_use` and `tool_result`; other block
/// kinds pass through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolve_sets_status_from_error_flag() {
        let mut ok = ToolInvocation::pending("tc-1", "search", json!({"q": "rust"}));
        ok.resolve(ToolOutcome { content: "3 hits".into(), is_error: false });
        assert_eq!(ok.status, InvocationStatus::Resolved);

        let mut bad = ToolInvocation::pending("tc-2", "search", json!({}));
        bad.resolve(ToolOutcome { content: "boom".into(), is_error: true });
        assert_eq!(bad.status, InvocationStatus::Errored);
        assert_eq!(bad.result.as_ref().map(|r| r.content.as_str()), Some("boom"));
    }

    #[test]
    fn tool_result_is_error_defaults_false() {
        let part: ContentPart = serde_json::from_value(json!({
            "type": "tool_result",
            "tool_use_id": "tc-1",
            "content": "ok",
        }))
        .expect("tool_result without is_error should parse");
        match part {
            ContentPart::ToolResult { is_error, .. } => assert!(!is_error),
            other => panic!("unexpected part: {other:?}"),
        }
    }
}
