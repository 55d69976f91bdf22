//! `turnwire replay` — offline execution of a captured frame log.
//!
//! Runs a transcript of channel frames through the decoder, classifier,
//! and reconciliation store without a server, then prints the final
//! state.  Useful for inspecting captured sessions and for checking how
//! the engine handles a given record sequence.

use std::io::Read;

use serde_json::Value;

use tw_domain::config::BatchConfig;
use tw_domain::event::SemanticEvent;
use tw_domain::phase::PhaseState;
use tw_domain::tool::{InvocationStatus, ToolInvocation};
use tw_domain::turn::{Role, Turn, TurnLifecycle};
use tw_engine::{DeltaBatcher, OrphanResult, PhaseTracker, TurnStore};
use tw_wire::{classify, extract_invocations, extract_results, FrameDecoder};

/// Execute a frame log offline and print the reconciled outcome.
///
/// This is the entry point for `turnwire replay <file>`.
pub fn replay(file: &str, json: bool) -> anyhow::Result<()> {
    // 1. Read the transcript ("-" means stdin).
    let content = if file == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(file).map_err(|e| anyhow::anyhow!("reading {file}: {e}"))?
    };

    // 2. Decode in deliberately irregular slices so the carry-over path
    //    runs exactly as it does against a live chunked channel.
    let records = decode_in_slices(&content);

    // 3. Route every record through the offline pump.
    let outcome = pump(records);

    // 4. Print.
    if json {
        let rendered = serde_json::to_string_pretty(&outcome.to_json())
            .map_err(|e| anyhow::anyhow!("serializing snapshot: {e}"))?;
        println!("{rendered}");
    } else {
        outcome.print();
    }

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Slice sizes chosen to split frames mid-record and mid-string.
const SLICE_SIZES: [usize; 4] = [7, 1, 64, 3];

/// Feed the transcript to the decoder in irregular slices.
fn decode_in_slices(content: &str) -> Vec<Value> {
    let mut decoder = FrameDecoder::new();
    let mut records = Vec::new();

    let mut at = 0;
    let mut slice_ix = 0;
    while at < content.len() {
        let mut end = usize::min(at + SLICE_SIZES[slice_ix % SLICE_SIZES.len()], content.len());
        // Cuts must land on char boundaries; a live channel has the same
        // constraint after lossy UTF-8 conversion.
        while !content.is_char_boundary(end) {
            end += 1;
        }
        records.extend(decoder.push(&content[at..end]));
        at = end;
        slice_ix += 1;
    }
    if let Some(tail) = decoder.finish() {
        records.push(tail);
    }
    records
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Offline pump
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ReplayOutcome {
    terminal: Option<&'static str>,
    error: Option<String>,
    turns: Vec<Turn>,
    invocations: Vec<ToolInvocation>,
    orphans: Vec<OrphanResult>,
    phase: Option<PhaseState>,
}

/// Route classified records into a store, invocation list, and phase
/// tracker, mirroring what the live controller does minus the timing.
fn pump(records: Vec<Value>) -> ReplayOutcome {
    let store = TurnStore::new();
    let mut batcher = DeltaBatcher::new(BatchConfig::default().window());
    let mut invocations: Vec<ToolInvocation> = Vec::new();
    let mut orphans: Vec<OrphanResult> = Vec::new();
    let mut tracker = PhaseTracker::new();
    let mut terminal = None;
    let mut error = None;

    for record in records {
        if terminal.is_some() {
            // A live channel closes after the terminal record, so the
            // controller would never see these.
            tracing::warn!("record after the terminal event; ignoring");
            continue;
        }
        match classify(&record) {
            SemanticEvent::ChannelOpened { channel_id } => {
                tracing::debug!(channel_id = %channel_id, "channel opened");
            }
            SemanticEvent::UserEchoConfirmed { turn } => {
                store.finalize(turn);
            }
            SemanticEvent::AssistantStarted { .. } => {}
            SemanticEvent::AssistantDelta { turn_id, text } => {
                tracker.observe_delta(&text);
                batcher.push(&turn_id, &text);
            }
            SemanticEvent::AssistantFinalized { turn } => {
                batcher.flush(&store);
                tracker.observe_final(&turn.text);
                store.finalize(turn);
            }
            SemanticEvent::SubEvent { raw } => {
                apply_tool_blocks(&raw, &mut invocations, &mut orphans);
            }
            SemanticEvent::PhaseStatus {
                phase,
                score,
                message,
            } => {
                tracker.apply_explicit(phase, score, message.as_deref());
            }
            SemanticEvent::Cancelled => {
                batcher.flush(&store);
                store.settle_cancelled();
                terminal = Some("cancelled");
            }
            SemanticEvent::Completed => {
                batcher.flush(&store);
                store.settle_completed();
                terminal = Some("completed");
            }
            SemanticEvent::Failed { reason } => {
                batcher.flush(&store);
                store.settle_failed();
                terminal = Some("failed");
                error = Some(reason);
            }
            SemanticEvent::Unknown => {
                tracing::debug!("ignoring unrecognized record kind");
            }
        }
    }

    if terminal.is_none() {
        tracing::warn!("transcript ended without a terminal record");
        batcher.flush(&store);
        store.settle_failed();
    }

    let state = tracker.state();
    let phase = if state.has_signal() { Some(state) } else { None };

    ReplayOutcome {
        terminal,
        error,
        turns: store.snapshot(),
        invocations,
        orphans,
        phase,
    }
}

/// Fold a sub-event payload into the invocation list, first-seen wins.
fn apply_tool_blocks(
    raw: &Value,
    invocations: &mut Vec<ToolInvocation>,
    orphans: &mut Vec<OrphanResult>,
) {
    for invocation in extract_invocations(raw) {
        if invocations.iter().any(|known| known.id == invocation.id) {
            tracing::warn!(id = %invocation.id, "duplicate tool invocation id; keeping the first");
            continue;
        }
        invocations.push(invocation);
    }
    for (tool_use_id, outcome) in extract_results(raw) {
        match invocations.iter_mut().find(|inv| inv.id == tool_use_id) {
            Some(invocation) if invocation.status == InvocationStatus::Pending => {
                invocation.resolve(outcome);
            }
            Some(_) => {
                tracing::warn!(id = %tool_use_id, "result for an already-resolved invocation; ignoring");
            }
            None => {
                tracing::warn!(id = %tool_use_id, "tool result arrived before its invocation");
                orphans.push(OrphanResult {
                    tool_use_id,
                    outcome,
                });
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Output
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl ReplayOutcome {
    fn print(&self) {
        println!("outcome: {}", self.terminal.unwrap_or("incomplete"));
        if let Some(error) = &self.error {
            println!("error: {error}");
        }

        println!();
        println!("turns ({}):", self.turns.len());
        for turn in &self.turns {
            let marker = if turn.lifecycle == TurnLifecycle::Failed {
                "  (failed)"
            } else {
                ""
            };
            println!("  {:9} {}{}", role_name(turn.role), turn.id, marker);
            for line in turn.text.lines() {
                println!("    | {line}");
            }
        }

        if !self.invocations.is_empty() || !self.orphans.is_empty() {
            println!();
            println!(
                "tool activity ({} invocations, {} orphans):",
                self.invocations.len(),
                self.orphans.len()
            );
            for inv in &self.invocations {
                println!("  {}  {}  [{}]", inv.id, inv.tool_name, status_name(inv.status));
            }
            for orphan in &self.orphans {
                println!("  {}  (orphan result)", orphan.tool_use_id);
            }
        }

        if let Some(training) = &self.phase {
            println!();
            println!("training:");
            if let Some(phase) = training.phase {
                println!("  phase: {}", phase.as_str());
            }
            match (training.score_before, training.score_after) {
                (Some(from), Some(to)) if from != to => println!("  score: {from}% -> {to}%"),
                (_, Some(to)) => println!("  score: {to}%"),
                _ => {}
            }
            for issue in &training.issues {
                println!("  issue: {issue}");
            }
        }
    }

    fn to_json(&self) -> Value {
        serde_json::json!({
            "outcome": self.terminal,
            "error": self.error,
            "turns": self.turns,
            "invocations": self.invocations,
            "orphans": self.orphans,
            "phase": self.phase,
        })
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn status_name(status: InvocationStatus) -> &'static str {
    match status {
        InvocationStatus::Pending => "pending",
        InvocationStatus::Resolved => "resolved",
        InvocationStatus::Errored => "errored",
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript(lines: &[&str]) -> String {
        let mut out = String::new();
        for line in lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    #[test]
    fn slicing_reassembles_every_frame() {
        let content = transcript(&[
            r#"{"type":"channel_open","channel_id":"ch-1"}"#,
            r#"{"type":"assistant_delta","turn_id":"srv-2","text":"héllo wörld"}"#,
            r#"{"type":"done"}"#,
        ]);
        let records = decode_in_slices(&content);
        assert_eq!(records.len(), 3);
        assert_eq!(records[2], serde_json::json!({"type": "done"}));
    }

    #[test]
    fn full_transcript_reconciles_offline() {
        let content = transcript(&[
            r#"{"type":"channel_open","channel_id":"ch-1"}"#,
            r#"{"type":"user_message","turn":{"id":"srv-1","role":"user","text":"hi"}}"#,
            r#"{"type":"assistant_start","turn_id":"srv-2"}"#,
            r#"{"type":"assistant_delta","turn_id":"srv-2","text":"Hel"}"#,
            r#"{"type":"assistant_delta","turn_id":"srv-2","text":"lo!"}"#,
            r#"{"type":"assistant_final","turn":{"id":"srv-2","role":"assistant","text":"Hello!"}}"#,
            r#"{"type":"done"}"#,
        ]);
        let outcome = pump(decode_in_slices(&content));

        assert_eq!(outcome.terminal, Some("completed"));
        assert_eq!(outcome.turns.len(), 2);
        assert_eq!(outcome.turns[1].text, "Hello!");
        assert_eq!(outcome.turns[1].lifecycle, TurnLifecycle::Complete);
    }

    #[test]
    fn transcript_without_terminal_settles_failed() {
        let content = transcript(&[
            r#"{"type":"channel_open","channel_id":"ch-1"}"#,
            r#"{"type":"assistant_delta","turn_id":"srv-2","text":"cut off"}"#,
        ]);
        let outcome = pump(decode_in_slices(&content));

        assert_eq!(outcome.terminal, None);
        assert_eq!(outcome.turns[0].lifecycle, TurnLifecycle::Failed);
        assert_eq!(outcome.turns[0].text, "cut off");
    }

    #[test]
    fn tool_blocks_pair_up_and_orphans_survive() {
        let content = transcript(&[
            r#"{"type":"sub_event","payload":{"content":[{"type":"tool_use","id":"tc-1","name":"search","input":{"q":"x"}}]}}"#,
            r#"{"type":"sub_event","payload":{"content":[{"type":"tool_result","tool_use_id":"tc-1","content":"3 hits"}]}}"#,
            r#"{"type":"sub_event","payload":{"content":[{"type":"tool_result","tool_use_id":"tc-9","content":"lost"}]}}"#,
            r#"{"type":"done"}"#,
        ]);
        let outcome = pump(decode_in_slices(&content));

        assert_eq!(outcome.invocations.len(), 1);
        assert_eq!(outcome.invocations[0].status, InvocationStatus::Resolved);
        assert_eq!(outcome.orphans.len(), 1);
        assert_eq!(outcome.orphans[0].tool_use_id, "tc-9");
    }

    #[test]
    fn phase_records_build_a_training_summary() {
        let content = transcript(&[
            r#"{"type":"phase","phase":"evaluating","score":40,"message":"style drift"}"#,
            r#"{"type":"assistant_final","turn":{"id":"srv-2","role":"assistant","text":"Score moved 40% -> 85%"}}"#,
            r#"{"type":"done"}"#,
        ]);
        let outcome = pump(decode_in_slices(&content));

        let training = outcome.phase.as_ref().unwrap();
        assert_eq!(training.score_before, Some(40));
        assert_eq!(training.score_after, Some(85));
        assert_eq!(training.issues, vec!["style drift".to_string()]);
    }

    #[test]
    fn records_after_the_terminal_event_are_ignored() {
        let content = transcript(&[
            r#"{"type":"done"}"#,
            r#"{"type":"assistant_delta","turn_id":"srv-2","text":"late"}"#,
        ]);
        let outcome = pump(decode_in_slices(&content));

        assert_eq!(outcome.terminal, Some("completed"));
        assert!(outcome.turns.is_empty());
    }
}
