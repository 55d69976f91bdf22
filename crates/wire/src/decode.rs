//! Frame decoding for boundary-delimited JSON channels.
//!
//! A channel delivers UTF-8 text in arbitrary chunk sizes; frame boundaries
//! are newlines and carry no relation to chunk boundaries. The decoder
//! buffers chunks, emits one JSON record per complete line, and keeps any
//! trailing partial line for the next push.

use serde_json::Value;
use tw_domain::trace::TraceEvent;

/// Streaming decoder for a single channel.
///
/// The carry-over buffer belongs to one channel instance; open a new
/// channel, build a new decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every complete record it unlocked.
    ///
    /// A line that fails to parse is dropped with a warning and the stream
    /// continues. Blank lines are skipped.
    pub fn push(&mut self, chunk: &str) -> Vec<Value> {
        self.buffer.push_str(chunk);

        let mut records = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..pos).collect();
            self.buffer.drain(..1); // remove the \n delimiter
            if let Some(record) = parse_line(&line) {
                records.push(record);
            }
        }
        records
    }

    /// Flush the final unterminated line when the channel closes.
    pub fn finish(&mut self) -> Option<Value> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line)
    }
}

fn parse_line(line: &str) -> Option<Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed frame");
            TraceEvent::FrameDropped {
                reason: e.to_string(),
                preview: line.chars().take(80).collect(),
            }
            .emit();
            None
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
