//! Delta coalescing.
//!
//! Assistant deltas can arrive every few milliseconds; pushing each one
//! straight into the store would wake every subscriber per keystroke of
//! output. The batcher accumulates per-turn text and holds a deadline,
//! and the turn driver flushes whole batches when the deadline fires or
//! a settling event demands the text be current.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::store::TurnStore;

pub struct DeltaBatcher {
    window: Duration,
    /// Full accumulated text per turn id. Entries survive flushes; a
    /// flush publishes the accumulated text, it does not reset it.
    accumulated: HashMap<String, String>,
    /// Turn ids with unpublished text, in first-delta order.
    dirty: Vec<String>,
    deadline: Option<Instant>,
}

impl DeltaBatcher {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            accumulated: HashMap::new(),
            dirty: Vec::new(),
            deadline: None,
        }
    }

    /// Append a delta to its turn's accumulator.
    ///
    /// The flush deadline arms on the first delta of a batch and does
    /// not slide on later ones, so a steady delta stream still flushes
    /// once per window instead of never.
    pub fn push(&mut self, turn_id: &str, delta: &str) {
        match self.accumulated.get_mut(turn_id) {
            Some(text) => text.push_str(delta),
            None => {
                self.accumulated
                    .insert(turn_id.to_string(), delta.to_string());
            }
        }
        if !self.dirty.iter().any(|id| id == turn_id) {
            self.dirty.push(turn_id.to_string());
        }
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.window);
        }
    }

    /// Deadline of the pending batch, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn has_pending(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Publish every pending accumulator into the store, one upsert per
    /// turn, and disarm the deadline. A flush with nothing pending does
    /// nothing.
    pub fn flush(&mut self, store: &TurnStore) {
        for turn_id in self.dirty.drain(..) {
            if let Some(text) = self.accumulated.get(&turn_id) {
                store.upsert_streaming(&turn_id, text);
            }
        }
        self.deadline = None;
    }

    /// Drop all batch state. Used between turns so one turn's text can
    /// never leak into the next.
    pub fn clear(&mut self) {
        self.accumulated.clear();
        self.dirty.clear();
        self.deadline = None;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
