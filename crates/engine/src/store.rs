//! Turn reconciliation store.
//!
//! The store holds the ordered turn list a session panel renders: the
//! single source of truth that merges speculative local echoes, streaming
//! partials, and server-confirmed turns. Every mutation bumps a revision
//! counter and broadcasts a change event so subscribers can re-render
//! without polling.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tw_domain::turn::{Turn, TurnLifecycle};

use crate::controller::TurnState;

/// Capacity of the broadcast channel. Slow subscribers that fall more
/// than this many events behind see a `Lagged` error and should resync
/// from a fresh snapshot.
const EVENT_CAPACITY: usize = 128;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Change notifications delivered to every engine subscriber.
///
/// Events are intentionally coarse: they say *what kind* of state moved,
/// not what changed inside it. Subscribers pull the current snapshot from
/// the relevant accessor when they care about the contents.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// The turn list changed; `revision` is the store revision after the
    /// mutation.
    #[serde(rename = "turns_changed")]
    TurnsChanged { revision: u64 },
    /// A tool invocation was added, resolved, or orphaned.
    #[serde(rename = "invocations_changed")]
    InvocationsChanged,
    /// The training phase or score moved.
    #[serde(rename = "phase_changed")]
    PhaseChanged,
    /// The turn lifecycle moved to a new state.
    #[serde(rename = "state_changed")]
    StateChanged { state: TurnState },
    /// A training turn completed with a known final score.
    #[serde(rename = "training_completed")]
    TrainingCompleted { score: u32 },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ordered turn list with O(1) id lookup and change broadcasting.
pub struct TurnStore {
    inner: RwLock<TurnStoreInner>,
    events: broadcast::Sender<EngineEvent>,
}

struct TurnStoreInner {
    turns: Vec<Turn>,
    /// turn id -> position in `turns`.
    index: HashMap<String, usize>,
    revision: u64,
}

impl TurnStoreInner {
    fn push(&mut self, turn: Turn) {
        self.index.insert(turn.id.clone(), self.turns.len());
        self.turns.push(turn);
    }

    fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    /// Demote any turn other than `keep` that is still `Streaming`. At
    /// most one turn may stream at a time; a stale streamer means the
    /// server started a new run without finalizing the previous one.
    fn freeze_other_streaming(&mut self, keep: &str) {
        for turn in self.turns.iter_mut() {
            if turn.id != keep && turn.lifecycle == TurnLifecycle::Streaming {
                tracing::warn!(turn_id = %turn.id, "freezing stale streaming turn");
                turn.lifecycle = TurnLifecycle::Complete;
            }
        }
    }
}

impl TurnStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: RwLock::new(TurnStoreInner {
                turns: Vec::new(),
                index: HashMap::new(),
                revision: 0,
            }),
            events,
        }
    }

    // ── Mutations ──────────────────────────────────────────────────

    /// Append a speculative local echo of a just-sent user message.
    ///
    /// Refused (returning `false`) while an earlier speculative turn is
    /// still awaiting its server confirmation, so a flaky channel cannot
    /// pile up phantom user messages.
    pub fn insert_speculative(&self, turn: Turn) -> bool {
        let revision = {
            let mut inner = self.inner.write();
            let awaiting = inner
                .turns
                .iter()
                .any(|t| t.is_speculative() && t.lifecycle == TurnLifecycle::Pending);
            if awaiting {
                tracing::warn!(
                    turn_id = %turn.id,
                    "refusing speculative insert while a prior echo is unconfirmed"
                );
                return false;
            }
            inner.push(turn);
            inner.bump()
        };
        self.emit(EngineEvent::TurnsChanged { revision });
        true
    }

    /// Swap a speculative turn for its server-confirmed replacement,
    /// keeping its position in the list.
    ///
    /// Both miss cases are deliberate no-ops so double delivery is
    /// harmless: an unknown `temp_id` means the swap already happened,
    /// and a confirmed id that is already present means the server
    /// re-sent an echo we have.
    pub fn replace(&self, temp_id: &str, confirmed: Turn) -> bool {
        let revision = {
            let mut inner = self.inner.write();
            let idx = match inner.index.get(temp_id) {
                Some(&idx) => idx,
                None => return false,
            };
            if inner.index.contains_key(&confirmed.id) {
                tracing::warn!(
                    turn_id = %confirmed.id,
                    "confirmed turn already present; leaving list unchanged"
                );
                return false;
            }
            inner.index.remove(temp_id);
            inner.index.insert(confirmed.id.clone(), idx);
            inner.turns[idx] = confirmed;
            inner.bump()
        };
        self.emit(EngineEvent::TurnsChanged { revision });
        true
    }

    /// Apply a streaming text update, inserting the turn on first delta.
    ///
    /// `text_so_far` is the full accumulated text, not an increment, so
    /// a replayed update converges instead of duplicating. Updates for a
    /// turn that has already settled are ignored; the frozen text wins.
    pub fn upsert_streaming(&self, turn_id: &str, text_so_far: &str) {
        let revision = {
            let mut inner = self.inner.write();
            match inner.index.get(turn_id).copied() {
                Some(idx) => {
                    let turn = &mut inner.turns[idx];
                    if turn.lifecycle != TurnLifecycle::Streaming {
                        tracing::warn!(turn_id = %turn_id, "ignoring delta for settled turn");
                        return;
                    }
                    turn.text = text_so_far.to_string();
                }
                None => {
                    inner.freeze_other_streaming(turn_id);
                    inner.push(Turn::streaming(turn_id, text_so_far));
                }
            }
            inner.bump()
        };
        self.emit(EngineEvent::TurnsChanged { revision });
    }

    /// Adopt the server's settled version of an assistant turn, freezing
    /// its text. A finalize for an id never seen before inserts the
    /// settled turn directly; some servers skip deltas for short replies.
    pub fn finalize(&self, turn: Turn) {
        let mut turn = turn;
        turn.lifecycle = TurnLifecycle::Complete;
        let revision = {
            let mut inner = self.inner.write();
            match inner.index.get(&turn.id).copied() {
                Some(idx) => inner.turns[idx] = turn,
                None => inner.push(turn),
            }
            inner.bump()
        };
        self.emit(EngineEvent::TurnsChanged { revision });
    }

    /// Settle after a normal completion: any turn still open is frozen
    /// as `Complete` with whatever text it has.
    pub fn settle_completed(&self) {
        self.settle(TurnLifecycle::Complete);
    }

    /// Settle after a cancel: streamed partials are kept and frozen as
    /// `Complete`, and an unconfirmed echo stops waiting.
    pub fn settle_cancelled(&self) {
        self.settle(TurnLifecycle::Complete);
    }

    /// Settle after a failure: any still-streaming turn keeps its partial
    /// text but is marked `Failed`, as is an unconfirmed echo.
    pub fn settle_failed(&self) {
        self.settle(TurnLifecycle::Failed);
    }

    fn settle(&self, to: TurnLifecycle) {
        let revision = {
            let mut inner = self.inner.write();
            let mut changed = false;
            for turn in inner.turns.iter_mut() {
                if matches!(
                    turn.lifecycle,
                    TurnLifecycle::Streaming | TurnLifecycle::Pending
                ) {
                    turn.lifecycle = to;
                    changed = true;
                }
            }
            if !changed {
                return;
            }
            inner.bump()
        };
        self.emit(EngineEvent::TurnsChanged { revision });
    }

    /// Replace the whole list with the server's canonical history.
    pub fn resync(&self, server_turns: Vec<Turn>) {
        let revision = {
            let mut inner = self.inner.write();
            inner.index = server_turns
                .iter()
                .enumerate()
                .map(|(i, t)| (t.id.clone(), i))
                .collect();
            inner.turns = server_turns;
            inner.bump()
        };
        self.emit(EngineEvent::TurnsChanged { revision });
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn get(&self, turn_id: &str) -> Option<Turn> {
        let inner = self.inner.read();
        let idx = *inner.index.get(turn_id)?;
        inner.turns.get(idx).cloned()
    }

    pub fn snapshot(&self) -> Vec<Turn> {
        self.inner.read().turns.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().turns.is_empty()
    }

    /// Monotonic revision counter; bumped once per applied mutation.
    pub fn revision(&self) -> u64 {
        self.inner.read().revision
    }

    // ── Events ─────────────────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Broadcast an event. Called outside the write lock so a slow
    /// subscriber can never hold up a mutation. Send errors just mean
    /// nobody is listening.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}

impl Default for TurnStore {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
