//! Turn lifecycle control.
//!
//! One controller owns one session's live turn: it opens the channel,
//! pumps chunks through the decoder and classifier, routes semantic
//! events into the store, batcher, invocation list, and phase tracker,
//! and settles the turn on terminal events, channel loss, or cancel.
//!
//! Cancellation is cooperative. `cancel()` only raises a flag and wakes
//! the drive loop; the loop fires the out-of-band control call and keeps
//! consuming chunks until the server acknowledges, so partial text
//! produced in the meantime is kept. A server that never acknowledges is
//! abandoned at the ack deadline and the turn settles locally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;

use tw_domain::config::EngineConfig;
use tw_domain::error::{Error, Result};
use tw_domain::event::SemanticEvent;
use tw_domain::phase::PhaseState;
use tw_domain::tool::{InvocationStatus, ToolInvocation, ToolOutcome};
use tw_domain::trace::TraceEvent;
use tw_domain::turn::Turn;
use tw_wire::classify::classify;
use tw_wire::decode::FrameDecoder;
use tw_wire::extract::{extract_invocations, extract_results};
use tw_wire::traits::{ChannelTransport, TurnRequest, TurnScope};

use crate::batch::DeltaBatcher;
use crate::phase::PhaseTracker;
use crate::store::{EngineEvent, TurnStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle of the controller's current (or most recent) turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// No turn has been started yet.
    Idle,
    /// The open request was sent; no channel id has arrived.
    AwaitingChannel,
    /// The channel is open and records are flowing.
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TurnState::Completed | TurnState::Cancelled | TurnState::Failed
        )
    }

    /// True while a drive task owns the session. `start()` is rejected
    /// in active states and re-armed by terminal ones.
    pub fn is_active(self) -> bool {
        matches!(self, TurnState::AwaitingChannel | TurnState::Streaming)
    }
}

/// A tool result that arrived before (or without) its invocation.
///
/// Kept aside for diagnostics rather than merged retroactively; the
/// first-seen record wins and later arrivals do not rewrite history.
#[derive(Debug, Clone, Serialize)]
pub struct OrphanResult {
    pub tool_use_id: String,
    pub outcome: ToolOutcome,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Controller
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Owns one session's turn lifecycle end to end.
pub struct TurnController {
    session_id: String,
    transport: Arc<dyn ChannelTransport>,
    config: EngineConfig,
    store: Arc<TurnStore>,
    scope: RwLock<TurnScope>,
    shared: Arc<TurnShared>,
}

/// State shared between the controller handle and its drive task.
struct TurnShared {
    state: RwLock<TurnState>,
    invocations: RwLock<Vec<ToolInvocation>>,
    orphans: RwLock<Vec<OrphanResult>>,
    phase: RwLock<Option<PhaseTracker>>,
    last_error: RwLock<Option<String>>,
    cancel_requested: AtomicBool,
    cancel_notify: Notify,
}

impl TurnController {
    pub fn new(
        session_id: impl Into<String>,
        transport: Arc<dyn ChannelTransport>,
        config: EngineConfig,
    ) -> Self {
        Self::build(session_id.into(), transport, config, None)
    }

    /// A controller for a skill-training session, with phase and score
    /// tracking enabled.
    pub fn with_phase_tracker(
        session_id: impl Into<String>,
        transport: Arc<dyn ChannelTransport>,
        config: EngineConfig,
    ) -> Self {
        Self::build(
            session_id.into(),
            transport,
            config,
            Some(PhaseTracker::new()),
        )
    }

    fn build(
        session_id: String,
        transport: Arc<dyn ChannelTransport>,
        config: EngineConfig,
        tracker: Option<PhaseTracker>,
    ) -> Self {
        Self {
            session_id,
            transport,
            config,
            store: Arc::new(TurnStore::new()),
            scope: RwLock::new(TurnScope::default()),
            shared: Arc::new(TurnShared {
                state: RwLock::new(TurnState::Idle),
                invocations: RwLock::new(Vec::new()),
                orphans: RwLock::new(Vec::new()),
                phase: RwLock::new(tracker),
                last_error: RwLock::new(None),
                cancel_requested: AtomicBool::new(false),
                cancel_notify: Notify::new(),
            }),
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Send a user message and spawn the drive task for its turn.
    ///
    /// One turn per session at a time: while a turn is active this
    /// returns `Error::TurnInFlight` and changes nothing.
    pub fn start(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        {
            let mut state = self.shared.state.write();
            if state.is_active() {
                return Err(Error::TurnInFlight(self.session_id.clone()));
            }
            *state = TurnState::AwaitingChannel;
        }
        self.shared.cancel_requested.store(false, Ordering::Release);
        self.shared.invocations.write().clear();
        self.shared.orphans.write().clear();
        *self.shared.last_error.write() = None;
        self.store.emit(EngineEvent::StateChanged {
            state: TurnState::AwaitingChannel,
        });

        let echo = Turn::speculative_user(text.clone());
        let temp_id = echo.id.clone();
        if !self.store.insert_speculative(echo) {
            tracing::warn!("speculative echo not inserted; sending anyway");
        }

        let request = TurnRequest {
            session_id: self.session_id.clone(),
            text,
            scope: self.scope.read().clone(),
        };
        let drive = Drive {
            session_id: self.session_id.clone(),
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
            store: Arc::clone(&self.store),
            shared: Arc::clone(&self.shared),
        };
        tokio::spawn(drive.run(request, temp_id));
        Ok(())
    }

    /// Request cooperative cancellation of the active turn.
    ///
    /// Raises a flag and wakes the drive loop; settling happens there so
    /// partial text survives. A no-op when nothing is active or a cancel
    /// is already pending.
    pub fn cancel(&self) {
        if !self.state().is_active() {
            tracing::debug!("cancel ignored; no turn in flight");
            return;
        }
        if self.shared.cancel_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.cancel_notify.notify_one();
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> TurnState {
        *self.shared.state.read()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    pub fn snapshot(&self) -> Vec<Turn> {
        self.store.snapshot()
    }

    /// Tool invocations of the current turn, in arrival order.
    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.shared.invocations.read().clone()
    }

    pub fn orphan_results(&self) -> Vec<OrphanResult> {
        self.shared.orphans.read().clone()
    }

    /// Training status, if this controller tracks phases.
    pub fn phase_state(&self) -> Option<PhaseState> {
        self.shared.phase.read().as_ref().map(PhaseTracker::state)
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.read().clone()
    }

    pub fn scope(&self) -> TurnScope {
        self.scope.read().clone()
    }

    /// Replace the scope sent with future turns. The active turn keeps
    /// the scope it was opened with.
    pub fn set_scope(&self, scope: TurnScope) {
        *self.scope.write() = scope;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.store.subscribe()
    }

    pub fn store(&self) -> Arc<TurnStore> {
        Arc::clone(&self.store)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Drive task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the spawned per-turn task needs, detached from the
/// controller handle so dropping the handle never kills a live turn.
struct Drive {
    session_id: String,
    transport: Arc<dyn ChannelTransport>,
    config: EngineConfig,
    store: Arc<TurnStore>,
    shared: Arc<TurnShared>,
}

/// Pump-loop verdict for one semantic event.
enum Flow {
    Continue,
    Settled(TurnState),
}

impl Drive {
    async fn run(self, request: TurnRequest, temp_id: String) {
        let started = Instant::now();

        let settled = match self.pump(request, &temp_id).await {
            Ok(state) => state,
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(error = %reason, "turn failed");
                *self.shared.last_error.write() = Some(reason);
                self.store.settle_failed();
                TurnState::Failed
            }
        };

        if settled == TurnState::Completed {
            if self.config.channel.resync_on_complete {
                self.resync().await;
            }
            self.report_training_score();
        }

        self.shared.cancel_requested.store(false, Ordering::Release);
        set_state(&self.shared, &self.store, settled);

        let outcome = match settled {
            TurnState::Completed => "completed",
            TurnState::Cancelled => "cancelled",
            _ => "failed",
        };
        TraceEvent::TurnSettled {
            session_id: self.session_id.clone(),
            outcome: outcome.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
    }

    /// Open the channel and consume it to a settled state.
    ///
    /// Ok is a deliberate settle (the store is already settled when it
    /// is returned); Err means the channel died and the caller settles
    /// the store as failed.
    async fn pump(&self, request: TurnRequest, temp_id: &str) -> Result<TurnState> {
        let mut stream = tokio::select! {
            opened = self.transport.open(request) => opened?,
            _ = cancelled_wait(&self.shared) => {
                // Cancelled before the channel opened. There is no
                // channel id to cancel server-side; drop the open
                // attempt and settle locally.
                self.store.settle_cancelled();
                return Ok(TurnState::Cancelled);
            }
        };

        let mut decoder = FrameDecoder::new();
        let mut batcher = DeltaBatcher::new(self.config.batch.window());
        let mut channel_id: Option<String> = None;
        let mut cancel_armed = false;
        let mut ack_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                maybe_chunk = stream.next() => match maybe_chunk {
                    Some(Ok(chunk)) => {
                        for record in decoder.push(&chunk) {
                            if let Flow::Settled(state) =
                                self.apply_event(classify(&record), temp_id, &mut batcher, &mut channel_id)
                            {
                                return Ok(state);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        batcher.flush(&self.store);
                        return Err(e);
                    }
                    None => {
                        if let Some(record) = decoder.finish() {
                            if let Flow::Settled(state) =
                                self.apply_event(classify(&record), temp_id, &mut batcher, &mut channel_id)
                            {
                                return Ok(state);
                            }
                        }
                        batcher.flush(&self.store);
                        return Err(Error::Channel(
                            "channel closed before a terminal event".into(),
                        ));
                    }
                },
                _ = sleep_until_opt(batcher.deadline()) => {
                    batcher.flush(&self.store);
                }
                _ = self.shared.cancel_notify.notified(), if !cancel_armed => {
                    // A stale wakeup from a previous turn carries no flag;
                    // consume it and keep pumping.
                    if self.shared.cancel_requested.load(Ordering::Acquire) {
                        cancel_armed = true;
                        ack_deadline = Some(Instant::now() + self.config.cancel.ack_timeout());
                        self.spawn_server_cancel(channel_id.as_deref());
                    }
                }
                _ = sleep_until_opt(ack_deadline) => {
                    tracing::warn!(
                        session_id = %self.session_id,
                        "cancel unacknowledged at deadline; settling locally"
                    );
                    batcher.flush(&self.store);
                    self.store.settle_cancelled();
                    return Ok(TurnState::Cancelled);
                }
            }
        }
    }

    /// Route one semantic event into the engine's state.
    fn apply_event(
        &self,
        event: SemanticEvent,
        temp_id: &str,
        batcher: &mut DeltaBatcher,
        channel_id: &mut Option<String>,
    ) -> Flow {
        match event {
            SemanticEvent::ChannelOpened { channel_id: id } => {
                TraceEvent::ChannelOpened {
                    session_id: self.session_id.clone(),
                    channel_id: id.clone(),
                }
                .emit();
                *channel_id = Some(id);
                set_state(&self.shared, &self.store, TurnState::Streaming);
                // A cancel requested before the id was known fires now.
                if self.shared.cancel_requested.load(Ordering::Acquire) {
                    self.spawn_server_cancel(channel_id.as_deref());
                }
                Flow::Continue
            }
            SemanticEvent::UserEchoConfirmed { turn } => {
                self.store.replace(temp_id, turn);
                Flow::Continue
            }
            SemanticEvent::AssistantStarted { turn_id } => {
                tracing::debug!(turn_id = %turn_id, "assistant turn started");
                Flow::Continue
            }
            SemanticEvent::AssistantDelta { turn_id, text } => {
                self.observe_phase(|tracker| tracker.observe_delta(&text));
                batcher.push(&turn_id, &text);
                Flow::Continue
            }
            SemanticEvent::AssistantFinalized { turn } => {
                // Flush first so subscribers never see text vanish
                // between the last partial and the settled turn.
                batcher.flush(&self.store);
                self.observe_phase(|tracker| tracker.observe_final(&turn.text));
                self.store.finalize(turn);
                Flow::Continue
            }
            SemanticEvent::SubEvent { raw } => {
                self.apply_sub_event(&raw);
                Flow::Continue
            }
            SemanticEvent::PhaseStatus {
                phase,
                score,
                message,
            } => {
                self.observe_phase(|tracker| {
                    tracker.apply_explicit(phase, score, message.as_deref())
                });
                Flow::Continue
            }
            SemanticEvent::Cancelled => {
                batcher.flush(&self.store);
                self.store.settle_cancelled();
                Flow::Settled(TurnState::Cancelled)
            }
            SemanticEvent::Completed => {
                batcher.flush(&self.store);
                self.store.settle_completed();
                Flow::Settled(TurnState::Completed)
            }
            SemanticEvent::Failed { reason } => {
                tracing::warn!(reason = %reason, "turn failed server-side");
                batcher.flush(&self.store);
                *self.shared.last_error.write() = Some(reason);
                self.store.settle_failed();
                Flow::Settled(TurnState::Failed)
            }
            SemanticEvent::Unknown => {
                tracing::debug!("ignoring unrecognized record kind");
                Flow::Continue
            }
        }
    }

    /// Fold a sub-event payload into the invocation list.
    ///
    /// Invocations are merged before results so a payload carrying a
    /// tool_use and its tool_result pairs them up in one pass. A result
    /// with no matching invocation is kept aside as an orphan; it never
    /// resolves an invocation that arrives later.
    fn apply_sub_event(&self, raw: &Value) {
        let incoming = extract_invocations(raw);
        let results = extract_results(raw);
        if incoming.is_empty() && results.is_empty() {
            return;
        }

        let mut changed = false;
        {
            let mut invocations = self.shared.invocations.write();
            for invocation in incoming {
                if invocations.iter().any(|known| known.id == invocation.id) {
                    tracing::warn!(
                        id = %invocation.id,
                        "duplicate tool invocation id; keeping the first"
                    );
                    continue;
                }
                invocations.push(invocation);
                changed = true;
            }
            for (tool_use_id, outcome) in results {
                match invocations.iter_mut().find(|inv| inv.id == tool_use_id) {
                    Some(invocation) if invocation.status == InvocationStatus::Pending => {
                        invocation.resolve(outcome);
                        changed = true;
                    }
                    Some(_) => {
                        tracing::warn!(
                            id = %tool_use_id,
                            "result for an already-resolved invocation; ignoring"
                        );
                    }
                    None => {
                        tracing::warn!(
                            id = %tool_use_id,
                            "tool result arrived before its invocation"
                        );
                        TraceEvent::OrphanResultRetained {
                            tool_use_id: tool_use_id.clone(),
                        }
                        .emit();
                        self.shared.orphans.write().push(OrphanResult {
                            tool_use_id,
                            outcome,
                        });
                        changed = true;
                    }
                }
            }
        }
        if changed {
            self.store.emit(EngineEvent::InvocationsChanged);
        }
    }

    /// Run `f` against the phase tracker if this session has one, and
    /// broadcast when it reports visible movement.
    fn observe_phase(&self, f: impl FnOnce(&mut PhaseTracker) -> bool) {
        let changed = match self.shared.phase.write().as_mut() {
            Some(tracker) => f(tracker),
            None => return,
        };
        if changed {
            self.store.emit(EngineEvent::PhaseChanged);
        }
    }

    /// Fire the out-of-band cancel control call without blocking the
    /// pump loop. Failures are only logged; the ack deadline already
    /// covers a server that never answers.
    fn spawn_server_cancel(&self, channel_id: Option<&str>) {
        let channel_id = match channel_id {
            Some(id) => id.to_string(),
            None => return,
        };
        let transport = Arc::clone(&self.transport);
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.cancel(&session_id, &channel_id).await {
                tracing::warn!(error = %e, "cancel control call failed");
            }
        });
    }

    async fn resync(&self) {
        match self.transport.fetch_turns(&self.session_id).await {
            Ok(turns) => {
                TraceEvent::ResyncApplied {
                    session_id: self.session_id.clone(),
                    turn_count: turns.len(),
                }
                .emit();
                self.store.resync(turns);
            }
            Err(e) => {
                tracing::warn!(error = %e, "turn read-back failed; keeping local state");
            }
        }
    }

    fn report_training_score(&self) {
        let score = match self.shared.phase.read().as_ref() {
            Some(tracker) => tracker.on_completed(),
            None => return,
        };
        if let Some(score) = score {
            TraceEvent::TrainingCompleted {
                session_id: self.session_id.clone(),
                score,
            }
            .emit();
            self.store.emit(EngineEvent::TrainingCompleted { score });
        }
    }
}

fn set_state(shared: &TurnShared, store: &TurnStore, state: TurnState) {
    *shared.state.write() = state;
    store.emit(EngineEvent::StateChanged { state });
}

/// Resolves once cancellation has been requested. Checks the flag before
/// parking so a request that landed earlier is not missed.
async fn cancelled_wait(shared: &TurnShared) {
    loop {
        if shared.cancel_requested.load(Ordering::Acquire) {
            return;
        }
        shared.cancel_notify.notified().await;
    }
}

/// A sleep that never fires when no deadline is armed.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use tw_domain::stream::BoxStream;

    struct NoopChannel;

    #[async_trait::async_trait]
    impl ChannelTransport for NoopChannel {
        async fn open(&self, _req: TurnRequest) -> Result<BoxStream<'static, Result<String>>> {
            Err(Error::Channel("noop".into()))
        }

        async fn cancel(&self, _session_id: &str, _channel_id: &str) -> Result<()> {
            Ok(())
        }

        async fn fetch_turns(&self, _session_id: &str) -> Result<Vec<Turn>> {
            Ok(Vec::new())
        }
    }

    fn controller() -> TurnController {
        TurnController::new("sess-1", Arc::new(NoopChannel), EngineConfig::default())
    }

    #[test]
    fn active_and_terminal_states_are_disjoint() {
        for state in [
            TurnState::Idle,
            TurnState::AwaitingChannel,
            TurnState::Streaming,
            TurnState::Completed,
            TurnState::Cancelled,
            TurnState::Failed,
        ] {
            assert!(
                !(state.is_active() && state.is_terminal()),
                "{state:?} is both active and terminal"
            );
        }
        assert!(TurnState::AwaitingChannel.is_active());
        assert!(TurnState::Streaming.is_active());
        assert!(TurnState::Failed.is_terminal());
        assert!(!TurnState::Idle.is_active());
        assert!(!TurnState::Idle.is_terminal());
    }

    #[test]
    fn fresh_controller_is_idle_and_empty() {
        let c = controller();
        assert_eq!(c.state(), TurnState::Idle);
        assert!(!c.is_active());
        assert!(c.snapshot().is_empty());
        assert!(c.invocations().is_empty());
        assert!(c.orphan_results().is_empty());
        assert!(c.last_error().is_none());
        assert!(c.phase_state().is_none());
    }

    #[test]
    fn phase_state_present_only_with_tracker() {
        let trained = TurnController::with_phase_tracker(
            "sess-1",
            Arc::new(NoopChannel),
            EngineConfig::default(),
        );
        assert!(trained.phase_state().is_some());
        assert!(controller().phase_state().is_none());
    }

    #[test]
    fn cancel_without_active_turn_changes_nothing() {
        let c = controller();
        let mut rx = c.subscribe();

        c.cancel();
        assert_eq!(c.state(), TurnState::Idle);
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn start_rejected_while_a_turn_is_active() {
        let c = controller();
        *c.shared.state.write() = TurnState::Streaming;

        match c.start("second message") {
            Err(Error::TurnInFlight(session)) => assert_eq!(session, "sess-1"),
            other => panic!("expected TurnInFlight, got {other:?}"),
        }
        // The rejected start must not have touched the turn list.
        assert!(c.snapshot().is_empty());
    }

    #[test]
    fn scope_updates_apply_to_future_turns() {
        let c = controller();
        let mut scope = TurnScope::default();
        scope.skill_ids.push("code-review".to_string());

        c.set_scope(scope);
        assert_eq!(c.scope().skill_ids, vec!["code-review"]);
    }
}
