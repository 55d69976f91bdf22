//! `turnwire chat` — interactive REPL command.
//!
//! Opens a readline-based loop that sends each line as a turn and
//! streams the response back.  Supports slash-commands for session
//! switching, permission mode, and other REPL conveniences.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use tw_domain::config::{ConfigSeverity, EngineConfig};
use tw_domain::phase::PhaseState;
use tw_domain::tool::InvocationStatus;
use tw_domain::turn::Role;
use tw_engine::{EngineEvent, TurnController, TurnState};
use tw_wire::{ChannelTransport, EnvToken, HttpChannel, PermissionMode, StaticToken, TokenSource};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run the interactive chat REPL.
///
/// Builds an [`HttpChannel`] transport and a [`TurnController`] for the
/// session, then enters a readline loop that accepts user input and
/// streams responses to stdout.
pub async fn chat(
    config: EngineConfig,
    session: String,
    token: Option<String>,
    training: bool,
) -> anyhow::Result<()> {
    // 1. Validate configuration before touching the network.
    let issues = config.validate();
    for issue in &issues {
        eprintln!("config {issue}");
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!("configuration invalid; fix the errors above");
    }

    // 2. Build the channel transport.  An explicit --token wins over the
    //    TURNWIRE_TOKEN environment variable.
    let token_source: Arc<dyn TokenSource> = match token {
        Some(token) => Arc::new(StaticToken(token)),
        None => Arc::new(EnvToken("TURNWIRE_TOKEN".into())),
    };
    let transport: Arc<dyn ChannelTransport> = Arc::new(HttpChannel::new(
        config.channel.base_url.clone(),
        token_source,
        config.channel.connect_timeout(),
    )?);

    let mut controller = build_controller(&session, &transport, &config, training);

    // 3. Initialize rustyline editor with persistent history.
    let history_path = dirs::home_dir()
        .unwrap_or_default()
        .join(".turnwire")
        .join("chat_history.txt");
    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let mut rl = rustyline::DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    // 4. Print welcome message to stderr (keep stdout clean for output).
    eprintln!("TurnWire interactive chat");
    eprintln!(
        "Session: {}  |  Server: {}  |  Type /help for commands, Ctrl+D to exit",
        controller.session_id(),
        config.channel.base_url
    );
    eprintln!();

    // 5. REPL loop.
    loop {
        let readline = rl.readline("you> ");

        match readline {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                rl.add_history_entry(&line).ok();

                // ── Slash commands ────────────────────────────────
                if trimmed.starts_with('/') {
                    if handle_slash_command(
                        trimmed,
                        &mut controller,
                        &transport,
                        &config,
                        training,
                    ) {
                        break;
                    }
                    continue;
                }

                // ── User message → streamed turn ─────────────────
                if let Err(e) = stream_turn(&controller, trimmed).await {
                    eprintln!("\x1B[31merror: {e}\x1B[0m");
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                eprintln!("(Use Ctrl+D or /exit to quit)");
                continue;
            }
            Err(rustyline::error::ReadlineError::Eof) => {
                break;
            }
            Err(e) => {
                eprintln!("\x1B[31mreadline error: {e}\x1B[0m");
                break;
            }
        }
    }

    // 6. Save history.
    rl.save_history(&history_path).ok();

    eprintln!("Goodbye!");
    Ok(())
}

fn build_controller(
    session: &str,
    transport: &Arc<dyn ChannelTransport>,
    config: &EngineConfig,
    training: bool,
) -> TurnController {
    if training {
        TurnController::with_phase_tracker(session, Arc::clone(transport), config.clone())
    } else {
        TurnController::new(session, Arc::clone(transport), config.clone())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slash command handling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process a slash command.  Returns `true` if the REPL should exit.
fn handle_slash_command(
    input: &str,
    controller: &mut TurnController,
    transport: &Arc<dyn ChannelTransport>,
    config: &EngineConfig,
    training: bool,
) -> bool {
    let parts: Vec<&str> = input.splitn(2, ' ').collect();
    let cmd = parts[0];
    let arg = parts.get(1).map(|s| s.trim());

    match cmd {
        "/exit" | "/quit" => return true,

        "/cancel" => {
            if controller.is_active() {
                controller.cancel();
                eprintln!("Cancel requested.");
            } else {
                eprintln!("No turn in flight.");
            }
        }

        "/session" => {
            if let Some(name) = arg.filter(|s| !s.is_empty()) {
                *controller = build_controller(name, transport, config, training);
                eprintln!("Session switched to: {name}");
            } else {
                eprintln!("Current session: {}", controller.session_id());
                eprintln!("Usage: /session <id>");
            }
        }

        "/mode" => {
            if let Some(mode) = arg.and_then(parse_mode) {
                let mut scope = controller.scope();
                scope.permission_mode = mode;
                controller.set_scope(scope);
                eprintln!("Permission mode set to: {}", mode_name(mode));
            } else {
                eprintln!(
                    "Current mode: {}",
                    mode_name(controller.scope().permission_mode)
                );
                eprintln!("Usage: /mode <ask|accept_edits|bypass>");
            }
        }

        "/tools" => {
            let invocations = controller.invocations();
            if invocations.is_empty() {
                eprintln!("No tool activity in the last turn.");
            }
            for inv in &invocations {
                eprintln!("  {}  {}  [{}]", inv.id, inv.tool_name, status_name(inv.status));
            }
            let orphans = controller.orphan_results();
            if !orphans.is_empty() {
                eprintln!("  {} result(s) without a matching invocation", orphans.len());
            }
        }

        "/clear" => {
            // ANSI escape: clear screen and move cursor to top-left.
            eprint!("\x1B[2J\x1B[1;1H");
        }

        "/help" => {
            eprintln!("Commands:");
            eprintln!("  /cancel          Cancel the turn in flight (also Ctrl+C while streaming)");
            eprintln!("  /session <id>    Switch to a different session");
            eprintln!("  /mode <mode>     Permission mode for future turns: ask, accept_edits, bypass");
            eprintln!("  /tools           Show tool activity from the last turn");
            eprintln!("  /clear           Clear the screen");
            eprintln!("  /exit, /quit     Exit the chat");
            eprintln!("  /help            Show this help");
        }

        other => {
            eprintln!("Unknown command: {other}  (type /help for a list)");
        }
    }

    false
}

fn parse_mode(arg: &str) -> Option<PermissionMode> {
    match arg {
        "ask" => Some(PermissionMode::Ask),
        "accept_edits" => Some(PermissionMode::AcceptEdits),
        "bypass" => Some(PermissionMode::Bypass),
        _ => None,
    }
}

fn mode_name(mode: PermissionMode) -> &'static str {
    match mode {
        PermissionMode::Ask => "ask",
        PermissionMode::AcceptEdits => "accept_edits",
        PermissionMode::Bypass => "bypass",
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
// Message sending + event streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Start a turn for `text` and stream its progress to the terminal.
///
/// Blocks until the turn settles.  Ctrl+C while streaming requests a
/// cooperative cancel and keeps draining, so partial text survives and
/// the ack timeout bounds how long a silent server can hold the loop.
async fn stream_turn(controller: &TurnController, text: &str) -> anyhow::Result<()> {
    // Turn ids already on screen; anything else that shows up is this
    // turn's output.
    let before: HashSet<String> = controller
        .snapshot()
        .into_iter()
        .map(|turn| turn.id)
        .collect();

    let mut rx = controller.subscribe();
    controller.start(text)?;

    let mut streaming_id: Option<String> = None;
    let mut printed = 0usize;
    let mut tools_shown = 0usize;

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(EngineEvent::TurnsChanged { .. }) => {
                    print_assistant_tail(controller, &before, &mut streaming_id, &mut printed);
                }
                Ok(EngineEvent::InvocationsChanged) => {
                    let invocations = controller.invocations();
                    for inv in invocations.iter().skip(tools_shown) {
                        eprintln!("\x1B[2m[tool: {}]\x1B[0m", inv.tool_name);
                    }
                    tools_shown = invocations.len();
                }
                Ok(EngineEvent::PhaseChanged) => {
                    if let Some(status) = controller.phase_state() {
                        if status.has_signal() {
                            eprintln!("\x1B[2m[{}]\x1B[0m", describe_phase(&status));
                        }
                    }
                }
                Ok(EngineEvent::TrainingCompleted { score }) => {
                    eprintln!("\x1B[2m[training complete: {score}%]\x1B[0m");
                }
                Ok(EngineEvent::StateChanged { state }) if state.is_terminal() => {
                    break;
                }
                Ok(EngineEvent::StateChanged { .. }) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged; catching up");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\x1B[2m(cancel requested; draining until the server acknowledges)\x1B[0m");
                controller.cancel();
            }
        }
    }

    // Text that landed together with the terminal transition.
    print_assistant_tail(controller, &before, &mut streaming_id, &mut printed);

    match controller.state() {
        TurnState::Completed => {
            // Trailing newline + blank separator after streamed deltas.
            println!();
            println!();
        }
        TurnState::Cancelled => {
            if printed > 0 {
                println!();
            }
            eprintln!("(turn cancelled)");
        }
        TurnState::Failed => {
            if printed > 0 {
                println!();
            }
            let message = controller
                .last_error()
                .unwrap_or_else(|| "turn failed".into());
            eprintln!("\x1B[31merror: {message}\x1B[0m");
        }
        _ => {}
    }

    Ok(())
}

/// Print any assistant text not yet written to stdout.
///
/// Streamed upserts only ever extend the text, so the printed byte count
/// marks a stable prefix.  The turn is picked once per exchange: the
/// newest assistant turn that was not on screen before `start`.
fn print_assistant_tail(
    controller: &TurnController,
    before: &HashSet<String>,
    streaming_id: &mut Option<String>,
    printed: &mut usize,
) {
    let snapshot = controller.snapshot();
    let turn = match streaming_id.as_deref() {
        Some(id) => snapshot.iter().find(|t| t.id == id),
        None => snapshot
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant && !before.contains(&t.id)),
    };
    let Some(turn) = turn else {
        return;
    };
    if streaming_id.is_none() {
        *streaming_id = Some(turn.id.clone());
    }

    if let Some(tail) = turn.text.get(*printed..).filter(|t| !t.is_empty()) {
        print!("{tail}");
        std::io::stdout().flush().ok();
    }
    *printed = turn.text.len();
}

fn describe_phase(status: &PhaseState) -> String {
    let mut parts = Vec::new();
    if let Some(phase) = status.phase {
        parts.push(format!("phase: {}", phase.as_str()));
    }
    match (status.score_before, status.score_after) {
        (Some(from), Some(to)) if from != to => {
            parts.push(format!("score: {from}% -> {to}%"));
        }
        (_, Some(to)) => parts.push(format!("score: {to}%")),
        _ => {}
    }
    if let Some(issue) = status.issues.last() {
        parts.push(format!("issue: {issue}"));
    }
    parts.join("  |  ")
}
