//! Training status tracking.
//!
//! Skill-training sessions report their progress two ways: explicit
//! phase records on the wire, and human-readable hints inside assistant
//! text. The tracker folds both into one `PhaseState`, always preferring
//! explicit records once the server has sent any.

use regex::Regex;
use tw_domain::phase::{clamp_score, PhaseState, TrainingPhase};

/// Matches a score transition like `62% -> 85%` or `62% → 85%` in final
/// assistant text.
const SCORE_TRANSITION: &str = r"(\d{1,3})%\s*(?:→|->)\s*(\d{1,3})%";

pub struct PhaseTracker {
    state: PhaseState,
    /// Set once the server sends an explicit phase record; from then on
    /// keyword inference from delta text is disabled.
    explicit_seen: bool,
    score_rx: Regex,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            state: PhaseState::default(),
            explicit_seen: false,
            score_rx: Regex::new(SCORE_TRANSITION).expect("score transition pattern is valid"),
        }
    }

    /// Current state, cloned for rendering.
    pub fn state(&self) -> PhaseState {
        self.state.clone()
    }

    /// Apply an explicit phase record from the wire.
    ///
    /// The first reported score doubles as the baseline; every score
    /// updates `score_after`. A message is kept as an issue unless it
    /// repeats the previous one verbatim. Returns whether anything
    /// visible changed.
    pub fn apply_explicit(
        &mut self,
        phase: TrainingPhase,
        score: Option<u32>,
        message: Option<&str>,
    ) -> bool {
        self.explicit_seen = true;
        let mut changed = false;

        if self.state.phase != Some(phase) {
            self.state.phase = Some(phase);
            changed = true;
        }
        if let Some(score) = score {
            let score = clamp_score(score);
            if self.state.score_before.is_none() {
                self.state.score_before = Some(score);
                changed = true;
            }
            if self.state.score_after != Some(score) {
                self.state.score_after = Some(score);
                changed = true;
            }
        }
        if let Some(message) = message {
            let message = message.trim();
            if !message.is_empty() && self.state.issues.last().map(String::as_str) != Some(message)
            {
                self.state.issues.push(message.to_string());
                changed = true;
            }
        }
        changed
    }

    /// Infer a phase from assistant delta text.
    ///
    /// Pure fallback for servers that narrate without phase records; a
    /// single explicit record silences it for the rest of the session.
    /// Deltas are fragments, so a keyword split across two chunks is
    /// simply missed.
    pub fn observe_delta(&mut self, text: &str) -> bool {
        if self.explicit_seen {
            return false;
        }
        let lower = text.to_lowercase();
        let inferred = if lower.contains("analyz") {
            Some(TrainingPhase::Analyzing)
        } else if lower.contains("execut") || lower.contains("applying") {
            Some(TrainingPhase::Executing)
        } else if lower.contains("evaluat") || lower.contains("scoring") {
            Some(TrainingPhase::Evaluating)
        } else if lower.contains("finaliz") || lower.contains("wrapping up") {
            Some(TrainingPhase::Finalizing)
        } else {
            None
        };
        match inferred {
            Some(phase) if self.state.phase != Some(phase) => {
                self.state.phase = Some(phase);
                true
            }
            _ => false,
        }
    }

    /// Pull a score transition out of final assistant text.
    ///
    /// The settled text is the server's own summary, so a transition
    /// found here overrides scores gathered earlier.
    pub fn observe_final(&mut self, text: &str) -> bool {
        let caps = match self.score_rx.captures(text) {
            Some(caps) => caps,
            None => return false,
        };
        let before = caps[1].parse().ok().map(clamp_score);
        let after = caps[2].parse().ok().map(clamp_score);

        let mut changed = false;
        if before.is_some() && self.state.score_before != before {
            self.state.score_before = before;
            changed = true;
        }
        if after.is_some() && self.state.score_after != after {
            self.state.score_after = after;
            changed = true;
        }
        changed
    }

    /// Final score to report when the turn completes, if one is known.
    pub fn on_completed(&self) -> Option<u32> {
        self.state.score_after
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_infer_each_phase() {
        let cases = [
            ("Analyzing the skill definition...", TrainingPhase::Analyzing),
            ("Now executing the plan", TrainingPhase::Executing),
            ("Applying edits to the draft", TrainingPhase::Executing),
            ("Evaluating the results", TrainingPhase::Evaluating),
            ("Scoring the retry", TrainingPhase::Evaluating),
            ("Finalizing the skill", TrainingPhase::Finalizing),
            ("Wrapping up now", TrainingPhase::Finalizing),
        ];
        for (text, want) in cases {
            let mut tracker = PhaseTracker::new();
            assert!(tracker.observe_delta(text), "no phase from {text:?}");
            assert_eq!(tracker.state().phase, Some(want), "wrong phase for {text:?}");
        }
    }

    #[test]
    fn plain_text_infers_nothing() {
        let mut tracker = PhaseTracker::new();
        assert!(!tracker.observe_delta("The capital of France is Paris."));
        assert_eq!(tracker.state().phase, None);
    }

    #[test]
    fn explicit_record_silences_keyword_inference() {
        let mut tracker = PhaseTracker::new();
        tracker.apply_explicit(TrainingPhase::Executing, None, None);

        assert!(!tracker.observe_delta("Analyzing again..."));
        assert_eq!(tracker.state().phase, Some(TrainingPhase::Executing));
    }

    #[test]
    fn first_score_doubles_as_baseline() {
        let mut tracker = PhaseTracker::new();
        tracker.apply_explicit(TrainingPhase::Analyzing, Some(40), None);

        let state = tracker.state();
        assert_eq!(state.score_before, Some(40));
        assert_eq!(state.score_after, Some(40));
    }

    #[test]
    fn later_scores_move_only_score_after() {
        let mut tracker = PhaseTracker::new();
        tracker.apply_explicit(TrainingPhase::Analyzing, Some(40), None);
        tracker.apply_explicit(TrainingPhase::Evaluating, Some(75), None);
        tracker.apply_explicit(TrainingPhase::Finalizing, Some(82), None);

        let state = tracker.state();
        assert_eq!(state.score_before, Some(40));
        assert_eq!(state.score_after, Some(82));
    }

    #[test]
    fn scores_above_one_hundred_are_clamped() {
        let mut tracker = PhaseTracker::new();
        tracker.apply_explicit(TrainingPhase::Evaluating, Some(250), None);
        assert_eq!(tracker.state().score_after, Some(100));
    }

    #[test]
    fn repeated_message_is_kept_once() {
        let mut tracker = PhaseTracker::new();
        tracker.apply_explicit(TrainingPhase::Executing, None, Some("tabs vs spaces"));
        tracker.apply_explicit(TrainingPhase::Executing, None, Some("tabs vs spaces"));
        tracker.apply_explicit(TrainingPhase::Executing, None, Some("missing tests"));
        tracker.apply_explicit(TrainingPhase::Executing, None, Some("tabs vs spaces"));

        assert_eq!(
            tracker.state().issues,
            vec!["tabs vs spaces", "missing tests", "tabs vs spaces"]
        );
    }

    #[test]
    fn final_text_transition_parses_both_arrow_styles() {
        for text in [
            "Skill accuracy: 62% -> 85%",
            "Skill accuracy: 62% → 85%",
            "went from 62%->85% overall",
        ] {
            let mut tracker = PhaseTracker::new();
            assert!(tracker.observe_final(text), "no transition in {text:?}");
            let state = tracker.state();
            assert_eq!(state.score_before, Some(62));
            assert_eq!(state.score_after, Some(85));
        }
    }

    #[test]
    fn final_text_overrides_explicit_scores() {
        let mut tracker = PhaseTracker::new();
        tracker.apply_explicit(TrainingPhase::Evaluating, Some(40), None);
        tracker.observe_final("Done. Score: 38% -> 91%");

        let state = tracker.state();
        assert_eq!(state.score_before, Some(38));
        assert_eq!(state.score_after, Some(91));
    }

    #[test]
    fn final_text_without_transition_changes_nothing() {
        let mut tracker = PhaseTracker::new();
        tracker.apply_explicit(TrainingPhase::Evaluating, Some(40), None);
        assert!(!tracker.observe_final("All done, no numbers here."));
        assert_eq!(tracker.state().score_after, Some(40));
    }

    #[test]
    fn completed_score_comes_from_score_after() {
        let mut tracker = PhaseTracker::new();
        assert_eq!(tracker.on_completed(), None);

        tracker.apply_explicit(TrainingPhase::Finalizing, Some(88), None);
        assert_eq!(tracker.on_completed(), Some(88));
    }
}
