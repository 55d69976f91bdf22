use serde::{Deserialize, Serialize};

/// The phases a training run moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingPhase {
    Analyzing,
    Executing,
    Evaluating,
    Finalizing,
}

impl TrainingPhase {
    /// Parse a wire phase name. Unrecognized names return `None` so the
    /// caller can fall back to `SemanticEvent::Unknown`.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "analyzing" => Some(TrainingPhase::Analyzing),
            "executing" => Some(TrainingPhase::Executing),
            "evaluating" => Some(TrainingPhase::Evaluating),
            "finalizing" => Some(TrainingPhase::Finalizing),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingPhase::Analyzing => "analyzing",
            TrainingPhase::Executing => "executing",
            TrainingPhase::Evaluating => "evaluating",
            TrainingPhase::Finalizing => "finalizing",
        }
    }
}

/// Accumulated training status for one run.
///
/// Owned and mutated by the phase tracker; readers get clones.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseState {
    pub phase: Option<TrainingPhase>,
    pub score_before: Option<u32>,
    pub score_after: Option<u32>,
    pub issues: Vec<String>,
}

impl PhaseState {
    /// True once any signal (phase, score, or issue) has been recorded.
    pub fn has_signal(&self) -> bool {
        self.phase.is_some()
            || self.score_before.is_some()
            || self.score_after.is_some()
            || !self.issues.is_empty()
    }
}

/// Scores are percentages; anything above 100 is a malformed report.
pub fn clamp_score(score: u32) -> u32 {
    score.min(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for phase in [
            TrainingPhase::Analyzing,
            TrainingPhase::Executing,
            TrainingPhase::Evaluating,
            TrainingPhase::Finalizing,
        ] {
            assert_eq!(TrainingPhase::from_wire(phase.as_str()), Some(phase));
        }
    }

    #[test]
    fn unrecognized_phase_name_is_none() {
        assert_eq!(TrainingPhase::from_wire("deploying"), None);
        assert_eq!(TrainingPhase::from_wire(""), None);
        assert_eq!(TrainingPhase::from_wire("Analyzing"), None);
    }

    #[test]
    fn scores_clamp_to_percent_range() {
        assert_eq!(clamp_score(0), 0);
        assert_eq!(clamp_score(100), 100);
        assert_eq!(clamp_score(250), 100);
    }
}
