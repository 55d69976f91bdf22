use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub cancel: CancelConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Delta batching
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Quiescence window for coalescing text deltas, in milliseconds.
    /// Deltas arriving inside one window produce a single store update.
    #[serde(default = "d_50")]
    pub window_ms: u64,
}

impl BatchConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { window_ms: 50 }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cancellation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelConfig {
    /// How long to wait for the server to acknowledge a cancel request
    /// before settling the turn locally, in milliseconds.
    #[serde(default = "d_10000")]
    pub ack_timeout_ms: u64,
}

impl CancelConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

impl Default for CancelConfig {
    fn default() -> Self {
        Self { ack_timeout_ms: 10_000 }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Channel transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Base URL of the conversation service.
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default = "d_30000")]
    pub connect_timeout_ms: u64,
    /// After a turn completes, read the canonical turn list back from the
    /// server and adopt it wholesale.
    #[serde(default = "d_true")]
    pub resync_on_complete: bool,
}

impl ChannelConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            connect_timeout_ms: 30_000,
            resync_on_complete: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl EngineConfig {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        // A zero window degenerates to one store update per delta.
        if self.batch.window_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "batch.window_ms".into(),
                message: "zero window disables delta coalescing".into(),
            });
        }

        // A zero ack timeout would settle cancels before the server can answer.
        if self.cancel.ack_timeout_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "cancel.ack_timeout_ms".into(),
                message: "ack timeout must be greater than 0".into(),
            });
        }

        if self.channel.base_url.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "channel.base_url".into(),
                message: "base_url must not be empty".into(),
            });
        }

        if self.channel.connect_timeout_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "channel.connect_timeout_ms".into(),
                message: "connect timeout must be greater than 0".into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Default value helpers (serde)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_50() -> u64 {
    50
}
fn d_10000() -> u64 {
    10_000
}
fn d_30000() -> u64 {
    30_000
}
fn d_base_url() -> String {
    "http://localhost:3210".into()
}
fn d_true() -> bool {
    true
}
