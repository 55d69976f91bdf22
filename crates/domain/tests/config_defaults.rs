use tw_domain::config::{ConfigSeverity, EngineConfig};

#[test]
fn default_window_is_fifty_ms() {
    let config = EngineConfig::default();
    assert_eq!(config.batch.window_ms, 50);
}

#[test]
fn default_cancel_ack_timeout_is_ten_seconds() {
    let config = EngineConfig::default();
    assert_eq!(config.cancel.ack_timeout_ms, 10_000);
}

#[test]
fn empty_toml_yields_defaults() {
    let config: EngineConfig = toml::from_str("").unwrap();
    assert_eq!(config.batch.window_ms, 50);
    assert_eq!(config.cancel.ack_timeout_ms, 10_000);
    assert_eq!(config.channel.connect_timeout_ms, 30_000);
    assert!(config.channel.resync_on_complete);
}

#[test]
fn partial_toml_keeps_other_defaults() {
    let toml_str = r#"
[batch]
window_ms = 16

[channel]
base_url = "https://chat.example.com"
"#;
    let config: EngineConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(config.batch.window_ms, 16);
    assert_eq!(config.channel.base_url, "https://chat.example.com");
    assert_eq!(config.cancel.ack_timeout_ms, 10_000);
}

#[test]
fn default_config_validates_clean() {
    let issues = EngineConfig::default().validate();
    assert!(issues.is_empty(), "unexpected issues: {issues:?}");
}

#[test]
fn zero_window_is_a_warning_not_an_error() {
    let mut config = EngineConfig::default();
    config.batch.window_ms = 0;
    let issues = config.validate();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, ConfigSeverity::Warning);
    assert_eq!(issues[0].field, "batch.window_ms");
}

#[test]
fn empty_base_url_is_an_error() {
    let mut config = EngineConfig::default();
    config.channel.base_url.clear();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error && i.field == "channel.base_url"));
}

#[test]
fn zero_ack_timeout_is_an_error() {
    let mut config = EngineConfig::default();
    config.cancel.ack_timeout_ms = 0;
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error && i.field == "cancel.ack_timeout_ms"));
}
