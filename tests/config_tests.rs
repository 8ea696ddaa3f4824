//! Configuration file tests.

use keycast::{EngineConfig, KeyCode, StrategyId};
use std::fs;
use std::path::PathBuf;

/// Returns a unique temporary file path for test isolation.
fn get_test_file_path(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "keycast_config_test_{}_{}.toml",
        name,
        std::process::id()
    ));
    path
}

/// Removes a test file if it exists.
fn cleanup_test_file(path: &PathBuf) {
    let _ = fs::remove_file(path);
}

/// Tests configuration save and load cycle preserves data.
#[test]
fn test_config_round_trip() {
    let path = get_test_file_path("round_trip");

    let config = EngineConfig {
        maintenance_interval_ms: 45,
        hardware_tagging: true,
        disabled_strategies: vec!["focus-bracket".to_string()],
        target_processes: vec!["game.exe".to_string()],
        held_keys: vec!["UP".to_string(), "LEFT".to_string()],
        direct_input_keywords: vec!["cry".to_string()],
        ..EngineConfig::default()
    };
    config.save_to_file(&path).expect("Failed to save config");

    let loaded = EngineConfig::load_from_file(&path).expect("Failed to load config");
    assert_eq!(loaded.maintenance_interval_ms, 45);
    assert!(loaded.hardware_tagging);
    assert_eq!(loaded.disabled_strategy_ids(), vec![StrategyId::FocusBracket]);
    assert_eq!(loaded.target_processes, vec!["game.exe".to_string()]);
    assert_eq!(
        loaded.held_key_codes().unwrap(),
        vec![KeyCode::UP, KeyCode::LEFT]
    );
    assert_eq!(loaded.direct_input_keywords, vec!["cry".to_string()]);
    assert_eq!(loaded.toggle_key, config.toggle_key);

    cleanup_test_file(&path);
}

/// Tests that a missing file is created with defaults.
#[test]
fn test_load_or_create_writes_defaults() {
    let path = get_test_file_path("create");
    cleanup_test_file(&path);

    let config = EngineConfig::load_or_create(&path).expect("Failed to create config");
    assert!(path.exists());
    assert_eq!(config.maintenance_interval_ms, 30);

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("# Held-key re-assertion period"));
    assert!(content.contains("hardware_tagging = false"));

    cleanup_test_file(&path);
}

/// Tests that out-of-range values are clamped at load time.
#[test]
fn test_load_clamps_values() {
    let path = get_test_file_path("clamp");
    fs::write(
        &path,
        "maintenance_interval_ms = 1\npress_duration_ms = 0\nmessage_timeout_ms = 2\n",
    )
    .unwrap();

    let config = EngineConfig::load_from_file(&path).expect("Failed to load config");
    assert_eq!(config.maintenance_interval_ms, 10);
    assert_eq!(config.press_duration_ms, 1);
    assert_eq!(config.message_timeout_ms, 10);

    cleanup_test_file(&path);
}

/// Tests that unknown names are rejected when loading.
#[test]
fn test_load_rejects_invalid_names() {
    let path = get_test_file_path("invalid");

    fs::write(&path, "disabled_strategies = [\"warp-drive\"]\n").unwrap();
    assert!(EngineConfig::load_from_file(&path).is_err());

    fs::write(&path, "toggle_key = \"NOPE\"\n").unwrap();
    assert!(EngineConfig::load_from_file(&path).is_err());

    fs::write(&path, "maintenance_interval_ms = \"fast\"\n").unwrap();
    assert!(EngineConfig::load_from_file(&path).is_err());

    cleanup_test_file(&path);
}

/// Tests that quotes and backslashes in string values survive a save.
#[test]
fn test_save_escapes_string_values() {
    let path = get_test_file_path("escape");

    let config = EngineConfig {
        log_level: r#"keycast="debug" C:\logs"#.to_string(),
        ..EngineConfig::default()
    };
    config.save_to_file(&path).expect("Failed to save config");

    let loaded = EngineConfig::load_from_file(&path).expect("Failed to load config");
    assert_eq!(loaded.log_level, config.log_level);

    cleanup_test_file(&path);
}
