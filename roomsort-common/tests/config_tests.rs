//! Configuration precedence tests
//!
//! Environment-mutating tests are serialized; they share process env.

use roomsort_common::config::{TomlConfig, ENV_BIND, ENV_DATABASE, ENV_FALLBACK_API_KEY};
use serial_test::serial;
use std::io::Write;
use std::path::PathBuf;

fn clear_env() {
    std::env::remove_var(ENV_DATABASE);
    std::env::remove_var(ENV_BIND);
    std::env::remove_var(ENV_FALLBACK_API_KEY);
}

#[test]
#[serial]
fn test_missing_file_yields_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = TomlConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();

    assert_eq!(config.rate_limits.requests_per_minute, 300);
    assert_eq!(config.resolved_bind_address(), "127.0.0.1:5780");
    assert!(config.fallback_tier.api_key.is_none());
}

#[test]
#[serial]
fn test_file_values_are_loaded() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roomsort.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
        file,
        r#"
database_path = "/tmp/from-file.db"
bind_address = "0.0.0.0:9000"

[reconciler]
max_starts = 5
"#
    )
    .unwrap();

    let config = TomlConfig::load(Some(&path)).unwrap();
    assert_eq!(config.resolved_database_path(), PathBuf::from("/tmp/from-file.db"));
    assert_eq!(config.resolved_bind_address(), "0.0.0.0:9000");
    assert_eq!(config.reconciler.max_starts, 5);
    assert_eq!(config.reconciler.lookback_days, 3);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roomsort.toml");
    std::fs::write(&path, "bind_address = \"0.0.0.0:9000\"\n").unwrap();

    std::env::set_var(ENV_BIND, "127.0.0.1:7000");
    std::env::set_var(ENV_FALLBACK_API_KEY, "sk-test");
    let config = TomlConfig::load(Some(&path)).unwrap();
    clear_env();

    assert_eq!(config.resolved_bind_address(), "127.0.0.1:7000");
    assert_eq!(config.fallback_tier.api_key.as_deref(), Some("sk-test"));
}

#[test]
#[serial]
fn test_blank_environment_value_is_ignored() {
    clear_env();
    std::env::set_var(ENV_DATABASE, "   ");
    let mut config = TomlConfig::default();
    config.apply_env_overrides();
    clear_env();

    assert!(config.database_path.is_none());
}
