use headless_common::config::{ensure_config_exists, Config};
use headless_common::error::ErrorCategory;
use headless_common::logging::LogLevel;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_default_config() {
    let config = Config::default();

    assert_eq!(config.locks.send_tx_timeout_ms, 120_000);
    assert_eq!(config.locks.hsm_timeout_ms, 120_000);
    assert_eq!(config.reservation.proposal_ttl_ms, 300_000);
    assert_eq!(config.reservation.send_ttl_ms, None);
    assert_eq!(config.logging.level, LogLevel::Info);
    assert!(config.validate().is_ok());

    let timeouts = config.lock_timeouts();
    assert_eq!(timeouts.send_tx, Duration::from_secs(120));
    assert_eq!(timeouts.hsm, Duration::from_secs(120));

    let policy = config.reservation_policy();
    assert_eq!(policy.send_ttl, None);
    assert_eq!(policy.proposal_ttl, Some(Duration::from_secs(300)));
}

#[test]
fn test_partial_config_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        "[locks]\nhsm_timeout_ms = 30000\n\n[reservation]\nsend_ttl_ms = 60000\n",
    )
    .unwrap();

    let config = Config::load(config_path.to_str().unwrap()).unwrap();

    assert_eq!(config.locks.send_tx_timeout_ms, 120_000);
    assert_eq!(config.locks.hsm_timeout_ms, 30_000);
    assert_eq!(config.reservation.proposal_ttl_ms, 300_000);
    assert_eq!(
        config.reservation_policy().send_ttl,
        Some(Duration::from_secs(60))
    );
    assert_eq!(config.lock_timeouts().hsm, Duration::from_secs(30));
}

#[test]
fn test_save_and_load() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let path = config_path.to_str().unwrap();

    let mut config = Config::default();
    config.locks.send_tx_timeout_ms = 45_000;
    config.reservation.send_ttl_ms = Some(600_000);
    config.logging.level = LogLevel::Debug;
    config.save(path).unwrap();

    let loaded = Config::load(path).unwrap();
    assert_eq!(loaded.locks.send_tx_timeout_ms, 45_000);
    assert_eq!(loaded.reservation.send_ttl_ms, Some(600_000));
    assert_eq!(loaded.logging.level, LogLevel::Debug);
}

#[test]
fn test_validation_rejects_zero_durations() {
    let mut config = Config::default();
    config.locks.send_tx_timeout_ms = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.locks.hsm_timeout_ms = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.reservation.proposal_ttl_ms = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.reservation.send_ttl_ms = Some(0);
    let err = config.validate().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Config);
    assert!(err.to_string().contains("send TTL"));
}

#[test]
fn test_load_errors() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("missing.toml");
    let err = Config::load(missing.to_str().unwrap()).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Io);
    assert!(err.to_string().contains("Failed to read config file"));
    assert!(std::error::Error::source(&err).is_some());

    let invalid = temp_dir.path().join("invalid.toml");
    fs::write(&invalid, "[locks]\nsend_tx_timeout_ms = \"soon\"\n").unwrap();
    let err = Config::load(invalid.to_str().unwrap()).unwrap_err();
    eprintln!("Parse error: {}", err);
    assert_eq!(err.category(), ErrorCategory::Config);
    assert!(err.to_string().contains("Failed to parse config file"));

    let unwritable = temp_dir.path().join("no-such-dir").join("config.toml");
    let err = Config::default()
        .save(unwritable.to_str().unwrap())
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Io);
}

#[test]
fn test_ensure_config_exists() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("nested").join("dir").join("config.toml");

    ensure_config_exists(&config_path).unwrap();
    assert!(config_path.exists());

    let config = Config::load(config_path.to_str().unwrap()).unwrap();
    assert_eq!(config.locks.send_tx_timeout_ms, 120_000);

    // An existing file is left alone
    fs::write(&config_path, "[locks]\nsend_tx_timeout_ms = 1000\n").unwrap();
    ensure_config_exists(&config_path).unwrap();
    let config = Config::load(config_path.to_str().unwrap()).unwrap();
    assert_eq!(config.locks.send_tx_timeout_ms, 1000);
}
