//! JSON shape of configuration and statistics.
#![cfg(feature = "serde")]

use std::time::Duration;

use nebula_pool::{Error, PoolConfig, PoolStats};

#[test]
fn config_survives_json() {
    let config = PoolConfig::default()
        .with_size(16)
        .with_bind_to_task(true)
        .with_idle_timeout(None)
        .with_leak_detection_threshold(Some(Duration::from_secs(5)));

    let json = serde_json::to_string(&config).unwrap();
    let back: PoolConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
}

#[test]
fn partial_json_keeps_defaults() {
    let config = PoolConfig::from_json(r#"{ "size": 3, "auto_return": false }"#).unwrap();
    assert_eq!(config.size, 3);
    assert!(!config.auto_return);
    assert_eq!(config.borrowing_timeout, PoolConfig::default().borrowing_timeout);
}

#[test]
fn invalid_json_config_is_a_configuration_error() {
    let err = PoolConfig::from_json(r#"{ "size": 0 }"#).unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));

    let err = PoolConfig::from_json("not json").unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
}

#[test]
fn stats_serialize_with_metrics() {
    let stats = PoolStats {
        size: 4,
        live: 2,
        idle: 1,
        leased: 1,
        ..PoolStats::default()
    };
    let value = serde_json::to_value(&stats).unwrap();
    assert_eq!(value["live"], 2);
    assert_eq!(value["metrics"]["borrowed_total"], 0);

    let back: PoolStats = serde_json::from_value(value).unwrap();
    assert_eq!(back, stats);
}
