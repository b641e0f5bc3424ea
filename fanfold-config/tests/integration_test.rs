//! Integration tests for fanfold-config

use fanfold_config::*;
use std::io::Write;
use std::time::Duration;
use temp_env::with_vars;

#[test]
fn test_default_config_validation() {
    let config = FanfoldConfig::default();
    assert!(config.validate_all().is_ok());
}

#[test]
fn test_config_loader_from_env() {
    let vars = vec![
        ("FANFOLD_WORKERS", Some("6")),
        ("FANFOLD_BATCH_SIZE", Some("25")),
        ("FANFOLD_CHUNK_SIZE", Some("4096")),
        ("FANFOLD_POLL_INTERVAL_MS", Some("20")),
        ("FANFOLD_DISPATCH", Some("shared")),
        ("FANFOLD_MAPPER_QUEUE_CAPACITY", Some("100")),
        ("FANFOLD_REDUCER_QUEUE_CAPACITY", Some("50")),
        ("FANFOLD_LOG_LEVEL", Some("debug")),
        ("FANFOLD_LOG_FORMAT", Some("json")),
    ];

    with_vars(vars, || {
        let loader = ConfigLoader::new();
        let config = loader.from_env().unwrap();

        assert_eq!(config.pool.worker_count, 6);
        assert_eq!(config.map_reduce.worker_count, 6);
        assert_eq!(config.pool.batch_size, 25);
        assert_eq!(config.transport.chunk_size, 4096);
        assert_eq!(config.pool.poll_interval, Duration::from_millis(20));
        assert_eq!(config.map_reduce.poll_interval, Duration::from_millis(20));
        assert_eq!(config.pool.dispatch, DispatchPolicy::SharedQueue);
        assert_eq!(config.map_reduce.mapper_queue_capacity, 100);
        assert_eq!(config.map_reduce.reducer_queue_capacity, 50);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
    });
}

#[test]
fn test_invalid_env_value_is_reported() {
    with_vars(vec![("FANFOLD_WORKERS", Some("many"))], || {
        let err = ConfigLoader::new().from_env().unwrap_err();
        assert!(matches!(err, ConfigError::EnvError(ref msg) if msg.contains("WORKERS")));
    });
}

#[test]
fn test_env_override_is_validated() {
    with_vars(vec![("FANFOLD_BATCH_SIZE", Some("0"))], || {
        let err = ConfigLoader::new().from_env().unwrap_err();
        assert!(matches!(err, ConfigError::DomainError { ref domain, .. } if domain == "pool"));
    });
}

#[test]
fn test_yaml_config_serialization() {
    let config = FanfoldConfig::default();
    let yaml = serde_yaml::to_string(&config).unwrap();

    let parsed: FanfoldConfig = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_comprehensive_config() {
    let yaml = r#"
transport:
  chunk_size: 65536

pool:
  worker_count: 8
  batch_size: 10
  queue_capacity: 4
  collector_queue_capacity: 16
  dispatch: shared_queue
  poll_interval: 50

map_reduce:
  worker_count: 3
  mapper_queue_capacity: 1000
  reducer_queue_capacity: 0
  poll_interval: 200

logging:
  level: warn
  format: compact
  include_thread_names: true
"#;

    let config: FanfoldConfig = serde_yaml::from_str(yaml).unwrap();
    assert!(config.validate_all().is_ok());

    assert_eq!(config.transport.chunk_size, 65536);
    assert_eq!(config.pool.worker_count, 8);
    assert_eq!(config.pool.shared_queue_capacity(), 32);
    assert_eq!(config.pool.dispatch, DispatchPolicy::SharedQueue);
    assert_eq!(config.pool.poll_interval, Duration::from_millis(50));
    assert_eq!(config.map_reduce.worker_count, 3);
    assert_eq!(config.map_reduce.poll_interval, Duration::from_millis(200));
    assert_eq!(config.logging.level, LogLevel::Warn);
    assert_eq!(config.logging.format, LogFormat::Compact);
    assert!(config.logging.include_thread_names);
}

#[test]
fn test_partial_config_uses_defaults() {
    let config: FanfoldConfig = serde_yaml::from_str("pool:\n  batch_size: 7\n").unwrap();
    assert_eq!(config.pool.batch_size, 7);
    assert_eq!(config.pool.queue_capacity, 0);
    assert_eq!(config.map_reduce, MapReduceConfig::default());
}

#[test]
fn test_validation_errors() {
    let mut config = FanfoldConfig::default();
    config.transport.chunk_size = 0;
    assert!(config.validate_all().is_err());

    config = FanfoldConfig::default();
    config.map_reduce.worker_count = 0;
    assert!(config.validate_all().is_err());

    config = FanfoldConfig::default();
    config.pool.poll_interval = Duration::from_millis(0);
    assert!(config.validate_all().is_err());
}

#[test]
fn test_custom_prefix_loader() {
    let vars = vec![("CUSTOM_WORKERS", Some("2")), ("CUSTOM_CHUNK_SIZE", Some("128"))];

    with_vars(vars, || {
        let loader = ConfigLoader::with_prefix("CUSTOM");
        let config = loader.from_env().unwrap();

        assert_eq!(config.pool.worker_count, 2);
        assert_eq!(config.transport.chunk_size, 128);
    });
}

#[test]
fn test_load_from_file_with_env_override() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "pool:\n  worker_count: 3\n  batch_size: 5").unwrap();

    with_vars(vec![("FANFOLD_BATCH_SIZE", Some("9"))], || {
        let config = ConfigLoader::new().load(Some(file.path())).unwrap();
        assert_eq!(config.pool.worker_count, 3);
        assert_eq!(config.pool.batch_size, 9);
    });
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = ConfigLoader::new()
        .from_file(dir.path().join("missing.yaml"))
        .unwrap_err();
    assert!(matches!(err, ConfigError::FileReadError(_)));
}

#[test]
fn test_generate_sample_config() {
    let sample = FanfoldConfig::generate_sample();
    assert!(sample.contains("transport:"));
    assert!(sample.contains("pool:"));
    assert!(sample.contains("map_reduce:"));
    assert!(sample.contains("logging:"));

    let parsed: FanfoldConfig = serde_yaml::from_str(&sample).unwrap();
    assert!(parsed.validate_all().is_ok());
}
