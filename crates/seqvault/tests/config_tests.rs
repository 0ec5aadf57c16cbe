//! Config loading from disk, defaults, and tuner overrides.

use seqvault::load_config;

#[test]
fn test_load_config_file_with_defaults() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("config.json");
    std::fs::write(&path, r#"{ "data_dir": "/var/lib/seqvault" }"#).unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.max_input_bytes, 50 * 1024 * 1024);
    assert_eq!(config.queue_depth, 64);
    assert_eq!(config.workers, 4);
    assert_eq!(config.ids_threshold, 5);
    assert_eq!(config.stage_deadlines_ms.format, 2_000);
    assert_eq!(config.stage_deadlines_ms.persist, 30_000);
    assert_eq!(config.retention_seconds, 604_800);
}

#[test]
fn test_load_config_missing_file_errors() {
    let tmp = tempfile::TempDir::new().unwrap();
    assert!(load_config(tmp.path().join("absent.json")).is_err());
}

#[test]
fn test_tuner_tuple_overrides_thresholds_and_workers() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("config.json");
    std::fs::write(
        &path,
        r#"{
            "data_dir": "/var/lib/seqvault",
            "ids_threshold": 5,
            "workers": 4,
            "ga_parameters": {
                "ids_threshold": 12,
                "aml_threshold": 0.07,
                "workers": 6
            }
        }"#,
    )
    .unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.ids_threshold, 12);
    assert_eq!(config.workers, 6);
    assert_eq!(config.aml_threshold_override(), Some(0.07));
}

#[test]
fn test_partial_deadline_override() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("config.json");
    std::fs::write(
        &path,
        r#"{
            "data_dir": "/var/lib/seqvault",
            "stage_deadlines_ms": { "ids": 250 }
        }"#,
    )
    .unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.stage_deadlines_ms.ids, 250);
    // Unmentioned stages keep their defaults.
    assert_eq!(config.stage_deadlines_ms.aml, 10_000);
}
