use std::{env, fs};

use octofhir_ingest::ImportMode;
use octofhir_ingest::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("octofhir-ingest.toml");

    let toml_content = r#"
[import]
batch_size = 250
mode = "initial-load"

[bundle]
enabled = false

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.import.batch_size, 250);
    assert_eq!(cfg.import.mode, ImportMode::InitialLoad);
    assert!(!cfg.bundle.enabled);
    assert_eq!(cfg.logging.level, "debug");

    // 2) Env override should win over file
    unsafe {
        env::set_var("OCTOFHIR_INGEST__IMPORT__BATCH_SIZE", "500");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.import.batch_size, 500);
    unsafe {
        env::remove_var("OCTOFHIR_INGEST__IMPORT__BATCH_SIZE");
    }

    // 3) Invalid config should error
    let invalid_path = dir.path().join("invalid.toml");
    fs::write(&invalid_path, "[import]\nbatch_size = 0\n").expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("batch_size must be > 0"));
}
