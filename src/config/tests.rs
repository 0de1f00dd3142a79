//! Config module tests

use super::*;

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("TEST_STORAGE_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${TEST_STORAGE_VAR_SIMPLE}\"");
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("TEST_STORAGE_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    // Unset var should use default
    std::env::remove_var("TEST_STORAGE_VAR_UNSET");
    let result = substitute_env_vars("path = \"${TEST_STORAGE_VAR_UNSET:-/var/lib/vibemq}\"");
    assert_eq!(result, "path = \"/var/lib/vibemq\"");

    // Set var should use env value
    std::env::set_var("TEST_STORAGE_VAR_SET", "/srv/sessions");
    let result = substitute_env_vars("path = \"${TEST_STORAGE_VAR_SET:-/var/lib/vibemq}\"");
    assert_eq!(result, "path = \"/srv/sessions\"");
    std::env::remove_var("TEST_STORAGE_VAR_SET");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    std::env::remove_var("TEST_STORAGE_VAR_MISSING");
    let result = substitute_env_vars("value = \"${TEST_STORAGE_VAR_MISSING}\"");
    assert_eq!(result, "value = \"\"");
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.log.level, "info");
    assert_eq!(config.storage.bucket_count, 4096);
    assert!(config.storage.path.is_none());
}

#[test]
fn test_parse_storage_section() {
    let config = Config::parse(
        r#"
[log]
level = "debug"

[storage]
path = "/tmp/t"
bucket_count = 16
"#,
    )
    .unwrap();

    assert_eq!(config.log.level, "debug");
    assert_eq!(config.storage.path, Some(PathBuf::from("/tmp/t")));
    assert_eq!(config.storage.bucket_count, 16);

    let root = config.storage.resolve_root();
    assert_eq!(root.path(), Path::new("/tmp/t"));
    assert_eq!(root.bucket_count(), 16);
}

#[test]
fn test_parse_partial_storage_section_keeps_defaults() {
    let config = Config::parse("[storage]\npath = \"/data\"\n").unwrap();
    assert_eq!(config.storage.bucket_count, DEFAULT_BUCKET_COUNT);
}

#[test]
fn test_zero_bucket_count_rejected() {
    let result = Config::parse("[storage]\nbucket_count = 0\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_empty_path_rejected() {
    let result = Config::parse("[storage]\npath = \"\"\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_override_with_zero_buckets_rejected() {
    let mut config = Config::parse("[storage]\nbucket_count = 64\n").unwrap();
    config.storage.bucket_count = 0;
    assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
}

#[test]
fn test_unknown_log_level_rejected() {
    let result = Config::parse("[log]\nlevel = \"loud\"\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_resolve_root_without_path_uses_default_location() {
    let config = StorageConfig {
        path: None,
        bucket_count: 64,
    };
    let root = config.resolve_root();
    assert!(root.path().ends_with(crate::storage::STORAGE_DIR_NAME));
    assert_eq!(root.bucket_count(), 64);
}

#[test]
fn test_load_config_with_env_substitution() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("storage.toml");

    std::env::set_var("TEST_STORAGE_ROOT", "/srv/vibemq");

    let config_content = r#"
[storage]
path = "${TEST_STORAGE_ROOT}/sessions"
bucket_count = ${TEST_STORAGE_BUCKETS:-256}
"#;

    std::fs::write(&config_path, config_content).unwrap();

    let config = Config::load(&config_path).unwrap();
    assert_eq!(
        config.storage.path,
        Some(PathBuf::from("/srv/vibemq/sessions"))
    );
    assert_eq!(config.storage.bucket_count, 256); // Uses default

    std::env::remove_var("TEST_STORAGE_ROOT");
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = Config::load(temp_dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.storage.bucket_count, DEFAULT_BUCKET_COUNT);
}
