// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&dir.path().join("nope.json")).unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.general.instance_limit, 10);
    assert_eq!(config.session.bridge_port, 5580);
}

#[test]
fn sections_parse_with_pascal_case_names() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        serde_json::json!({
            "General": {
                "InstanceLimit": 3,
                "ValidInstancePaths": ["/srv/instances"]
            },
            "FileLogging": { "Directory": "/var/log/warden", "LogLevel": "debug" },
            "Database": { "Path": "/var/lib/warden/state.json" },
            "ControlPanel": { "Enable": true, "Port": 8080 },
            "Session": { "BridgePort": 9999 }
        })
        .to_string(),
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.general.instance_limit, 3);
    assert_eq!(
        config.general.valid_instance_paths,
        Some(vec![PathBuf::from("/srv/instances")])
    );
    assert_eq!(config.file_logging.log_level, "debug");
    assert_eq!(config.database.path, Some(PathBuf::from("/var/lib/warden/state.json")));
    assert!(config.control_panel.enable);
    assert_eq!(config.control_panel.port, 8080);
    assert_eq!(config.session.bridge_port, 9999);
}

#[test]
fn unknown_sections_fail_loudly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, br#"{"General": {"InstanceLimit": "many"}}"#).unwrap();
    assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
}

#[test]
fn empty_object_is_a_full_default() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, b"{}").unwrap();
    assert_eq!(Config::load(&path).unwrap(), Config::default());
}
