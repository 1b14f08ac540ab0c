//! Coverage for credential loading and permission checks.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use mailcast::credentials::{
    enforce_private_file_permissions, load_credentials, load_optional_credentials, Credentials,
};

fn temp_env_path() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("mailcast_test_{}", uuid::Uuid::new_v4()));
    let create = fs::create_dir_all(&dir);
    assert!(create.is_ok());
    dir.join(".env")
}

#[test]
fn loads_env_credentials() {
    let env_path = temp_env_path();
    let write = fs::write(&env_path, "RELAY_A_KEY=abc123\nRELAY_B_KEY=def456\n");
    assert!(write.is_ok());
    assert!(enforce_private_file_permissions(&env_path).is_ok());

    let credentials = match load_credentials(&env_path) {
        Ok(credentials) => credentials,
        Err(err) => panic!("credentials should load: {err}"),
    };

    assert_eq!(credentials.get("RELAY_A_KEY"), Some("abc123"));
    assert_eq!(credentials.get("RELAY_B_KEY"), Some("def456"));
    assert_eq!(credentials.len(), 2);
}

#[cfg(unix)]
#[test]
fn rejects_world_readable_env_file() {
    use std::os::unix::fs::PermissionsExt;

    let env_path = temp_env_path();
    assert!(fs::write(&env_path, "RELAY_A_KEY=abc123\n").is_ok());
    assert!(fs::set_permissions(&env_path, fs::Permissions::from_mode(0o644)).is_ok());

    assert!(load_credentials(&env_path).is_err());
    assert!(load_optional_credentials(&env_path).is_err());
}

#[test]
fn missing_file_is_an_error_unless_optional() {
    let env_path = temp_env_path();
    assert!(load_credentials(&env_path).is_err());

    let empty = load_optional_credentials(&env_path).expect("optional load");
    assert!(empty.is_empty());
}

#[test]
fn require_reports_missing_keys() {
    let credentials = Credentials::from_map(BTreeMap::from([(
        "RELAY_A_KEY".to_owned(),
        "abc123".to_owned(),
    )]));
    assert_eq!(credentials.require("RELAY_A_KEY").expect("present"), "abc123");
    assert!(credentials.require("RELAY_B_KEY").is_err());
}

#[test]
fn debug_output_is_redacted() {
    let credentials = Credentials::from_map(BTreeMap::from([(
        "RELAY_A_KEY".to_owned(),
        "super-secret-value".to_owned(),
    )]));
    let debug = format!("{credentials:?}");
    assert!(debug.contains("RELAY_A_KEY"));
    assert!(!debug.contains("super-secret-value"));
}
