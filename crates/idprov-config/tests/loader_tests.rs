//! ConfigLoader Tests
//!
//! File discovery and environment overrides, with the environment supplied
//! through a lookup closure so tests never touch process state.

use std::collections::HashMap;
use std::io::Write;

use idprov_config::{Backend, ConfigLoader};
use tempfile::NamedTempFile;

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_from_explicit_file() {
    let file = write_config(
        r#"
        backend = "http"

        [credentials]
        base_url = "https://auth.example.com"
        service_key = "svc-key"
        page_size = 50

        [records]
        base_url = "https://db.example.com"
        service_key = "svc-key"
        roles_table = "roles"
        "#,
    );

    let config = ConfigLoader::with_path(file.path())
        .load_with(env_of(&[]))
        .unwrap();

    assert_eq!(config.backend, Backend::Http);
    assert_eq!(config.credentials.base_url, "https://auth.example.com");
    assert_eq!(config.credentials.page_size, 50);
    assert_eq!(config.records.roles_table, "roles");
    assert_eq!(config.records.profiles_table, "profiles");
    assert!(config.validate().is_ok());
}

#[test]
fn test_env_overrides_file_values() {
    let file = write_config(
        r#"
        [reconcile]
        poll_attempts = 3
        default_role = "agent"
        "#,
    );

    let config = ConfigLoader::with_path(file.path())
        .load_with(env_of(&[
            ("IDPROV_BACKEND", "memory"),
            ("IDPROV_POLL_ATTEMPTS", "8"),
            ("IDPROV_DEFAULT_ROLE", "admin"),
            ("IDPROV_CONFIRM_ON_CREATE", "false"),
        ]))
        .unwrap();

    assert_eq!(config.backend, Backend::Memory);
    assert_eq!(config.reconcile.poll_attempts, 8);
    assert_eq!(config.reconcile.default_role, "admin");
    assert!(!config.reconcile.confirm_on_create);
}

#[test]
fn test_invalid_override_values_are_ignored() {
    let file = write_config("");

    let config = ConfigLoader::with_path(file.path())
        .load_with(env_of(&[
            ("IDPROV_BACKEND", "mongo"),
            ("IDPROV_POLL_ATTEMPTS", "many"),
        ]))
        .unwrap();

    assert_eq!(config.backend, Backend::Http);
    assert_eq!(config.reconcile.poll_attempts, 5);
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let result = ConfigLoader::with_path("/nonexistent/idprov.toml").load_with(env_of(&[]));
    assert!(result.is_err());
}

#[test]
fn test_config_env_var_points_at_file() {
    let file = write_config(
        r#"
        backend = "memory"
        "#,
    );
    let path = file.path().to_string_lossy().to_string();

    let config = ConfigLoader::new()
        .load_with(env_of(&[("IDPROV_CONFIG", path.as_str())]))
        .unwrap();

    assert_eq!(config.backend, Backend::Memory);
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let file = write_config("backend = [unclosed");
    let result = ConfigLoader::with_path(file.path()).load_with(env_of(&[]));
    assert!(matches!(result, Err(idprov_config::ConfigError::ParseError(_))));
}
