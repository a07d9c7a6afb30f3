//! Integration tests for the Config::load_with pipeline: TOML file, `${VAR}`
//! expansion, environment overrides, then a running router.

use std::collections::HashMap;
use std::io::Write;

use axum::body::Body;
use http::Request;
use serde_json::Value;
use tower::ServiceExt;

use llm_relay::config::{Config, ConfigError, KeySource, RelayMode};
use llm_relay::proxy::{create_router, AppState};

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp config");
    file.write_all(content.as_bytes()).expect("write temp config");
    file
}

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name: &str| map.get(name).cloned()
}

#[test]
fn test_file_keys_expand_from_environment() {
    let file = write_config(
        r#"
[server]
listen = "127.0.0.1:19876"

[providers.openrouter]
api_keys = ["${RELAY_TEST_OR_KEY}"]

[providers.google]
api_keys = ["literal-gemini-key"]
"#,
    );

    let config =
        Config::load_with(Some(file.path()), env(&[("RELAY_TEST_OR_KEY", "or-expanded")])).unwrap();

    assert_eq!(config.server.listen, "127.0.0.1:19876");
    assert_eq!(
        config.providers.openrouter.api_keys[0].expose_secret(),
        "or-expanded"
    );
    assert_eq!(config.providers.openrouter.key_source, KeySource::EnvExpanded);
    assert_eq!(config.providers.google.key_source, KeySource::Literal);
}

#[test]
fn test_missing_variable_names_var_and_provider() {
    let file = write_config(
        r#"
[providers.google]
api_keys = ["${RELAY_TEST_MISSING}"]
"#,
    );

    let err = Config::load_with(Some(file.path()), env(&[])).unwrap_err();
    match err {
        ConfigError::EnvVar { var, provider, .. } => {
            assert_eq!(var, "RELAY_TEST_MISSING");
            assert_eq!(provider, "google");
        }
        other => panic!("expected EnvVar error, got {:?}", other),
    }
}

#[test]
fn test_environment_overrides_file() {
    let file = write_config(
        r#"
[server]
listen = "127.0.0.1:19877"
timeout_ms = 5000
mode = "buffered"

[providers.google]
api_keys = ["file-key"]
"#,
    );

    let config = Config::load_with(
        Some(file.path()),
        env(&[
            ("PORT", "8080"),
            ("API_TIMEOUT_MS", "1500"),
            ("RELAY_MODE", "streaming"),
            ("GEMINI_KEYS", "env-one, env-two,,"),
        ]),
    )
    .unwrap();

    assert_eq!(config.server.listen, "0.0.0.0:8080");
    assert_eq!(config.server.timeout_ms, 1500);
    assert_eq!(config.server.mode, RelayMode::Streaming);
    assert_eq!(config.providers.google.api_keys.len(), 2);
    assert_eq!(
        config.providers.google.key_source,
        KeySource::Environment("GEMINI_KEYS".to_string())
    );
}

#[test]
fn test_malformed_file_is_parse_error() {
    let file = write_config("[server\nlisten = ");
    let err = Config::load_with(Some(file.path()), env(&[])).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[tokio::test]
async fn test_loaded_config_drives_router() {
    let file = write_config(
        r#"
[server]
rate_limit_per_minute = 0

[providers.openrouter]
api_keys = ["${RELAY_TEST_POOL}"]
"#,
    );
    let config = Config::load_with(
        Some(file.path()),
        env(&[("RELAY_TEST_POOL", "sk-or-aaaa1111,sk-or-bbbb2222")]),
    )
    .unwrap();

    let app = create_router(AppState::new(config, reqwest::Client::new()).unwrap());
    let response = app
        .oneshot(Request::get("/test-env").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(body["providers"]["openrouter"]["count"], 2);
    assert_eq!(body["providers"]["openrouter"]["source"], "env-expanded");
    assert_eq!(body["providers"]["google"]["configured"], false);
}
