use std::env;
use std::io::Write;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use shopassist_cli::commands::{catalog, config, doctor};
use tempfile::NamedTempFile;

const CATALOG: &str = r#"[
    {"Model Name": "ROG Zephyrus G14", "Price": "1,40,000", "Description": "RTX 4060, 32GB"},
    {"id": "ideapad", "name": "IdeaPad Slim 3", "price": 60000, "description": "i5, 16GB"}
]"#;

#[test]
fn config_reports_sources_and_redacts_api_key() {
    with_env(
        &[("SHOPASSIST_LLM_API_KEY", "sk-very-secret"), ("SHOPASSIST_LLM_MODEL", "gpt-4o-mini")],
        || {
            let result = config::run();
            assert_eq!(result.exit_code, 0, "expected config to load");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "config");
            assert_eq!(payload["status"], "ok");

            let message = payload["message"].as_str().unwrap_or_default();
            assert!(message
                .contains("- llm.model = gpt-4o-mini (source: env (SHOPASSIST_LLM_MODEL))"));
            assert!(message.contains("- llm.api_key = sk-*** (source: env (SHOPASSIST_LLM_API_KEY))"));
            assert!(message.contains("- server.port = 5001 (source: default)"));
            assert!(message.contains("- server.session_idle_secs = 1800 (source: default)"));
            assert!(!message.contains("very-secret"));
        },
    );
}

#[test]
fn config_returns_validation_failure_without_api_key() {
    with_env(&[], || {
        let result = config::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "config");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn doctor_passes_with_valid_config_and_catalog() {
    let catalog = catalog_file(CATALOG);
    let catalog_path = catalog.path().display().to_string();
    with_env(
        &[("SHOPASSIST_LLM_API_KEY", "sk-test"), ("SHOPASSIST_CATALOG_PATH", &catalog_path)],
        || {
            let result = doctor::run(true);
            assert_eq!(result.exit_code, 0, "expected all checks to pass: {}", result.output);

            let report = parse_payload(&result.output);
            assert_eq!(report["overall_status"], "pass");
            let checks = report["checks"].as_array().cloned().unwrap_or_default();
            assert_eq!(checks.len(), 3);
            assert!(checks.iter().all(|check| check["status"] == "pass"));
            assert!(checks[2]["details"].as_str().unwrap_or_default().contains("loaded 2 entries"));
        },
    );
}

#[test]
fn doctor_fails_when_catalog_is_missing() {
    with_env(
        &[
            ("SHOPASSIST_LLM_API_KEY", "sk-test"),
            ("SHOPASSIST_CATALOG_PATH", "/definitely/not/here/catalog.json"),
        ],
        || {
            let result = doctor::run(false);
            assert_eq!(result.exit_code, 1);
            assert!(result.output.starts_with("doctor: one or more readiness checks failed"));
            assert!(result.output.contains("- [ok] config_validation"));
            assert!(result.output.contains("- [fail] catalog_load"));
        },
    );
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1);

        let report = parse_payload(&result.output);
        assert_eq!(report["overall_status"], "fail");
        assert_eq!(report["checks"][0]["status"], "fail");
        assert_eq!(report["checks"][1]["status"], "skipped");
        assert_eq!(report["checks"][2]["status"], "skipped");
    });
}

#[test]
fn catalog_prints_normalized_entries_for_an_explicit_path() {
    let file = catalog_file(CATALOG);
    with_env(&[], || {
        let result = catalog::run(Some(file.path()));
        assert_eq!(result.exit_code, 0, "explicit path needs no credentials");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "catalog");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["data"][0]["id"], "row-1");
        assert_eq!(payload["data"][0]["name"], "ROG Zephyrus G14");
        assert_eq!(payload["data"][0]["price"], 140000);
        assert_eq!(payload["data"][1]["id"], "ideapad");
    });
}

#[test]
fn catalog_rejects_unparsable_prices() {
    let file = catalog_file(r#"[{"description": "i3, 8GB", "price": "call us"}]"#);
    with_env(&[], || {
        let result = catalog::run(Some(file.path()));
        assert_eq!(result.exit_code, 3);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "catalog_invalid");
        assert!(payload["message"].as_str().unwrap_or_default().contains("row 1"));
    });
}

fn catalog_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp catalog");
    file.write_all(contents.as_bytes()).expect("write catalog");
    file
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "SHOPASSIST_LLM_PROVIDER",
        "SHOPASSIST_LLM_API_KEY",
        "SHOPASSIST_LLM_BASE_URL",
        "SHOPASSIST_LLM_MODEL",
        "SHOPASSIST_LLM_TIMEOUT_SECS",
        "SHOPASSIST_LLM_MAX_RETRIES",
        "SHOPASSIST_LLM_RETRY_BASE_DELAY_MS",
        "SHOPASSIST_LLM_MAX_CONCURRENCY",
        "SHOPASSIST_CATALOG_PATH",
        "SHOPASSIST_MATCHING_SHORTLIST_SIZE",
        "SHOPASSIST_MATCHING_ACCEPTANCE_THRESHOLD",
        "SHOPASSIST_MODERATION_FAIL_MODE",
        "SHOPASSIST_SERVER_BIND_ADDRESS",
        "SHOPASSIST_SERVER_PORT",
        "SHOPASSIST_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "SHOPASSIST_SERVER_SESSION_IDLE_SECS",
        "SHOPASSIST_LOGGING_LEVEL",
        "SHOPASSIST_LOGGING_FORMAT",
        "SHOPASSIST_LOG_LEVEL",
        "SHOPASSIST_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
