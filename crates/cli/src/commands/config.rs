use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use shopassist_core::config::{AppConfig, LoadOptions};
use toml::Value;

use super::{CommandResult, EXIT_CONFIG};

const COMMAND: &str = "config";

/// One reported setting: dotted key, rendered value, and the env vars that
/// can set it (first match wins for attribution).
struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "config_validation",
                format!("config validation failed: {error}"),
                EXIT_CONFIG,
            );
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec![
        "effective config (source precedence: env > file > default):".to_string(),
    ];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    CommandResult::success(COMMAND, lines.join("\n"))
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_key(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());

    vec![
        Field {
            key: "llm.provider",
            value: format!("{:?}", config.llm.provider),
            env_keys: &["SHOPASSIST_LLM_PROVIDER"],
        },
        Field {
            key: "llm.model",
            value: config.llm.model.clone(),
            env_keys: &["SHOPASSIST_LLM_MODEL"],
        },
        Field {
            key: "llm.base_url",
            value: config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            env_keys: &["SHOPASSIST_LLM_BASE_URL"],
        },
        Field { key: "llm.api_key", value: api_key, env_keys: &["SHOPASSIST_LLM_API_KEY"] },
        Field {
            key: "llm.timeout_secs",
            value: config.llm.timeout_secs.to_string(),
            env_keys: &["SHOPASSIST_LLM_TIMEOUT_SECS"],
        },
        Field {
            key: "llm.max_retries",
            value: config.llm.max_retries.to_string(),
            env_keys: &["SHOPASSIST_LLM_MAX_RETRIES"],
        },
        Field {
            key: "llm.retry_base_delay_ms",
            value: config.llm.retry_base_delay_ms.to_string(),
            env_keys: &["SHOPASSIST_LLM_RETRY_BASE_DELAY_MS"],
        },
        Field {
            key: "llm.max_concurrency",
            value: config.llm.max_concurrency.to_string(),
            env_keys: &["SHOPASSIST_LLM_MAX_CONCURRENCY"],
        },
        Field {
            key: "catalog.path",
            value: config.catalog.path.display().to_string(),
            env_keys: &["SHOPASSIST_CATALOG_PATH"],
        },
        Field {
            key: "matching.shortlist_size",
            value: config.matching.shortlist_size.to_string(),
            env_keys: &["SHOPASSIST_MATCHING_SHORTLIST_SIZE"],
        },
        Field {
            key: "matching.acceptance_threshold",
            value: config.matching.acceptance_threshold.to_string(),
            env_keys: &["SHOPASSIST_MATCHING_ACCEPTANCE_THRESHOLD"],
        },
        Field {
            key: "moderation.fail_mode",
            value: format!("{:?}", config.moderation.fail_mode),
            env_keys: &["SHOPASSIST_MODERATION_FAIL_MODE"],
        },
        Field {
            key: "server.bind_address",
            value: config.server.bind_address.clone(),
            env_keys: &["SHOPASSIST_SERVER_BIND_ADDRESS"],
        },
        Field {
            key: "server.port",
            value: config.server.port.to_string(),
            env_keys: &["SHOPASSIST_SERVER_PORT"],
        },
        Field {
            key: "server.graceful_shutdown_secs",
            value: config.server.graceful_shutdown_secs.to_string(),
            env_keys: &["SHOPASSIST_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        },
        Field {
            key: "server.session_idle_secs",
            value: config.server.session_idle_secs.to_string(),
            env_keys: &["SHOPASSIST_SERVER_SESSION_IDLE_SECS"],
        },
        Field {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["SHOPASSIST_LOGGING_LEVEL", "SHOPASSIST_LOG_LEVEL"],
        },
        Field {
            key: "logging.format",
            value: format!("{:?}", config.logging.format),
            env_keys: &["SHOPASSIST_LOGGING_FORMAT", "SHOPASSIST_LOG_FORMAT"],
        },
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("shopassist.toml"), PathBuf::from("config/shopassist.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps a provider prefix such as `sk-` and hides the rest.
fn redact_key(key: &str) -> String {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
