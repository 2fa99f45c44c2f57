use std::sync::Arc;

use shopassist_agent::oracles::Oracles;
use shopassist_agent::runtime::{ControllerError, ControllerSettings, DialogueController};
use shopassist_core::audit::{AuditEvent, AuditSink};
use shopassist_core::config::{AppConfig, ConfigError};
use shopassist_core::domain::catalog::{Catalog, CatalogError};
use thiserror::Error;
use tracing::info;

use crate::openai::{OpenAiOracle, ProviderError};

pub struct Application {
    pub config: AppConfig,
    pub controller: Arc<DialogueController>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("catalog load failed: {0}")]
    Catalog(#[from] CatalogError),
    #[error("oracle provider setup failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("dialogue controller setup failed: {0}")]
    Controller(#[from] ControllerError),
}

/// Writes audit events to the structured log.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        info!(
            event_name = "audit.event",
            audit_event = %event.event_type,
            audit_id = %event.event_id,
            correlation_id = %event.correlation_id,
            session_id = event.session_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown"),
            actor = %event.actor,
            category = ?event.category,
            outcome = ?event.outcome,
            metadata = ?event.metadata,
            "audit event recorded"
        );
    }
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        session_id = "unknown",
        "starting application bootstrap"
    );
    let adapter = OpenAiOracle::from_config(&config.llm)?;
    info!(
        event_name = "system.bootstrap.oracle_configured",
        correlation_id = "bootstrap",
        session_id = "unknown",
        provider = ?adapter.provider(),
        model = adapter.model(),
        "oracle adapter configured"
    );
    bootstrap_with_oracles(config, Oracles::from_adapter(Arc::new(adapter)))
}

pub fn bootstrap_with_oracles(
    config: AppConfig,
    oracles: Oracles,
) -> Result<Application, BootstrapError> {
    let catalog = Catalog::load_json(&config.catalog.path)?;
    info!(
        event_name = "system.bootstrap.catalog_loaded",
        correlation_id = "bootstrap",
        session_id = "unknown",
        path = %config.catalog.path.display(),
        entries = catalog.len(),
        "catalog loaded"
    );

    let controller = DialogueController::new(
        oracles,
        Arc::new(catalog),
        ControllerSettings::from_config(&config),
        Arc::new(TracingAuditSink),
    )?;

    Ok(Application { config, controller: Arc::new(controller) })
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use shopassist_agent::oracles::Oracles;
    use shopassist_agent::testing::{
        ScriptedClassification, ScriptedCompletion, ScriptedConfirmation, ScriptedExtraction,
        ScriptedModeration,
    };
    use shopassist_core::config::{AppConfig, ConfigOverrides, LoadOptions};
    use tempfile::NamedTempFile;

    use crate::bootstrap::{bootstrap_with_config, bootstrap_with_oracles, BootstrapError};

    fn scripted() -> Oracles {
        Oracles {
            completion: Arc::new(ScriptedCompletion::with_script(Vec::new())),
            moderation: Arc::new(ScriptedModeration::default()),
            confirmation: Arc::new(ScriptedConfirmation::default()),
            extraction: Arc::new(ScriptedExtraction::default()),
            classification: Arc::new(ScriptedClassification::default()),
        }
    }

    fn catalog_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write catalog");
        file
    }

    fn load(catalog: &NamedTempFile) -> AppConfig {
        AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                llm_api_key: Some("sk-test".to_string()),
                catalog_path: Some(catalog.path().to_path_buf()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("config loads")
    }

    #[tokio::test]
    async fn bootstrap_loads_catalog_and_builds_controller() {
        let catalog = catalog_file(
            r#"[
                {"Model Name": "Zephyrus", "Price": "1,40,000", "Description": "RTX 4060"},
                {"id": "ideapad", "name": "IdeaPad", "price": 60000, "description": "i5"}
            ]"#,
        );

        let app = bootstrap_with_oracles(load(&catalog), scripted()).expect("bootstrap");

        assert_eq!(app.controller.catalog().len(), 2);
        assert_eq!(app.controller.catalog().entries()[0].price, 140_000);
        let view = app.controller.open_session().await.expect("session");
        assert_eq!(view.transcript.len(), 1);
    }

    #[test]
    fn bootstrap_fails_on_malformed_catalog() {
        let catalog = catalog_file(r#"[{"description": "i5", "price": "about fifty"}]"#);

        let result = bootstrap_with_oracles(load(&catalog), scripted());

        assert!(matches!(result, Err(BootstrapError::Catalog(_))));
    }

    #[test]
    fn bootstrap_builds_http_adapter_from_config() {
        let catalog = catalog_file(r#"[{"description": "i5", "price": 50000}]"#);

        let app = bootstrap_with_config(load(&catalog)).expect("bootstrap");

        assert_eq!(app.config.llm.model, "gpt-3.5-turbo");
    }
}
