use std::sync::Arc;

use serde_json::{json, Value};
use shopassist_core::domain::requirement::{
    Attribute, Level, RequirementProfile, ValidationError, BUDGET_KEY, MIN_BUDGET,
};
use shopassist_core::errors::FailureKind;
use thiserror::Error;
use tracing::{debug, info};

use crate::oracles::{ExtractionOracle, OracleError};
use crate::retry::RetryPolicy;

/// Name under which the requirement schema is offered for function calling.
pub const REQUIREMENT_FUNCTION_NAME: &str = "extract_user_info";

/// JSON Schema for the structured requirement record: five ordinal fields
/// plus an integer budget with a floor.
pub fn requirement_schema() -> Value {
    let mut properties = serde_json::Map::new();
    for attribute in Attribute::ALL {
        properties.insert(
            attribute.record_key().to_string(),
            json!({
                "type": "string",
                "enum": Level::ALL.iter().map(|level| level.as_str()).collect::<Vec<_>>(),
                "description": format!("Required {} level", attribute.label()),
            }),
        );
    }
    properties.insert(
        BUDGET_KEY.to_string(),
        json!({
            "type": "integer",
            "minimum": MIN_BUDGET,
            "description": "Maximum budget in whole currency units",
        }),
    );

    let mut required =
        Attribute::ALL.iter().map(|attribute| attribute.record_key()).collect::<Vec<_>>();
    required.push(BUDGET_KEY);

    json!({
        "name": REQUIREMENT_FUNCTION_NAME,
        "description": "Extract laptop requirements from the conversation summary",
        "parameters": {
            "type": "object",
            "required": required,
            "properties": properties,
        },
    })
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

impl NormalizeError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Invalid(error) if error.budget_below_minimum().is_some() => {
                FailureKind::BudgetBelowMinimum
            }
            Self::Invalid(_) => FailureKind::SchemaValidationFailed,
            Self::Oracle(error) => error.failure_kind(),
        }
    }
}

/// Turns the assistant's closing summary into a validated requirement
/// profile. Never fills in a value the extraction did not produce.
#[derive(Clone)]
pub struct RequirementNormalizer {
    oracle: Arc<dyn ExtractionOracle>,
    retry: RetryPolicy,
    schema: Value,
}

impl RequirementNormalizer {
    pub fn new(oracle: Arc<dyn ExtractionOracle>, retry: RetryPolicy) -> Self {
        Self { oracle, retry, schema: requirement_schema() }
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub async fn normalize(
        &self,
        summary_text: &str,
        correlation_id: &str,
    ) -> Result<RequirementProfile, NormalizeError> {
        let oracle = &self.oracle;
        let schema = &self.schema;
        let record = self
            .retry
            .run("extraction", move || oracle.extract(summary_text, schema))
            .await?;

        match RequirementProfile::from_record(&record) {
            Ok(profile) => {
                info!(
                    event_name = "requirements.normalized",
                    correlation_id,
                    budget = profile.budget(),
                    "requirement profile validated"
                );
                Ok(profile)
            }
            Err(error) => {
                debug!(
                    event_name = "requirements.rejected",
                    correlation_id,
                    missing = ?error.missing_fields,
                    invalid = error.invalid_fields.len(),
                    "extracted record failed validation"
                );
                Err(error.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use shopassist_core::domain::requirement::{Attribute, Level, MIN_BUDGET};
    use shopassist_core::errors::FailureKind;

    use super::{requirement_schema, NormalizeError, RequirementNormalizer};
    use crate::oracles::{OracleError, StructuredRecord};
    use crate::retry::RetryPolicy;
    use crate::testing::ScriptedExtraction;

    fn record(value: serde_json::Value) -> StructuredRecord {
        match value {
            serde_json::Value::Object(map) => map,
            _ => StructuredRecord::new(),
        }
    }

    fn normalizer(script: Vec<Result<StructuredRecord, OracleError>>) -> RequirementNormalizer {
        RequirementNormalizer::new(
            Arc::new(ScriptedExtraction::with_script(script)),
            RetryPolicy {
                max_retries: 1,
                base_delay_ms: 0,
                max_delay_ms: 0,
                timeout: Duration::from_secs(1),
            },
        )
    }

    #[test]
    fn schema_lists_every_field_as_required() {
        let schema = requirement_schema();
        let required = schema["parameters"]["required"].as_array().expect("required array");
        assert_eq!(required.len(), 6);
        assert_eq!(schema["parameters"]["properties"]["Budget"]["minimum"], json!(MIN_BUDGET));
        assert_eq!(
            schema["parameters"]["properties"]["GPU intensity"]["enum"],
            json!(["low", "medium", "high"])
        );
    }

    #[tokio::test]
    async fn complete_record_becomes_profile() {
        let profile = normalizer(vec![Ok(record(json!({
            "GPU intensity": "high",
            "Display quality": "High",
            "Portability": "low",
            "Multitasking": "high",
            "Processing speed": "high",
            "Budget": 150000
        })))])
        .normalize("I need a laptop with ...", "turn-1")
        .await
        .expect("valid profile");

        assert_eq!(profile.level(Attribute::Portability), Level::Low);
        assert_eq!(profile.budget(), 150_000);
    }

    #[tokio::test]
    async fn low_budget_is_reported_as_budget_failure() {
        let error = normalizer(vec![Ok(record(json!({
            "GPU intensity": "low",
            "Display quality": "low",
            "Portability": "high",
            "Multitasking": "low",
            "Processing speed": "low",
            "Budget": 20000
        })))])
        .normalize("summary", "turn-2")
        .await
        .expect_err("budget below minimum");

        assert_eq!(error.failure_kind(), FailureKind::BudgetBelowMinimum);
    }

    #[tokio::test]
    async fn missing_field_is_a_silent_schema_failure() {
        let error = normalizer(vec![Ok(record(json!({
            "GPU intensity": "low",
            "Display quality": "low",
            "Portability": "high",
            "Multitasking": "low",
            "Budget": 90000
        })))])
        .normalize("summary", "turn-3")
        .await
        .expect_err("processing speed missing");

        match &error {
            NormalizeError::Invalid(validation) => {
                assert_eq!(validation.missing_fields, vec!["Processing speed".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(error.failure_kind(), FailureKind::SchemaValidationFailed);
        assert_eq!(error.failure_kind().user_message(), None);
    }

    #[tokio::test]
    async fn malformed_oracle_output_is_not_retried() {
        let extraction = Arc::new(ScriptedExtraction::with_script(vec![
            Err(OracleError::Schema("arguments were not JSON".into())),
            Ok(StructuredRecord::new()),
        ]));
        let normalizer = RequirementNormalizer::new(
            extraction.clone(),
            RetryPolicy {
                max_retries: 3,
                base_delay_ms: 0,
                max_delay_ms: 0,
                timeout: Duration::from_secs(1),
            },
        );

        let error = normalizer.normalize("summary", "turn-4").await.expect_err("schema error");
        assert!(matches!(error, NormalizeError::Oracle(OracleError::Schema(_))));
        assert_eq!(extraction.calls().await, 1);
    }
}
