//! Contracts for the opaque language oracles the dialogue depends on.
//!
//! Every oracle returns a tagged [`OracleError`] instead of raw transport
//! text. Adapters map provider-specific replies onto these types at the
//! boundary, so nothing downstream inspects free-form strings to branch.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shopassist_core::domain::features::Taxonomy;
use shopassist_core::domain::transcript::Role;
use shopassist_core::errors::FailureKind;
use thiserror::Error;

/// Loosely-typed key/value record returned by extraction and classification.
pub type StructuredRecord = Map<String, Value>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationVerdict {
    Flagged,
    NotFlagged,
}

/// Whether the conversation so far captures every requirement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    Complete,
    Incomplete,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OracleError {
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
    #[error("oracle timed out after {0}ms")]
    Timeout(u64),
    #[error("oracle returned malformed output: {0}")]
    Schema(String),
}

impl OracleError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Unavailable(_) => FailureKind::OracleUnavailable,
            Self::Timeout(_) => FailureKind::OracleTimeout,
            Self::Schema(_) => FailureKind::SchemaValidationFailed,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.failure_kind().is_transient()
    }
}

#[async_trait]
pub trait CompletionOracle: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, OracleError>;
}

#[async_trait]
pub trait ModerationOracle: Send + Sync {
    async fn moderate(&self, text: &str) -> Result<ModerationVerdict, OracleError>;
}

#[async_trait]
pub trait ConfirmationOracle: Send + Sync {
    async fn confirm(&self, assistant_text: &str) -> Result<Confirmation, OracleError>;
}

#[async_trait]
pub trait ExtractionOracle: Send + Sync {
    async fn extract(&self, text: &str, schema: &Value) -> Result<StructuredRecord, OracleError>;
}

#[async_trait]
pub trait ClassificationOracle: Send + Sync {
    async fn classify(
        &self,
        description: &str,
        taxonomy: &Taxonomy,
    ) -> Result<StructuredRecord, OracleError>;
}

/// The full set of oracles a controller needs. One adapter may back several
/// of these.
#[derive(Clone)]
pub struct Oracles {
    pub completion: Arc<dyn CompletionOracle>,
    pub moderation: Arc<dyn ModerationOracle>,
    pub confirmation: Arc<dyn ConfirmationOracle>,
    pub extraction: Arc<dyn ExtractionOracle>,
    pub classification: Arc<dyn ClassificationOracle>,
}

impl Oracles {
    /// Uses one adapter for every contract.
    pub fn from_adapter<A>(adapter: Arc<A>) -> Self
    where
        A: CompletionOracle
            + ModerationOracle
            + ConfirmationOracle
            + ExtractionOracle
            + ClassificationOracle
            + 'static,
    {
        Self {
            completion: adapter.clone(),
            moderation: adapter.clone(),
            confirmation: adapter.clone(),
            extraction: adapter.clone(),
            classification: adapter,
        }
    }
}
